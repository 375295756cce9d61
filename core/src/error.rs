use std::path::PathBuf;
use thiserror::Error;

/// Rejected batch parameters. Raised before a batch exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing processing mode")]
    MissingMode,

    #[error("unknown processing mode: {0}")]
    UnknownMode(String),

    #[error("{0} is required when the mode includes watermarking")]
    MissingText(&'static str),

    #[error("batch contains no files")]
    NoFiles,

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
}

/// No RAW converter produced a raster file for an input.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("no converter could decode {file} (tried: {attempts})")]
    Exhausted { file: String, attempts: String },

    #[error("{tool} failed for {file}: {message}")]
    Attempt {
        tool: String,
        file: String,
        message: String,
    },

    #[error("{tool} timed out after {secs}s on {file}")]
    Timeout { tool: String, file: String, secs: u64 },

    #[error("failed to prepare scratch directory {path}: {source}")]
    Scratch {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Watermark overlay construction failures.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("no font available to render watermark text")]
    FontUnavailable,

    #[error("failed to load font {path}: {message}")]
    Font { path: PathBuf, message: String },
}

/// Per-file failure inside the image pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("watermark failed: {0}")]
    Overlay(#[from] OverlayError),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("processing panicked: {0}")]
    Panicked(String),
}

/// Archiving collaborator failure.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Failures outside per-file isolation. These end the batch in `Error`.
#[derive(Debug, Error)]
pub enum BatchFatalError {
    #[error("no output files were produced ({failed} of {total} files failed)")]
    EmptyOutput { failed: usize, total: usize },

    #[error("failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("archiving failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("batch is not runnable in state {0}")]
    InvalidState(String),
}

/// Convenience alias for pipeline results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
