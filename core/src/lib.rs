//! Batch photo engine: RAW conversion fallback, color edit, watermark overlay,
//! encoding, and the worker pool that drives a whole batch into an archive.

pub mod archive;
pub mod batch;
pub mod color;
pub mod config;
pub mod converter;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod overlay;
pub mod pipeline;
pub mod registry;

pub use archive::{Archiver, ZipArchiver};
pub use batch::{Batch, BatchHandle, BatchSnapshot, BatchStatus, FileRecord, FileStatus};
pub use config::{BatchParams, OverlaySettings, ProcessingConfig, ProcessingMode};
pub use converter::{ConverterChain, ConverterKind, RawConverter};
pub use format::{InputClass, OutputFormat};
pub use orchestrator::Orchestrator;
pub use pipeline::ImagePipeline;
pub use registry::BatchRegistry;
