use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("output directory {0} is inside the input directory")]
    OutputInsideInput(PathBuf),

    #[error("directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),
}
