//! Batch state: counters, per-file records, and the status state machine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{BatchParams, ProcessingMode};
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Uploading,
    Queued,
    Processing,
    Zipping,
    Done,
    Error,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Forward transitions plus `Error` from any non-terminal state.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        match (self, next) {
            (s, Error) => !s.is_terminal(),
            (Uploading, Queued) | (Queued, Processing) | (Processing, Zipping) | (Zipping, Done) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Zipping => "zipping",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Queued,
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub name: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileRecord {
    fn queued(name: String) -> Self {
        Self {
            name,
            status: FileStatus::Queued,
            error: None,
        }
    }
}

/// Point-in-time view of a batch, as reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub id: Uuid,
    pub mode: ProcessingMode,
    pub status: BatchStatus,
    pub processed: usize,
    pub total: usize,
    pub failed: usize,
    pub files: Vec<FileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Batch {
    id: Uuid,
    params: BatchParams,
    created_at: DateTime<Utc>,
    status: BatchStatus,
    processed: usize,
    failed: usize,
    files: Vec<FileRecord>,
    inputs: Vec<PathBuf>,
    upload_dir: PathBuf,
    output_dir: PathBuf,
    archive_path: PathBuf,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

impl Batch {
    /// New batch in `Uploading`. Files are added with [`Batch::add_file`].
    pub fn new(
        id: Uuid,
        params: BatchParams,
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        archive_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            params,
            created_at: Utc::now(),
            status: BatchStatus::Uploading,
            processed: 0,
            failed: 0,
            files: Vec::new(),
            inputs: Vec::new(),
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            archive_path: archive_path.into(),
            error: None,
            finished_at: None,
        }
    }

    /// Lay the batch out under `root/<id>/{uploads,output}` with the archive at `root/<id>/<id>.zip`.
    pub fn in_workspace(root: &Path, params: BatchParams) -> Self {
        Self::in_workspace_with_id(root, Uuid::new_v4(), params)
    }

    pub fn in_workspace_with_id(root: &Path, id: Uuid, params: BatchParams) -> Self {
        let base = Self::workspace_for(root, id);
        Self::new(
            id,
            params,
            base.join("uploads"),
            base.join("output"),
            base.join(format!("{id}.zip")),
        )
    }

    /// `root/<id>`, the directory [`Batch::in_workspace`] lays a batch out in.
    pub fn workspace_for(root: &Path, id: Uuid) -> PathBuf {
        root.join(id.to_string())
    }

    /// Register an uploaded file living in the upload directory.
    pub fn add_file(&mut self, name: impl Into<String>) -> Result<(), ValidationError> {
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ValidationError::InvalidFileName(name));
        }
        let path = self.upload_dir.join(&name);
        self.push_input(name, path)
    }

    /// Register a file read in place from anywhere on disk.
    pub fn add_source(&mut self, path: impl Into<PathBuf>) -> Result<(), ValidationError> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ValidationError::InvalidFileName(path.display().to_string()))?;
        self.push_input(name, path)
    }

    fn push_input(&mut self, name: String, path: PathBuf) -> Result<(), ValidationError> {
        if self.status != BatchStatus::Uploading {
            return Err(ValidationError::InvalidFileName(name));
        }
        self.files.push(FileRecord::queued(name));
        self.inputs.push(path);
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn params(&self) -> &BatchParams {
        &self.params
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    /// Input paths, index-aligned with [`Batch::files`].
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Base directory holding this batch's uploads, output and archive.
    pub fn workspace_dir(&self) -> Option<&Path> {
        self.output_dir.parent()
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the batch reached `Done` or `Error`.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Move to `next`. Returns false (and changes nothing) for an illegal transition.
    pub fn transition(&mut self, next: BatchStatus) -> bool {
        if !self.status.can_transition_to(next) {
            log::warn!("Batch {}: ignoring transition {} -> {}", self.id, self.status, next);
            return false;
        }
        log::debug!("Batch {}: {} -> {}", self.id, self.status, next);
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Close intake. Fails if no file was added.
    pub fn seal(&mut self) -> Result<(), ValidationError> {
        if self.files.is_empty() {
            return Err(ValidationError::NoFiles);
        }
        self.transition(BatchStatus::Queued);
        Ok(())
    }

    /// Put the batch in `Error` with a top-level message.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.transition(BatchStatus::Error) {
            log::error!("Batch {} failed: {}", self.id, message);
            self.error = Some(message);
        }
    }

    pub fn record_success(&mut self, index: usize) -> bool {
        self.record(index, FileStatus::Ok, None)
    }

    pub fn record_failure(&mut self, index: usize, error: impl Into<String>) -> bool {
        self.record(index, FileStatus::Failed, Some(error.into()))
    }

    /// Each record is settled at most once, so `processed + failed <= total` holds.
    fn record(&mut self, index: usize, status: FileStatus, error: Option<String>) -> bool {
        let Some(file) = self.files.get_mut(index) else {
            return false;
        };
        if file.status != FileStatus::Queued {
            log::warn!("Batch {}: {} already settled", self.id, file.name);
            return false;
        }
        file.status = status;
        file.error = error;
        match status {
            FileStatus::Ok => self.processed += 1,
            FileStatus::Failed => self.failed += 1,
            FileStatus::Queued => {}
        }
        true
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            id: self.id,
            mode: self.params.mode(),
            status: self.status,
            processed: self.processed,
            total: self.total(),
            failed: self.failed,
            files: self.files.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
        }
    }
}

/// Shared handle: the orchestrator mutates, status queries take snapshots.
#[derive(Debug, Clone)]
pub struct BatchHandle(Arc<Mutex<Batch>>);

impl BatchHandle {
    pub fn new(batch: Batch) -> Self {
        Self(Arc::new(Mutex::new(batch)))
    }

    /// Lock the batch. A poisoned lock is recovered; batch fields stay consistent
    /// because every mutation is a single method call.
    pub fn lock(&self) -> MutexGuard<'_, Batch> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.lock().snapshot()
    }

    pub fn status(&self) -> BatchStatus {
        self.lock().status()
    }
}
