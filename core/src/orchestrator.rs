//! Drives one batch from `Queued` to `Done` (or `Error`) on a bounded worker pool.

use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::archive::Archiver;
use crate::batch::{BatchHandle, BatchSnapshot, BatchStatus};
use crate::config::BatchParams;
use crate::error::{BatchFatalError, PipelineError};
use crate::pipeline::ImagePipeline;

/// Called by the aggregator after each settled file with `(done, total)`.
pub type Progress<'a> = &'a dyn Fn(usize, usize);

struct Job {
    index: usize,
    input: PathBuf,
    output: PathBuf,
}

struct Outcome {
    index: usize,
    result: Result<(), PipelineError>,
}

pub struct Orchestrator {
    pipeline: Arc<ImagePipeline>,
    archiver: Arc<dyn Archiver>,
    workers: usize,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<ImagePipeline>, archiver: Arc<dyn Archiver>) -> Self {
        let workers = pipeline.config().worker_count();
        Self {
            pipeline,
            archiver,
            workers,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every file of a `Queued` batch, archive the output and return the final snapshot.
    /// Batch-level failures leave the batch in `Error`; per-file failures only mark that file.
    pub fn run(&self, batch: &BatchHandle, progress: Option<Progress<'_>>) -> BatchSnapshot {
        if let Err(e) = self.execute(batch, progress) {
            batch.lock().fail(e.to_string());
        }
        batch.snapshot()
    }

    fn execute(&self, batch: &BatchHandle, progress: Option<Progress<'_>>) -> Result<(), BatchFatalError> {
        let start = Instant::now();
        let (id, params, inputs, output_dir, archive_path) = {
            let mut b = batch.lock();
            if b.status() != BatchStatus::Queued {
                return Err(BatchFatalError::InvalidState(b.status().to_string()));
            }
            b.transition(BatchStatus::Processing);
            (
                b.id(),
                b.params().clone(),
                b.inputs().to_vec(),
                b.output_dir().to_path_buf(),
                b.archive_path().to_path_buf(),
            )
        };
        let total = inputs.len();
        log::info!(
            "Batch {}: processing {} files ({}, {} workers)",
            id,
            total,
            params.mode(),
            self.workers
        );

        fs::create_dir_all(&output_dir).map_err(|source| BatchFatalError::Directory {
            path: output_dir.clone(),
            source,
        })?;
        let scratch = tempfile::Builder::new()
            .prefix("photo-stamp-")
            .tempdir()
            .map_err(|source| BatchFatalError::Directory {
                path: std::env::temp_dir(),
                source,
            })?;

        let extension = self.pipeline.config().output_format.extension();
        let jobs = plan_jobs(&inputs, &output_dir, extension);
        let planned: Vec<PathBuf> = jobs.iter().map(|job| job.output.clone()).collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("photo-stamp-worker-{i}"))
            .build()?;

        let (job_tx, job_rx) = mpsc::channel();
        for job in jobs {
            // receiver is alive in this scope
            let _ = job_tx.send(job);
        }
        drop(job_tx);
        let job_rx = Mutex::new(job_rx);
        let (result_tx, result_rx) = mpsc::channel::<Outcome>();

        let worker_count = self.workers.min(total).max(1);
        let pipeline = self.pipeline.as_ref();
        let scratch_dir = scratch.path();
        let mut produced = Vec::with_capacity(total);

        std::thread::scope(|threads| {
            let job_rx = &job_rx;
            let params = &params;
            threads.spawn(move || {
                pool.scope(|s| {
                    for _ in 0..worker_count {
                        let results = result_tx.clone();
                        s.spawn(move |_| run_worker(pipeline, job_rx, &results, params, scratch_dir));
                    }
                });
                drop(result_tx);
            });

            let mut done = 0;
            for outcome in result_rx {
                if outcome.result.is_ok() {
                    produced.push(planned[outcome.index].clone());
                }
                done += 1;
                let mut b = batch.lock();
                let name = b.files()[outcome.index].name.clone();
                match outcome.result {
                    Ok(()) => {
                        log::debug!("Batch {}: {} ok", id, name);
                        b.record_success(outcome.index);
                    }
                    Err(e) => {
                        log::warn!("Batch {}: {} failed: {}", id, name, e);
                        b.record_failure(outcome.index, e.to_string());
                    }
                }
                drop(b);
                if let Some(report) = progress {
                    report(done, total);
                }
            }
        });

        let (processed, failed) = {
            let b = batch.lock();
            (b.processed(), b.failed())
        };
        log::info!(
            "Batch {}: {} ok, {} failed in {:.2?}",
            id,
            processed,
            failed,
            start.elapsed()
        );

        // Only files written by this run count; the output dir may hold older ones.
        produced.retain(|path| path.is_file());
        produced.sort();
        if produced.is_empty() {
            return Err(BatchFatalError::EmptyOutput { failed, total });
        }

        batch.lock().transition(BatchStatus::Zipping);
        self.archiver.archive(&produced, &archive_path)?;
        batch.lock().transition(BatchStatus::Done);
        Ok(())
    }
}

fn run_worker(
    pipeline: &ImagePipeline,
    jobs: &Mutex<Receiver<Job>>,
    results: &Sender<Outcome>,
    params: &BatchParams,
    scratch: &Path,
) {
    loop {
        let next = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(job) = next else {
            break;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.process(&job.input, &job.output, params, scratch)
        }))
        .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(payload.as_ref()))));

        if result.is_err() {
            // never leave a partial file behind for the archiver
            let _ = fs::remove_file(&job.output);
        }
        if results.send(Outcome { index: job.index, result }).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One job per input, each with its own destination file.
fn plan_jobs(inputs: &[PathBuf], output_dir: &Path, extension: &str) -> Vec<Job> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("image_{}", index + 1));
            let name = unique_name(&mut taken, &stem, extension);
            Job {
                index,
                input: input.clone(),
                output: output_dir.join(name),
            }
        })
        .collect()
}

fn unique_name(taken: &mut HashSet<String>, stem: &str, extension: &str) -> String {
    let mut name = format!("{stem}.{extension}");
    let mut n = 2;
    while !taken.insert(name.to_lowercase()) {
        name = format!("{stem}_{n}.{extension}");
        n += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, FileStatus};
    use crate::config::{ProcessingConfig, ProcessingMode};
    use crate::converter::ConverterChain;
    use crate::error::ArchiveError;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingArchiver(AtomicUsize);

    impl Archiver for CountingArchiver {
        fn archive(&self, files: &[PathBuf], dest: &Path) -> Result<(), ArchiveError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            assert!(!files.is_empty());
            assert!(files.iter().all(|f| f.is_file()));
            fs::write(dest, b"zip").map_err(|source| ArchiveError::Io {
                path: dest.to_path_buf(),
                source,
            })
        }
    }

    struct BrokenArchiver;

    impl Archiver for BrokenArchiver {
        fn archive(&self, _files: &[PathBuf], dest: &Path) -> Result<(), ArchiveError> {
            Err(ArchiveError::Io {
                path: dest.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }
    }

    fn pipeline() -> Arc<ImagePipeline> {
        Arc::new(ImagePipeline::new(ProcessingConfig::default(), ConverterChain::new()))
    }

    fn write_photo(path: &Path) {
        let img = RgbaImage::from_fn(40, 30, |x, y| Rgba([(x * 6) as u8, (y * 8) as u8, 90, 255]));
        img.save(path).unwrap();
    }

    fn queued_batch(root: &Path, names: &[&str]) -> BatchHandle {
        let params = BatchParams::new(ProcessingMode::EditOnly, "", "").unwrap();
        let mut batch = Batch::in_workspace(root, params);
        fs::create_dir_all(batch.upload_dir()).unwrap();
        for name in names {
            let path = batch.upload_dir().join(name);
            if name.ends_with(".png") {
                write_photo(&path);
            } else {
                fs::write(&path, b"not an image").unwrap();
            }
            batch.add_file(*name).unwrap();
        }
        batch.seal().unwrap();
        BatchHandle::new(batch)
    }

    #[test]
    fn unique_names_suffix_duplicates() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name(&mut taken, "IMG_1", "jpg"), "IMG_1.jpg");
        assert_eq!(unique_name(&mut taken, "IMG_1", "jpg"), "IMG_1_2.jpg");
        assert_eq!(unique_name(&mut taken, "img_1", "jpg"), "img_1_3.jpg");
    }

    #[test]
    fn plan_maps_stems_to_output_extension() {
        let inputs = vec![PathBuf::from("/in/a.NEF"), PathBuf::from("/other/a.png")];
        let jobs = plan_jobs(&inputs, Path::new("/out"), "jpg");
        assert_eq!(jobs[0].output, PathBuf::from("/out/a.jpg"));
        assert_eq!(jobs[1].output, PathBuf::from("/out/a_2.jpg"));
        assert_eq!(jobs[1].index, 1);
    }

    #[test]
    fn mixed_batch_settles_every_file_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let batch = queued_batch(dir.path(), &["a.png", "b.png", "broken.jpg", "c.png"]);
        let archiver = Arc::new(CountingArchiver(AtomicUsize::new(0)));
        let orchestrator = Orchestrator::new(pipeline(), archiver.clone()).with_workers(2);

        let calls = std::cell::RefCell::new(Vec::new());
        let progress = |done: usize, total: usize| calls.borrow_mut().push((done, total));
        let snap = orchestrator.run(&batch, Some(&progress));

        assert_eq!(snap.status, BatchStatus::Done);
        assert_eq!((snap.processed, snap.failed, snap.total), (3, 1, 4));
        assert_eq!(snap.files[2].status, FileStatus::Failed);
        assert!(snap.files[2].error.is_some());
        assert_eq!(archiver.0.load(Ordering::SeqCst), 1);
        assert!(batch.lock().archive_path().exists());
        assert_eq!(calls.borrow().last(), Some(&(4, 4)));
        assert_eq!(calls.borrow().len(), 4);
    }

    #[test]
    fn all_failed_batch_ends_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let batch = queued_batch(dir.path(), &["broken.jpg"]);
        let archiver = Arc::new(CountingArchiver(AtomicUsize::new(0)));
        let snap = Orchestrator::new(pipeline(), archiver.clone()).run(&batch, None);

        assert_eq!(snap.status, BatchStatus::Error);
        assert_eq!(snap.processed + snap.failed, snap.total);
        assert!(snap.error.unwrap().contains("no output files"));
        assert_eq!(archiver.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn leftover_files_in_output_dir_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let batch = queued_batch(dir.path(), &["broken.jpg"]);
        let output_dir = batch.lock().output_dir().to_path_buf();
        fs::create_dir_all(&output_dir).unwrap();
        write_photo(&output_dir.join("old.png"));

        let archiver = Arc::new(CountingArchiver(AtomicUsize::new(0)));
        let snap = Orchestrator::new(pipeline(), archiver.clone()).run(&batch, None);

        assert_eq!(snap.status, BatchStatus::Error);
        assert_eq!((snap.processed, snap.failed), (0, 1));
        assert_eq!(archiver.0.load(Ordering::SeqCst), 0);
        assert!(output_dir.join("old.png").exists());
    }

    #[test]
    fn archive_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let batch = queued_batch(dir.path(), &["a.png"]);
        let snap = Orchestrator::new(pipeline(), Arc::new(BrokenArchiver)).run(&batch, None);
        assert_eq!(snap.status, BatchStatus::Error);
        assert_eq!(snap.processed, 1);
        assert!(snap.error.unwrap().contains("disk full"));
    }

    #[test]
    fn only_queued_batches_run() {
        let dir = tempfile::tempdir().unwrap();
        let params = BatchParams::new(ProcessingMode::EditOnly, "", "").unwrap();
        let batch = BatchHandle::new(Batch::in_workspace(dir.path(), params));
        let snap = Orchestrator::new(pipeline(), Arc::new(BrokenArchiver)).run(&batch, None);
        assert_eq!(snap.status, BatchStatus::Error);
        assert!(snap.error.unwrap().contains("uploading"));
    }

    #[test]
    fn single_worker_pool_completes() {
        let dir = tempfile::tempdir().unwrap();
        let batch = queued_batch(dir.path(), &["a.png", "b.png", "c.png"]);
        let archiver = Arc::new(CountingArchiver(AtomicUsize::new(0)));
        let snap = Orchestrator::new(pipeline(), archiver).with_workers(1).run(&batch, None);
        assert_eq!(snap.status, BatchStatus::Done);
        assert_eq!(snap.processed, 3);
    }

    #[test]
    fn panic_message_extracts_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
