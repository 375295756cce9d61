use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use photo_stamp_core::batch::{BatchSnapshot, BatchStatus, FileStatus};

/// End-of-run summary for one batch.
pub struct Report {
    pub snapshot: BatchSnapshot,
    pub output_bytes: u64,
    pub archive: Option<PathBuf>,
    pub elapsed: Duration,
}

impl Report {
    pub fn success_count(&self) -> usize {
        self.snapshot.processed
    }

    pub fn error_count(&self) -> usize {
        self.snapshot.failed
    }

    pub fn render(&self) -> String {
        let snap = &self.snapshot;
        let mut out = String::new();
        let _ = writeln!(out, "\n--- Summary ---");
        let _ = writeln!(
            out,
            "Batch {} ({}): {}",
            snap.id, snap.mode, snap.status
        );
        let _ = writeln!(
            out,
            "Files processed: {} | Errors: {} | Total: {} | {:.1}s",
            self.success_count(),
            self.error_count(),
            snap.total,
            self.elapsed.as_secs_f64()
        );

        if self.success_count() > 0 {
            let _ = writeln!(out, "Output: {}", format_size(self.output_bytes));
        }
        if let (BatchStatus::Done, Some(archive)) = (snap.status, &self.archive) {
            let _ = writeln!(out, "Archive: {}", archive.display());
        }
        if let Some(err) = &snap.error {
            let _ = writeln!(out, "Batch error: {}", err);
        }

        for file in snap.files.iter().filter(|f| f.status == FileStatus::Failed) {
            let _ = writeln!(
                out,
                "  ERROR {}: {}",
                file.name,
                file.error.as_deref().unwrap_or("unknown error")
            );
        }
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.render());
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photo_stamp_core::batch::{Batch, BatchHandle};
    use photo_stamp_core::config::{BatchParams, ProcessingMode};
    use std::path::Path;

    fn snapshot(done: bool) -> BatchSnapshot {
        let params = BatchParams::new(ProcessingMode::EditOnly, "", "").unwrap();
        let mut batch = Batch::in_workspace(Path::new("/tmp/stamp"), params);
        batch.add_file("a.jpg").unwrap();
        batch.add_file("b.cr2").unwrap();
        batch.seal().unwrap();
        let handle = BatchHandle::new(batch);
        {
            let mut b = handle.lock();
            b.record_success(0);
            b.record_failure(1, "no converter could decode b.cr2");
            if done {
                b.transition(BatchStatus::Processing);
                b.transition(BatchStatus::Zipping);
                b.transition(BatchStatus::Done);
            }
        }
        handle.snapshot()
    }

    #[test]
    fn summary_lists_failures_and_archive() {
        let report = Report {
            snapshot: snapshot(true),
            output_bytes: 2048,
            archive: Some(PathBuf::from("out.zip")),
            elapsed: Duration::from_millis(1500),
        };
        let text = report.render();
        assert!(text.contains("Files processed: 1 | Errors: 1 | Total: 2 | 1.5s"));
        assert!(text.contains("Output: 2.0 KB"));
        assert!(text.contains("Archive: out.zip"));
        assert!(text.contains("  ERROR b.cr2: no converter could decode b.cr2"));
    }

    #[test]
    fn unfinished_batch_has_no_archive_line() {
        let report = Report {
            snapshot: snapshot(false),
            output_bytes: 0,
            archive: Some(PathBuf::from("out.zip")),
            elapsed: Duration::ZERO,
        };
        assert!(!report.render().contains("Archive:"));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
