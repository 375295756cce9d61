//! Packing a batch's output files into a single downloadable file.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

/// Packs a batch's output files into one archive at `dest`.
pub trait Archiver: Send + Sync {
    /// `files` are stored flat under their file names.
    fn archive(&self, files: &[PathBuf], dest: &Path) -> Result<(), ArchiveError>;
}

/// Flat deflate zip. Entries are sorted by name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiver;

impl Archiver for ZipArchiver {
    fn archive(&self, files: &[PathBuf], dest: &Path) -> Result<(), ArchiveError> {
        let mut entries: Vec<(String, &Path)> = files
            .iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some((name, path.as_path()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_err(parent))?;
        let tmp = NamedTempFile::new_in(parent).map_err(io_err(parent))?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(tmp);
        for (name, path) in &entries {
            let mut file = File::open(path).map_err(io_err(path))?;
            zip.start_file(name.as_str(), options)?;
            io::copy(&mut file, &mut zip).map_err(io_err(path))?;
        }
        let tmp = zip.finish()?;

        tmp.persist(dest).map_err(|e| ArchiveError::Io {
            path: dest.to_path_buf(),
            source: e.error,
        })?;
        log::info!("Archived {} files into {}", entries.len(), dest.display());
        Ok(())
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn zips_only_the_listed_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("out");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("b.jpg"), b"bbbb").unwrap();
        fs::write(src.join("a.png"), b"aaaa").unwrap();
        fs::write(src.join("stale.jpg"), b"from an earlier run").unwrap();

        let dest = dir.path().join("batch.zip");
        ZipArchiver
            .archive(&[src.join("b.jpg"), src.join("a.png")], &dest)
            .unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let names: Vec<_> = zip.file_names().map(str::to_string).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["a.png", "b.jpg"]);

        let mut body = String::new();
        zip.by_name("b.jpg").unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "bbbb");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ZipArchiver
            .archive(&[dir.path().join("nope.jpg")], &dir.path().join("x.zip"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(!dir.path().join("x.zip").exists());
    }
}
