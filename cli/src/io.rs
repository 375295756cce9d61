use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use photo_stamp_core::format::InputClass;

use crate::error::CliError;

/// Collect all photo files (raster or RAW) from the input path, sorted.
/// If `recursive` is true, walk subdirectories.
pub fn collect_files(input: &Path, recursive: bool) -> Result<Vec<PathBuf>, CliError> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    if !input.is_dir() {
        return Err(CliError::InputNotFound(input.to_path_buf()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in WalkDir::new(input).max_depth(max_depth) {
        let entry = entry?;
        if !entry.file_type().is_file() || is_hidden(entry.path()) {
            continue;
        }
        let path = entry.into_path();
        if is_photo(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn is_photo(path: &Path) -> bool {
    matches!(InputClass::from_path(path), InputClass::Raster | InputClass::Raw)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

/// A recursive walk must not pick up its own results on the next run.
pub fn check_output_location(input: &Path, output: &Path, recursive: bool) -> Result<(), CliError> {
    if !recursive || !input.is_dir() {
        return Ok(());
    }
    if absolute(output).starts_with(absolute(input)) {
        return Err(CliError::OutputInsideInput(output.to_path_buf()));
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(p) = fs::canonicalize(path) {
        return p;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(p) = fs::canonicalize(parent) {
            return p.join(name);
        }
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Total size of the regular files in a directory.
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn collects_photos_only() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.JPG"));
        touch(&dir.path().join("a.nef"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join(".hidden.jpg"));
        touch(&dir.path().join("sub/c.png"));

        let flat = collect_files(dir.path(), false).unwrap();
        let names: Vec<_> = flat.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.nef", "b.JPG"]);

        let deep = collect_files(dir.path(), true).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&dir.path().join("sub/c.png")));
    }

    #[test]
    fn single_file_is_taken_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("odd.bin");
        touch(&file);
        assert_eq!(collect_files(&file, false).unwrap(), vec![file]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let err = collect_files(Path::new("/definitely/not/here"), true).unwrap_err();
        assert!(matches!(err, CliError::InputNotFound(_)));
    }

    #[test]
    fn output_inside_recursive_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("done");
        assert!(check_output_location(dir.path(), &out, true).is_err());
        assert!(check_output_location(dir.path(), &out, false).is_ok());
        let elsewhere = tempfile::tempdir().unwrap();
        assert!(check_output_location(dir.path(), elsewhere.path(), true).is_ok());
    }

    #[test]
    fn dir_size_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("b"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(dir.path()), 15);
    }
}
