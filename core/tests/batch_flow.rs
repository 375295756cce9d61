use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, Rgba, RgbaImage};
use photo_stamp_core::error::ConversionError;
use photo_stamp_core::overlay::{TextLine, TextRenderer};
use photo_stamp_core::{
    Batch, BatchHandle, BatchParams, BatchRegistry, BatchStatus, ConverterChain, FileStatus,
    ImagePipeline, Orchestrator, OutputFormat, ProcessingConfig, ProcessingMode, RawConverter,
    ZipArchiver,
};

/// Opaque white block per character, `font_size / 2` wide.
struct BlockRenderer;

impl TextRenderer for BlockRenderer {
    fn render_line(&self, text: &str, font_size: u32) -> TextLine {
        let width = text.chars().count() as u32 * (font_size / 2);
        TextLine::new(
            RgbaImage::from_pixel(width, font_size, Rgba([255, 255, 255, 255])),
            font_size,
        )
    }
}

/// Stands in for a RAW decoder: "decodes" `.nef` files by writing a PNG, rejects everything else.
struct NefOnly;

impl RawConverter for NefOnly {
    fn name(&self) -> &str {
        "nef-only"
    }

    fn try_convert(&self, input: &Path, scratch: &Path) -> Result<PathBuf, ConversionError> {
        let is_nef = input
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("nef"));
        if !is_nef {
            return Err(ConversionError::Attempt {
                tool: self.name().into(),
                file: input.display().to_string(),
                message: "unsupported camera".into(),
            });
        }
        let out = scratch.join("decoded.png");
        photo(64, 48).save(&out).map_err(|e| ConversionError::Attempt {
            tool: self.name().into(),
            file: input.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(out)
    }
}

fn photo(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(x * 255 / w) as u8, (y * 255 / h) as u8, 120, 255])
    })
}

fn pipeline(format: OutputFormat) -> Arc<ImagePipeline> {
    let config = ProcessingConfig {
        output_format: format,
        converter_timeout: Duration::from_secs(5),
        ..ProcessingConfig::default()
    };
    let mut converters = ConverterChain::new();
    converters.register(Box::new(NefOnly));
    Arc::new(ImagePipeline::new(config, converters).with_renderer(Arc::new(BlockRenderer)))
}

fn upload(root: &Path, mode: ProcessingMode, files: &[(&str, Option<RgbaImage>)]) -> BatchHandle {
    let params = BatchParams::new(mode, "12.05.2024", "Spring Gala").unwrap();
    let mut batch = Batch::in_workspace(root, params);
    fs::create_dir_all(batch.upload_dir()).unwrap();
    for (name, img) in files {
        let path = batch.upload_dir().join(name);
        match img {
            Some(img) => DynamicImage::ImageRgba8(img.clone()).to_rgb8().save(&path).unwrap(),
            None => fs::write(&path, b"\x00raw sensor dump").unwrap(),
        }
        batch.add_file(*name).unwrap();
    }
    batch.seal().unwrap();
    BatchHandle::new(batch)
}

fn zip_entries(path: &Path) -> Vec<String> {
    let zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    names
}

#[test]
fn unconvertible_raw_fails_alone_and_batch_completes() {
    let dir = tempfile::tempdir().unwrap();
    let batch = upload(
        dir.path(),
        ProcessingMode::EditAndWatermark,
        &[
            ("first.png", Some(photo(320, 240))),
            ("second.jpg", Some(photo(200, 300))),
            ("third.cr2", None),
        ],
    );

    let orchestrator = Orchestrator::new(pipeline(OutputFormat::Jpeg), Arc::new(ZipArchiver)).with_workers(2);
    let snap = orchestrator.run(&batch, None);

    assert_eq!(snap.status, BatchStatus::Done);
    assert_eq!((snap.processed, snap.failed, snap.total), (2, 1, 3));
    assert_eq!(snap.processed + snap.failed, snap.total);

    let failed = &snap.files[2];
    assert_eq!(failed.name, "third.cr2");
    assert_eq!(failed.status, FileStatus::Failed);
    let message = failed.error.as_deref().unwrap();
    assert!(message.contains("nef-only"), "{message}");

    let archive = batch.lock().archive_path().to_path_buf();
    assert_eq!(zip_entries(&archive), vec!["first.jpg", "second.jpg"]);
}

#[test]
fn raw_file_goes_through_converter_chain() {
    let dir = tempfile::tempdir().unwrap();
    let batch = upload(dir.path(), ProcessingMode::EditOnly, &[("DSC_0001.NEF", None)]);

    let snap = Orchestrator::new(pipeline(OutputFormat::Png), Arc::new(ZipArchiver)).run(&batch, None);

    assert_eq!(snap.status, BatchStatus::Done);
    let b = batch.lock();
    let out = b.output_dir().join("DSC_0001.png");
    assert_eq!(image::open(&out).unwrap().into_rgba8().dimensions(), (64, 48));
    assert_eq!(zip_entries(b.archive_path()), vec!["DSC_0001.png"]);
}

#[test]
fn single_failing_file_puts_batch_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let batch = upload(dir.path(), ProcessingMode::WatermarkOnly, &[("only.arw", None)]);

    let snap = Orchestrator::new(pipeline(OutputFormat::Jpeg), Arc::new(ZipArchiver)).run(&batch, None);

    assert_eq!(snap.status, BatchStatus::Error);
    assert_eq!((snap.processed, snap.failed, snap.total), (0, 1, 1));
    assert!(snap.error.is_some());
    assert!(!batch.lock().archive_path().exists());
}

#[test]
fn duplicate_stems_do_not_overwrite_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let batch = upload(
        dir.path(),
        ProcessingMode::EditOnly,
        &[
            ("IMG_1.png", Some(photo(40, 40))),
            ("IMG_1.jpg", Some(photo(50, 30))),
        ],
    );

    let snap = Orchestrator::new(pipeline(OutputFormat::WebP), Arc::new(ZipArchiver)).run(&batch, None);

    assert_eq!(snap.status, BatchStatus::Done);
    assert_eq!(snap.processed, 2);
    let archive = batch.lock().archive_path().to_path_buf();
    assert_eq!(zip_entries(&archive), vec!["IMG_1.webp", "IMG_1_2.webp"]);
}

#[test]
fn reused_output_folder_keeps_old_files_out_of_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let batch = upload(
        dir.path(),
        ProcessingMode::EditOnly,
        &[("fresh.png", Some(photo(40, 30))), ("bad.cr2", None)],
    );
    let output_dir = batch.lock().output_dir().to_path_buf();
    fs::create_dir_all(&output_dir).unwrap();
    fs::write(output_dir.join("old.jpg"), b"left over from last week").unwrap();

    let snap = Orchestrator::new(pipeline(OutputFormat::Jpeg), Arc::new(ZipArchiver)).run(&batch, None);

    assert_eq!(snap.status, BatchStatus::Done);
    assert_eq!((snap.processed, snap.failed), (1, 1));
    let archive = batch.lock().archive_path().to_path_buf();
    assert_eq!(zip_entries(&archive), vec!["fresh.jpg"]);
    assert!(output_dir.join("old.jpg").exists());
}

#[test]
fn registry_serves_snapshots_and_evicts_finished_work() {
    let dir = tempfile::tempdir().unwrap();
    let registry = BatchRegistry::new(Duration::from_secs(1), 8);
    let batch = upload(dir.path(), ProcessingMode::EditOnly, &[("a.png", Some(photo(30, 20)))]);
    let id = registry.insert(batch.clone());
    let workspace = batch.lock().workspace_dir().unwrap().to_path_buf();

    Orchestrator::new(pipeline(OutputFormat::Jpeg), Arc::new(ZipArchiver)).run(&batch, None);
    let snap = registry.get(&id).unwrap().snapshot();
    assert_eq!(snap.status, BatchStatus::Done);

    let later = chrono::Utc::now() + chrono::Duration::seconds(5);
    assert_eq!(registry.evict_expired_at(later), 1);
    assert!(registry.get(&id).is_none());
    assert!(!workspace.exists());
}
