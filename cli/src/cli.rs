use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use photo_stamp_core::config::{BatchParams, OverlaySettings, ProcessingConfig, ProcessingMode};
use photo_stamp_core::converter::ConverterKind;
use photo_stamp_core::error::ValidationError;
use photo_stamp_core::format::OutputFormat;

/// Batch color correction and watermarking for event photos
#[derive(Debug, Parser)]
#[command(name = "photo_stamp", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process a directory (or a single file) as one batch
    Process(ProcessArgs),

    /// Show how a file would be handled without processing it
    Inspect {
        /// Input file
        input: PathBuf,

        /// Output format the file would be encoded to
        #[arg(long, value_name = "FORMAT", default_value = "jpg", value_parser = parse_format)]
        format: OutputFormat,
    },
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Input file or directory
    pub input: PathBuf,

    /// Output directory for finished photos
    pub output: PathBuf,

    /// edit-watermark, edit-only or watermark-only
    #[arg(short, long)]
    pub mode: ProcessingMode,

    /// Date line of the watermark (required for watermark modes)
    #[arg(long, default_value = "")]
    pub date: String,

    /// Event line of the watermark (required for watermark modes)
    #[arg(long, default_value = "")]
    pub event: String,

    /// Logo placed above the watermark text
    #[arg(long, env = "PHOTO_STAMP_LOGO")]
    pub logo: Option<PathBuf>,

    /// TTF/OTF font for the watermark text (default: first system font found)
    #[arg(long, env = "PHOTO_STAMP_FONT")]
    pub font: Option<PathBuf>,

    /// Output format (jpg, png, webp)
    #[arg(short, long, value_name = "FORMAT", default_value = "jpg", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Zip archive to write (default: <OUTPUT>.zip)
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// Worker threads (default: cores - 1, at most 4)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub workers: Option<u16>,

    /// RAW converters to try, in order (darktable, rawtherapee, dcraw, magick)
    #[arg(long = "converter", value_name = "NAME", value_parser = parse_converter)]
    pub converters: Vec<ConverterKind>,

    /// Seconds before a RAW converter run is killed
    #[arg(long, default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..))]
    pub converter_timeout: u64,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,
}

impl ProcessArgs {
    pub fn batch_params(&self) -> Result<BatchParams, ValidationError> {
        BatchParams::new(self.mode, self.date.as_str(), self.event.as_str())
    }

    pub fn processing_config(&self) -> ProcessingConfig {
        let defaults = ProcessingConfig::default();
        ProcessingConfig {
            output_format: self.format,
            overlay: OverlaySettings {
                logo_path: self.logo.clone(),
                font_path: self.font.clone(),
                ..OverlaySettings::default()
            },
            workers: self.workers.map(usize::from),
            converters: if self.converters.is_empty() {
                defaults.converters.clone()
            } else {
                self.converters.clone()
            },
            converter_timeout: Duration::from_secs(self.converter_timeout),
            ..defaults
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.archive
            .clone()
            .unwrap_or_else(|| self.output.with_extension("zip"))
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    OutputFormat::from_name(s).ok_or_else(|| format!("unknown format {s:?}, use jpg, png or webp"))
}

fn parse_converter(s: &str) -> Result<ConverterKind, String> {
    ConverterKind::from_name(s).ok_or_else(|| format!("unknown converter {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(args: &[&str]) -> ProcessArgs {
        let mut argv = vec!["photo_stamp", "process", "in", "out"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Process(p) => p,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn defaults_follow_processing_config() {
        let args = process(&["--mode", "edit-only"]);
        assert_eq!(args.mode, ProcessingMode::EditOnly);
        assert_eq!(args.archive_path(), PathBuf::from("out.zip"));

        let config = args.processing_config();
        assert_eq!(config.output_format, OutputFormat::Jpeg);
        assert_eq!(config.converters, ConverterKind::default_order().to_vec());
        assert_eq!(config.converter_timeout, Duration::from_secs(120));
        assert!(config.workers.is_none());
        assert!(args.batch_params().is_ok());
    }

    #[test]
    fn watermark_mode_needs_texts() {
        let args = process(&["--mode", "edit-watermark", "--date", "1 May"]);
        assert_eq!(
            args.batch_params(),
            Err(ValidationError::MissingText("eventText"))
        );
        let args = process(&["-m", "watermark-only", "--date", "1 May", "--event", "Gala"]);
        assert_eq!(args.batch_params().unwrap().event_text(), "Gala");
    }

    #[test]
    fn overrides_reach_config() {
        let args = process(&[
            "--mode",
            "edit-only",
            "--format",
            "webp",
            "--workers",
            "2",
            "--converter",
            "dcraw",
            "--converter",
            "magick",
            "--converter-timeout",
            "30",
            "--archive",
            "/tmp/x.zip",
        ]);
        let config = args.processing_config();
        assert_eq!(config.output_format, OutputFormat::WebP);
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.converters, vec![ConverterKind::Dcraw, ConverterKind::ImageMagick]);
        assert_eq!(config.converter_timeout, Duration::from_secs(30));
        assert_eq!(args.archive_path(), PathBuf::from("/tmp/x.zip"));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Cli::try_parse_from(["photo_stamp", "process", "a", "b", "--mode", "sepia"]).is_err());
        assert!(Cli::try_parse_from(["photo_stamp", "process", "a", "b"]).is_err());
        assert!(Cli::try_parse_from([
            "photo_stamp", "process", "a", "b", "--mode", "edit-only", "--format", "gif"
        ])
        .is_err());
    }
}
