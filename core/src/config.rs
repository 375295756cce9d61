use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::converter::ConverterKind;
use crate::error::ValidationError;
use crate::format::OutputFormat;

/// What a batch does to each photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingMode {
    #[serde(rename = "edit-watermark")]
    EditAndWatermark,
    #[serde(rename = "edit-only")]
    EditOnly,
    #[serde(rename = "watermark-only")]
    WatermarkOnly,
}

impl ProcessingMode {
    pub fn edits(&self) -> bool {
        matches!(self, Self::EditAndWatermark | Self::EditOnly)
    }

    pub fn watermarks(&self) -> bool {
        matches!(self, Self::EditAndWatermark | Self::WatermarkOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EditAndWatermark => "edit-watermark",
            Self::EditOnly => "edit-only",
            Self::WatermarkOnly => "watermark-only",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Err(ValidationError::MissingMode),
            "edit-watermark" => Ok(Self::EditAndWatermark),
            "edit-only" => Ok(Self::EditOnly),
            "watermark-only" => Ok(Self::WatermarkOnly),
            _ => Err(ValidationError::UnknownMode(s.to_string())),
        }
    }
}

/// Validated per-batch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchParams {
    mode: ProcessingMode,
    date_text: String,
    event_text: String,
}

impl BatchParams {
    pub fn new(
        mode: ProcessingMode,
        date_text: impl Into<String>,
        event_text: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let date_text = date_text.into().trim().to_string();
        let event_text = event_text.into().trim().to_string();

        if mode.watermarks() {
            if date_text.is_empty() {
                return Err(ValidationError::MissingText("dateText"));
            }
            if event_text.is_empty() {
                return Err(ValidationError::MissingText("eventText"));
            }
        }

        Ok(Self {
            mode,
            date_text,
            event_text,
        })
    }

    /// Parse the raw intake fields.
    pub fn parse(
        mode: Option<&str>,
        date_text: Option<&str>,
        event_text: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let mode: ProcessingMode = mode.ok_or(ValidationError::MissingMode)?.parse()?;
        Self::new(mode, date_text.unwrap_or_default(), event_text.unwrap_or_default())
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn date_text(&self) -> &str {
        &self.date_text
    }

    pub fn event_text(&self) -> &str {
        &self.event_text
    }
}

/// Watermark layout settings.
#[derive(Debug, Clone)]
pub struct OverlaySettings {
    /// Logo image placed above the text.
    pub logo_path: Option<PathBuf>,
    /// TTF/OTF used for the text. Searched in system font dirs when unset.
    pub font_path: Option<PathBuf>,
    /// Distance from the photo edge, in multiples of the font size.
    pub margin_em: f32,
    /// Widest text block allowed, as a fraction of the photo width.
    pub text_max_width_pct: f32,
    /// Global opacity applied to the composited overlay, 0.0-1.0.
    pub opacity: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            logo_path: None,
            font_path: None,
            margin_em: 1.0,
            text_max_width_pct: 0.6,
            opacity: 0.85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Encoding of the finished images
    pub output_format: OutputFormat,
    /// JPEG quality 1-100
    pub jpeg_quality: u8,
    /// WebP quality 0-100
    pub webp_quality: f32,
    /// Watermark layout
    pub overlay: OverlaySettings,
    /// Overrides the computed worker pool size
    pub workers: Option<usize>,
    /// RAW converters, tried in order
    pub converters: Vec<ConverterKind>,
    /// Deadline for a single external converter run
    pub converter_timeout: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Jpeg,
            jpeg_quality: 90,
            webp_quality: 90.0,
            overlay: OverlaySettings::default(),
            workers: None,
            converters: ConverterKind::default_order().to_vec(),
            converter_timeout: Duration::from_secs(120),
        }
    }
}

impl ProcessingConfig {
    /// Worker pool size: `min(4, max(1, cores - 1))` unless overridden.
    pub fn worker_count(&self) -> usize {
        if let Some(n) = self.workers {
            return n.max(1);
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        pool_size(cores)
    }
}

pub(crate) fn pool_size(cores: usize) -> usize {
    cores.saturating_sub(1).max(1).min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings_are_stable() {
        for mode in [
            ProcessingMode::EditAndWatermark,
            ProcessingMode::EditOnly,
            ProcessingMode::WatermarkOnly,
        ] {
            assert_eq!(mode.to_string().parse::<ProcessingMode>().unwrap(), mode);
        }
        assert_eq!(
            "Edit-Only".parse::<ProcessingMode>().unwrap(),
            ProcessingMode::EditOnly
        );
        assert_eq!(
            "resize".parse::<ProcessingMode>(),
            Err(ValidationError::UnknownMode("resize".into()))
        );
    }

    #[test]
    fn watermark_modes_require_both_texts() {
        let err = BatchParams::new(ProcessingMode::WatermarkOnly, "2024-05-01", "  ").unwrap_err();
        assert_eq!(err, ValidationError::MissingText("eventText"));

        let err = BatchParams::parse(Some("edit-watermark"), None, Some("Offsite")).unwrap_err();
        assert_eq!(err, ValidationError::MissingText("dateText"));

        let ok = BatchParams::parse(Some("edit-only"), None, None).unwrap();
        assert_eq!(ok.mode(), ProcessingMode::EditOnly);
        assert!(ok.date_text().is_empty());
    }

    #[test]
    fn missing_mode_is_rejected() {
        assert_eq!(
            BatchParams::parse(None, Some("a"), Some("b")).unwrap_err(),
            ValidationError::MissingMode
        );
    }

    #[test]
    fn pool_size_is_bounded() {
        assert_eq!(pool_size(1), 1);
        assert_eq!(pool_size(2), 1);
        assert_eq!(pool_size(4), 3);
        assert_eq!(pool_size(16), 4);
    }
}
