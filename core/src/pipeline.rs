use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat as ImgFormat, RgbaImage};
use tempfile::NamedTempFile;

use crate::color;
use crate::config::{BatchParams, ProcessingConfig};
use crate::converter::ConverterChain;
use crate::error::{OverlayError, PipelineError, PipelineResult};
use crate::format::OutputFormat;
use crate::overlay::{self, GlyphRenderer, OverlayRequest, TextRenderer};

/// Working size used when the decoder cannot report one.
pub const DEFAULT_DIMENSIONS: (u32, u32) = (2000, 1333);

/// Turns one input file into one finished output file.
pub struct ImagePipeline {
    config: ProcessingConfig,
    converters: ConverterChain,
    renderer: Option<Arc<dyn TextRenderer>>,
}

impl ImagePipeline {
    pub fn new(config: ProcessingConfig, converters: ConverterChain) -> Self {
        Self {
            config,
            converters,
            renderer: None,
        }
    }

    /// Pipeline with the configured converters and the configured (or a system) font.
    pub fn from_config(config: ProcessingConfig) -> Self {
        let converters = ConverterChain::from_config(&config);
        let renderer = match GlyphRenderer::discover(config.overlay.font_path.as_deref()) {
            Ok(r) => Some(Arc::new(r) as Arc<dyn TextRenderer>),
            Err(e) => {
                log::warn!("Watermark text disabled: {}", e);
                None
            }
        };
        Self {
            config,
            converters,
            renderer,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TextRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn can_render_text(&self) -> bool {
        self.renderer.is_some()
    }

    /// Convert, adjust, watermark and encode `input` into `output`.
    /// RAW intermediates are written under `scratch`.
    pub fn process(
        &self,
        input: &Path,
        output: &Path,
        params: &BatchParams,
        scratch: &Path,
    ) -> PipelineResult<()> {
        let start = std::time::Instant::now();
        let raster = self.converters.ensure_raster(input, scratch)?;

        let (width, height) = probe_dimensions(&raster).unwrap_or_else(|| {
            log::warn!(
                "Could not read dimensions of {}, assuming {}x{}",
                raster.display(),
                DEFAULT_DIMENSIONS.0,
                DEFAULT_DIMENSIONS.1
            );
            DEFAULT_DIMENSIONS
        });

        let mut img = decode(&raster)?.to_rgba8();

        if params.mode().edits() {
            let (edited, applied) = color::apply_edit(&img);
            log::trace!("Color adjustment for {}: {:?}", input.display(), applied);
            img = edited;
        }

        if params.mode().watermarks() {
            self.watermark(&mut img, width, height, params)?;
        }

        let format = OutputFormat::from_path(output);
        let encoded = self.encode(img, format)?;
        write_atomic(output, &encoded)?;

        log::debug!(
            "Processed {} -> {} ({}, {} bytes) in {:?}",
            input.display(),
            output.display(),
            format.as_str(),
            encoded.len(),
            start.elapsed()
        );
        Ok(())
    }

    fn watermark(
        &self,
        img: &mut RgbaImage,
        width: u32,
        height: u32,
        params: &BatchParams,
    ) -> PipelineResult<()> {
        let settings = &self.config.overlay;
        let has_text = !overlay::watermark_phrase(params.event_text(), params.date_text()).is_empty();
        let renderer: &dyn TextRenderer = match (&self.renderer, has_text) {
            (Some(r), _) => r.as_ref(),
            (None, true) => return Err(OverlayError::FontUnavailable.into()),
            (None, false) => &NoText,
        };

        let request = OverlayRequest {
            base_width: width,
            base_height: height,
            date_text: params.date_text(),
            event_text: params.event_text(),
            logo_path: settings.logo_path.as_deref(),
            margin_em: settings.margin_em,
            text_max_width_pct: settings.text_max_width_pct,
            opacity: settings.opacity,
        };

        let Some(mark) = overlay::build_overlay(renderer, &request) else {
            return Ok(());
        };
        let (left, top) = mark.position(width, height);
        image::imageops::overlay(img, &mark.image, left, top);
        Ok(())
    }

    fn encode(&self, img: RgbaImage, format: OutputFormat) -> PipelineResult<Vec<u8>> {
        match format {
            OutputFormat::Jpeg | OutputFormat::Unsupported => encode_jpeg(img, self.config.jpeg_quality),
            OutputFormat::Png => encode_png(img),
            OutputFormat::WebP => Ok(encode_webp(&img, self.config.webp_quality)),
        }
    }
}

/// Renderer for overlays that carry no text. Never asked to draw anything.
struct NoText;

impl TextRenderer for NoText {
    fn render_line(&self, _text: &str, font_size: u32) -> overlay::TextLine {
        overlay::TextLine::new(RgbaImage::new(0, 0), font_size)
    }
}

/// Width and height from the file header, without decoding pixels.
pub fn probe_dimensions(path: &Path) -> Option<(u32, u32)> {
    let reader = image::ImageReader::open(path).ok()?.with_guessed_format().ok()?;
    reader.into_dimensions().ok().filter(|&(w, h)| w > 0 && h > 0)
}

fn decode(path: &Path) -> PipelineResult<DynamicImage> {
    let decode_err = |message: String| PipelineError::Decode {
        path: path.to_path_buf(),
        message,
    };
    image::ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))
}

/// JPEG without chroma subsampling.
fn encode_jpeg(img: RgbaImage, quality: u8) -> PipelineResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(img).to_rgb8();
    let mut output = Vec::new();
    let mut cursor = Cursor::new(&mut output);
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality.clamp(1, 100));
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| PipelineError::Encode(format!("Failed to encode JPEG: {}", e)))?;
    Ok(output)
}

/// PNG, recompressed losslessly at oxipng's strongest preset.
fn encode_png(img: RgbaImage) -> PipelineResult<Vec<u8>> {
    let mut output = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut output), ImgFormat::Png)
        .map_err(|e| PipelineError::Encode(format!("Failed to encode PNG: {}", e)))?;

    let mut opts = oxipng::Options::from_preset(6);
    opts.strip = oxipng::StripChunks::Safe;
    oxipng::optimize_from_memory(&output, &opts)
        .map_err(|e| PipelineError::Encode(format!("Failed to optimize PNG: {}", e)))
}

fn encode_webp(img: &RgbaImage, quality: f32) -> Vec<u8> {
    let encoder = webp::Encoder::from_rgba(img.as_raw(), img.width(), img.height());
    encoder.encode(quality.clamp(0.0, 100.0)).to_vec()
}

/// Write to a temp file beside `path`, then rename over it.
fn write_atomic(path: &Path, data: &[u8]) -> PipelineResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let write_err = |source: std::io::Error| PipelineError::WriteFile {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(parent).map_err(|source| PipelineError::WriteFile {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(data).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
