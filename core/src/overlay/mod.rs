//! Watermark overlay: logo plus right-aligned, greedily wrapped text on a
//! transparent canvas, with one global opacity.

pub mod text;

use std::path::Path;

use image::{imageops, imageops::FilterType, RgbaImage};

pub use text::{GlyphRenderer, TextLine, TextRenderer};

const FONT_SCALE: f64 = 0.028;
const MIN_FONT_SIZE: u32 = 18;
const MAX_FONT_SIZE: u32 = 96;
const LOGO_HEIGHT_EM: f64 = 2.2;

/// Inputs for one overlay.
#[derive(Debug, Clone, Copy)]
pub struct OverlayRequest<'a> {
    pub base_width: u32,
    pub base_height: u32,
    pub date_text: &'a str,
    pub event_text: &'a str,
    pub logo_path: Option<&'a Path>,
    pub margin_em: f32,
    pub text_max_width_pct: f32,
    pub opacity: f32,
}

/// Layout numbers derived from the base photo size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub font_size: u32,
    pub padding: u32,
    pub line_gap: u32,
    pub margin_px: u32,
    /// May be zero or negative for tiny photos; every word then gets its own line.
    pub wrap_width: i64,
}

impl Metrics {
    pub fn compute(base_width: u32, base_height: u32, margin_em: f32, text_max_width_pct: f32) -> Self {
        let font_size = font_size_for(base_width, base_height);
        let fs = font_size as f64;
        let padding = ((fs * 0.35).round() as u32).max(2);
        let line_gap = ((fs * 0.30).round() as u32).max(2);
        let margin_px = (margin_em.max(0.0) as f64 * fs).round() as u32;

        let pct = (text_max_width_pct as f64).clamp(0.2, 0.98);
        let max_block = (base_width as f64 * pct).round() as i64 - margin_px as i64;
        let wrap_width = max_block - 2 * padding as i64;

        Self {
            font_size,
            padding,
            line_gap,
            margin_px,
            wrap_width,
        }
    }

    pub fn logo_height(&self) -> u32 {
        (self.font_size as f64 * LOGO_HEIGHT_EM).round() as u32
    }
}

/// Font size scaled to the photo's shorter side.
pub fn font_size_for(base_width: u32, base_height: u32) -> u32 {
    let short = base_width.min(base_height) as f64;
    ((short * FONT_SCALE).round() as u32).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Composited watermark ready to be layered onto a photo.
#[derive(Debug, Clone)]
pub struct WatermarkOverlay {
    pub image: RgbaImage,
    pub width: u32,
    pub height: u32,
    pub font_size: u32,
    pub margin_px: u32,
    pub line_count: usize,
    pub has_logo: bool,
}

impl WatermarkOverlay {
    /// Top-left corner on the base photo: bottom-right, inset by the margin, never negative.
    pub fn position(&self, base_width: u32, base_height: u32) -> (i64, i64) {
        position(base_width, base_height, self.width, self.height, self.margin_px)
    }
}

pub fn position(base_width: u32, base_height: u32, width: u32, height: u32, margin_px: u32) -> (i64, i64) {
    let left = base_width as i64 - width as i64 - margin_px as i64;
    let top = base_height as i64 - height as i64 - margin_px as i64;
    (left.max(0), top.max(0))
}

/// Event and date joined by one space, each trimmed, empty parts dropped.
pub fn watermark_phrase(event_text: &str, date_text: &str) -> String {
    [event_text.trim(), date_text.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Greedy word wrap at a fixed font size. Words never get split or shrunk;
/// one that is wider than `wrap_width` on its own becomes an over-wide line.
pub fn wrap_lines(renderer: &dyn TextRenderer, phrase: &str, font_size: u32, wrap_width: i64) -> Vec<TextLine> {
    let mut lines = Vec::new();
    let mut words: Vec<&str> = Vec::new();
    let mut current: Option<TextLine> = None;

    for word in phrase.split_whitespace() {
        let candidate = if words.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", words.join(" "), word)
        };
        let rendered = renderer.render_line(&candidate, font_size);

        if rendered.width as i64 <= wrap_width || words.is_empty() {
            words.push(word);
            current = Some(rendered);
            continue;
        }

        if let Some(line) = current.take() {
            lines.push(line);
        }
        words.clear();
        words.push(word);
        current = Some(renderer.render_line(word, font_size));
    }

    if let Some(line) = current {
        lines.push(line);
    }
    lines
}

/// Build the overlay. `None` when there is neither text nor a usable logo.
pub fn build_overlay(renderer: &dyn TextRenderer, request: &OverlayRequest<'_>) -> Option<WatermarkOverlay> {
    let metrics = Metrics::compute(
        request.base_width,
        request.base_height,
        request.margin_em,
        request.text_max_width_pct,
    );

    let phrase = watermark_phrase(request.event_text, request.date_text);
    let lines = wrap_lines(renderer, &phrase, metrics.font_size, metrics.wrap_width);
    let logo = request
        .logo_path
        .and_then(|path| load_logo(path, metrics.logo_height()));

    if lines.is_empty() && logo.is_none() {
        return None;
    }

    let image = compose(&metrics, logo.as_ref(), &lines, request.opacity);
    let (width, height) = image.dimensions();
    log::debug!(
        "Built {}x{} overlay: font {}px, {} line(s), logo: {}",
        width,
        height,
        metrics.font_size,
        lines.len(),
        logo.is_some()
    );

    Some(WatermarkOverlay {
        image,
        width,
        height,
        font_size: metrics.font_size,
        margin_px: metrics.margin_px,
        line_count: lines.len(),
        has_logo: logo.is_some(),
    })
}

fn compose(metrics: &Metrics, logo: Option<&RgbaImage>, lines: &[TextLine], opacity: f32) -> RgbaImage {
    let padding = metrics.padding;
    let gap = metrics.line_gap;

    let logo_w = logo.map_or(0, |l| l.width());
    let logo_block = logo.map_or(0, |l| l.height() + gap);
    let text_w = lines.iter().map(|l| l.width).max().unwrap_or(0);
    let text_h: u32 = lines.iter().map(|l| l.height).sum::<u32>()
        + gap * (lines.len().saturating_sub(1) as u32);

    let width = logo_w.max(text_w) + 2 * padding;
    let height = padding + logo_block + text_h + padding;
    let mut canvas = RgbaImage::new(width, height);

    if let Some(logo) = logo {
        let x = (width - padding - logo.width()) as i64;
        imageops::overlay(&mut canvas, logo, x, padding as i64);
    }

    let mut y = padding + logo_block;
    for line in lines {
        let x = (width - padding - line.width) as i64;
        imageops::overlay(&mut canvas, &line.image, x, y as i64);
        y += line.height + gap;
    }

    apply_opacity(&mut canvas, opacity);
    canvas
}

/// Scale the alpha channel only. Colour channels are left as they are.
pub fn apply_opacity(img: &mut RgbaImage, opacity: f32) {
    let factor = opacity.clamp(0.0, 1.0);
    if factor >= 1.0 {
        return;
    }
    for pixel in img.pixels_mut() {
        pixel[3] = (pixel[3] as f32 * factor).round() as u8;
    }
}

fn load_logo(path: &Path, target_height: u32) -> Option<RgbaImage> {
    if !path.is_file() {
        log::debug!("Logo {} not found, continuing without it", path.display());
        return None;
    }

    let logo = match image::open(path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            log::error!("Failed to decode logo {}: {}", path.display(), e);
            return None;
        }
    };

    let (w, h) = logo.dimensions();
    if w == 0 || h == 0 || target_height == 0 {
        log::error!("Logo {} has no pixels, continuing without it", path.display());
        return None;
    }

    let target_width = ((w as f64 * target_height as f64 / h as f64).round() as u32).max(1);
    Some(imageops::resize(&logo, target_width, target_height, FilterType::Lanczos3))
}
