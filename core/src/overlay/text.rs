//! Single-line text rasterization for the watermark.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::error::OverlayError;

/// One rendered line, trimmed to its visible pixels.
#[derive(Debug, Clone)]
pub struct TextLine {
    pub image: RgbaImage,
    pub width: u32,
    pub height: u32,
    /// Pixel size the line was rendered at.
    pub font_size: u32,
}

impl TextLine {
    pub fn new(image: RgbaImage, font_size: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            image,
            width,
            height,
            font_size,
        }
    }
}

/// Rasterizes text at a fixed pixel size.
pub trait TextRenderer: Send + Sync {
    fn render_line(&self, text: &str, font_size: u32) -> TextLine;
}

/// `imageproc` text drawing over an `ab_glyph` font, with coverage kept as straight alpha.
pub struct GlyphRenderer {
    font: FontVec,
    color: Rgba<u8>,
}

impl GlyphRenderer {
    pub fn from_file(path: &Path) -> Result<Self, OverlayError> {
        let data = std::fs::read(path).map_err(|e| OverlayError::Font {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let font = FontVec::try_from_vec(data).map_err(|e| OverlayError::Font {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        log::debug!("Loaded watermark font {}", path.display());
        Ok(Self {
            font,
            color: Rgba([255, 255, 255, 255]),
        })
    }

    /// Load `explicit` if given, otherwise the first usable system font.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, OverlayError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in system_font_candidates() {
            if !candidate.is_file() {
                continue;
            }
            match Self::from_file(&candidate) {
                Ok(renderer) => return Ok(renderer),
                Err(e) => log::debug!("Skipping font: {}", e),
            }
        }
        Err(OverlayError::FontUnavailable)
    }

    pub fn with_color(mut self, color: Rgba<u8>) -> Self {
        self.color = color;
        self
    }
}

impl TextRenderer for GlyphRenderer {
    fn render_line(&self, text: &str, font_size: u32) -> TextLine {
        let scale = PxScale::from(font_size as f32);
        let text: String = text.chars().filter(|c| !c.is_control()).collect();
        let (text_width, text_height) = text_size(scale, &self.font, &text);
        // room for glyphs overhanging their advance box
        let bleed = (font_size / 4).max(2);

        let width = (text_width + 2 * bleed).max(1);
        let height = (text_height + 2 * bleed).max(1);
        // Transparent pixels already carry the text color, so blending
        // only moves coverage into alpha.
        let [r, g, b, _] = self.color.0;
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([r, g, b, 0]));
        draw_text_mut(
            &mut canvas,
            self.color,
            bleed as i32,
            bleed as i32,
            scale,
            &self.font,
            &text,
        );

        TextLine::new(trim_transparent(&canvas), font_size)
    }
}

/// Crop to the bounding box of non-transparent pixels.
pub fn trim_transparent(img: &RgbaImage) -> RgbaImage {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    for (x, y, p) in img.enumerate_pixels() {
        if p[3] > 0 {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if min_x == u32::MAX {
        return RgbaImage::new(0, 0);
    }
    imageops::crop_imm(img, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image()
}

fn system_font_candidates() -> Vec<PathBuf> {
    const DIRS: &[&str] = &[
        "/usr/share/fonts/truetype/dejavu",
        "/usr/share/fonts/dejavu",
        "/usr/share/fonts/TTF",
        "/usr/share/fonts/truetype/liberation",
        "/usr/share/fonts/liberation",
        "/usr/share/fonts/truetype/noto",
        "/usr/local/share/fonts",
        "/System/Library/Fonts",
        "/System/Library/Fonts/Supplemental",
        "/Library/Fonts",
        "C:\\Windows\\Fonts",
    ];
    const FILES: &[&str] = &[
        "DejaVuSans-Bold.ttf",
        "DejaVuSans.ttf",
        "LiberationSans-Bold.ttf",
        "LiberationSans-Regular.ttf",
        "NotoSans-Regular.ttf",
        "Arial Bold.ttf",
        "Arial.ttf",
        "arialbd.ttf",
        "arial.ttf",
        "Helvetica.ttc",
    ];

    DIRS.iter()
        .flat_map(|dir| FILES.iter().map(move |file| Path::new(dir).join(file)))
        .collect()
}
