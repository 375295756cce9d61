use image::{Rgba, RgbaImage};
use thiserror::Error;

/// Linear brightness multiplier of the standard edit.
pub const BRIGHTNESS: f32 = 1.08;
/// Gamma of the standard edit.
pub const GAMMA: f32 = 0.97;
/// Saturation multiplier of the standard edit.
pub const SATURATION: f32 = 1.10;
/// Saturation multiplier used when the standard edit cannot be applied.
pub const FALLBACK_SATURATION: f32 = 1.06;

/// Fraction of pixels ignored at each end of the luminance histogram when normalizing.
const NORMALIZE_CLIP: f64 = 0.01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdjustError {
    #[error("image has no pixels")]
    Empty,

    #[error("luminance range is flat ({0}), cannot normalize")]
    FlatRange(u8),
}

/// Which adjustment ended up applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Standard,
    SaturationOnly,
}

/// Apply the standard edit, or the smaller saturation boost if it fails.
pub fn apply_edit(img: &RgbaImage) -> (RgbaImage, Applied) {
    match enhance(img) {
        Ok(out) => (out, Applied::Standard),
        Err(e) => {
            log::debug!("Standard color adjustment failed ({}), using saturation boost", e);
            (saturate(img, FALLBACK_SATURATION), Applied::SaturationOnly)
        }
    }
}

/// Brightness, gamma, saturation, then contrast normalization.
pub fn enhance(img: &RgbaImage) -> Result<RgbaImage, AdjustError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(AdjustError::Empty);
    }

    let lut = tone_lut(BRIGHTNESS, GAMMA);
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let toned = [lut[r as usize], lut[g as usize], lut[b as usize]];
        let [r, g, b] = saturate_rgb(toned, SATURATION);
        *pixel = Rgba([r, g, b, a]);
    }

    normalize(&mut out)?;
    Ok(out)
}

/// Scale HSV saturation of every pixel. Alpha is preserved.
pub fn saturate(img: &RgbaImage, factor: f32) -> RgbaImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let [r, g, b] = saturate_rgb([r, g, b], factor);
        *pixel = Rgba([r, g, b, a]);
    }
    out
}

/// Stretch the 1st..99th luminance percentile to the full 0-255 range.
fn normalize(img: &mut RgbaImage) -> Result<(), AdjustError> {
    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[luma(pixel) as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    let clip = (total as f64 * NORMALIZE_CLIP) as u64;
    let low = percentile(&histogram, clip);
    let high = percentile_from_top(&histogram, clip);

    if high <= low {
        return Err(AdjustError::FlatRange(low));
    }

    let scale = 255.0 / (high - low) as f32;
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        let stretched = (v as f32 - low as f32) * scale;
        *slot = stretched.round().clamp(0.0, 255.0) as u8;
    }

    for pixel in img.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
        pixel[1] = lut[pixel[1] as usize];
        pixel[2] = lut[pixel[2] as usize];
    }
    Ok(())
}

fn percentile(histogram: &[u64; 256], skip: u64) -> u8 {
    let mut seen = 0u64;
    for (v, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > skip {
            return v as u8;
        }
    }
    255
}

fn percentile_from_top(histogram: &[u64; 256], skip: u64) -> u8 {
    let mut seen = 0u64;
    for (v, count) in histogram.iter().enumerate().rev() {
        seen += count;
        if seen > skip {
            return v as u8;
        }
    }
    0
}

fn luma(pixel: &Rgba<u8>) -> u8 {
    let y = 0.2126 * pixel[0] as f32 + 0.7152 * pixel[1] as f32 + 0.0722 * pixel[2] as f32;
    y.round().clamp(0.0, 255.0) as u8
}

fn tone_lut(brightness: f32, gamma: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        let scaled = (v as f32 / 255.0 * brightness).clamp(0.0, 1.0);
        *slot = (scaled.powf(1.0 / gamma) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn saturate_rgb([r, g, b]: [u8; 3], factor: f32) -> [u8; 3] {
    let (h, s, v) = rgb_to_hsv(r as f32, g as f32, b as f32);
    let (r, g, b) = hsv_to_rgb(h, (s * factor).clamp(0.0, 1.0), v);
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r = r / 255.0;
    let g = g / 255.0;
    let b = b / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };

    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h as u32 {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    ((r + m) * 255.0, (g + m) * 255.0, (b + m) * 255.0)
}
