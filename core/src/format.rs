use std::path::Path;

/// How an input file has to be treated before the pipeline can decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputClass {
    /// Decodable as-is.
    Raster,
    /// Camera RAW, needs an external converter.
    Raw,
    /// Unrecognised extension. Passed through, best effort.
    Unknown,
}

const RASTER_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "tif", "tiff", "bmp", "gif", "avif",
];

const RAW_EXTENSIONS: &[&str] = &[
    "3fr", "arw", "cr2", "cr3", "crw", "dcr", "dng", "erf", "iiq", "k25", "kdc", "mef", "mos",
    "mrw", "nef", "nrw", "orf", "pef", "raf", "raw", "rw2", "rwl", "sr2", "srf", "srw", "x3f",
];

impl InputClass {
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = lower_extension(path) else {
            return InputClass::Unknown;
        };
        if RASTER_EXTENSIONS.contains(&ext.as_str()) {
            InputClass::Raster
        } else if RAW_EXTENSIONS.contains(&ext.as_str()) {
            InputClass::Raw
        } else {
            InputClass::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputClass::Raster => "raster",
            InputClass::Raw => "RAW",
            InputClass::Unknown => "unknown",
        }
    }
}

/// Output encoding, resolved once from the output file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    /// Missing or unrecognised extension. Encoded like `Jpeg`.
    Unsupported,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Self {
        match lower_extension(path).as_deref() {
            Some("jpg" | "jpeg") => OutputFormat::Jpeg,
            Some("png") => OutputFormat::Png,
            Some("webp") => OutputFormat::WebP,
            _ => OutputFormat::Unsupported,
        }
    }

    /// Parse a user-supplied format name (`jpg`, `png`, `webp`).
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::WebP),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg | OutputFormat::Unsupported => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::Png => "PNG",
            OutputFormat::WebP => "WebP",
            OutputFormat::Unsupported => "JPEG (fallback)",
        }
    }
}

fn lower_extension(path: &Path) -> Option<String> {
    Some(path.extension()?.to_str()?.to_ascii_lowercase())
}
