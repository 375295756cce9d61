//! RAW-to-raster conversion through an ordered chain of external tools.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ProcessingConfig;
use crate::error::ConversionError;
use crate::format::InputClass;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One way of turning a RAW file into something the pipeline can decode.
pub trait RawConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `input`, writing any intermediate files under `scratch`.
    fn try_convert(&self, input: &Path, scratch: &Path) -> Result<PathBuf, ConversionError>;
}

/// External converters known out of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterKind {
    Darktable,
    RawTherapee,
    Dcraw,
    ImageMagick,
}

impl ConverterKind {
    pub fn default_order() -> &'static [ConverterKind] {
        &[
            ConverterKind::Darktable,
            ConverterKind::RawTherapee,
            ConverterKind::Dcraw,
            ConverterKind::ImageMagick,
        ]
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "darktable" | "darktable-cli" => Some(ConverterKind::Darktable),
            "rawtherapee" | "rawtherapee-cli" => Some(ConverterKind::RawTherapee),
            "dcraw" => Some(ConverterKind::Dcraw),
            "magick" | "imagemagick" => Some(ConverterKind::ImageMagick),
            _ => None,
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            ConverterKind::Darktable => "darktable-cli",
            ConverterKind::RawTherapee => "rawtherapee-cli",
            ConverterKind::Dcraw => "dcraw",
            ConverterKind::ImageMagick => "magick",
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            ConverterKind::Darktable => "darktable",
            ConverterKind::RawTherapee => "rawtherapee",
            ConverterKind::Dcraw => "dcraw",
            ConverterKind::ImageMagick => "magick",
        }
    }

    /// Arguments for one run. `target` is the scratch path the result must end up at.
    fn args(&self, input: &Path, target: &Path) -> Vec<String> {
        let input = input.to_string_lossy().into_owned();
        let target = target.to_string_lossy().into_owned();
        match self {
            ConverterKind::Darktable => vec![input, target, "--core".into(), "--disable-opencl".into()],
            // -c must come last
            ConverterKind::RawTherapee => vec![
                "-o".into(),
                target,
                "-tz".into(),
                "-Y".into(),
                "-c".into(),
                input,
            ],
            // dcraw writes the TIFF to stdout, which is redirected to the target
            ConverterKind::Dcraw => vec!["-c".into(), "-w".into(), "-T".into(), input],
            ConverterKind::ImageMagick => vec![input, target],
        }
    }

    fn writes_stdout(&self) -> bool {
        matches!(self, ConverterKind::Dcraw)
    }
}

/// Runs an external program and checks that its output file appeared.
pub struct CommandConverter {
    kind: ConverterKind,
    program: PathBuf,
    timeout: Duration,
}

impl CommandConverter {
    pub fn new(kind: ConverterKind, timeout: Duration) -> Self {
        Self {
            kind,
            program: PathBuf::from(kind.program()),
            timeout,
        }
    }

    /// Use an explicit executable instead of looking the default name up on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn attempt_error(&self, input: &Path, message: impl Into<String>) -> ConversionError {
        ConversionError::Attempt {
            tool: self.kind.program().to_string(),
            file: display_name(input),
            message: message.into(),
        }
    }
}

impl RawConverter for CommandConverter {
    fn name(&self) -> &str {
        self.kind.program()
    }

    fn try_convert(&self, input: &Path, scratch: &Path) -> Result<PathBuf, ConversionError> {
        let target = scratch_path(input, scratch, self.kind.slug());
        // Some tools refuse to overwrite or silently pick another name.
        let _ = fs::remove_file(&target);

        let args = self.kind.args(input, &target);
        log::debug!("Running {} {:?}", self.program.display(), args);

        let start = Instant::now();
        let mut command = Command::new(&self.program);
        command.args(&args);
        let stdout = if self.kind.writes_stdout() {
            let file = File::create(&target).map_err(|e| self.attempt_error(input, e.to_string()))?;
            Stdio::from(file)
        } else {
            Stdio::null()
        };

        let outcome = run_with_deadline(&mut command, stdout, self.timeout);
        match outcome {
            Ok(Some(status)) if status.success() => {}
            other => {
                let _ = fs::remove_file(&target);
                return Err(match other {
                    Ok(Some(status)) => self.attempt_error(input, format!("exited with {status}")),
                    Ok(None) => ConversionError::Timeout {
                        tool: self.kind.program().to_string(),
                        file: display_name(input),
                        secs: self.timeout.as_secs(),
                    },
                    Err(e) => self.attempt_error(input, e.to_string()),
                });
            }
        }

        let produced = fs::metadata(&target).map(|m| m.is_file() && m.len() > 0).unwrap_or(false);
        if !produced {
            let _ = fs::remove_file(&target);
            return Err(self.attempt_error(
                input,
                format!("expected output {} is missing", target.display()),
            ));
        }

        log::debug!(
            "{} converted {} in {:?}",
            self.kind.program(),
            display_name(input),
            start.elapsed()
        );
        Ok(target)
    }
}

/// Ordered list of converters tried until one succeeds.
pub struct ConverterChain {
    converters: Vec<Box<dyn RawConverter>>,
}

impl ConverterChain {
    pub fn new() -> Self {
        Self {
            converters: Vec::new(),
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        let mut chain = Self::new();
        for kind in &config.converters {
            chain.register(Box::new(CommandConverter::new(*kind, config.converter_timeout)));
        }
        chain
    }

    pub fn register(&mut self, converter: Box<dyn RawConverter>) {
        self.converters.push(converter);
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Return a path the image decoder can read: the input itself for raster and
    /// unknown files, or a converted copy under `scratch` for RAW files.
    pub fn ensure_raster(&self, input: &Path, scratch: &Path) -> Result<PathBuf, ConversionError> {
        match InputClass::from_path(input) {
            InputClass::Raster | InputClass::Unknown => return Ok(input.to_path_buf()),
            InputClass::Raw => {}
        }

        fs::create_dir_all(scratch).map_err(|e| ConversionError::Scratch {
            path: scratch.to_path_buf(),
            source: e,
        })?;

        let mut tried = Vec::with_capacity(self.converters.len());
        for converter in &self.converters {
            tried.push(converter.name().to_string());
            match converter.try_convert(input, scratch) {
                Ok(path) => return Ok(path),
                Err(e) => log::debug!("{}; trying next converter", e),
            }
        }

        Err(ConversionError::Exhausted {
            file: display_name(input),
            attempts: if tried.is_empty() {
                "none configured".into()
            } else {
                tried.join(", ")
            },
        })
    }
}

impl Default for ConverterChain {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

/// Deterministic per-input scratch name, so concurrent files never collide.
fn scratch_path(input: &Path, scratch: &Path, slug: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".into());
    scratch.join(format!("{name}.{slug}.tiff"))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Wait for the command, killing it once `timeout` elapses. Stdout goes to `stdout`. `Ok(None)` means timed out.
pub(crate) fn run_with_deadline(
    command: &mut Command,
    stdout: Stdio,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()?;

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
