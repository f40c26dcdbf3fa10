#![warn(missing_docs)]
//! # dayshot-capture
//!
//! ## Purpose
//! Turns "take a screenshot now" into one verified image file on disk.
//!
//! ## Responsibilities
//! - Define backend-agnostic frame acquisition ([`FrameSource`]).
//! - Grab the primary display on supported platforms.
//! - Provide a deterministic synthetic source for tests and simulated runs.
//! - Refuse to write when the output volume is low on space.
//! - Encode PNG or JPEG, write it, and verify the written file decodes.
//!
//! ## Data flow
//! Coordinator passes the session date and a clock stamp -> [`CaptureService`]
//! checks free space -> source yields a [`Frame`] -> encoder writes
//! `<root>/<session>/<stamp>.<ext>` -> verifier re-opens the file.
//!
//! ## Error model
//! Every failure is a [`CaptureError`]. The coordinator treats them as
//! transient and retries; nothing here retries on its own.
//!
//! ## Privacy notes
//! Frames are written only to the configured output directory; corrupt files
//! are removed instead of being left behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use dayshot_core::Frame;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageReader};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Refuse to capture below this much free space on the output volume.
pub const MIN_FREE_BYTES: u64 = 500 * 1024 * 1024;
/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;
/// File stem format of written screenshots.
pub const FILE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
/// Directory name format of one capture session.
pub const SESSION_DIR_FORMAT: &str = "%Y-%m-%d";

/// Encoded image format of written screenshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenshotFormat {
    /// Lossless PNG with alpha.
    #[default]
    Png,
    /// JPEG; alpha is dropped.
    Jpeg,
}

impl ScreenshotFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpg",
        }
    }
}

impl FromStr for ScreenshotFormat {
    type Err = CaptureError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ScreenshotFormat::Png),
            "jpg" | "jpeg" => Ok(ScreenshotFormat::Jpeg),
            _ => Err(CaptureError::UnsupportedFormat(raw.to_string())),
        }
    }
}

/// Where and how screenshots are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    output_root: PathBuf,
    format: ScreenshotFormat,
    jpeg_quality: u8,
    min_free_bytes: u64,
}

impl CaptureConfig {
    /// Creates validated capture configuration.
    ///
    /// # Errors
    /// Returns [`CaptureError::InvalidQuality`] unless `1 <= jpeg_quality <= 100`.
    pub fn new(
        output_root: impl Into<PathBuf>,
        format: ScreenshotFormat,
        jpeg_quality: u8,
    ) -> Result<Self, CaptureError> {
        if !(1..=100).contains(&jpeg_quality) {
            return Err(CaptureError::InvalidQuality(jpeg_quality));
        }

        Ok(Self {
            output_root: output_root.into(),
            format,
            jpeg_quality,
            min_free_bytes: MIN_FREE_BYTES,
        })
    }

    /// Overrides the free-space floor.
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    /// Root directory that holds one subdirectory per session.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Encoded format.
    pub fn format(&self) -> ScreenshotFormat {
        self.format
    }

    /// JPEG quality (ignored for PNG).
    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Directory for screenshots of the session started on `session`.
    pub fn session_dir(&self, session: NaiveDate) -> PathBuf {
        self.output_root
            .join(session.format(SESSION_DIR_FORMAT).to_string())
    }
}

/// Produces one frame of the screen.
pub trait FrameSource: Send + Sync {
    /// Grabs the current screen contents.
    ///
    /// # Errors
    /// Returns [`CaptureError::Source`] when the display cannot be read.
    fn grab(&self) -> Result<Frame, CaptureError>;
}

/// Primary display of the interactive session.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryDisplaySource;

impl PrimaryDisplaySource {
    /// Creates the primary display source.
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for PrimaryDisplaySource {
    fn grab(&self) -> Result<Frame, CaptureError> {
        #[cfg(windows)]
        {
            use screenshots::Screen;

            let screens = Screen::all().map_err(|error| {
                CaptureError::Source(format!("screen enumeration failed: {error}"))
            })?;
            let screen = screens
                .iter()
                .find(|screen| screen.display_info.is_primary)
                .or_else(|| screens.first())
                .ok_or_else(|| {
                    CaptureError::Source("no displays were reported by the OS".to_string())
                })?;

            let captured = screen
                .capture()
                .map_err(|error| CaptureError::Source(format!("screen capture failed: {error}")))?;
            let width = captured.width();
            let height = captured.height();

            Frame::new(width, height, captured.into_raw())
                .map_err(|error| CaptureError::Source(error.to_string()))
        }

        #[cfg(not(windows))]
        {
            Err(CaptureError::Source(
                "display capture is currently implemented for Windows only".to_string(),
            ))
        }
    }
}

/// Deterministic source emitting solid frames of a changing shade.
#[derive(Debug)]
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    sequence: Mutex<u64>,
}

impl SyntheticFrameSource {
    /// Creates a source of `width` x `height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sequence: Mutex::new(0),
        }
    }
}

impl Default for SyntheticFrameSource {
    fn default() -> Self {
        Self::new(64, 36)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn grab(&self) -> Result<Frame, CaptureError> {
        let mut sequence = self
            .sequence
            .lock()
            .map_err(|_| CaptureError::Source("synthetic sequence lock poisoned".to_string()))?;
        *sequence += 1;

        let shade = (*sequence % 255) as u8;
        let pixels = (self.width as usize) * (self.height as usize);
        let rgba = [shade, shade, shade, 255].repeat(pixels);

        Frame::new(self.width, self.height, rgba)
            .map_err(|error| CaptureError::Source(error.to_string()))
    }
}

/// Reports free space available to this process.
pub trait StorageProbe: Send + Sync {
    /// Free bytes on the volume holding `path`.
    ///
    /// # Errors
    /// Returns [`CaptureError::Storage`] when the volume cannot be queried.
    fn free_bytes(&self, path: &Path) -> Result<u64, CaptureError>;
}

/// Queries the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostStorage;

impl StorageProbe for HostStorage {
    #[cfg(windows)]
    fn free_bytes(&self, path: &Path) -> Result<u64, CaptureError> {
        use std::os::windows::ffi::OsStrExt;
        use std::ptr::null_mut;

        use windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let mut available = 0u64;

        let queried = unsafe {
            // Safety:
            // - `wide` is NUL-terminated and outlives the call.
            // - Unused out-parameters may be null.
            GetDiskFreeSpaceExW(wide.as_ptr(), &mut available, null_mut(), null_mut())
        };
        if queried == 0 {
            return Err(CaptureError::Storage(io::Error::last_os_error().to_string()));
        }

        Ok(available)
    }

    #[cfg(unix)]
    fn free_bytes(&self, path: &Path) -> Result<u64, CaptureError> {
        let output = std::process::Command::new("df")
            .arg("-Pk")
            .arg(path)
            .output()
            .map_err(|error| CaptureError::Storage(format!("failed to run df: {error}")))?;
        if !output.status.success() {
            return Err(CaptureError::Storage(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_df_available(&String::from_utf8_lossy(&output.stdout))
    }

    #[cfg(not(any(windows, unix)))]
    fn free_bytes(&self, _path: &Path) -> Result<u64, CaptureError> {
        Err(CaptureError::Storage(
            "free space query is not supported on this platform".to_string(),
        ))
    }
}

/// Parses the "Available" column of POSIX `df -Pk` output into bytes.
#[cfg_attr(not(unix), allow(dead_code))]
fn parse_df_available(stdout: &str) -> Result<u64, CaptureError> {
    stdout
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(3))
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib.saturating_mul(1024))
        .ok_or_else(|| CaptureError::Storage(format!("unexpected df output: {stdout:?}")))
}

/// Probe reporting a constant amount of free space.
#[derive(Debug, Clone, Copy)]
pub struct FixedStorage(pub u64);

impl StorageProbe for FixedStorage {
    fn free_bytes(&self, _path: &Path) -> Result<u64, CaptureError> {
        Ok(self.0)
    }
}

/// One screenshot operation, as seen by the run coordinator.
pub trait ScreenCapture: Send + Sync {
    /// Captures the screen into the directory of `session`, naming the file
    /// after `stamp`.
    ///
    /// # Errors
    /// Returns [`CaptureError`] when nothing verified was written.
    fn capture(&self, session: NaiveDate, stamp: NaiveDateTime) -> Result<PathBuf, CaptureError>;
}

/// Writes verified screenshots from a frame source.
pub struct CaptureService {
    config: CaptureConfig,
    source: Box<dyn FrameSource>,
    storage: Box<dyn StorageProbe>,
}

impl CaptureService {
    /// Creates a service over `source`, checking space with `storage`.
    pub fn new(
        config: CaptureConfig,
        source: Box<dyn FrameSource>,
        storage: Box<dyn StorageProbe>,
    ) -> Self {
        Self {
            config,
            source,
            storage,
        }
    }

    fn ensure_space(&self, dir: &Path) -> Result<(), CaptureError> {
        let available = self.storage.free_bytes(dir)?;
        if available < self.config.min_free_bytes {
            return Err(CaptureError::InsufficientSpace {
                available,
                required: self.config.min_free_bytes,
            });
        }
        Ok(())
    }
}

impl ScreenCapture for CaptureService {
    fn capture(&self, session: NaiveDate, stamp: NaiveDateTime) -> Result<PathBuf, CaptureError> {
        let dir = self.config.session_dir(session);
        fs::create_dir_all(&dir)?;
        self.ensure_space(&dir)?;

        let frame = self.source.grab()?;
        let bytes = encode_frame(&frame, self.config.format, self.config.jpeg_quality)?;
        let path = dir.join(screenshot_file_name(stamp, self.config.format));
        fs::write(&path, &bytes)?;

        if let Err(error) = verify_image(&path) {
            if let Err(remove_error) = fs::remove_file(&path) {
                warn!(path = %path.display(), %remove_error, "failed to remove corrupt screenshot");
            }
            return Err(error);
        }

        info!(path = %path.display(), bytes = bytes.len(), "screenshot saved");
        Ok(path)
    }
}

/// File name of the screenshot taken at `stamp`.
pub fn screenshot_file_name(stamp: NaiveDateTime, format: ScreenshotFormat) -> String {
    format!("{}.{}", stamp.format(FILE_STAMP_FORMAT), format.extension())
}

/// Encodes `frame` in `format`.
///
/// # Errors
/// Returns [`CaptureError::Encode`] when the encoder rejects the buffer.
pub fn encode_frame(
    frame: &Frame,
    format: ScreenshotFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, CaptureError> {
    let mut bytes = Vec::new();
    match format {
        ScreenshotFormat::Png => PngEncoder::new(&mut bytes).write_image(
            &frame.rgba,
            frame.width,
            frame.height,
            ExtendedColorType::Rgba8,
        ),
        ScreenshotFormat::Jpeg => JpegEncoder::new_with_quality(&mut bytes, jpeg_quality)
            .write_image(
                &rgba_to_rgb(&frame.rgba),
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            ),
    }
    .map_err(|error| CaptureError::Encode(error.to_string()))?;

    Ok(bytes)
}

fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((rgba.len() / 4) * 3);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}

/// Checks that `path` is a non-empty image that decodes.
///
/// # Errors
/// Returns [`CaptureError::Verification`] otherwise.
pub fn verify_image(path: &Path) -> Result<(), CaptureError> {
    let corrupt = |reason: String| CaptureError::Verification {
        path: path.to_path_buf(),
        reason,
    };

    let size = fs::metadata(path)
        .map_err(|error| corrupt(error.to_string()))?
        .len();
    if size == 0 {
        return Err(corrupt("file is empty".to_string()));
    }

    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|error| corrupt(error.to_string()))?
        .decode()
        .map_err(|error| corrupt(error.to_string()))?;

    debug!(path = %path.display(), size, "screenshot verified");
    Ok(())
}

/// Capture layer error type.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// JPEG quality outside `1..=100`.
    #[error("invalid jpeg quality {0}: must be between 1 and 100")]
    InvalidQuality(u8),
    /// Unknown image format name.
    #[error("unsupported screenshot format '{0}', expected png or jpg")]
    UnsupportedFormat(String),
    /// Output volume is below the free-space floor.
    #[error("insufficient disk space: {available} bytes free, {required} required")]
    InsufficientSpace {
        /// Free bytes reported by the probe.
        available: u64,
        /// Configured floor.
        required: u64,
    },
    /// Free space could not be determined.
    #[error("storage probe failed: {0}")]
    Storage(String),
    /// Display could not be read.
    #[error("frame source failure: {0}")]
    Source(String),
    /// Encoder rejected the frame.
    #[error("image encoding failed: {0}")]
    Encode(String),
    /// Written file is missing, empty or undecodable.
    #[error("screenshot {path} failed verification: {reason}")]
    Verification {
        /// Written file.
        path: PathBuf,
        /// Why verification failed.
        reason: String,
    },
    /// Filesystem failure while writing.
    #[error("screenshot i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    //! Unit tests for encoding, verification and the free-space gate.

    use super::*;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 2)
            .and_then(|date| date.and_hms_opt(9, 5, 7))
            .expect("valid datetime")
    }

    fn session() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).expect("valid date")
    }

    fn service(root: &Path, format: ScreenshotFormat, free: u64) -> CaptureService {
        let config = CaptureConfig::new(root, format, DEFAULT_JPEG_QUALITY)
            .expect("config should be valid");
        CaptureService::new(
            config,
            Box::new(SyntheticFrameSource::new(8, 6)),
            Box::new(FixedStorage(free)),
        )
    }

    #[test]
    fn writes_png_into_session_directory() {
        let root = tempfile::tempdir().expect("tempdir should be created");
        let path = service(root.path(), ScreenshotFormat::Png, u64::MAX)
            .capture(session(), stamp())
            .expect("capture should succeed");

        assert_eq!(
            path,
            root.path().join("2025-04-01").join("2025-04-02_09-05-07.png")
        );
        verify_image(&path).expect("written file should decode");
    }

    #[test]
    fn writes_jpeg_without_alpha() {
        let root = tempfile::tempdir().expect("tempdir should be created");
        let path = service(root.path(), ScreenshotFormat::Jpeg, u64::MAX)
            .capture(session(), stamp())
            .expect("capture should succeed");

        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("jpg"));
        let decoded = ImageReader::open(&path)
            .expect("file should open")
            .with_guessed_format()
            .expect("format should be detected")
            .decode()
            .expect("jpeg should decode");
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn refuses_to_write_below_free_space_floor() {
        let root = tempfile::tempdir().expect("tempdir should be created");
        let error = service(root.path(), ScreenshotFormat::Png, MIN_FREE_BYTES - 1)
            .capture(session(), stamp())
            .expect_err("capture should be refused");

        assert!(matches!(
            error,
            CaptureError::InsufficientSpace { required, .. } if required == MIN_FREE_BYTES
        ));
        let written = fs::read_dir(root.path().join("2025-04-01"))
            .expect("session dir should exist")
            .count();
        assert_eq!(written, 0);
    }

    #[test]
    fn verification_rejects_empty_and_garbage_files() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let empty = dir.path().join("empty.png");
        fs::write(&empty, []).expect("empty file should be written");
        let garbage = dir.path().join("garbage.png");
        fs::write(&garbage, b"not an image").expect("garbage file should be written");

        assert!(matches!(
            verify_image(&empty),
            Err(CaptureError::Verification { .. })
        ));
        assert!(matches!(
            verify_image(&garbage),
            Err(CaptureError::Verification { .. })
        ));
    }

    #[test]
    fn parses_format_names_and_validates_quality() {
        assert_eq!("PNG".parse::<ScreenshotFormat>().ok(), Some(ScreenshotFormat::Png));
        assert_eq!("jpeg".parse::<ScreenshotFormat>().ok(), Some(ScreenshotFormat::Jpeg));
        assert!("bmp".parse::<ScreenshotFormat>().is_err());
        assert!(matches!(
            CaptureConfig::new("shots", ScreenshotFormat::Jpeg, 0),
            Err(CaptureError::InvalidQuality(0))
        ));
    }

    #[test]
    fn parses_posix_df_output() {
        let stdout = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                      /dev/sda1 1000000 400000 600000 40% /\n";
        assert_eq!(
            parse_df_available(stdout).expect("df output should parse"),
            600_000 * 1024
        );
        assert!(parse_df_available("garbage").is_err());
    }
}
