#![warn(missing_docs)]
//! # dayshot-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `dayshot` workspace.
//!
//! ## Responsibilities
//! - Represent validated run parameters (duration, slot count, target
//!   application, start mode).
//! - Compute the inter-capture interval and per-slot simulated dates.
//! - Represent captured frames and per-slot outcomes.
//!
//! ## Data flow
//! The front-end builds [`RunParameters`] (from flags or a JSON run profile),
//! the coordinator derives the interval and simulated dates from it, frame
//! sources emit [`Frame`] values and every loop iteration yields one
//! [`SlotResult`].
//!
//! ## Error model
//! Validation failures return [`CoreError`] before a run is ever started; no
//! value in this crate can be constructed in an invalid state.
//!
//! ## Example
//! ```rust
//! use dayshot_core::{RunParameters, StartMode, TargetApplication};
//!
//! let params = RunParameters::new(1, 4, TargetApplication::Zoom, StartMode::Immediate)
//!     .expect("valid parameters");
//! assert_eq!(params.interval_seconds(), 900);
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveTime};
use serde::Deserialize;
use thiserror::Error;

/// Upper bound for the simulated course duration, in hours.
pub const MAX_HOURS: u32 = 24;
/// Upper bound for the number of capture slots in one run.
pub const MAX_SLOTS: u32 = 60;
/// Minimum spacing between two captures, in minutes.
pub const MIN_INTERVAL_MINUTES: u32 = 1;
/// Accepted format for scheduled start times.
pub const HHMM_FORMAT: &str = "%H:%M";

/// Application whose window is brought to the foreground before capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetApplication {
    /// Zoom client.
    Zoom,
    /// Microsoft Teams client.
    Teams,
    /// Google Chrome browser.
    Chrome,
    /// Whole desktop; no window is focused.
    Desktop,
}

impl TargetApplication {
    /// Every supported target, in display order.
    pub const ALL: [TargetApplication; 4] = [
        TargetApplication::Zoom,
        TargetApplication::Teams,
        TargetApplication::Chrome,
        TargetApplication::Desktop,
    ];

    /// Short lowercase key used on the command line and in run profiles.
    pub fn key(&self) -> &'static str {
        match self {
            TargetApplication::Zoom => "zoom",
            TargetApplication::Teams => "teams",
            TargetApplication::Chrome => "chrome",
            TargetApplication::Desktop => "desktop",
        }
    }

    /// Window title fragment searched for when focusing.
    ///
    /// Returns `None` for [`TargetApplication::Desktop`].
    pub fn window_title(&self) -> Option<&'static str> {
        match self {
            TargetApplication::Zoom => Some("Zoom"),
            TargetApplication::Teams => Some("Microsoft Teams"),
            TargetApplication::Chrome => Some("Google Chrome"),
            TargetApplication::Desktop => None,
        }
    }
}

impl fmt::Display for TargetApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.window_title().unwrap_or("Desktop"))
    }
}

impl FromStr for TargetApplication {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        TargetApplication::ALL
            .into_iter()
            .find(|target| target.key() == normalized)
            .ok_or_else(|| CoreError::UnknownApplication(raw.to_string()))
    }
}

/// How a run begins once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", content = "at", rename_all = "snake_case")]
pub enum StartMode {
    /// Start the capture loop right away.
    #[default]
    Immediate,
    /// Wait until the given local time today, then run once.
    ScheduledOnce(#[serde(deserialize_with = "hhmm::deserialize")] NaiveTime),
    /// Run one full cycle at the given local time every day until stopped.
    ScheduledDaily(#[serde(deserialize_with = "hhmm::deserialize")] NaiveTime),
}

/// Validated, immutable parameters of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RunProfile")]
pub struct RunParameters {
    total_hours: u32,
    slot_count: u32,
    target: TargetApplication,
    start_mode: StartMode,
}

impl RunParameters {
    /// Creates validated run parameters.
    ///
    /// # Errors
    /// - [`CoreError::InvalidHours`] when `total_hours` is outside `1..=24`.
    /// - [`CoreError::InvalidSlotCount`] when `slot_count` is outside `1..=60`.
    /// - [`CoreError::IntervalTooShort`] when captures would be spaced by less
    ///   than one minute.
    pub fn new(
        total_hours: u32,
        slot_count: u32,
        target: TargetApplication,
        start_mode: StartMode,
    ) -> Result<Self, CoreError> {
        if !(1..=MAX_HOURS).contains(&total_hours) {
            return Err(CoreError::InvalidHours(total_hours));
        }
        if !(1..=MAX_SLOTS).contains(&slot_count) {
            return Err(CoreError::InvalidSlotCount(slot_count));
        }
        if (total_hours * 60) / slot_count < MIN_INTERVAL_MINUTES {
            return Err(CoreError::IntervalTooShort {
                total_hours,
                slot_count,
            });
        }

        Ok(Self {
            total_hours,
            slot_count,
            target,
            start_mode,
        })
    }

    /// Simulated course duration in hours.
    pub fn total_hours(&self) -> u32 {
        self.total_hours
    }

    /// Number of capture slots (one per simulated day).
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Application focused before each capture.
    pub fn target(&self) -> TargetApplication {
        self.target
    }

    /// Start behavior of the run.
    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    /// Seconds between two consecutive captures.
    pub fn interval_seconds(&self) -> u64 {
        interval_seconds(self.total_hours, self.slot_count)
    }
}

/// Profile shape of [`RunParameters`]; re-validated on load.
#[derive(Debug, Deserialize)]
struct RunProfile {
    total_hours: u32,
    slot_count: u32,
    target: TargetApplication,
    #[serde(default)]
    start_mode: StartMode,
}

impl TryFrom<RunProfile> for RunParameters {
    type Error = CoreError;

    fn try_from(profile: RunProfile) -> Result<Self, Self::Error> {
        RunParameters::new(
            profile.total_hours,
            profile.slot_count,
            profile.target,
            profile.start_mode,
        )
    }
}

/// Spacing between captures: `floor(hours * 3600 / slots)` seconds.
pub fn interval_seconds(total_hours: u32, slot_count: u32) -> u64 {
    (u64::from(total_hours) * 3_600) / u64::from(slot_count.max(1))
}

/// Date the system clock should show during slot `slot_index`.
///
/// Slot 0 keeps `initial`; every later slot advances by one day, whether or
/// not earlier slots were captured.
pub fn simulated_date(initial: NaiveDate, slot_index: u32) -> Option<NaiveDate> {
    initial.checked_add_days(Days::new(u64::from(slot_index)))
}

/// Parses a strict `HH:MM` local time.
///
/// # Errors
/// Returns [`CoreError::InvalidTimeFormat`] for anything else.
pub fn parse_hhmm(raw: &str) -> Result<NaiveTime, CoreError> {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(CoreError::InvalidTimeFormat(raw.to_string()));
    }

    NaiveTime::parse_from_str(trimmed, HHMM_FORMAT)
        .map_err(|_| CoreError::InvalidTimeFormat(raw.to_string()))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_hhmm(&raw).map_err(serde::de::Error::custom)
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotResult {
    /// Zero-based slot index.
    pub index: u32,
    /// Whether a verified screenshot was written for this slot.
    pub captured: bool,
    /// Capture attempts made (at most the configured retry bound).
    pub attempts: u32,
    /// Date the system clock showed during this slot.
    pub simulated_date: NaiveDate,
    /// Written screenshot, when captured.
    pub path: Option<PathBuf>,
}

/// One captured display image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw RGBA pixel buffer (`width * height * 4` bytes).
    pub rgba: Vec<u8>,
}

impl Frame {
    /// Constructs a validated frame.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidFrameShape`] when the pixel buffer length is
    /// not exactly `width * height * 4`, and [`CoreError::EmptyFrame`] for a
    /// zero-sized frame.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::EmptyFrame);
        }

        let expected_len = required_rgba_len(width, height)?;
        if rgba.len() != expected_len {
            return Err(CoreError::InvalidFrameShape {
                expected: expected_len,
                actual: rgba.len(),
            });
        }

        Ok(Self {
            width,
            height,
            rgba,
        })
    }
}

/// Error type for core validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Duration outside the supported range.
    #[error("hours must be between 1 and {MAX_HOURS}, got {0}")]
    InvalidHours(u32),
    /// Slot count outside the supported range.
    #[error("screenshot count must be between 1 and {MAX_SLOTS}, got {0}")]
    InvalidSlotCount(u32),
    /// Captures would be closer than the minimum spacing.
    #[error(
        "minimum spacing between captures is {MIN_INTERVAL_MINUTES} minute(s); \
         {total_hours}h over {slot_count} slots is too dense"
    )]
    IntervalTooShort {
        /// Requested duration.
        total_hours: u32,
        /// Requested slot count.
        slot_count: u32,
    },
    /// Time string is not `HH:MM`.
    #[error("invalid time format '{0}', use HH:MM")]
    InvalidTimeFormat(String),
    /// Application key is not one of the supported targets.
    #[error("unknown application '{0}', expected one of zoom, teams, chrome, desktop")]
    UnknownApplication(String),
    /// Frame buffer shape does not match declared geometry.
    #[error("invalid frame shape: expected {expected} bytes, got {actual}")]
    InvalidFrameShape {
        /// Expected RGBA byte count.
        expected: usize,
        /// Actual RGBA byte count.
        actual: usize,
    },
    /// Frame has no pixels.
    #[error("frame has zero width or height")]
    EmptyFrame,
    /// Frame dimensions overflow addressable memory.
    #[error("frame dimensions overflow")]
    FrameTooLarge,
}

fn required_rgba_len(width: u32, height: u32) -> Result<usize, CoreError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(CoreError::FrameTooLarge)
}
