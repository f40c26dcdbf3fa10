//! Run settings, environment switches and parameter resolution.
//!
//! Precedence for run parameters is command line, then run profile, then
//! built-in defaults. Directories fall back to environment variables before
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dayshot_core::{RunParameters, StartMode, TargetApplication};
use dayshot_system::FocusPolicy;
use tracing::debug;

use crate::AppError;

/// Countdown before the first capture of a cycle.
pub const INITIAL_COUNTDOWN_SECS: u64 = 15;
/// Capture attempts per slot before escalating.
pub const MAX_CAPTURE_RETRIES: u32 = 3;
/// Pause between two capture attempts of one slot.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);
/// Pause before the second and last attempt to restore the date.
pub const RESTORE_RETRY_DELAY: Duration = Duration::from_millis(500);
/// How long a stop request waits for the worker to acknowledge.
pub const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Kill switch; `0`, `false` or `off` blocks new runs.
pub const CAPTURE_ENABLED_ENV: &str = "DAYSHOT_CAPTURE_ENABLED";
/// Overrides the log directory.
pub const LOG_DIR_ENV: &str = "DAYSHOT_LOG_DIR";
/// Overrides the screenshot root directory.
pub const OUTPUT_DIR_ENV: &str = "DAYSHOT_OUTPUT_DIR";

/// Log directory when neither flag nor environment names one.
pub const DEFAULT_LOG_DIR: &str = "logs";
/// Screenshot root when neither flag nor environment names one.
pub const DEFAULT_OUTPUT_DIR: &str = "screenshots";

/// Timing and retry knobs of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Seconds counted down before the first slot.
    pub initial_countdown_secs: u64,
    /// Capture attempts per slot.
    pub max_capture_retries: u32,
    /// Delay between capture attempts.
    pub retry_delay: Duration,
    /// Delay before retrying a failed date restore.
    pub restore_retry_delay: Duration,
    /// Focus retry bound applied inside each capture attempt.
    pub focus: FocusPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            initial_countdown_secs: INITIAL_COUNTDOWN_SECS,
            max_capture_retries: MAX_CAPTURE_RETRIES,
            retry_delay: RETRY_DELAY,
            restore_retry_delay: RESTORE_RETRY_DELAY,
            focus: FocusPolicy::default(),
        }
    }
}

/// Checks the runtime kill switch.
///
/// Semantics:
/// - Unset => capture enabled.
/// - `0`, `false`, `off` (case-insensitive) => capture disabled.
/// - Any other value => capture enabled.
pub fn capture_enabled_from_env() -> bool {
    match std::env::var(CAPTURE_ENABLED_ENV) {
        Ok(value) => !matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "off"
        ),
        Err(_) => true,
    }
}

/// Log directory from `DAYSHOT_LOG_DIR`, or [`DEFAULT_LOG_DIR`].
pub fn log_dir_from_env() -> PathBuf {
    dir_from_env(LOG_DIR_ENV, DEFAULT_LOG_DIR)
}

/// Screenshot root from `DAYSHOT_OUTPUT_DIR`, or [`DEFAULT_OUTPUT_DIR`].
pub fn output_dir_from_env() -> PathBuf {
    dir_from_env(OUTPUT_DIR_ENV, DEFAULT_OUTPUT_DIR)
}

fn dir_from_env(name: &str, default: &str) -> PathBuf {
    std::env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Loads a JSON run profile.
///
/// # Errors
/// Returns [`AppError::Profile`] when the file cannot be read, is not valid
/// JSON, or holds out-of-range parameters.
pub fn load_profile(path: &Path) -> Result<RunParameters, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|error| AppError::Profile(format!("{}: {error}", path.display())))?;
    let params: RunParameters = serde_json::from_str(&raw)
        .map_err(|error| AppError::Profile(format!("{}: {error}", path.display())))?;

    debug!(path = %path.display(), ?params, "run profile loaded");
    Ok(params)
}

/// Parameters given explicitly on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParameterOverrides {
    /// Course duration in hours.
    pub hours: Option<u32>,
    /// Number of capture slots.
    pub slots: Option<u32>,
    /// Application to focus.
    pub target: Option<TargetApplication>,
    /// Start behavior.
    pub start_mode: Option<StartMode>,
}

/// Merges command-line overrides over an optional profile.
///
/// Target defaults to Zoom and start mode to immediate; hours and slot count
/// have no default.
///
/// # Errors
/// - [`AppError::MissingParameter`] when hours or slot count is absent.
/// - [`AppError::Parameters`] when the merged values fail validation.
pub fn resolve_parameters(
    profile: Option<RunParameters>,
    overrides: ParameterOverrides,
) -> Result<RunParameters, AppError> {
    let hours = overrides
        .hours
        .or(profile.map(|params| params.total_hours()))
        .ok_or(AppError::MissingParameter("hours"))?;
    let slots = overrides
        .slots
        .or(profile.map(|params| params.slot_count()))
        .ok_or(AppError::MissingParameter("slots"))?;
    let target = overrides
        .target
        .or(profile.map(|params| params.target()))
        .unwrap_or(TargetApplication::Zoom);
    let start_mode = overrides
        .start_mode
        .or(profile.map(|params| params.start_mode()))
        .unwrap_or_default();

    Ok(RunParameters::new(hours, slots, target, start_mode)?)
}
