#![warn(missing_docs)]
//! # dayshot-app
//!
//! ## Purpose
//! Runs the capture loop: one screenshot per simulated day, with the system
//! date advanced before each slot and put back afterwards.
//!
//! ## Responsibilities
//! - Own the single active run and its background worker
//!   ([`RunCoordinator`]).
//! - Apply start scheduling, countdowns, date changes, window focus, capture
//!   retries and escalation in strict per-slot order.
//! - Restore the original date on every exit path.
//! - Layer configuration (flags, run profile, environment, defaults) and set
//!   up file logging.
//!
//! ## Data flow
//! Front-end resolves [`dayshot_core::RunParameters`] -> [`RunCoordinator::start_run`]
//! spawns the worker -> worker drives clock, focuser and capture service,
//! reporting through [`dayshot_ui::RunReporter`] -> final [`RunReport`].
//!
//! ## Error model
//! Problems detected before a run starts are [`AppError`] values. Problems
//! during a run end it with [`RunOutcome::Failed`] and a [`RunFailure`]; the
//! date is restored either way.
//!
//! ## Safety notes
//! - `DAYSHOT_CAPTURE_ENABLED=0|false|off` blocks new runs.
//! - Runs are refused up front when the process may not change the date.

pub mod config;
pub mod coordinator;
pub mod logging;
mod restore;

use dayshot_capture::CaptureError;
use dayshot_core::CoreError;
use thiserror::Error;

pub use config::{
    ParameterOverrides, RunSettings, capture_enabled_from_env, load_profile, log_dir_from_env,
    output_dir_from_env, resolve_parameters,
};
pub use coordinator::{
    RunCoordinator, RunDependencies, RunFailure, RunOutcome, RunReport, RunSnapshot, StopOutcome,
    next_occurrence,
};
pub use logging::{LoggingGuard, init_logging};
pub use restore::RestoreStatus;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("DAYSHOT_VERSION");

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// App-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// A run is already active.
    #[error("a run is already in progress")]
    AlreadyRunning,
    /// Kill switch is engaged.
    #[error("capture is disabled by DAYSHOT_CAPTURE_ENABLED")]
    CaptureDisabled,
    /// The process may not change the system date.
    #[error("changing the system date requires administrator privileges")]
    InsufficientPrivileges,
    /// Run parameters failed validation.
    #[error("invalid run parameters: {0}")]
    Parameters(#[from] CoreError),
    /// A required parameter was given neither on the command line nor in
    /// the run profile.
    #[error("missing run parameter: {0}")]
    MissingParameter(&'static str),
    /// Capture configuration is invalid.
    #[error("capture configuration error: {0}")]
    Capture(#[from] CaptureError),
    /// Run profile could not be read or parsed.
    #[error("run profile error: {0}")]
    Profile(String),
    /// Worker thread could not be started.
    #[error("failed to spawn run worker: {0}")]
    Spawn(std::io::Error),
    /// Logging could not be initialized.
    #[error("logging setup failed: {0}")]
    Logging(String),
    /// Console or filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
