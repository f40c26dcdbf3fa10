#![warn(missing_docs)]
//! # dayshot-system
//!
//! ## Purpose
//! Wraps the two process-wide OS resources a run manipulates: the system
//! date and the foreground window.
//!
//! ## Responsibilities
//! - Read and set the local system date ([`ClockController`]).
//! - Report whether the process may change the date at all.
//! - Bring a window to the foreground by title, with bounded retries
//!   ([`WindowFocuser`], [`focus_window`]).
//! - Provide in-memory implementations for tests and simulated runs.
//!
//! ## Data flow
//! The coordinator asks the clock for today's date at run start, sets one
//! simulated date per slot, and restores the original date at the end. Before
//! each capture attempt it focuses the target window.
//!
//! ## Error model
//! Date changes fail with [`ClockError`]; focus attempts fail with
//! [`FocusError`]. A window that is simply absent is `Ok(false)`, not an
//! error.
//!
//! ## Platform notes
//! Real implementations use Win32 on Windows and `date(1)` on Linux. Other
//! targets report [`ClockError::Unsupported`] / [`FocusError::Unsupported`].

mod clock;
mod focus;

pub use clock::{ClockController, ClockError, HostClock, SimulatedClock};
pub use focus::{
    DesktopFocuser, FocusError, FocusPolicy, SimulatedFocuser, WindowFocuser, focus_window,
};
