//! Foreground window activation.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dayshot_timing::{CancellationToken, Timer};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Brings a window to the foreground.
pub trait WindowFocuser: Send + Sync {
    /// Makes one attempt to focus a window whose title contains `title`
    /// (case-insensitive).
    ///
    /// Returns `Ok(false)` when no such window exists.
    ///
    /// # Errors
    /// Returns [`FocusError`] when a window was found but could not be
    /// activated, or the platform has no window backend.
    fn try_focus(&self, title: &str) -> Result<bool, FocusError>;
}

/// Bounded retry applied around [`WindowFocuser::try_focus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for FocusPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Focuses `title` with the retry bound of `policy`.
///
/// Delays go through `timer`, so a cancelled `token` ends the retries early.
/// Returns `true` once a window was focused.
pub fn focus_window(
    focuser: &dyn WindowFocuser,
    title: &str,
    policy: FocusPolicy,
    timer: &dyn Timer,
    token: &CancellationToken,
) -> bool {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match focuser.try_focus(title) {
            Ok(true) => {
                debug!(title, attempt, "window focused");
                return true;
            }
            Ok(false) => debug!(title, attempt, "window not found"),
            Err(error) => warn!(title, attempt, %error, "window focus failed"),
        }

        if attempt < attempts && !timer.pause(policy.delay, token) {
            return false;
        }
    }

    info!(title, attempts, "window could not be focused");
    false
}

/// Focuses top-level windows of the current desktop session.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopFocuser;

impl DesktopFocuser {
    /// Creates the desktop focuser.
    pub fn new() -> Self {
        Self
    }
}

impl WindowFocuser for DesktopFocuser {
    #[cfg(windows)]
    fn try_focus(&self, title: &str) -> Result<bool, FocusError> {
        win32::focus_by_title(title)
    }

    #[cfg(not(windows))]
    fn try_focus(&self, _title: &str) -> Result<bool, FocusError> {
        Err(FocusError::Unsupported)
    }
}

#[cfg(windows)]
mod win32 {
    use std::ptr::null_mut;

    use windows_sys::Win32::Foundation::{HWND, LPARAM};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextLengthW, GetWindowTextW, IsIconic, IsWindowVisible,
        SW_RESTORE, SetForegroundWindow, ShowWindow,
    };
    use windows_sys::core::BOOL;

    use super::FocusError;

    struct TitleSearch {
        needle: String,
        found: HWND,
    }

    pub(super) fn focus_by_title(title: &str) -> Result<bool, FocusError> {
        let mut search = TitleSearch {
            needle: title.to_lowercase(),
            found: null_mut(),
        };

        unsafe {
            // Safety:
            // - `search` outlives the enumeration; the callback only runs
            //   synchronously inside EnumWindows.
            EnumWindows(Some(match_title), &mut search as *mut TitleSearch as LPARAM);
        }

        if search.found.is_null() {
            return Ok(false);
        }

        let hwnd = search.found;
        unsafe {
            // Safety:
            // - `hwnd` was reported by EnumWindows for this session.
            if IsIconic(hwnd) != 0 {
                ShowWindow(hwnd, SW_RESTORE);
            }
        }

        let activated = unsafe {
            // Safety:
            // - `hwnd` is a top-level window handle.
            SetForegroundWindow(hwnd)
        };
        if activated == 0 {
            return Err(FocusError::Rejected(
                "SetForegroundWindow refused activation".to_string(),
            ));
        }

        Ok(true)
    }

    unsafe extern "system" fn match_title(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = unsafe {
            // Safety:
            // - `lparam` is the `TitleSearch` pointer passed to EnumWindows.
            &mut *(lparam as *mut TitleSearch)
        };

        let visible = unsafe { IsWindowVisible(hwnd) } != 0;
        let length = unsafe { GetWindowTextLengthW(hwnd) };
        if !visible || length <= 0 {
            return 1;
        }

        let mut buffer = vec![0u16; length as usize + 1];
        let written = unsafe {
            // Safety:
            // - Buffer has room for `length` UTF-16 units plus terminator.
            GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32)
        };
        if written <= 0 {
            return 1;
        }

        let text = String::from_utf16_lossy(&buffer[..written as usize]).to_lowercase();
        if text.contains(&search.needle) {
            search.found = hwnd;
            return 0;
        }

        1
    }
}

/// In-memory focuser that knows a fixed set of window titles.
#[derive(Debug, Default)]
pub struct SimulatedFocuser {
    titles: Vec<String>,
    requests: Mutex<Vec<String>>,
}

impl SimulatedFocuser {
    /// Creates a focuser that finds windows whose title contains one of
    /// `titles`.
    pub fn with_windows<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            titles: titles.into_iter().map(Into::into).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Titles requested so far, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WindowFocuser for SimulatedFocuser {
    fn try_focus(&self, title: &str) -> Result<bool, FocusError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(title.to_string());

        let needle = title.to_lowercase();
        Ok(self
            .titles
            .iter()
            .any(|window| window.to_lowercase().contains(&needle)))
    }
}

/// Focus layer error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FocusError {
    /// Window exists but activation was refused.
    #[error("window activation rejected: {0}")]
    Rejected(String),
    /// No window backend exists for this platform.
    #[error("window focus is not supported on this platform")]
    Unsupported,
}
