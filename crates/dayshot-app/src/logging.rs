//! File and console logging.
//!
//! Every event is appended to `<log_dir>/dayshot.log` as
//! `YYYY-MM-DD HH:MM:SS - LEVEL message fields`. Warnings and errors are also
//! echoed to stderr. `RUST_LOG` overrides the default `info` filter.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::AppError;

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "dayshot.log";
/// Timestamp prefix of every log line.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keeps the background log writer alive; flushes on drop.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _writer: WorkerGuard,
    path: PathBuf,
}

impl LoggingGuard {
    /// Log file being appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Installs the global subscriber.
///
/// # Errors
/// Returns [`AppError::Logging`] when the log directory or file cannot be
/// created, or a global subscriber is already installed.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard, AppError> {
    let (subscriber, guard) = build_subscriber(log_dir)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|error| AppError::Logging(error.to_string()))?;
    Ok(guard)
}

/// Builds the subscriber without installing it.
///
/// # Errors
/// Returns [`AppError::Logging`] when the log file cannot be opened.
pub fn build_subscriber(
    log_dir: &Path,
) -> Result<(impl Subscriber + Send + Sync + 'static, LoggingGuard), AppError> {
    fs::create_dir_all(log_dir).map_err(|error| {
        AppError::Logging(format!("cannot create {}: {error}", log_dir.display()))
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(log_dir)
        .map_err(|error| AppError::Logging(error.to_string()))?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .event_format(LineFormat);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(LevelFilter::WARN);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer);

    Ok((
        subscriber,
        LoggingGuard {
            _writer: worker,
            path: log_dir.join(LOG_FILE_NAME),
        },
    ))
}

struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} - {} ",
            Local::now().format(LOG_TIMESTAMP_FORMAT),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
