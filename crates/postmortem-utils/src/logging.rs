//! # Logging Utilities
//!
//! Logging infrastructure for postmortem using `tracing`.
//!
//! This module provides structured logging with support for:
//! - Pretty output for development and JSON output for log collectors
//! - Environment variable configuration
//! - Optional file output next to the console
//!
//! Console output always goes to **stderr**. Crash reports are frequently
//! written to stdout, and log lines must never interleave with them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use postmortem_utils::init_logging;
//!
//! // Reads RUST_LOG, POSTMORTEM_LOG_FORMAT and POSTMORTEM_LOG_FILE.
//! // Keep the guard alive for as long as file output should be flushed.
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=postmortem_core=debug`)
//! - `POSTMORTEM_LOG_FORMAT`: Set output format (`json` or `pretty`, default: `pretty`)
//! - `POSTMORTEM_LOG_FILE`: Optional path to log file (if not set, logs only to stderr)
//!
//! ## Examples
//!
//! ```rust,no_run
//! use postmortem_utils::{init_logging_with, LogFormat, LogLevel, LoggingOptions};
//!
//! let options = LoggingOptions {
//!     format: LogFormat::Json,
//!     level: Some(LogLevel::Debug),
//!     ..LoggingOptions::default()
//! };
//! let _guard = init_logging_with(options).expect("Failed to initialize logging");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "POSTMORTEM_LOG_FORMAT";

/// Environment variable naming an optional log file.
pub const LOG_FILE_ENV: &str = "POSTMORTEM_LOG_FILE";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    #[default]
    Pretty,
    /// JSON format, one object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// How the subscriber should be assembled.
#[derive(Debug, Clone)]
pub struct LoggingOptions
{
    /// Output format for every layer.
    pub format: LogFormat,
    /// Explicit level. Takes precedence over `RUST_LOG` when set.
    pub level: Option<LogLevel>,
    /// Also write to this file (no ANSI colours, never rotated).
    pub file: Option<PathBuf>,
    /// Emit to stderr.
    pub console: bool,
}

impl Default for LoggingOptions
{
    fn default() -> Self
    {
        Self {
            format: LogFormat::Pretty,
            level: None,
            file: None,
            console: true,
        }
    }
}

impl LoggingOptions
{
    /// Options read from `POSTMORTEM_LOG_FORMAT` and `POSTMORTEM_LOG_FILE`.
    ///
    /// An unparsable format falls back to pretty output.
    pub fn from_env() -> Self
    {
        let format = env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::from_str(&s).ok())
            .unwrap_or_default();
        let file = env::var_os(LOG_FILE_ENV).map(PathBuf::from);

        Self {
            format,
            file,
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter
    {
        // Priority: explicit level, then RUST_LOG (module filters allowed), then INFO.
        if let Some(level) = self.level {
            return EnvFilter::new(Level::from(level).to_string());
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    }
}

/// Keeps the background file writer alive.
///
/// Dropping the guard flushes and stops file output; console output is
/// unaffected.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging with settings taken from the environment
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed or the log
/// file cannot be opened.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    init_logging_with(LoggingOptions::from_env())
}

/// Initialize logging with explicit level and format, console only
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_with(LoggingOptions {
        format,
        level: Some(level),
        ..LoggingOptions::default()
    })
}

/// Initialize logging from explicit options
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed or the log
/// file cannot be opened.
pub fn init_logging_with(options: LoggingOptions) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = LoggingGuard::default();

    if options.console {
        layers.push(build_layer(options.format, io::stderr, true, options.env_filter()));
    }

    if let Some(path) = &options.file {
        let (writer, worker) = tracing_appender::non_blocking(open_appender(path)?);
        layers.push(build_layer(options.format, writer, false, options.env_filter()));
        guard._file = Some(worker);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;

    Ok(guard)
}

fn open_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender, LoggingError>
{
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::FileError(io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name")))?;
    std::fs::create_dir_all(directory)?;
    Ok(tracing_appender::rolling::never(directory, file_name))
}

fn build_layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert!(matches!(LogLevel::from_str("loud"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_default_options_log_to_console_only()
    {
        let options = LoggingOptions::default();
        assert!(options.console);
        assert!(options.file.is_none());
        assert_eq!(options.format, LogFormat::Pretty);
    }

    #[test]
    fn test_appender_rejects_path_without_file_name()
    {
        assert!(matches!(open_appender(Path::new("/")), Err(LoggingError::FileError(_))));
    }
}
