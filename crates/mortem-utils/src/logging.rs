//! # Logging Utilities
//!
//! Logging infrastructure for mortem using `tracing`.
//!
//! The core crate only emits events through the `tracing` macros; embedders
//! (test harnesses, frontends) call one of the initializers below to decide
//! where those events go.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Log filter (e.g., `RUST_LOG=debug`, `RUST_LOG=mortem_core=trace`)
//! - `MORTEM_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `MORTEM_LOG_FILE`: Optional path to an additional log file
//!
//! ## Example
//!
//! ```rust,no_run
//! use mortem_utils::{LogFormat, LogLevel, init_logging_with_level};
//!
//! let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)?;
//! tracing::info!("inspection started");
//! # Ok::<(), mortem_utils::LoggingError>(())
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
pub const LOG_FORMAT_ENV: &str = "MORTEM_LOG_FORMAT";
/// Environment variable naming an additional log file.
pub const LOG_FILE_ENV: &str = "MORTEM_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default for development)
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
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
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
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the background file writer alive.
///
/// Dropping the guard flushes and stops the non-blocking file writer, so hold
/// it for as long as logging should reach the file. Console-only setups get
/// an empty guard.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    file: Option<WorkerGuard>,
}

impl LoggingGuard
{
    /// Whether a file writer is attached.
    pub fn has_file_output(&self) -> bool
    {
        self.file.is_some()
    }
}

/// Initialize logging from the environment.
///
/// Reads `RUST_LOG`, `MORTEM_LOG_FORMAT` and `MORTEM_LOG_FILE`. An unset or
/// unparsable format falls back to pretty output; the level defaults to INFO.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed or the log
/// file directory cannot be created.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|s| LogFormat::from_str(&s).ok())
        .unwrap_or(LogFormat::Pretty);

    let default_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LogLevel>().ok())
        .map_or(Level::INFO, Into::into);

    let log_file = env::var(LOG_FILE_ENV).ok().map(PathBuf::from);
    init_logging_internal(format, default_level, log_file.as_deref(), true)
}

/// Initialize console logging with an explicit level and format.
///
/// `RUST_LOG` still refines the filter when it is set.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_internal(format, level.into(), None, true)
}

/// Initialize file-only logging.
///
/// Useful when stdout belongs to someone else (an embedding frontend or a
/// test harness that compares output).
///
/// ## Errors
///
/// Returns an error if the parent directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging_to_file(path: &Path, level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_internal(format, level.into(), Some(path), false)
}

fn build_filter(default_level: Level) -> EnvFilter
{
    // RUST_LOG can override the default level with more specific filters
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()))
}

fn console_layer(format: LogFormat, default_level: Level) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stdout);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(build_filter(default_level)).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(build_filter(default_level))
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat, default_level: Level) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InitializationFailed(format!("not a file path: {}", path.display())))?;

    // The caller picks the file name, so never rotate underneath them.
    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false);

    let layer = match format {
        LogFormat::Pretty => layer.with_filter(build_filter(default_level)).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(build_filter(default_level))
            .boxed(),
    };

    Ok((layer, guard))
}

fn init_logging_internal(
    format: LogFormat,
    default_level: Level,
    log_file: Option<&Path>,
    console: bool,
) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    if console {
        layers.push(console_layer(format, default_level));
    }

    let mut guard = LoggingGuard::default();
    if let Some(path) = log_file {
        let (layer, worker) = file_layer(path, format, default_level)?;
        layers.push(layer);
        guard.file = Some(worker);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
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
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(matches!(
            LogFormat::from_str("xml"),
            Err(LoggingError::InvalidFormat(ref s)) if s == "xml"
        ));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_error_messages_name_the_bad_value()
    {
        let message = LoggingError::InvalidLevel("loud".into()).to_string();
        assert!(message.contains("loud"));
        assert!(message.contains("trace"));
    }

    #[test]
    fn test_default_guard_has_no_file()
    {
        assert!(!LoggingGuard::default().has_file_output());
    }
}
