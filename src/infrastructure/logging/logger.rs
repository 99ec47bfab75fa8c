use anyhow::Result;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::{LogFormat, LoggingConfig, RotationPolicy};

/// Base name of rolled log files.
pub const LOG_FILE_NAME: &str = "agent-relay.log";

/// Logger implementation using tracing
///
/// Holds the non-blocking writer guard; dropping it flushes and stops file
/// logging, so keep it alive for the life of the process.
pub struct LoggerImpl {
    guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Install the global subscriber.
    ///
    /// Stdout always gets a layer in the configured format. When `log_dir`
    /// is set, a JSON file layer with the configured rotation is added.
    /// `RUST_LOG` directives refine the configured level.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let env_filter = build_filter(&config.level)?;

        let stdout_layer = match config.format {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .boxed(),
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stdout)
                .with_target(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
        };

        let (file_layer, guard) = match &config.log_dir {
            Some(dir) => {
                let (writer, guard) = tracing_appender::non_blocking(file_appender(dir, config.rotation));
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()?;

        tracing::info!(
            level = %config.level,
            format = ?config.format,
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { guard })
    }

    /// Whether file output is active.
    pub fn has_file_output(&self) -> bool {
        self.guard.is_some()
    }
}

/// Rolling file appender for the configured policy.
pub fn file_appender(dir: &Path, rotation: RotationPolicy) -> RollingFileAppender {
    match rotation {
        RotationPolicy::Daily => rolling::daily(dir, LOG_FILE_NAME),
        RotationPolicy::Hourly => rolling::hourly(dir, LOG_FILE_NAME),
        RotationPolicy::Never => rolling::never(dir, LOG_FILE_NAME),
    }
}

/// Filter with the configured level as default, refined by `RUST_LOG`.
fn build_filter(level: &str) -> Result<EnvFilter> {
    let default_level = parse_log_level(level)?;
    Ok(EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy())
}

/// Level names accepted in `logging.level`, case-insensitive.
fn parse_log_level(level: &str) -> Result<Level> {
    level
        .parse::<Level>()
        .map_err(|_| anyhow::anyhow!("Unknown log level '{level}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        for (name, expected) in [("warn", Level::WARN), ("DEBUG", Level::DEBUG), ("Info", Level::INFO)] {
            assert_eq!(parse_log_level(name).unwrap(), expected);
        }
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_build_filter_rejects_unknown_level() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("chatty").is_err());
    }

    #[test]
    fn test_logger_init_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            log_dir: Some(dir.path().to_path_buf()),
            rotation: RotationPolicy::Never,
        };

        // Only one global subscriber per test binary; a second init fails.
        let logger = LoggerImpl::init(&config).unwrap();
        assert!(logger.has_file_output());
        assert!(LoggerImpl::init(&config).is_err());
    }
}
