use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Keeps the file writer alive; dropping it flushes buffered log lines
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Directive string for a level: the library and the binary at `level`, everything else at warn
pub fn filter_directive(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    format!("video_annotator_rust={level},video_annotator={level},warn")
}

/// Resolve the effective filter: CLI level, then `RUST_LOG`, then the configured level
pub fn build_filter(config: &LoggingConfig, cli_level: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return EnvFilter::try_new(filter_directive(level))
            .with_context(|| format!("invalid log level: {}", level));
    }

    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(filter_directive(&config.level))
            .with_context(|| format!("invalid log level: {}", config.level)),
    }
}

/// Install the global subscriber: stderr always, a daily rolling file when `log_dir` is set
pub fn init_logging(config: &LoggingConfig, cli_level: Option<&str>) -> Result<LogGuard> {
    let mut guard = None;
    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_name);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(build_filter(config, cli_level)?),
            )
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(build_filter(config, cli_level)?);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            filter_directive(" DEBUG "),
            "video_annotator_rust=debug,video_annotator=debug,warn"
        );
    }

    #[test]
    fn test_cli_level_wins() {
        let config = LoggingConfig::default();
        let filter = build_filter(&config, Some("trace")).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("video_annotator_rust=trace"));
        assert!(rendered.contains("video_annotator=trace"));
    }

    #[test]
    fn test_invalid_level_is_error() {
        let config = LoggingConfig::default();
        assert!(build_filter(&config, Some("loud=??=")).is_err());
    }
}
