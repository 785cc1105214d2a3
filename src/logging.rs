//! Logging configuration for mindcare

use std::path::Path;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{
    self,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

use crate::Result;

/// Target used for failures that need an operator's attention
pub const OPS_ALERT_TARGET: &str = "mindcare::ops_alert";

/// Initialize logging system with file output
pub fn init_logging() -> Result<()> {
    init_logging_with_config(None)
}

/// Initialize logging with configuration
pub fn init_logging_with_config(config: Option<&crate::config::AppConfig>) -> Result<()> {
    let env_filter = match config {
        Some(config) => level_filter(&config.logging.level),
        // Fallback to environment variable or default
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,mindcare=debug")),
    };
    let level = config.map_or("info", |c| c.logging.level.as_str());

    install(env_filter)?;
    tracing::info!("Logging initialized with level: {} - console and file output enabled", level);
    Ok(())
}

/// Initialize logging with custom log level
pub fn init_logging_with_level(level: &str) -> Result<()> {
    install(level_filter(level))?;
    tracing::info!("Logging initialized with level: {} - console and file output enabled", level);
    Ok(())
}

/// Initialize simple logging for testing
pub fn init_simple_logging() -> Result<()> {
    // A second init in the same process is fine for tests
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();

    Ok(())
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("{level},mindcare={level}"))
}

fn install(env_filter: EnvFilter) -> Result<()> {
    let logs_dir = Path::new("logs");
    if !logs_dir.exists() {
        std::fs::create_dir_all(logs_dir)?;
    }

    let file_appender = tracing_appender::rolling::daily("logs", "mindcare.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Console output goes to stderr so streamed answers on stdout stay clean
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(non_blocking)
        .with_ansi(false); // No colors in file

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::MindcareError::ConfigError(format!("logging already set up: {e}")))?;

    tracing::info!("Log files will be saved to: logs/mindcare.log.YYYY-MM-DD");

    // The writer must outlive every span; the process owns it until exit
    std::mem::forget(guard);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_initialization() {
        assert!(init_simple_logging().is_ok());
        // Second call must not panic either
        assert!(init_simple_logging().is_ok());
    }

    #[test]
    fn test_level_filter_includes_crate_directive() {
        let filter = level_filter("warn");
        assert!(filter.to_string().contains("mindcare=warn"));
    }
}
