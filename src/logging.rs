//! Logging and tracing initialization for cfgsnap.
//!
//! Structured logging via the `tracing` ecosystem: pretty console output or
//! JSON for machine parsing, plus an optional append-only log file.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
    /// Also append plain-text logs to this file
    pub file: Option<PathBuf>,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// Call once from `main()`, after config is loaded. The level can be
/// overridden at runtime via the `RUST_LOG` environment variable.
///
/// # Examples
///
/// ```ignore
/// cfgsnap::logging::init(LogConfig::default())?;
///
/// cfgsnap::logging::init(LogConfig {
///     file: Some("backup.log".into()),
///     ..Default::default()
/// })?;
/// ```
pub fn init(config: LogConfig) -> Result<()> {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("cfgsnap={}", default_level.as_str().to_lowercase()))
    });

    // Registered first so both branches share the layer's subscriber type.
    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    if config.json {
        // JSON output for structured logging / log aggregation
        tracing_subscriber::registry()
            .with(file_layer)
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        // Pretty console output for human readability
        tracing_subscriber::registry()
            .with(file_layer)
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}
