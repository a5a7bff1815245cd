//! Tracing subscriber setup (spec SPEC_FULL.md §B "Logging"), grounded on
//! the teacher's `infrastructure/logging/logger.rs`, collapsed to this
//! crate's narrower footprint: stdout only, pretty or JSON, no rotation or
//! secret-scrubbing layer (neither applies when nothing is written to a log
//! file).

use std::io;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::ProcessConfig;

/// Initializes the global tracing subscriber from `config`. Call once at
/// process start; returns an error if a subscriber is already installed.
pub fn init_logging(config: &ProcessConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(parse_level(&config.log_level)?.into())
        .from_env_lossy();

    if config.log_json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stdout)
            .with_target(true)
            .with_current_span(true)
            .with_filter(env_filter);
        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .context("tracing subscriber already initialized")?;
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_target(true)
            .with_filter(env_filter);
        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .context("tracing subscriber already initialized")?;
    }

    tracing::info!(level = %config.log_level, json = config.log_json, "logging initialized");
    Ok(())
}

fn parse_level(level: &str) -> Result<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        other => anyhow::bail!("invalid log level: {other}"),
    }
}
