//! Configuration loader (spec SPEC_FULL.md §B "Configuration"), grounded on
//! the teacher's `infrastructure/config/loader.rs`: `figment` layering
//! defaults -> YAML file -> environment, validated on load. The teacher's
//! project/local YAML split collapses to a single optional file here.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::CoreConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid log_level: {0}. must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("scheduler.max_planner_turns_per_round must be at least 1")]
    InvalidPlannerTurns,

    #[error("scheduler.round_wall_clock_seconds must be at least 1")]
    InvalidWallClock,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `CoreConfig`, layering compiled defaults, an optional
    /// `constellation.yaml` in the working directory, then `CONSTELLATION_*`
    /// environment variables (highest precedence).
    pub fn load() -> Result<CoreConfig, ConfigError> {
        Self::load_from(Figment::new()
            .merge(Serialized::defaults(CoreConfig::default()))
            .merge(Yaml::file("constellation.yaml"))
            .merge(Env::prefixed("CONSTELLATION_").split("__")))
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<CoreConfig, ConfigError> {
        Self::load_from(Figment::new()
            .merge(Serialized::defaults(CoreConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CONSTELLATION_").split("__")))
    }

    fn load_from(figment: Figment) -> Result<CoreConfig, ConfigError> {
        let config: CoreConfig = figment.extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &CoreConfig) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.process.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.process.log_level.clone()));
        }
        if config.scheduler.max_planner_turns_per_round == 0 {
            return Err(ConfigError::InvalidPlannerTurns);
        }
        if config.scheduler.round_wall_clock_seconds == 0 {
            return Err(ConfigError::InvalidWallClock);
        }
        Ok(())
    }
}
