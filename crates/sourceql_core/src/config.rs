use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::errors::Result;

const PREFIX: &str = "SOURCEQL";
const SEPARATOR: &str = "__";

/// Engine configuration.
///
/// Values from an optional TOML file can be overridden with environment
/// variables prefixed with `SOURCEQL__`, e.g.
/// `SOURCEQL__SCHEDULER__DEFAULT_INTERVAL_MS=500`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run constant folding before planning.
    pub simplify: bool,
    /// Rows read ahead from each source, 0 disables read-ahead.
    pub stream_buffer: usize,
    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            simplify: true,
            stream_buffer: 16,
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval for jobs scheduled without an explicit interval.
    pub default_interval_ms: u64,
    /// How often the scheduler prunes finished job runs.
    pub health_check_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            default_interval_ms: 60 * 1000,
            // Health check every 2 minutes.
            health_check_interval_ms: 2 * 60 * 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

impl EngineConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        Self::build(builder, Self::environment())
    }

    /// Load configuration from a TOML string and the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build(builder, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(PREFIX)
            .separator(SEPARATOR)
            .ignore_empty(true)
            .try_parsing(true)
            .keep_prefix(false)
    }

    fn build(builder: ConfigBuilder<DefaultState>, env: Environment) -> Result<Self> {
        let config = builder.add_source(env).build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        let config = EngineConfig::build(
            Config::builder(),
            EngineConfig::environment().source(Some(HashMap::new())),
        )
        .unwrap();
        assert_eq!(EngineConfig::default(), config);
    }

    #[test]
    fn file_values_with_env_override() {
        let builder = Config::builder().add_source(File::from_str(
            r#"
            simplify = false

            [scheduler]
            default_interval_ms = 250
            "#,
            FileFormat::Toml,
        ));
        let env = EngineConfig::environment().source(Some(HashMap::from([(
            "SOURCEQL__SCHEDULER__DEFAULT_INTERVAL_MS".to_string(),
            "500".to_string(),
        )])));

        let config = EngineConfig::build(builder, env).unwrap();
        assert!(!config.simplify);
        assert_eq!(16, config.stream_buffer);
        assert_eq!(Duration::from_millis(500), config.scheduler.default_interval());
    }

    #[test]
    fn invalid_value_is_config_error() {
        let builder = Config::builder().add_source(File::from_str(
            "stream_buffer = \"lots\"",
            FileFormat::Toml,
        ));
        let err = EngineConfig::build(builder, EngineConfig::environment().source(Some(HashMap::new())))
            .unwrap_err();
        assert!(matches!(err, crate::errors::SourceQlError::Config(_)), "{err}");
    }
}
