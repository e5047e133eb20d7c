//! Layered configuration loading for the gattboard service
//!
//! Sources, lowest priority first:
//! - built-in defaults
//! - `gattboard.toml` in the working directory, or the file given with `--config`
//! - `GATTBOARD_<SECTION>_<KEY>` environment variables
//!   (e.g. `GATTBOARD_PRIMARY_AUTH`, `GATTBOARD_ENGINE_REFRESH_INTERVAL_SECS`)
//! - command line overrides

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use gattboard_core::config::{ConfigError, SyncConfig};

/// File looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "gattboard.toml";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "GATTBOARD_";

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

/// Command line values that take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub refresh_interval_secs: Option<u64>,
}

/// Loads [`SyncConfig`] from defaults, file and environment
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    overrides: Overrides,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this file instead of `gattboard.toml`
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// The merged provider chain
    pub fn figment(&self) -> Figment {
        let file = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::new()
            .merge(Serialized::defaults(SyncConfig::default()))
            .merge(Toml::file(file))
            .merge(environment());

        if let Some(endpoint) = &self.overrides.endpoint {
            figment = figment.merge(("primary.endpoint", endpoint));
        }
        if let Some(secs) = self.overrides.refresh_interval_secs {
            figment = figment.merge(("engine.refresh_interval_secs", secs));
        }
        figment
    }

    /// Load and validate
    pub fn load(&self) -> Result<SyncConfig, ConfigError> {
        if let Some(path) = &self.path {
            if !path.exists() {
                return Err(ConfigError::Loading(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        let config: SyncConfig = self
            .figment()
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// File the loader reads, if it exists
    pub fn source_file(&self) -> Option<&Path> {
        match &self.path {
            Some(path) => Some(path.as_path()),
            None => Path::new(DEFAULT_CONFIG_FILE)
                .exists()
                .then(|| Path::new(DEFAULT_CONFIG_FILE)),
        }
    }
}

/// `GATTBOARD_PRIMARY_TRIGGER_ATTRIBUTE` → `primary.trigger_attribute`
fn environment() -> Env {
    Env::prefixed(ENV_PREFIX)
        .ignore(&["config"])
        .map(|key| key.as_str().replacen('_', ".", 1).into())
}

/// Create example configuration file content
pub fn example_config() -> String {
    let example = SyncConfig::new()
        .with_endpoint("http://homeassistant.local:8123/api/states/sensor.departure_board")
        .with_auth("<long-lived access token>");

    toml::to_string_pretty(&example)
        .unwrap_or_else(|_| "# Failed to generate example config".to_string())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use gattboard_core::config::StopSignalMode;

    const ENDPOINT_TOML: &str = r#"
        [primary]
        endpoint = "http://localhost:8123/api/states/sensor.board"
    "#;

    #[test]
    fn test_defaults_need_endpoint() {
        Jail::expect_with(|_jail| {
            let err = ConfigLoader::new().load().unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn test_file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [primary]
                endpoint = "http://localhost:8123/api/states/sensor.board"
                trigger_attribute = "bus_201"

                [engine]
                refresh_interval_secs = 30
                "#,
            )?;
            jail.set_env("GATTBOARD_PRIMARY_AUTH", "env-token");
            jail.set_env("GATTBOARD_ENGINE_REFRESH_INTERVAL_SECS", "15");
            jail.set_env("GATTBOARD_ENGINE_STOP_SIGNAL", "threaded");

            let config = ConfigLoader::new().load().map_err(|e| e.to_string())?;
            assert_eq!(config.primary.trigger_attribute, "bus_201");
            assert_eq!(config.primary.auth.as_deref(), Some("env-token"));
            assert_eq!(config.engine.refresh_interval_secs, 15);
            assert_eq!(config.engine.stop_signal, StopSignalMode::Threaded);
            assert_eq!(config.service.slot_capacity, 240);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_and_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", ENDPOINT_TOML)?;

            let config = ConfigLoader::new()
                .with_file("custom.toml")
                .with_overrides(Overrides {
                    endpoint: Some("http://other:8123/api/states/sensor.x".to_string()),
                    refresh_interval_secs: Some(5),
                })
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.primary.endpoint, "http://other:8123/api/states/sensor.x");
            assert_eq!(config.engine.refresh_interval_secs, 5);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let err = ConfigLoader::new().with_file("absent.toml").load().unwrap_err();
            assert!(matches!(err, ConfigError::Loading(_)));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, ENDPOINT_TOML)?;
            jail.set_env("GATTBOARD_FALLBACK_COUNT", "0");

            let err = ConfigLoader::new().load().unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn test_example_config_generation() {
        let example = example_config();
        assert!(example.contains("[service]"));
        assert!(example.contains("[primary]"));
        assert!(example.contains("[fallback]"));
        assert!(example.contains("[engine]"));

        let parsed: SyncConfig = toml::from_str(&example).unwrap();
        assert!(parsed.validate().is_ok());
    }
}
