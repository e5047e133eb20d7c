//! Engine configuration
//!
//! Plain serde structs with defaults matching the deployed service. Layered
//! loading (file, environment, command line) lives in the binary; this module
//! only defines the shape and the consistency checks.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunking::{DEFAULT_SLOT_CAPACITY, DEFAULT_SLOT_COUNT};
use crate::departures::DATE_PLACEHOLDER;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Advertised local name; BlueZ truncates names of 10 characters or more
pub const DEFAULT_LOCAL_NAME: &str = "SPServer";

/// Primary GATT service
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0xD2EA587F_19C8_4F4C_8179_3BA0BC150B01);

/// Characteristic slots, in reassembly order
pub const DEFAULT_CHARACTERISTIC_UUIDS: [Uuid; DEFAULT_SLOT_COUNT] = [
    Uuid::from_u128(0x0DF8D897_33FE_4AF4_9E7A_63D24664C94B),
    Uuid::from_u128(0x0DF8D897_33FE_4AF4_9E7A_63D24664C94C),
    Uuid::from_u128(0x0DF8D897_33FE_4AF4_9E7A_63D24664C94D),
    Uuid::from_u128(0x0DF8D897_33FE_4AF4_9E7A_63D24664C94E),
    Uuid::from_u128(0x0DF8D897_33FE_4AF4_9E7A_63D24664C94F),
];

pub const DEFAULT_TIMETABLE_URL: &str = "https://www.wtp.waw.pl/rozklady-jazdy/?wtp_dt={date}&wtp_md=8&wtp_dy=1&wtp_st=5151&wtp_pt=02";

pub const DEFAULT_TRIGGER_ATTRIBUTE: &str = "bus_197";

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

const MAX_LOCAL_NAME_LEN: usize = 9;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of the synchronization engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Published GATT service layout
    pub service: ServiceConfig,
    /// Primary data source
    pub primary: PrimaryConfig,
    /// Timetable fallback
    pub fallback: FallbackConfig,
    /// Scheduling loop behaviour
    pub engine: EngineConfig,
}

/// GATT service layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Advertised local name
    pub local_name: String,
    /// Service UUID
    pub uuid: Uuid,
    /// Characteristic UUIDs in slot order
    pub characteristics: Vec<Uuid>,
    /// Maximum value size per characteristic in bytes
    pub slot_capacity: usize,
    /// Bluetooth adapter to use (e.g. `hci0`); the default adapter when unset
    pub adapter: Option<String>,
}

/// Primary snapshot endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrimaryConfig {
    /// Endpoint returning the JSON snapshot
    pub endpoint: String,
    /// Value of the `Authorization` header; `Bearer ` is added when missing
    pub auth: Option<String>,
    /// Request timeout
    pub timeout_secs: u64,
    /// Attribute whose falsy value triggers the timetable fallback
    pub trigger_attribute: String,
}

/// Timetable fallback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    /// Timetable URL with a `{date}` placeholder
    pub url_template: String,
    /// Line identifier to the snapshot attribute it fills
    pub lines: BTreeMap<String, String>,
    /// Number of departures kept per line
    pub count: usize,
    /// Request timeout
    pub timeout_secs: u64,
}

/// Which stop signal realization to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopSignalMode {
    /// Pick based on the host platform
    #[default]
    Auto,
    /// Async-aware flag sharing the engine's runtime
    Cooperative,
    /// Thread-safe flag settable from foreign threads
    Threaded,
}

/// Scheduling loop behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between the end of one cycle and the start of the next
    pub refresh_interval_secs: u64,
    /// Stop signal realization
    pub stop_signal: StopSignalMode,
    /// Send systemd notifications (READY / WATCHDOG / STOPPING)
    pub watchdog: bool,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            uuid: DEFAULT_SERVICE_UUID,
            characteristics: DEFAULT_CHARACTERISTIC_UUIDS.to_vec(),
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            adapter: None,
        }
    }
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth: None,
            timeout_secs: 30,
            trigger_attribute: DEFAULT_TRIGGER_ATTRIBUTE.to_string(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        let lines = [("197", "bus_197"), ("201", "bus_201")]
            .into_iter()
            .map(|(line, attr)| (line.to_string(), attr.to_string()))
            .collect();

        Self {
            url_template: DEFAULT_TIMETABLE_URL.to_string(),
            lines,
            count: 3,
            timeout_secs: 30,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            stop_signal: StopSignalMode::Auto,
            watchdog: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Builders and Validation
// ----------------------------------------------------------------------------

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.primary.endpoint = endpoint.into();
        self
    }

    /// Set the authorization token
    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.primary.auth = Some(auth.into());
        self
    }

    /// Set the refresh interval
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.engine.refresh_interval_secs = interval.as_secs();
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.engine.refresh_interval_secs)
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let service = &self.service;
        if service.local_name.is_empty() || service.local_name.len() > MAX_LOCAL_NAME_LEN {
            return Err(ConfigError::Validation(format!(
                "Local name must be 1 to {} characters, got {:?}",
                MAX_LOCAL_NAME_LEN, service.local_name
            )));
        }
        if service.characteristics.is_empty() {
            return Err(ConfigError::Validation(
                "At least one characteristic must be configured".to_string(),
            ));
        }
        for (i, uuid) in service.characteristics.iter().enumerate() {
            if service.characteristics[..i].contains(uuid) || *uuid == service.uuid {
                return Err(ConfigError::Validation(format!(
                    "Duplicate characteristic UUID: {uuid}"
                )));
            }
        }
        if service.slot_capacity == 0 {
            return Err(ConfigError::Validation(
                "Slot capacity must be greater than 0".to_string(),
            ));
        }

        let endpoint = self.primary.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "Primary endpoint must be configured".to_string(),
            ));
        }
        url::Url::parse(endpoint).map_err(|e| {
            ConfigError::Validation(format!("Invalid primary endpoint {endpoint:?}: {e}"))
        })?;
        if self.primary.trigger_attribute.is_empty() {
            return Err(ConfigError::Validation(
                "Trigger attribute must not be empty".to_string(),
            ));
        }

        let fallback = &self.fallback;
        if !fallback.url_template.contains(DATE_PLACEHOLDER) {
            return Err(ConfigError::Validation(format!(
                "Timetable URL template must contain {DATE_PLACEHOLDER}"
            )));
        }
        url::Url::parse(&fallback.url_template.replace(DATE_PLACEHOLDER, "2000-01-01"))
            .map_err(|e| ConfigError::Validation(format!("Invalid timetable URL: {e}")))?;
        if fallback.lines.is_empty() {
            return Err(ConfigError::Validation(
                "At least one fallback line must be configured".to_string(),
            ));
        }
        if !fallback
            .lines
            .values()
            .any(|attribute| *attribute == self.primary.trigger_attribute)
        {
            return Err(ConfigError::Validation(format!(
                "Trigger attribute {:?} is not filled by any fallback line",
                self.primary.trigger_attribute
            )));
        }
        if fallback.count == 0 {
            return Err(ConfigError::Validation(
                "Fallback departure count must be greater than 0".to_string(),
            ));
        }

        if self.engine.refresh_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Refresh interval must be greater than 0".to_string(),
            ));
        }
        if self.primary.timeout_secs == 0 || fallback.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Request timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl FallbackConfig {
    /// Lines of interest, in key order
    pub fn line_ids(&self) -> Vec<String> {
        self.lines.keys().cloned().collect()
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SyncConfig {
        SyncConfig::new()
            .with_endpoint("http://homeassistant.local:8123/api/states/sensor.board")
            .with_auth("secret")
    }

    #[test]
    fn test_default_config_matches_published_service() {
        let config = SyncConfig::default();
        assert_eq!(config.service.local_name, "SPServer");
        assert_eq!(config.service.characteristics.len(), 5);
        assert_eq!(config.service.slot_capacity, 240);
        assert_eq!(
            config.service.uuid.to_string().to_uppercase(),
            "D2EA587F-19C8-4F4C-8179-3BA0BC150B01"
        );
        assert_eq!(
            config.service.characteristics[4].to_string().to_uppercase(),
            "0DF8D897-33FE-4AF4-9E7A-63D24664C94F"
        );
        assert_eq!(config.fallback.line_ids(), vec!["197", "201"]);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_config_needs_endpoint() {
        assert!(SyncConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid();
        config.service.local_name = "FarTooLongName".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.service.characteristics.push(config.service.characteristics[0]);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.fallback.url_template = "https://example.com/timetable".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.primary.trigger_attribute = "bus_300".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = valid();
        config.fallback.lines.remove("197");
        assert!(config.validate().is_err());

        let mut config = valid();
        config.primary.trigger_attribute = "bus_201".to_string();
        assert!(config.validate().is_ok());

        let mut config = valid();
        config.fallback.count = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.engine.refresh_interval_secs = 0;
        assert!(config.validate().is_err());

        let config = valid().with_endpoint("not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [primary]
            endpoint = "http://localhost/api"

            [engine]
            stop_signal = "threaded"
            "#,
        )
        .unwrap();

        assert_eq!(config.primary.endpoint, "http://localhost/api");
        assert_eq!(config.primary.trigger_attribute, "bus_197");
        assert_eq!(config.engine.stop_signal, StopSignalMode::Threaded);
        assert_eq!(config.engine.refresh_interval_secs, 60);
        assert_eq!(config.service.characteristics.len(), 5);
    }
}
