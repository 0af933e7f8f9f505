//! Adapter configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/mmdev.toml` by default)
//! 2. environment variables prefixed with `MMDEV_`, nested keys separated by
//!    a double underscore (`MMDEV_APPLICATION__LOG_LEVEL=debug`)
//!
//! Each `[[devices]]` entry names a driver registered in a
//! [`ModuleRegistry`](crate::module::ModuleRegistry) and carries a free-form
//! `config` table that the driver's factory validates.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Where `AdapterConfig::load` looks by default.
pub const DEFAULT_CONFIG_PATH: &str = "config/mmdev.toml";
/// Environment overrides, e.g. `MMDEV_APPLICATION__LOG_LEVEL=debug`.
pub const ENV_PREFIX: &str = "MMDEV_";

/// Top-level adapter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Devices to create, in order.
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Settings for the adapter process itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Process name used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// One device to instantiate at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Host-visible label, unique per configuration
    pub label: String,
    /// Registered device name, e.g. "AcquireCamera"
    pub driver: String,
    /// Disabled entries are kept but skipped at startup.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific settings
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn default_name() -> String {
    "mmdev".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl AdapterConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] with environment overrides.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load `path` (missing file means defaults) with environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Check log level and device labels.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let mut labels = HashSet::new();
        for device in &self.devices {
            if device.label.trim().is_empty() {
                return Err(format!("Device using driver '{}' has an empty label", device.driver));
            }
            if !labels.insert(device.label.as_str()) {
                return Err(format!("Duplicate device label: {}", device.label));
            }
        }

        Ok(())
    }

    /// Definitions with `enabled = true`, in file order.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|d| d.enabled)
    }
}
