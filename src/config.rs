//! Device manager configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/devices.toml` (base configuration)
//! 2. Environment variables prefixed with `VISA_DM_`
//!
//! Every section is optional; missing values fall back to the defaults of
//! the device layer.
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! VISA_DM_MANAGER__LOG_LEVEL=debug
//! VISA_DM_WRITE__BIG_ENDIAN=true
//! VISA_DM_WRITE__DATATYPE=d
//! ```
//!
//! # Example
//!
//! ```no_run
//! use visa_device_manager::config::ManagerConfig;
//!
//! let config = ManagerConfig::load()?;
//! println!("Backend: {}", config.manager.backend);
//! println!("Devices: {}", config.devices.len());
//! # Ok::<(), visa_device_manager::config::ConfigError>(())
//! ```

use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::WriteOptions;
use crate::session::DataType;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/devices.toml";

/// Prefix of environment variables that override file values.
pub const ENV_PREFIX: &str = "VISA_DM_";

pub(crate) const VALID_LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or deserialized.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values were read but are not usable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level device manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Manager-wide settings
    #[serde(default)]
    pub manager: ManagerSettings,
    /// Defaults for writes that carry values
    #[serde(default)]
    pub write: WriteDefaults,
    /// Devices registered on startup
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Manager-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Identifier of the session backend. Informational only; the backend
    /// itself is chosen in code.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Logging level (trace, debug, info, warn, error, off)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            log_level: default_log_level(),
        }
    }
}

/// Write defaults, see [`WriteOptions`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteDefaults {
    /// Appended after ASCII and binary values
    #[serde(default = "default_termination")]
    pub termination: String,
    /// Binary datatype tag (b B h H i I l L q Q f d)
    #[serde(default = "default_datatype")]
    pub datatype: String,
    /// Send binary values most significant byte first
    #[serde(default)]
    pub big_endian: bool,
    /// Separator between ASCII values
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for WriteDefaults {
    fn default() -> Self {
        Self {
            termination: default_termination(),
            datatype: default_datatype(),
            big_endian: false,
            separator: default_separator(),
        }
    }
}

/// Device entry in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// VISA resource string (e.g., "TCPIP::192.168.1.100::5025::SOCKET")
    pub address: String,
    /// Whether the device is registered on startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Chunk size applied right after the session opens
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

fn default_backend() -> String {
    "@py".to_string()
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_termination() -> String {
    "\n".to_string()
}

fn default_datatype() -> String {
    "f".to_string()
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_enabled() -> bool {
    true
}

impl ManagerConfig {
    /// Load configuration from `config/devices.toml` and the environment.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the configuration cannot be parsed or fails
    /// validation.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables (`VISA_DM_` prefix) take precedence over the
    /// file.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Parse configuration from a TOML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the string cannot be parsed or is invalid.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid
    /// - Datatype tag is known and the separator is not empty
    /// - Device addresses are non-empty and unique
    /// - Chunk sizes are positive
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.manager.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.manager.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        self.write_options()?;

        let mut addresses = HashSet::new();
        for device in &self.devices {
            if device.address.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Device address cannot be empty".to_string(),
                ));
            }
            if !addresses.insert(device.address.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate device address: '{}'",
                    device.address
                )));
            }
            if device.chunk_size == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "Device '{}': chunk_size must be positive",
                    device.address
                )));
            }
        }

        Ok(())
    }

    /// Write options described by the `[write]` section.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError for an unknown datatype tag or an empty
    /// separator.
    pub fn write_options(&self) -> Result<WriteOptions, ConfigError> {
        let write = &self.write;
        let datatype: DataType = write.datatype.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "Invalid datatype '{}'. Must be one of: b B h H i I l L q Q f d",
                write.datatype
            ))
        })?;
        if write.separator.is_empty() {
            return Err(ConfigError::ValidationError(
                "Write separator cannot be empty".to_string(),
            ));
        }

        Ok(WriteOptions::default()
            .with_termination(&write.termination)
            .with_datatype(datatype)
            .big_endian(write.big_endian)
            .with_separator(&write.separator))
    }

    /// Devices marked as enabled, in file order.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|device| device.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ByteOrder;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config.manager.backend, "@py");
        assert_eq!(config.manager.log_level, "error");
        assert!(config.devices.is_empty());

        let options = config.write_options().unwrap();
        assert_eq!(options, WriteOptions::default());
    }

    #[test]
    fn test_full_config() {
        let config = ManagerConfig::from_toml_str(
            r#"
            [manager]
            backend = "@sim"
            log_level = "debug"

            [write]
            termination = "\r\n"
            datatype = "d"
            big_endian = true
            separator = ";"

            [[devices]]
            address = "TCPIP::1.2.3.4::5025::SOCKET"
            chunk_size = 1024

            [[devices]]
            address = "GPIB0::7::INSTR"
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.manager.backend, "@sim");
        assert_eq!(config.devices.len(), 2);
        assert!(config.devices[0].enabled);
        assert_eq!(config.devices[0].chunk_size, Some(1024));
        assert_eq!(config.devices[1].chunk_size, None);

        let enabled: Vec<&str> = config
            .enabled_devices()
            .map(|device| device.address.as_str())
            .collect();
        assert_eq!(enabled, vec!["TCPIP::1.2.3.4::5025::SOCKET"]);

        let options = config.write_options().unwrap();
        assert_eq!(options.termination, "\r\n");
        assert_eq!(options.datatype, DataType::Float64);
        assert_eq!(options.byte_order, ByteOrder::Big);
        assert_eq!(options.separator, ";");
    }

    #[test]
    fn test_invalid_log_level() {
        let result = ManagerConfig::from_toml_str("[manager]\nlog_level = \"verbose\"");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_datatype() {
        let result = ManagerConfig::from_toml_str("[write]\ndatatype = \"x\"");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_empty_separator() {
        let result = ManagerConfig::from_toml_str("[write]\nseparator = \"\"");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_duplicate_address() {
        let result = ManagerConfig::from_toml_str(
            r#"
            [[devices]]
            address = "ASRL1::INSTR"

            [[devices]]
            address = "ASRL1::INSTR"
            "#,
        );
        match result {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("Duplicate")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_zero_chunk_size() {
        let result = ManagerConfig::from_toml_str(
            "[[devices]]\naddress = \"ASRL1::INSTR\"\nchunk_size = 0",
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_empty_address() {
        let result = ManagerConfig::from_toml_str("[[devices]]\naddress = \"  \"");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_address_is_load_error() {
        let result = ManagerConfig::from_toml_str("[[devices]]\nenabled = true");
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "devices.toml",
                r#"
                [manager]
                log_level = "info"

                [[devices]]
                address = "ASRL1::INSTR"
                "#,
            )?;
            jail.set_env("VISA_DM_MANAGER__LOG_LEVEL", "debug");
            jail.set_env("VISA_DM_WRITE__BIG_ENDIAN", "true");

            let config = ManagerConfig::load_from("devices.toml")
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.manager.log_level, "debug");
            assert!(config.write.big_endian);
            assert_eq!(config.devices.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_missing_default_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config =
                ManagerConfig::load().map_err(|e| figment::Error::from(e.to_string()))?;
            assert!(config.devices.is_empty());
            assert_eq!(config.manager.backend, "@py");
            Ok(())
        });
    }
}
