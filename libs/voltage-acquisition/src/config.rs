//! Acquisition configuration
//!
//! Devices, their links, engine settings and polling groups, loaded through
//! figment from a YAML/TOML/JSON file (chosen by extension) with
//! `ACQ_`-prefixed environment overrides (`__` separates nesting levels).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::driver::Group;
use crate::error::{AcqError, Result};
use crate::modbus::{ModbusSettings, ReadSet, TagDeclaration};
use crate::transport::{ConnectionParams, LinkMode};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ACQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One device instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Primary link
    pub connection: ConnectionParams,
    /// Optional backup link (client mode only)
    #[serde(default)]
    pub backup: Option<ConnectionParams>,
    #[serde(default)]
    pub settings: ModbusSettings,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Polling group declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    /// Poll interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub tags: Vec<TagDeclaration>,
}

fn default_interval_ms() -> u64 {
    1000
}

impl GroupConfig {
    /// Runtime group for the Modbus driver
    pub fn to_group(&self) -> Group<TagDeclaration, ReadSet> {
        Group::new(
            self.name.clone(),
            Duration::from_millis(self.interval_ms),
            self.tags.clone(),
        )
    }
}

impl AcquisitionConfig {
    /// Load from a file plus environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AcqError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AcqError::Config("Config file must have an extension".to_string()))?;

        let figment = match extension {
            "toml" => Figment::new().merge(Toml::file(path)),
            "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
            "json" => Figment::new().merge(Json::file(path)),
            _ => {
                return Err(AcqError::Config(format!(
                    "Unsupported config file format: {extension}"
                )))
            },
        };

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings ranges and name uniqueness
    pub fn validate(&self) -> Result<()> {
        let mut device_names = HashSet::new();
        for device in &self.devices {
            if !device_names.insert(device.name.as_str()) {
                return Err(AcqError::Config(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
            device.validate()?;
        }
        Ok(())
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        self.settings
            .validate()
            .map_err(|e| AcqError::Config(format!("device '{}': {e}", self.name)))?;

        if self.backup.is_some() && self.connection.link_mode() == LinkMode::Server {
            warn!(
                "Device {}: backup link is ignored in server mode",
                self.name
            );
        }

        let mut group_names = HashSet::new();
        for group in &self.groups {
            if !group_names.insert(group.name.as_str()) {
                return Err(AcqError::Config(format!(
                    "device '{}': duplicate group '{}'",
                    self.name, group.name
                )));
            }
            if group.interval_ms == 0 {
                return Err(AcqError::Config(format!(
                    "device '{}' group '{}': interval_ms must be greater than 0",
                    self.name, group.name
                )));
            }
            let mut tag_names = HashSet::new();
            for tag in &group.tags {
                if !tag_names.insert(tag.name.as_str()) {
                    return Err(AcqError::Config(format!(
                        "device '{}' group '{}': duplicate tag '{}'",
                        self.name, group.name, tag.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::bytes::ByteOrder;
    use crate::modbus::{Area, DataType, FrameMode};
    use std::io::Write;

    const YAML: &str = r#"
devices:
  - name: meter
    connection:
      type: tcp
      host: 192.168.1.10
      port: 502
    backup:
      type: tcp
      host: 192.168.1.11
      port: 502
    settings:
      byte_order: CDAB
      max_retries: 1
      degrade_enabled: true
    groups:
      - name: fast
        interval_ms: 500
        tags:
          - name: voltage
            slave_id: 1
            area: holding_register
            address: 1
            data_type: float
          - name: serial
            slave_id: 1
            area: holding_register
            address: 20
            data_type: string
            options:
              length: 8
              string_encoding: L
"#;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = write_temp(".yaml", YAML);
        let config = AcquisitionConfig::load(file.path()).unwrap();

        assert_eq!(config.devices.len(), 1);
        let device = &config.devices[0];
        assert_eq!(device.connection, ConnectionParams::tcp("192.168.1.10", 502));
        assert!(device.backup.is_some());
        assert_eq!(device.settings.byte_order, ByteOrder::BigEndianSwap);
        assert_eq!(device.settings.max_retries, 1);
        assert!(device.settings.degrade_enabled);
        // Untouched keys keep their defaults
        assert_eq!(device.settings.address_base, 1);
        assert_eq!(device.settings.frame_mode, FrameMode::Tcp);

        let group = &device.groups[0];
        assert_eq!(group.interval_ms, 500);
        assert_eq!(group.tags[0].area, Area::HoldingRegister);
        assert_eq!(group.tags[0].data_type, DataType::Float);
        assert_eq!(group.tags[1].options.length, Some(8));

        let runtime = group.to_group();
        assert_eq!(runtime.interval(), Duration::from_millis(500));
        assert!(runtime.plan().is_none());
    }

    #[test]
    fn test_load_toml_defaults() {
        let toml = r#"
[[devices]]
name = "plc"
connection = { type = "serial", port = "/dev/ttyUSB0", baud_rate = 19200 }
settings = { frame_mode = "rtu" }
"#;
        let file = write_temp(".toml", toml);
        let config = AcquisitionConfig::load(file.path()).unwrap();
        let device = &config.devices[0];
        assert_eq!(device.settings.frame_mode, FrameMode::Rtu);
        assert!(device.groups.is_empty());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = write_temp(".ini", "x=1");
        assert!(matches!(
            AcquisitionConfig::load(file.path()),
            Err(AcqError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = AcquisitionConfig::load("/nonexistent/acq.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let yaml = YAML.replace("max_retries: 1", "max_read_payload: 500");
        let file = write_temp(".yaml", &yaml);
        assert!(AcquisitionConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let yaml = YAML.replace("name: serial", "name: voltage");
        let file = write_temp(".yaml", &yaml);
        let err = AcquisitionConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate tag"));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("acq.yaml", "devices: []\n")?;
            jail.set_env("ACQ_DEVICES", "[]");
            let config = AcquisitionConfig::load("acq.yaml").map_err(|e| e.to_string())?;
            assert!(config.devices.is_empty());
            Ok(())
        });
    }
}
