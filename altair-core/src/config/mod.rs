//! Configuration system with TOML support
//!
//! One struct per concern, each with defaults, environment-variable
//! overrides and a validation pass. The device list decides what gets
//! registered at startup.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::device::registry::MAX_DEVICES;
use crate::device::watchdog::DEFAULT_TIMEOUT_MINUTES;
use crate::logging::LoggingConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AltairConfig {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
    #[serde(rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address
    /// Env: ALTAIR_HOST
    pub host: String,

    /// HTTP listening port
    /// Env: ALTAIR_PORT
    pub port: u16,

    /// Emit an event-log line for every command, not just failures
    /// Env: ALTAIR_VERBOSE
    pub verbose_logging: bool,

    /// Server location string reported by the management API
    pub location: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6800,
            verbose_logging: false,
            location: String::new(),
        }
    }
}

/// UDP discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Answer discovery broadcasts at all
    pub enabled: bool,

    /// Discovery UDP port
    /// Env: ALTAIR_DISCOVERY_PORT
    pub port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { enabled: true, port: crate::discovery::DISCOVERY_PORT }
    }
}

/// Watchdog defaults applied to devices that do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub timeout_minutes: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { enabled: false, timeout_minutes: DEFAULT_TIMEOUT_MINUTES }
    }
}

/// One device to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device type wire name, e.g. "camera" or "filterwheel"
    #[serde(rename = "type")]
    pub device_type: String,

    /// Display name
    pub name: String,

    /// Override the watchdog default for this device
    pub watchdog_timeout_minutes: Option<u32>,

    /// Switch banks only: number of outputs
    pub switch_count: Option<usize>,
}

impl AltairConfig {
    /// Load from a TOML file, then apply environment overrides and
    /// validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: AltairConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.apply_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override file values.
    pub fn apply_env_vars(&mut self) {
        if let Ok(host) = env::var("ALTAIR_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("ALTAIR_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = env::var("ALTAIR_VERBOSE") {
            self.server.verbose_logging = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(port) = env::var("ALTAIR_DISCOVERY_PORT") {
            if let Ok(p) = port.parse() {
                self.discovery.port = p;
            }
        }
        if let Ok(level) = env::var("ALTAIR_LOG_LEVEL") {
            if let Ok(parsed) = level.parse() {
                self.logging.level = parsed;
            }
        }
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        // The management device occupies one registry slot
        if self.devices.len() + 1 > MAX_DEVICES {
            bail!(
                "too many devices: {} configured, capacity {}",
                self.devices.len(),
                MAX_DEVICES - 1
            );
        }
        for device in &self.devices {
            if crate::protocol::commands::DeviceType::from_name(&device.device_type).is_none() {
                bail!("unknown device type: {}", device.device_type);
            }
            if device.name.is_empty() {
                bail!("device of type {} has an empty name", device.device_type);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AltairConfig::default();
        assert_eq!(config.server.port, 6800);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.port, 32227);
        assert!(config.devices.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_toml_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 7800
verbose_logging = true

[watchdog]
enabled = true
timeout_minutes = 2

[[device]]
type = "camera"
name = "Main imager"

[[device]]
type = "dome"
name = "Dome"
watchdog_timeout_minutes = 1
"#
        )
        .unwrap();

        let config = AltairConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 7800);
        assert!(config.server.verbose_logging);
        assert!(config.watchdog.enabled);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[1].watchdog_timeout_minutes, Some(1));
    }

    #[test]
    fn test_unknown_device_type_rejected() {
        let mut config = AltairConfig::default();
        config.devices.push(DeviceConfig {
            device_type: "teapot".to_string(),
            name: "pot".to_string(),
            watchdog_timeout_minutes: None,
            switch_count: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_too_many_devices_rejected() {
        let mut config = AltairConfig::default();
        for i in 0..MAX_DEVICES {
            config.devices.push(DeviceConfig {
                device_type: "switch".to_string(),
                name: format!("sw{}", i),
                watchdog_timeout_minutes: None,
                switch_count: None,
            });
        }
        assert!(config.validate().is_err());
    }
}
