//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use emerald_core::ConnectionConfig;
use serde::{Deserialize, Serialize};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// The advisor to bridge.
    pub device: DeviceConfig,
    /// Bluetooth timeouts.
    pub bluetooth: BluetoothConfig,
    /// Home Assistant MQTT publishing.
    pub home_assistant: HomeAssistantConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not
    /// exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// ```
    /// use emerald_service::Config;
    ///
    /// let mut config = Config::default();
    /// assert!(config.validate().is_err()); // no device address
    ///
    /// config.device.address = "AA:BB:CC:DD:EE:FF".to_string();
    /// config.validate().expect("config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.device.validate());
        errors.extend(self.bluetooth.validate());
        errors.extend(self.home_assistant.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:4480").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4480".to_string(),
        }
    }
}

impl ServerConfig {
    /// Replace the port of the bind address, keeping the host.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .bind
            .rsplit_once(':')
            .map_or(self.bind.as_str(), |(host, _)| host);
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        self.bind = format!("{}:{}", host, port);
    }

    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            });
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "port cannot be 0".to_string(),
            }),
            Err(_) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!("invalid port '{}': must be a number 1-65535", port),
            }),
            Ok(_) => {}
        }

        errors
    }
}

/// Minimum report interval in seconds.
pub const MIN_SAMPLE_INTERVAL: u64 = 1;
/// Maximum report interval in seconds (1 hour).
pub const MAX_SAMPLE_INTERVAL: u64 = 3600;

/// The advisor to connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// BLE address (MAC, or CoreBluetooth UUID on macOS).
    pub address: String,
    /// Seconds covered by each energy report, used to derive average watts.
    pub sample_interval_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            sample_interval_secs: 30,
        }
    }
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.address.trim().is_empty() {
            errors.push(ValidationError {
                field: "device.address".to_string(),
                message: "device address is required (set it here or pass --address)".to_string(),
            });
        }

        if self.sample_interval_secs < MIN_SAMPLE_INTERVAL {
            errors.push(ValidationError {
                field: "device.sample_interval_secs".to_string(),
                message: "sample interval cannot be 0".to_string(),
            });
        } else if self.sample_interval_secs > MAX_SAMPLE_INTERVAL {
            errors.push(ValidationError {
                field: "device.sample_interval_secs".to_string(),
                message: format!(
                    "sample interval {} is too long (maximum {} seconds)",
                    self.sample_interval_secs, MAX_SAMPLE_INTERVAL
                ),
            });
        }

        errors
    }

    /// Report interval as a duration.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

/// Bluetooth timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Total time spent scanning for the advisor, split across three attempts.
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    /// How often the link is checked while streaming.
    pub link_check_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
            connect_timeout_secs: 15,
            discovery_timeout_secs: 10,
            operation_timeout_secs: 10,
            link_check_secs: 5,
        }
    }
}

impl BluetoothConfig {
    /// Validate Bluetooth configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        [
            ("bluetooth.scan_timeout_secs", self.scan_timeout_secs),
            ("bluetooth.connect_timeout_secs", self.connect_timeout_secs),
            ("bluetooth.discovery_timeout_secs", self.discovery_timeout_secs),
            ("bluetooth.operation_timeout_secs", self.operation_timeout_secs),
            ("bluetooth.link_check_secs", self.link_check_secs),
        ]
        .into_iter()
        .filter(|(_, secs)| *secs == 0)
        .map(|(field, _)| ValidationError {
            field: field.to_string(),
            message: "cannot be 0".to_string(),
        })
        .collect()
    }

    /// Transport timeouts for [`BleTransport`](emerald_core::BleTransport).
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .scan_timeout(Duration::from_secs(self.scan_timeout_secs))
            .connection_timeout(Duration::from_secs(self.connect_timeout_secs))
            .discovery_timeout(Duration::from_secs(self.discovery_timeout_secs))
            .operation_timeout(Duration::from_secs(self.operation_timeout_secs))
            .link_check_interval(Duration::from_secs(self.link_check_secs))
    }
}

/// Home Assistant MQTT publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Publish to Home Assistant.
    pub enabled: bool,
    /// Broker URL (`mqtt://host:port` or `mqtts://host:port`).
    pub broker: String,
    /// Broker username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Broker password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Home Assistant discovery prefix.
    pub discovery_prefix: String,
    /// MQTT client ID.
    pub client_id: String,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "mqtt://localhost:1883".to_string(),
            username: None,
            password: None,
            discovery_prefix: "homeassistant".to_string(),
            client_id: "emerald-advisor".to_string(),
            keep_alive_secs: 30,
        }
    }
}

impl HomeAssistantConfig {
    /// Validate Home Assistant configuration. Nothing is checked while
    /// publishing is disabled.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if let Err(message) = parse_broker_url(&self.broker) {
            errors.push(ValidationError {
                field: "home_assistant.broker".to_string(),
                message,
            });
        }

        if self.discovery_prefix.is_empty() {
            errors.push(ValidationError {
                field: "home_assistant.discovery_prefix".to_string(),
                message: "discovery prefix cannot be empty".to_string(),
            });
        } else if self.discovery_prefix.contains(['#', '+']) {
            errors.push(ValidationError {
                field: "home_assistant.discovery_prefix".to_string(),
                message: "discovery prefix cannot contain MQTT wildcards".to_string(),
            });
        }

        if self.client_id.is_empty() {
            errors.push(ValidationError {
                field: "home_assistant.client_id".to_string(),
                message: "client ID cannot be empty".to_string(),
            });
        }

        if self.username.is_some() != self.password.is_some() {
            errors.push(ValidationError {
                field: "home_assistant.username".to_string(),
                message: "username and password must be set together".to_string(),
            });
        }

        if self.keep_alive_secs < 5 {
            errors.push(ValidationError {
                field: "home_assistant.keep_alive_secs".to_string(),
                message: "keep-alive must be at least 5 seconds".to_string(),
            });
        }

        errors
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (use_tls, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        (false, stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        (true, stripped)
    } else {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let default_port = if use_tls { 8883 } else { 1883 };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) => {
            let port = p.parse::<u16>().map_err(|_| format!("Invalid port: {}", p))?;
            (h.to_string(), port)
        }
        None => (rest.to_string(), default_port),
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("emerald")
        .join("config.toml")
}
