//! Prometheus exporter and Home Assistant bridge for the Emerald
//! Electricity Advisor.
//!
//! This crate provides a service that:
//! - Runs one advisor session over Bluetooth
//! - Exposes energy readings as Prometheus metrics
//! - Publishes readings to Home Assistant over MQTT (optional)
//!
//! # HTTP Endpoints
//!
//! - `GET /metrics` - Prometheus text exposition
//! - `GET /api/health` - Service health check
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/emerald/config.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:4480"
//!
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! sample_interval_secs = 30
//!
//! [home_assistant]
//! enabled = true
//! broker = "mqtt://localhost:1883"
//! username = "user"
//! password = "pass"
//! ```

pub mod api;
pub mod bridge;
pub mod config;
pub mod metrics;
pub mod state;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use bridge::{EnergySink, attach};
pub use config::{
    BluetoothConfig, Config, ConfigError, DeviceConfig, HomeAssistantConfig, ServerConfig,
    ValidationError,
};
pub use metrics::EnergyMetrics;
pub use state::AppState;
