//! Home Assistant MQTT publisher.
//!
//! Session observers hand events to the publisher through an unbounded
//! channel ([`HaHandle`]); all broker I/O happens on the publisher task.
//!
//! # Topic Structure
//!
//! With `{id}` = `emerald_electricity_advisor_{serial}`:
//!
//! - `{prefix}/sensor/{id}/config` - discovery descriptor (retained)
//! - `{prefix}/sensor/{id}/energy_wh` - `{"last_reset": ..., "energy_wh": ...}`
//! - `{prefix}/status` - Home Assistant birth messages; `online` triggers a
//!   republish of discovery and the latest value
//!
//! # Example Configuration
//!
//! ```toml
//! [home_assistant]
//! enabled = true
//! broker = "mqtt://localhost:1883"
//! username = "user"
//! password = "pass"
//! discovery_prefix = "homeassistant"
//! ```
//!
//! # Reconnection
//!
//! rumqttc reconnects on the next poll after an error. Connection errors are
//! logged and retried every few seconds; they never stop the publisher.

use std::time::Duration;

use emerald_core::DeviceIdentity;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing as OutgoingPacket, Packet, QoS};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{HomeAssistantConfig, parse_broker_url};

/// Delay before polling again after a broker error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long to wait for the disconnect to reach the broker at shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Payload Home Assistant publishes on its status topic when it starts.
const HA_ONLINE: &[u8] = b"online";

/// Events from the session.
#[derive(Debug, Clone, PartialEq)]
pub enum HaEvent {
    /// The advisor was identified.
    Identified(DeviceIdentity),
    /// An energy report, in Wh.
    Energy(f64),
}

/// Sending side used by session observers. Never blocks.
#[derive(Debug, Clone)]
pub struct HaHandle {
    tx: mpsc::UnboundedSender<HaEvent>,
}

impl HaHandle {
    /// Create a handle and the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HaEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue the advisor identity.
    pub fn identify(&self, identity: &DeviceIdentity) {
        self.send(HaEvent::Identified(identity.clone()));
    }

    /// Queue an energy report.
    pub fn energy(&self, energy_wh: f64) {
        self.send(HaEvent::Energy(energy_wh));
    }

    fn send(&self, event: HaEvent) {
        if self.tx.send(event).is_err() {
            debug!("Home Assistant publisher stopped, dropping event");
        }
    }
}

/// Discovery descriptor for the energy sensor.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPayload {
    pub name: &'static str,
    pub state_topic: String,
    pub device_class: &'static str,
    pub unique_id: String,
    pub device: DiscoveryDevice,
    pub state_class: &'static str,
    pub unit_of_measurement: &'static str,
    pub last_reset_value_template: &'static str,
    pub value_template: &'static str,
}

/// Device block of the discovery descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDevice {
    pub manufacturer: String,
    pub model: &'static str,
    pub serial_number: String,
    pub sw_version: String,
    pub identifiers: Vec<String>,
}

impl DiscoveryPayload {
    /// Build the descriptor for an identified advisor.
    pub fn new(prefix: &str, identity: &DeviceIdentity) -> Self {
        let id = device_id(identity);
        Self {
            name: "Emerald Electricity Advisor",
            state_topic: state_topic(prefix, &id),
            device_class: "energy",
            unique_id: object_id(&id),
            device: DiscoveryDevice {
                manufacturer: identity.manufacturer.clone(),
                model: "Electricity Advisor",
                serial_number: identity.serial.clone(),
                sw_version: identity.firmware_version.clone(),
                identifiers: vec![id],
            },
            state_class: "total",
            unit_of_measurement: "Wh",
            last_reset_value_template: "{{ value_json.last_reset }}",
            value_template: "{{ value_json.energy_wh }}",
        }
    }
}

/// State message for one energy report.
#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    /// Start of the period the value covers.
    #[serde(with = "time::serde::rfc3339")]
    pub last_reset: OffsetDateTime,
    pub energy_wh: f64,
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub qos: QoS,
}

/// Identifier of the advisor in topics and unique IDs: the serial number,
/// or the address when the serial is blank.
pub fn device_id(identity: &DeviceIdentity) -> String {
    let raw = if identity.serial.trim().is_empty() {
        identity.address.replace([':', '-'], "").to_lowercase()
    } else {
        identity.serial.trim().to_string()
    };
    sanitize_topic_segment(&raw)
}

fn object_id(device_id: &str) -> String {
    format!("emerald_electricity_advisor_{}", device_id)
}

/// Discovery topic for a device.
pub fn discovery_topic(prefix: &str, device_id: &str) -> String {
    format!("{}/sensor/{}/config", prefix, object_id(device_id))
}

/// State topic for a device.
pub fn state_topic(prefix: &str, device_id: &str) -> String {
    format!("{}/sensor/{}/energy_wh", prefix, object_id(device_id))
}

/// Home Assistant status topic.
pub fn status_topic(prefix: &str) -> String {
    format!("{}/status", prefix)
}

/// Sanitize a value for use as an MQTT topic segment.
///
/// MQTT topics cannot contain '#' or '+' wildcards, and should avoid spaces.
pub fn sanitize_topic_segment(s: &str) -> String {
    s.replace(['#', '+', ' ', '/'], "_")
}

/// What has been learned from the session and the broker so far, and what
/// needs publishing when either changes.
#[derive(Debug)]
struct Publisher {
    prefix: String,
    identity: Option<DeviceIdentity>,
    latest: Option<f64>,
    connected: bool,
}

impl Publisher {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            identity: None,
            latest: None,
            connected: false,
        }
    }

    fn on_event(&mut self, event: HaEvent, now: OffsetDateTime) -> Vec<Publication> {
        match event {
            HaEvent::Identified(identity) => {
                self.identity = Some(identity);
                if self.connected {
                    self.discovery().into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            HaEvent::Energy(energy_wh) => {
                self.latest = Some(energy_wh);
                if self.connected {
                    self.state(now).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_connected(&mut self, now: OffsetDateTime) -> Vec<Publication> {
        self.connected = true;
        self.announce(now)
    }

    fn on_disconnected(&mut self) {
        self.connected = false;
    }

    fn on_status(&mut self, payload: &[u8], now: OffsetDateTime) -> Vec<Publication> {
        if payload.eq_ignore_ascii_case(HA_ONLINE) && self.connected {
            info!("Home Assistant came online, republishing");
            self.announce(now)
        } else {
            Vec::new()
        }
    }

    fn announce(&self, now: OffsetDateTime) -> Vec<Publication> {
        self.discovery().into_iter().chain(self.state(now)).collect()
    }

    fn discovery(&self) -> Option<Publication> {
        let identity = self.identity.as_ref()?;
        let payload = DiscoveryPayload::new(&self.prefix, identity);
        let topic = discovery_topic(&self.prefix, &device_id(identity));
        match serde_json::to_string(&payload) {
            Ok(json) => Some(Publication {
                topic,
                payload: json,
                retain: true,
                qos: QoS::AtLeastOnce,
            }),
            Err(e) => {
                error!(error = %e, "Failed to encode discovery descriptor");
                None
            }
        }
    }

    fn state(&self, now: OffsetDateTime) -> Option<Publication> {
        let identity = self.identity.as_ref()?;
        let energy_wh = self.latest?;
        let payload = StatePayload {
            last_reset: now,
            energy_wh,
        };
        match serde_json::to_string(&payload) {
            Ok(json) => Some(Publication {
                topic: state_topic(&self.prefix, &device_id(identity)),
                payload: json,
                retain: false,
                qos: QoS::AtMostOnce,
            }),
            Err(e) => {
                error!(error = %e, "Failed to encode state message");
                None
            }
        }
    }
}

/// Broker-side events forwarded from the event loop task.
#[derive(Debug)]
enum LinkEvent {
    Connected,
    Disconnected,
    Status(Vec<u8>),
}

/// Publishes advisor identity and energy reports to Home Assistant.
pub struct HomeAssistantPublisher {
    config: HomeAssistantConfig,
    events: mpsc::UnboundedReceiver<HaEvent>,
}

impl HomeAssistantPublisher {
    /// Create a publisher and the handle observers send through.
    pub fn new(config: HomeAssistantConfig) -> (Self, HaHandle) {
        let (handle, events) = HaHandle::channel();
        (Self { config, events }, handle)
    }

    /// Run until `cancel` is raised or every [`HaHandle`] is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        let config = &self.config;
        let (host, port, use_tls) = match parse_broker_url(&config.broker) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Invalid MQTT broker URL: {}", e);
                return;
            }
        };

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }
        if use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let status = status_topic(&config.discovery_prefix);
        info!(
            broker = %config.broker,
            prefix = %config.discovery_prefix,
            "Starting Home Assistant publisher"
        );

        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        let loop_cancel = cancel.clone();
        let loop_status = status.clone();
        let eventloop_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("MQTT connected: {:?}", ack.code);
                        let _ = link_tx.send(LinkEvent::Connected);
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) if p.topic == loop_status => {
                        let _ = link_tx.send(LinkEvent::Status(p.payload.to_vec()));
                    }
                    Ok(Event::Outgoing(OutgoingPacket::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}. Reconnecting...", e);
                        let _ = link_tx.send(LinkEvent::Disconnected);
                        tokio::select! {
                            _ = loop_cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        });

        let mut publisher = Publisher::new(&config.discovery_prefix);
        loop {
            let publications = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Home Assistant publisher received stop signal");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => publisher.on_event(event, OffsetDateTime::now_utc()),
                    None => {
                        info!("Event channel closed, stopping Home Assistant publisher");
                        break;
                    }
                },
                Some(link) = link_rx.recv() => match link {
                    LinkEvent::Connected => {
                        if let Err(e) = client.subscribe(&status, QoS::AtLeastOnce).await {
                            warn!("Failed to subscribe to {}: {}", status, e);
                        }
                        publisher.on_connected(OffsetDateTime::now_utc())
                    }
                    LinkEvent::Disconnected => {
                        publisher.on_disconnected();
                        Vec::new()
                    }
                    LinkEvent::Status(payload) => {
                        publisher.on_status(&payload, OffsetDateTime::now_utc())
                    }
                },
            };

            for publication in publications {
                publish(&client, publication).await;
            }
        }

        if let Err(e) = client.disconnect().await {
            debug!("Error disconnecting MQTT client: {}", e);
        }
        if tokio::time::timeout(DISCONNECT_TIMEOUT, eventloop_task)
            .await
            .is_err()
        {
            debug!("MQTT event loop did not finish in time");
        }
        info!("Home Assistant publisher stopped");
    }
}

async fn publish(client: &AsyncClient, publication: Publication) {
    debug!(topic = %publication.topic, payload = %publication.payload, "Publishing");
    if let Err(e) = client
        .publish(
            &publication.topic,
            publication.qos,
            publication.retain,
            publication.payload,
        )
        .await
    {
        warn!(topic = %publication.topic, "Failed to publish: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("AA:BB:CC:DD:EE:FF", "Emerald EMS pty ltd", "EA123", "2.0.4")
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn test_topics() {
        assert_eq!(
            discovery_topic("homeassistant", "EA123"),
            "homeassistant/sensor/emerald_electricity_advisor_EA123/config"
        );
        assert_eq!(
            state_topic("homeassistant", "EA123"),
            "homeassistant/sensor/emerald_electricity_advisor_EA123/energy_wh"
        );
        assert_eq!(status_topic("ha"), "ha/status");
    }

    #[test]
    fn test_device_id() {
        assert_eq!(device_id(&identity()), "EA123");

        let mut blank = identity();
        blank.serial = "  ".to_string();
        assert_eq!(device_id(&blank), "aabbccddeeff");

        let mut spaced = identity();
        spaced.serial = "EA 1/2".to_string();
        assert_eq!(device_id(&spaced), "EA_1_2");
    }

    #[test]
    fn test_sanitize_topic_segment() {
        assert_eq!(sanitize_topic_segment("device#1"), "device_1");
        assert_eq!(sanitize_topic_segment("sensor+temp"), "sensor_temp");
        assert_eq!(sanitize_topic_segment("path/to/device"), "path_to_device");
        assert_eq!(sanitize_topic_segment("kitchen-advisor"), "kitchen-advisor");
    }

    #[test]
    fn test_discovery_payload() {
        let payload = DiscoveryPayload::new("homeassistant", &identity());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["name"], "Emerald Electricity Advisor");
        assert_eq!(
            json["state_topic"],
            "homeassistant/sensor/emerald_electricity_advisor_EA123/energy_wh"
        );
        assert_eq!(json["device_class"], "energy");
        assert_eq!(json["unique_id"], "emerald_electricity_advisor_EA123");
        assert_eq!(json["state_class"], "total");
        assert_eq!(json["unit_of_measurement"], "Wh");
        assert_eq!(json["value_template"], "{{ value_json.energy_wh }}");
        assert_eq!(json["last_reset_value_template"], "{{ value_json.last_reset }}");
        assert_eq!(json["device"]["manufacturer"], "Emerald EMS pty ltd");
        assert_eq!(json["device"]["model"], "Electricity Advisor");
        assert_eq!(json["device"]["serial_number"], "EA123");
        assert_eq!(json["device"]["identifiers"][0], "EA123");
    }

    #[test]
    fn test_state_payload() {
        let json = serde_json::to_value(StatePayload {
            last_reset: now(),
            energy_wh: 12.5,
        })
        .unwrap();
        assert_eq!(json["energy_wh"], 12.5);
        assert_eq!(json["last_reset"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_nothing_published_while_disconnected() {
        let mut publisher = Publisher::new("homeassistant");
        assert!(
            publisher
                .on_event(HaEvent::Identified(identity()), now())
                .is_empty()
        );
        assert!(publisher.on_event(HaEvent::Energy(3.0), now()).is_empty());
    }

    #[test]
    fn test_connect_announces_discovery_and_latest() {
        let mut publisher = Publisher::new("homeassistant");
        publisher.on_event(HaEvent::Identified(identity()), now());
        publisher.on_event(HaEvent::Energy(3.0), now());

        let published = publisher.on_connected(now());
        assert_eq!(published.len(), 2);
        assert!(published[0].topic.ends_with("/config"));
        assert!(published[0].retain);
        assert!(published[1].topic.ends_with("/energy_wh"));
        assert!(published[1].payload.contains("\"energy_wh\":3.0"));
    }

    #[test]
    fn test_connect_before_identity_publishes_nothing() {
        let mut publisher = Publisher::new("homeassistant");
        assert!(publisher.on_connected(now()).is_empty());

        let published = publisher.on_event(HaEvent::Identified(identity()), now());
        assert_eq!(published.len(), 1);
        assert!(published[0].topic.ends_with("/config"));

        let published = publisher.on_event(HaEvent::Energy(1.5), now());
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].qos, QoS::AtMostOnce);
    }

    #[test]
    fn test_online_status_republishes() {
        let mut publisher = Publisher::new("homeassistant");
        publisher.on_connected(now());
        publisher.on_event(HaEvent::Identified(identity()), now());
        publisher.on_event(HaEvent::Energy(7.0), now());

        assert_eq!(publisher.on_status(b"online", now()).len(), 2);
        assert!(publisher.on_status(b"offline", now()).is_empty());

        publisher.on_disconnected();
        assert!(publisher.on_status(b"online", now()).is_empty());
    }

    #[test]
    fn test_handle_drops_events_after_stop() {
        let (publisher, handle) = HomeAssistantPublisher::new(HomeAssistantConfig::default());
        drop(publisher);
        handle.energy(1.0);
        handle.identify(&identity());
    }

    #[tokio::test]
    async fn test_invalid_broker_returns() {
        let config = HomeAssistantConfig {
            enabled: true,
            broker: "http://nope".to_string(),
            ..Default::default()
        };
        let (publisher, _handle) = HomeAssistantPublisher::new(config);
        publisher.run(CancellationToken::new()).await;
    }
}
