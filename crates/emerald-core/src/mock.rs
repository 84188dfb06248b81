//! Mock transport for testing.
//!
//! [`MockTransport`] implements [`GattTransport`] without Bluetooth hardware.
//! It records every call, serves Device Information reads from a table,
//! answers control writes with scripted notifications, and lets tests push
//! or close the notification stream at any point.
//!
//! # Features
//!
//! - **Call log**: every transport operation is recorded as a [`MockCall`]
//! - **Failure injection**: make any operation fail with [`MockTransport::fail_on`]
//! - **Scripted responses**: frames pushed when a given command is written
//! - **Link loss**: close the notification stream to simulate a dropped link
//! - **Latency**: delay connects to simulate a slow scan

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use emerald_types::protocol::{
    CMD_ENABLE_AUTO_REPORT, CMD_REQUEST_CALIBRATION, TAG_ENERGY_SAMPLE, TAG_IMPULSE_RATE,
};
use emerald_types::uuid::{ENERGY_CONTROL, FIRMWARE_REVISION, MANUFACTURER_NAME, SERIAL_NUMBER};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::traits::GattTransport;

/// A recorded transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// [`GattTransport::reset`].
    Reset,
    /// [`GattTransport::connect`].
    Connect,
    /// [`GattTransport::read`].
    Read(Uuid),
    /// [`GattTransport::write`] with the bytes written.
    Write(Uuid, Vec<u8>),
    /// [`GattTransport::subscribe`].
    Subscribe(Uuid),
    /// [`GattTransport::unsubscribe`].
    Unsubscribe(Uuid),
    /// [`GattTransport::disconnect`].
    Disconnect,
}

/// An operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockFailure {
    /// Stale-link reset.
    Reset,
    /// Connecting.
    Connect,
    /// Reading the given characteristic.
    Read(Uuid),
    /// Writing the given characteristic.
    Write(Uuid),
    /// Subscribing.
    Subscribe,
    /// Unsubscribing.
    Unsubscribe,
    /// Disconnecting.
    Disconnect,
}

/// Items flowing to the notification pump; `None` closes the stream.
type Inbox = mpsc::UnboundedSender<Option<Vec<u8>>>;

/// Notifications scripted for one control command.
#[derive(Debug, Clone, Default)]
struct Response {
    frames: Vec<Vec<u8>>,
    close: bool,
}

/// A mock advisor link for testing.
///
/// # Example
///
/// ```
/// use emerald_core::{GattTransport, MockTransport};
/// use emerald_types::uuid::SERIAL_NUMBER;
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::builder().serial("SN-42").build();
///     transport.connect().await.unwrap();
///     assert_eq!(transport.read(SERIAL_NUMBER).await.unwrap(), b"SN-42");
/// }
/// ```
pub struct MockTransport {
    address: String,
    connected: AtomicBool,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    characteristics: Mutex<HashMap<Uuid, Vec<u8>>>,
    failures: Mutex<HashSet<MockFailure>>,
    responses: Mutex<HashMap<Vec<u8>, Response>>,
    pending: Mutex<Vec<Vec<u8>>>,
    close_after_pending: AtomicBool,
    inbox: Mutex<Option<Inbox>>,
    calls: Mutex<Vec<MockCall>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("address", &self.address)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a bare mock with a random address and no characteristics.
    pub fn new() -> Self {
        Self {
            address: format!("MOCK-{:06X}", rand::random::<u32>() % 0xFFFFFF),
            connected: AtomicBool::new(false),
            connect_latency_ms: AtomicU64::new(0),
            characteristics: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            responses: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            close_after_pending: AtomicBool::new(false),
            inbox: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Start building a mock advisor with device information and a
    /// calibration response.
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::new()
    }

    /// Set the value returned when reading a characteristic.
    pub fn set_characteristic(&self, uuid: Uuid, value: impl Into<Vec<u8>>) {
        lock(&self.characteristics).insert(uuid, value.into());
    }

    /// Delay every connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make an operation fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_on(&self, failure: MockFailure) {
        lock(&self.failures).insert(failure);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Push `frames` as notifications whenever `command` is written to the
    /// control characteristic.
    pub fn respond_to(&self, command: &[u8], frames: Vec<Vec<u8>>) {
        lock(&self.responses).insert(
            command.to_vec(),
            Response {
                frames,
                close: false,
            },
        );
    }

    /// Like [`respond_to`](Self::respond_to), then close the notification
    /// stream.
    pub fn respond_and_close(&self, command: &[u8], frames: Vec<Vec<u8>>) {
        lock(&self.responses).insert(
            command.to_vec(),
            Response {
                frames,
                close: true,
            },
        );
    }

    /// Deliver a notification.
    ///
    /// Before a subscription exists, frames are held and delivered in order
    /// as soon as one is made.
    pub fn push_notification(&self, frame: impl Into<Vec<u8>>) {
        let frame = frame.into();
        let inbox = lock(&self.inbox);
        match inbox.as_ref() {
            Some(tx) => {
                let _ = tx.send(Some(frame));
            }
            None => lock(&self.pending).push(frame),
        }
    }

    /// Close the notification stream, simulating a dropped link.
    ///
    /// Frames already pushed are delivered first. Before a subscription
    /// exists, the stream is closed right after the held frames.
    pub fn close_notifications(&self) {
        let mut inbox = lock(&self.inbox);
        match inbox.take() {
            Some(tx) => {
                let _ = tx.send(None);
            }
            None => self.close_after_pending.store(true, Ordering::SeqCst),
        }
    }

    /// Whether the mock is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether a notification subscription is active.
    pub fn is_subscribed(&self) -> bool {
        lock(&self.inbox).is_some()
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Bytes written to a characteristic, in order.
    pub fn writes_to(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(target, data) if *target == uuid => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn check_failure(&self, failure: MockFailure) -> Result<()> {
        if lock(&self.failures).contains(&failure) {
            Err(Error::InvalidData(format!("injected failure: {:?}", failure)))
        } else {
            Ok(())
        }
    }

    fn check_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

/// Lock a mutex, recovering the data if a test thread panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl GattTransport for MockTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn reset(&self) -> Result<()> {
        self.record(MockCall::Reset);
        self.check_failure(MockFailure::Reset)
    }

    async fn connect(&self) -> Result<()> {
        self.record(MockCall::Connect);
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if lock(&self.failures).contains(&MockFailure::Connect) {
            return Err(Error::connection_failed(
                Some(self.address.clone()),
                ConnectionFailureReason::Other("injected failure".to_string()),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.record(MockCall::Read(uuid));
        self.check_connected()?;
        self.check_failure(MockFailure::Read(uuid))?;
        lock(&self.characteristics)
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), 1))
    }

    async fn write(&self, uuid: Uuid, data: &[u8]) -> Result<()> {
        self.record(MockCall::Write(uuid, data.to_vec()));
        self.check_connected()?;
        self.check_failure(MockFailure::Write(uuid))?;

        let response = lock(&self.responses).get(data).cloned();
        if uuid == ENERGY_CONTROL
            && let Some(response) = response
        {
            for frame in response.frames {
                self.push_notification(frame);
            }
            if response.close {
                self.close_notifications();
            }
        }
        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid, buffer: usize) -> Result<mpsc::Receiver<Vec<u8>>> {
        self.record(MockCall::Subscribe(uuid));
        self.check_connected()?;
        self.check_failure(MockFailure::Subscribe)?;

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<Option<Vec<u8>>>();

        tokio::spawn(async move {
            while let Some(Some(frame)) = inbox_rx.recv().await {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let mut inbox = lock(&self.inbox);
        for frame in lock(&self.pending).drain(..) {
            let _ = inbox_tx.send(Some(frame));
        }
        if self.close_after_pending.swap(false, Ordering::SeqCst) {
            let _ = inbox_tx.send(None);
        } else {
            *inbox = Some(inbox_tx);
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<()> {
        self.record(MockCall::Unsubscribe(uuid));
        self.check_failure(MockFailure::Unsubscribe)?;
        self.check_connected()?;
        lock(&self.inbox).take();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(MockCall::Disconnect);
        lock(&self.inbox).take();
        self.connected.store(false, Ordering::SeqCst);
        self.check_failure(MockFailure::Disconnect)
    }
}

/// Encode an energy sample notification.
pub fn energy_frame(timestamp: [u8; 4], pulses: u16) -> Vec<u8> {
    let mut frame = TAG_ENERGY_SAMPLE.to_vec();
    frame.extend_from_slice(&timestamp);
    frame.extend_from_slice(&pulses.to_be_bytes());
    frame
}

/// Encode an impulse-rate notification with a 4-byte payload.
pub fn impulse_rate_frame(pulses_per_kwh: u32) -> Vec<u8> {
    let mut frame = TAG_IMPULSE_RATE.to_vec();
    frame.extend_from_slice(&pulses_per_kwh.to_be_bytes());
    frame
}

/// Builder for a mock advisor.
///
/// By default the device reports manufacturer `Emerald`, serial `MOCK-0001`,
/// firmware `1.0.0`, and answers the calibration request with an impulse
/// rate of 1000 pulses per kWh. Notifications set with
/// [`notifications`](Self::notifications) follow the auto-report command.
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    address: Option<String>,
    manufacturer: String,
    serial: String,
    firmware: String,
    impulse_rate: Option<u32>,
    notifications: Vec<Vec<u8>>,
    close_after_notifications: bool,
    connect_latency: Duration,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransportBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            address: None,
            manufacturer: "Emerald".to_string(),
            serial: "MOCK-0001".to_string(),
            firmware: "1.0.0".to_string(),
            impulse_rate: Some(1000),
            notifications: Vec::new(),
            close_after_notifications: false,
            connect_latency: Duration::ZERO,
        }
    }

    /// Set the device address.
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Set the manufacturer name.
    pub fn manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = manufacturer.to_string();
        self
    }

    /// Set the serial number.
    pub fn serial(mut self, serial: &str) -> Self {
        self.serial = serial.to_string();
        self
    }

    /// Set the firmware revision.
    pub fn firmware(mut self, firmware: &str) -> Self {
        self.firmware = firmware.to_string();
        self
    }

    /// Impulse rate reported in response to the calibration request, or
    /// `None` to leave the request unanswered.
    pub fn impulse_rate(mut self, rate: Option<u32>) -> Self {
        self.impulse_rate = rate;
        self
    }

    /// Notifications the device sends once automatic reports are enabled.
    pub fn notifications(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.notifications = frames;
        self
    }

    /// Close the notification stream right after the auto-report
    /// notifications, simulating a link that drops while streaming.
    pub fn close_after_notifications(mut self, close: bool) -> Self {
        self.close_after_notifications = close;
        self
    }

    /// Delay connects, like a scan that takes a while to find the device.
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Build the mock.
    pub fn build(self) -> MockTransport {
        let mut transport = MockTransport::new();
        if let Some(address) = self.address {
            transport.address = address;
        }
        transport.set_connect_latency(self.connect_latency);

        transport.set_characteristic(MANUFACTURER_NAME, self.manufacturer.into_bytes());
        transport.set_characteristic(SERIAL_NUMBER, self.serial.into_bytes());
        transport.set_characteristic(FIRMWARE_REVISION, self.firmware.into_bytes());

        if let Some(rate) = self.impulse_rate {
            transport.respond_to(&CMD_REQUEST_CALIBRATION, vec![impulse_rate_frame(rate)]);
        }
        if self.close_after_notifications {
            transport.respond_and_close(&CMD_ENABLE_AUTO_REPORT, self.notifications);
        } else if !self.notifications.is_empty() {
            transport.respond_to(&CMD_ENABLE_AUTO_REPORT, self.notifications);
        }
        transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emerald_types::uuid::ENERGY_NOTIFY;

    #[tokio::test]
    async fn test_mock_connect_and_disconnect() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert_eq!(
            transport.calls(),
            vec![MockCall::Connect, MockCall::Disconnect]
        );
    }

    #[tokio::test]
    async fn test_mock_not_connected() {
        let transport = MockTransport::builder().build();
        let result = transport.read(SERIAL_NUMBER).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_builder_device_info() {
        let transport = MockTransport::builder()
            .address("AA:BB:CC:DD:EE:FF")
            .manufacturer("Emerald EMS")
            .serial("SN-7")
            .firmware("2.1")
            .build();
        transport.connect().await.unwrap();

        assert_eq!(transport.address(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(transport.read(MANUFACTURER_NAME).await.unwrap(), b"Emerald EMS");
        assert_eq!(transport.read(SERIAL_NUMBER).await.unwrap(), b"SN-7");
        assert_eq!(transport.read(FIRMWARE_REVISION).await.unwrap(), b"2.1");
    }

    #[tokio::test]
    async fn test_missing_characteristic() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();
        let result = transport.read(SERIAL_NUMBER).await;
        assert!(matches!(result, Err(Error::CharacteristicNotFound { .. })));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let transport = MockTransport::builder().build();
        transport.fail_on(MockFailure::Connect);
        assert!(matches!(
            transport.connect().await,
            Err(Error::ConnectionFailed { .. })
        ));

        transport.clear_failures();
        transport.connect().await.unwrap();

        transport.fail_on(MockFailure::Write(ENERGY_CONTROL));
        assert!(transport.write(ENERGY_CONTROL, &[0x00]).await.is_err());
        assert!(transport.read(SERIAL_NUMBER).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_notifications_delivered_on_subscribe() {
        let transport = MockTransport::new();
        transport.push_notification(vec![1]);
        transport.push_notification(vec![2]);
        transport.connect().await.unwrap();

        let mut rx = transport.subscribe(ENERGY_NOTIFY, 4).await.unwrap();
        assert!(transport.is_subscribed());
        transport.push_notification(vec![3]);

        assert_eq!(rx.recv().await, Some(vec![1]));
        assert_eq!(rx.recv().await, Some(vec![2]));
        assert_eq!(rx.recv().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn test_close_notifications() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();
        let mut rx = transport.subscribe(ENERGY_NOTIFY, 4).await.unwrap();

        transport.push_notification(vec![9]);
        transport.close_notifications();

        assert_eq!(rx.recv().await, Some(vec![9]));
        assert_eq!(rx.recv().await, None);
        assert!(!transport.is_subscribed());
    }

    #[tokio::test]
    async fn test_scripted_responses() {
        let transport = MockTransport::builder()
            .impulse_rate(Some(3200))
            .notifications(vec![energy_frame([0; 4], 5)])
            .close_after_notifications(true)
            .build();
        transport.connect().await.unwrap();
        let mut rx = transport.subscribe(ENERGY_NOTIFY, 4).await.unwrap();

        transport
            .write(ENERGY_CONTROL, &CMD_REQUEST_CALIBRATION)
            .await
            .unwrap();
        transport
            .write(ENERGY_CONTROL, &CMD_ENABLE_AUTO_REPORT)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(impulse_rate_frame(3200)));
        assert_eq!(rx.recv().await, Some(energy_frame([0; 4], 5)));
        assert_eq!(rx.recv().await, None);

        assert_eq!(
            transport.writes_to(ENERGY_CONTROL),
            vec![CMD_REQUEST_CALIBRATION.to_vec(), CMD_ENABLE_AUTO_REPORT.to_vec()]
        );
    }

    #[test]
    fn test_frame_helpers() {
        assert_eq!(
            energy_frame([0xDE, 0xAD, 0xBE, 0xEF], 0x0102),
            vec![0x00, 0x01, 0x02, 0x0a, 0x06, 0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02]
        );
        assert_eq!(
            impulse_rate_frame(1000),
            vec![0x00, 0x01, 0x01, 0x06, 0x02, 0x00, 0x00, 0x03, 0xE8]
        );
    }

    #[test]
    fn test_random_address() {
        let transport = MockTransport::new();
        assert!(transport.address().starts_with("MOCK-"));
    }
}
