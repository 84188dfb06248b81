//! btleplug-backed transport to a physical advisor.
//!
//! [`BleTransport`] implements [`GattTransport`] over the platform Bluetooth
//! stack. It is created unconnected for a known address; the session drives
//! it through reset, connect, reads, writes, subscribe and disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::scan::{ScanOptions, find_device, find_known_peripheral, get_adapter};
use crate::traits::GattTransport;

/// Default time budget for locating the device.
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for BLE characteristic reads and writes.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between link liveness checks while subscribed.
const DEFAULT_LINK_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for BLE timeouts.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use emerald_core::device::ConnectionConfig;
///
/// // Advisor mounted in a metal meter box.
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(25))
///     .operation_timeout(Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time budget for finding the device before connecting.
    pub scan_timeout: Duration,
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for characteristic reads and writes.
    pub operation_timeout: Duration,
    /// How often a subscribed transport checks that the link is still up.
    pub link_check_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            link_check_interval: DEFAULT_LINK_CHECK_INTERVAL,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan timeout.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the read/write timeout.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the link liveness check interval.
    #[must_use]
    pub fn link_check_interval(mut self, interval: Duration) -> Self {
        self.link_check_interval = interval;
        self
    }

    /// Reject zero durations.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("scan timeout", self.scan_timeout),
            ("connection timeout", self.connection_timeout),
            ("discovery timeout", self.discovery_timeout),
            ("operation timeout", self.operation_timeout),
            ("link check interval", self.link_check_interval),
        ];
        match durations.iter().find(|(_, d)| d.is_zero()) {
            Some((name, _)) => Err(Error::invalid_config(format!("{name} must be non-zero"))),
            None => Ok(()),
        }
    }
}

/// An established connection.
struct Link {
    /// Kept alive for as long as the peripheral is in use.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    /// Characteristics by UUID, built once after service discovery.
    characteristics: HashMap<Uuid, Characteristic>,
}

impl Link {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics.get(&uuid).cloned().ok_or_else(|| {
            Error::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
        })
    }
}

/// A Bluetooth link to one advisor.
///
/// # Cleanup
///
/// The session always calls [`GattTransport::disconnect`]. If a connected
/// transport is dropped without it, a best-effort disconnect is spawned and a
/// warning is logged.
pub struct BleTransport {
    address: String,
    config: ConnectionConfig,
    link: RwLock<Option<Link>>,
    /// Handles for spawned notification forwarders (for cleanup).
    notification_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Whether disconnect has been called (for Drop warning).
    disconnected: AtomicBool,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Create an unconnected transport for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_config(address, ConnectionConfig::default())
    }

    /// Create an unconnected transport with custom timeouts.
    pub fn with_config(address: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            address: address.into(),
            config,
            link: RwLock::new(None),
            notification_handles: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(true),
        }
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Check if the BLE stack reports the link as connected.
    pub async fn is_connected(&self) -> bool {
        match self.link.read().await.as_ref() {
            Some(link) => link.peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn abort_notification_handlers(&self) {
        let mut handles = self.notification_handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    async fn open_link(&self, adapter: Adapter, peripheral: Peripheral) -> Result<Link> {
        info!("Connecting to device...");
        timeout(self.config.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to device", self.config.connection_timeout))??;
        info!("Connected!");

        info!("Discovering services...");
        timeout(self.config.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))??;

        let services = peripheral.services();
        debug!("Found {} services", services.len());

        let mut characteristics = HashMap::new();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for char in &service.characteristics {
                debug!("    Characteristic: {}", char.uuid);
                characteristics.insert(char.uuid, char.clone());
            }
        }

        Ok(Link {
            adapter,
            peripheral,
            characteristics,
        })
    }
}

#[async_trait]
impl GattTransport for BleTransport {
    fn address(&self) -> &str {
        &self.address
    }

    /// Disconnect a peripheral with this address that the adapter still holds
    /// a connection to. Does not scan.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address))]
    async fn reset(&self) -> Result<()> {
        let adapter = get_adapter().await?;
        if let Some(peripheral) = find_known_peripheral(&adapter, &self.address).await?
            && peripheral.is_connected().await?
        {
            info!("Dropping stale connection");
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address))]
    async fn connect(&self) -> Result<()> {
        self.config.validate()?;
        let options = ScanOptions::new().duration(self.config.scan_timeout);
        let (adapter, peripheral) = find_device(&self.address, &options).await?;
        let link = self.open_link(adapter, peripheral).await?;
        *self.link.write().await = Some(link);
        self.disconnected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let guard = self.link.read().await;
        let link = guard.as_ref().ok_or(Error::NotConnected)?;
        let characteristic = link.characteristic(uuid)?;
        let data = timeout(
            self.config.operation_timeout,
            link.peripheral.read(&characteristic),
        )
        .await
        .map_err(|_| {
            Error::timeout(
                format!("read characteristic {}", uuid),
                self.config.operation_timeout,
            )
        })??;
        Ok(data)
    }

    async fn write(&self, uuid: Uuid, data: &[u8]) -> Result<()> {
        let guard = self.link.read().await;
        let link = guard.as_ref().ok_or(Error::NotConnected)?;
        let characteristic = link.characteristic(uuid)?;
        timeout(
            self.config.operation_timeout,
            link.peripheral
                .write(&characteristic, data, WriteType::WithResponse),
        )
        .await
        .map_err(|_| {
            Error::timeout(
                format!("write characteristic {}", uuid),
                self.config.operation_timeout,
            )
        })??;
        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid, buffer: usize) -> Result<mpsc::Receiver<Vec<u8>>> {
        let guard = self.link.read().await;
        let link = guard.as_ref().ok_or(Error::NotConnected)?;
        let characteristic = link.characteristic(uuid)?;

        link.peripheral.subscribe(&characteristic).await?;
        let stream = link.peripheral.notifications().await?;

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let peripheral = link.peripheral.clone();
        let handle = tokio::spawn(forward_notifications(
            stream,
            uuid,
            tx,
            self.config.link_check_interval,
            move || {
                let peripheral = peripheral.clone();
                async move { peripheral.is_connected().await.unwrap_or(false) }
            },
        ));

        self.notification_handles.lock().await.push(handle);
        Ok(rx)
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<()> {
        let guard = self.link.read().await;
        let link = guard.as_ref().ok_or(Error::NotConnected)?;
        let characteristic = link.characteristic(uuid)?;
        link.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address))]
    async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from device...");
        self.disconnected.store(true, Ordering::SeqCst);
        self.abort_notification_handlers().await;

        match self.link.write().await.take() {
            Some(link) => {
                link.peripheral.disconnect().await?;
                Ok(())
            }
            None => Err(Error::NotConnected),
        }
    }
}

/// Forward notifications for `uuid` into `tx` until the stream ends, the
/// receiver is dropped, or `is_connected` reports the link down.
///
/// BlueZ keeps the notification stream open after the peripheral goes away,
/// so the link is polled every `check_interval`. Returning drops `tx`, which
/// the session sees as a lost connection.
async fn forward_notifications<S, F, Fut>(
    mut stream: S,
    uuid: Uuid,
    tx: mpsc::Sender<Vec<u8>>,
    check_interval: Duration,
    mut is_connected: F,
) where
    S: Stream<Item = ValueNotification> + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut check = interval(check_interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    check.tick().await;

    loop {
        tokio::select! {
            notification = stream.next() => match notification {
                Some(notification) => {
                    if notification.uuid == uuid && tx.send(notification.value).await.is_err() {
                        debug!("Notification receiver for {} dropped", uuid);
                        return;
                    }
                }
                None => {
                    debug!("Notification stream for {} ended", uuid);
                    return;
                }
            },
            _ = check.tick() => {
                if !is_connected().await {
                    warn!("Link to device lost");
                    return;
                }
            }
        }
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(
            device_address = %self.address,
            "Transport dropped without calling disconnect() - performing best-effort cleanup"
        );

        if let Ok(mut handles) = self.notification_handles.try_lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        let Some(link) = self.link.get_mut().take() else {
            return;
        };
        let address = self.address.clone();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = link.peripheral.disconnect().await {
                    debug!(
                        device_address = %address,
                        error = %e,
                        "Best-effort disconnect failed (device may already be disconnected)"
                    );
                } else {
                    debug!(device_address = %address, "Best-effort disconnect completed");
                }
            });
        }
    }
}
