//! The advisor device session.
//!
//! [`AdvisorSession`] owns one run of the advisor lifecycle:
//!
//! 1. best-effort reset of a stale link to the same address
//! 2. connect
//! 3. read manufacturer, serial number and firmware revision
//! 4. hand the identity to every identity observer
//! 5. subscribe to the telemetry characteristic
//! 6. request the impulse rate, then enable automatic reports
//! 7. decode notifications until cancelled
//! 8. unsubscribe and disconnect (best-effort)
//!
//! Connection, identification, subscription and control-write failures end
//! the run. Nothing a notification contains does: malformed frames are
//! logged, counted and skipped.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use emerald_types::protocol::{CMD_ENABLE_AUTO_REPORT, CMD_REQUEST_CALIBRATION, ENERGY_SAMPLE_LEN};
use emerald_types::uuid::{
    ENERGY_CONTROL, ENERGY_NOTIFY, FIRMWARE_REVISION, MANUFACTURER_NAME, SERIAL_NUMBER,
};
use emerald_types::{CalibrationState, Decoded, DeviceIdentity, decode_frame};

use crate::error::{Error, Result};
use crate::observers::ObserverRegistry;
use crate::state::{SessionState, SessionStats};
use crate::traits::GattTransport;
use crate::util::decode_info_string;

/// Default capacity of the queue between notification delivery and decoding.
const DEFAULT_NOTIFICATION_BUFFER: usize = 32;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Notifications that may wait for the decoder before delivery applies
    /// backpressure.
    pub notification_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Set the notification buffer size.
    #[must_use]
    pub fn notification_buffer(mut self, size: usize) -> Self {
        self.notification_buffer = size.max(1);
        self
    }
}

/// One advisor session over a [`GattTransport`].
///
/// Register observers, then call [`run`](Self::run). Calibration and identity
/// start empty on every run; nothing carries over between runs.
///
/// # Example
///
/// ```no_run
/// use emerald_core::{AdvisorSession, BleTransport};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut session = AdvisorSession::new(BleTransport::new("AA:BB:CC:DD:EE:FF"));
///     session.register_identity_observer(|id| println!("{id}"));
///     session.register_measurement_observer(|wh| println!("{wh} Wh"));
///
///     let cancel = CancellationToken::new();
///     session.run(cancel).await?;
///     Ok(())
/// }
/// ```
pub struct AdvisorSession<T> {
    transport: T,
    observers: ObserverRegistry,
    calibration: CalibrationState,
    identity: Option<DeviceIdentity>,
    config: SessionConfig,
    span: Span,
    state: watch::Sender<SessionState>,
    stats: Arc<SessionStats>,
}

impl<T: GattTransport> std::fmt::Debug for AdvisorSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisorSession")
            .field("address", &self.transport.address())
            .field("state", &*self.state.borrow())
            .field("calibration", &self.calibration)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl<T: GattTransport> AdvisorSession<T> {
    /// Create a session over the given transport.
    pub fn new(transport: T) -> Self {
        let span = tracing::info_span!("session", address = %transport.address());
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            observers: ObserverRegistry::new(),
            calibration: CalibrationState::new(),
            identity: None,
            config: SessionConfig::default(),
            span,
            state,
            stats: Arc::new(SessionStats::new()),
        }
    }

    /// Use a custom configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Emit all session logs inside `span` instead of the default
    /// `session{address=..}` span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Add an observer for the device identity.
    pub fn register_identity_observer<F>(&mut self, observer: F)
    where
        F: Fn(&DeviceIdentity) + Send + Sync + 'static,
    {
        self.observers.on_identity(observer);
    }

    /// Add an observer for energy samples (Wh over the report interval).
    pub fn register_measurement_observer<F>(&mut self, observer: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.observers.on_measurement(observer);
    }

    /// Current impulse-rate calibration.
    pub fn calibration(&self) -> CalibrationState {
        self.calibration
    }

    /// Identity read during the current or last run.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Frame counters, readable from other tasks.
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the session until `cancel` is raised or a fatal error occurs.
    ///
    /// Cancellation is a normal shutdown and returns `Ok(())`. A token that is
    /// already raised skips the device entirely; one raised while connecting
    /// abandons the attempt. Once connected, unsubscribe and disconnect are
    /// always attempted before returning.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let span = self.span.clone();
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&mut self, cancel: CancellationToken) -> Result<()> {
        self.calibration = CalibrationState::new();
        self.identity = None;

        if cancel.is_cancelled() {
            info!("Cancelled before connecting");
            self.set_state(SessionState::Disconnected);
            return Ok(());
        }

        if let Err(e) = self.transport.reset().await {
            warn!(error = %e, "Pre-connect reset failed, continuing");
        }

        self.set_state(SessionState::Connecting);
        info!("Connecting to advisor");
        let connected = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.transport.connect() => result,
        };
        match connected {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                info!("Cancelled while connecting");
                // The abandoned attempt may have left a half-open link.
                if let Err(e) = self.transport.reset().await {
                    debug!(error = %e, "Reset after cancelled connect failed");
                }
                self.set_state(SessionState::Disconnected);
                return Ok(());
            }
            Err(e) => {
                let err = e.into_connection_failure(self.transport.address());
                error!(error = %err, "Connection failed");
                self.set_state(SessionState::Failed(err.to_string()));
                return Err(err);
            }
        }

        let mut subscribed = false;
        let result = self.connected(&cancel, &mut subscribed).await;

        self.set_state(SessionState::Disconnecting);
        self.teardown(subscribed).await;

        match &result {
            Ok(()) => {
                info!("Session closed");
                self.set_state(SessionState::Disconnected);
            }
            Err(e) => {
                error!(error = %e, "Session failed");
                self.set_state(SessionState::Failed(e.to_string()));
            }
        }
        result
    }

    /// Steps 3 through 7, run while the link is up.
    async fn connected(&mut self, cancel: &CancellationToken, subscribed: &mut bool) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.set_state(SessionState::Identifying);
        let identity = self.identify().await?;
        info!(
            manufacturer = %identity.manufacturer,
            serial = %identity.serial,
            firmware = %identity.firmware_version,
            "Advisor identified"
        );
        let panics = self.observers.notify_identity(&identity);
        self.stats.record_observer_panics(panics);
        self.identity = Some(identity);

        let notifications = self
            .transport
            .subscribe(ENERGY_NOTIFY, self.config.notification_buffer)
            .await
            .map_err(|e| Error::SubscribeFailed {
                uuid: ENERGY_NOTIFY.to_string(),
                reason: e.to_string(),
            })?;
        *subscribed = true;
        debug!("Subscribed to energy notifications");

        self.write_command("request calibration", &CMD_REQUEST_CALIBRATION)
            .await?;
        self.write_command("enable auto-report", &CMD_ENABLE_AUTO_REPORT)
            .await?;

        self.set_state(SessionState::Streaming);
        info!("Streaming energy reports");
        self.stream(notifications, cancel).await
    }

    async fn identify(&self) -> Result<DeviceIdentity> {
        let manufacturer = self
            .read_info_string(MANUFACTURER_NAME, "manufacturer name")
            .await?;
        let serial = self.read_info_string(SERIAL_NUMBER, "serial number").await?;
        let firmware = self
            .read_info_string(FIRMWARE_REVISION, "firmware revision")
            .await?;

        Ok(DeviceIdentity::new(
            self.transport.address(),
            manufacturer,
            serial,
            firmware,
        ))
    }

    async fn read_info_string(&self, uuid: Uuid, characteristic: &'static str) -> Result<String> {
        let data = self
            .transport
            .read(uuid)
            .await
            .map_err(|e| Error::IdentificationFailed {
                characteristic,
                reason: e.to_string(),
            })?;
        decode_info_string(data).map_err(|e| Error::IdentificationFailed {
            characteristic,
            reason: e.to_string(),
        })
    }

    async fn write_command(&self, name: &str, command: &[u8]) -> Result<()> {
        debug!(command = name, bytes = %hex::encode(command), "Writing control command");
        self.transport
            .write(ENERGY_CONTROL, command)
            .await
            .map_err(|e| Error::WriteFailed {
                uuid: ENERGY_CONTROL.to_string(),
                reason: format!("{}: {}", name, e),
            })
    }

    async fn stream(
        &mut self,
        mut notifications: mpsc::Receiver<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Cancellation requested");
                    return Ok(());
                }
                frame = notifications.recv() => match frame {
                    Some(data) => self.handle_frame(&data),
                    None => {
                        warn!("Notification stream closed by transport");
                        return Err(Error::ConnectionLost);
                    }
                },
            }
        }
    }

    fn handle_frame(&mut self, data: &[u8]) {
        self.stats.record_frame();
        let decoded = decode_frame(data, &mut self.calibration);

        if let Some(actual) = decoded.length_mismatch() {
            self.stats.record_length_mismatch();
            warn!(
                expected = ENERGY_SAMPLE_LEN,
                actual,
                frame = %hex::encode(data),
                "Energy frame has unexpected length, decoding best-effort"
            );
        }

        match decoded {
            Decoded::Sample { sample, .. } => {
                self.stats.record_sample();
                debug!(
                    energy_wh = sample.energy_wh,
                    pulses = sample.raw_pulse_count,
                    timestamp = %hex::encode(sample.unparsed_timestamp),
                    "Energy sample"
                );
                let panics = self.observers.notify_measurement(sample.energy_wh);
                self.stats.record_observer_panics(panics);
            }
            Decoded::Uncalibrated {
                raw_pulse_count, ..
            } => {
                self.stats.record_uncalibrated();
                error!(
                    pulses = raw_pulse_count,
                    "Energy sample received before impulse rate, dropping"
                );
            }
            Decoded::Calibrated {
                impulse_rate,
                previous,
            } => {
                self.stats.record_calibration();
                info!(impulse_rate, previous = ?previous, "Impulse rate updated");
            }
            Decoded::MalformedCalibration { error, payload } => {
                self.stats.record_malformed_calibration();
                warn!(
                    %error,
                    payload = %hex::encode(payload),
                    "Ignoring malformed impulse rate"
                );
            }
            Decoded::Unknown { tag, payload } => {
                self.stats.record_unknown();
                debug!(
                    tag = %hex::encode(tag),
                    payload = %hex::encode(payload),
                    "Discarding unknown frame"
                );
            }
        }
    }

    async fn teardown(&self, subscribed: bool) {
        if subscribed && let Err(e) = self.transport.unsubscribe(ENERGY_NOTIFY).await {
            warn!(error = %e, "Unsubscribe failed");
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
    }

    fn set_state(&self, state: SessionState) {
        debug!(state = %state, "Session state");
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        assert_eq!(SessionConfig::default().notification_buffer, 32);
    }

    #[test]
    fn test_session_config_minimum_buffer() {
        assert_eq!(
            SessionConfig::default()
                .notification_buffer(0)
                .notification_buffer,
            1
        );
        assert_eq!(
            SessionConfig::default()
                .notification_buffer(8)
                .notification_buffer,
            8
        );
    }
}
