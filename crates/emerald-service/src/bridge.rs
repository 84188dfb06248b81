//! Wiring of session observers onto the service outputs.

use std::sync::Arc;

use emerald_core::{AdvisorSession, DeviceIdentity, GattTransport};
use time::OffsetDateTime;

use crate::metrics::EnergyMetrics;

/// A destination for session output.
///
/// Called synchronously on the session task, so implementations must return
/// quickly: update shared state or enqueue, never do I/O.
pub trait EnergySink: Send + Sync + 'static {
    /// The advisor was identified.
    fn identified(&self, identity: &DeviceIdentity);
    /// An energy report arrived, in Wh.
    fn energy(&self, energy_wh: f64);
}

impl EnergySink for EnergyMetrics {
    fn identified(&self, identity: &DeviceIdentity) {
        self.record_identity(identity);
    }

    fn energy(&self, energy_wh: f64) {
        self.record_sample(energy_wh, OffsetDateTime::now_utc());
    }
}

#[cfg(feature = "mqtt")]
impl EnergySink for crate::mqtt::HaHandle {
    fn identified(&self, identity: &DeviceIdentity) {
        self.identify(identity);
    }

    fn energy(&self, energy_wh: f64) {
        crate::mqtt::HaHandle::energy(self, energy_wh);
    }
}

/// Register `sink` as both an identity and a measurement observer.
pub fn attach<T, S>(session: &mut AdvisorSession<T>, sink: Arc<S>)
where
    T: GattTransport,
    S: EnergySink,
{
    let identity_sink = Arc::clone(&sink);
    session.register_identity_observer(move |identity| identity_sink.identified(identity));
    session.register_measurement_observer(move |energy_wh| sink.energy(energy_wh));
}
