//! Prometheus metrics for advisor readings.
//!
//! [`EnergyMetrics`] is fed from session observers and rendered in the
//! Prometheus text exposition format (0.0.4) by the `/metrics` endpoint:
//!
//! - `emerald_device_info{manufacturer,serial,firmware_version,mac} 1`
//! - `emerald_joules_total` - energy counted since start
//! - `emerald_latest_joules` - energy in the last report, with its timestamp
//! - `emerald_latest_watts` - average power over the last report, with its timestamp
//! - `emerald_last_sample_time` - unix time of the last report
//!
//! Session counters (`emerald_session_*`, `emerald_frames_total`) come from
//! [`SessionStats`](emerald_core::SessionStats).

use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use emerald_core::{DeviceIdentity, SessionState, StatsSnapshot};
use time::OffsetDateTime;
use tracing::info;

/// Seconds per hour, converting Wh to joules.
const SECS_PER_HOUR: f64 = 3600.0;

/// The most recent energy report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatestSample {
    /// Energy in the report, in Wh.
    pub energy_wh: f64,
    /// Energy in the report, in joules.
    pub joules: f64,
    /// Average power over the report interval.
    pub watts: f64,
    /// When the report was received.
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct Inner {
    identity: Option<DeviceIdentity>,
    joules_total: f64,
    samples: u64,
    latest: Option<LatestSample>,
}

/// Energy metrics shared between session observers and the HTTP server.
#[derive(Debug)]
pub struct EnergyMetrics {
    sample_interval: Duration,
    inner: Mutex<Inner>,
}

impl EnergyMetrics {
    /// Create metrics for reports covering `sample_interval` each.
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            sample_interval,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the identity of the connected advisor.
    pub fn record_identity(&self, identity: &DeviceIdentity) {
        self.lock().identity = Some(identity.clone());
    }

    /// Record one energy report received at `received_at`.
    pub fn record_sample(&self, energy_wh: f64, received_at: OffsetDateTime) -> LatestSample {
        let joules = energy_wh * SECS_PER_HOUR;
        let interval = self.sample_interval.as_secs_f64();
        let watts = if interval > 0.0 { joules / interval } else { 0.0 };
        let sample = LatestSample {
            energy_wh,
            joules,
            watts,
            received_at,
        };

        let mut inner = self.lock();
        inner.joules_total += joules;
        inner.samples += 1;
        inner.latest = Some(sample);
        drop(inner);

        info!(energy_wh, watts, joules, "Updated energy metrics");
        sample
    }

    /// Identity of the advisor, once identified.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.lock().identity.clone()
    }

    /// The most recent report.
    pub fn latest(&self) -> Option<LatestSample> {
        self.lock().latest
    }

    /// Number of reports recorded.
    pub fn samples(&self) -> u64 {
        self.lock().samples
    }

    /// Total energy recorded, in joules.
    pub fn joules_total(&self) -> f64 {
        self.lock().joules_total
    }

    /// Append the energy metrics to `output`.
    pub fn render_into(&self, output: &mut String) {
        let inner = self.lock();

        if let Some(id) = &inner.identity {
            output.push_str("# HELP emerald_device_info Device information\n");
            output.push_str("# TYPE emerald_device_info gauge\n");
            let _ = writeln!(
                output,
                "emerald_device_info{{manufacturer=\"{}\",serial=\"{}\",firmware_version=\"{}\",mac=\"{}\"}} 1",
                escape_label_value(&id.manufacturer),
                escape_label_value(&id.serial),
                escape_label_value(&id.firmware_version),
                escape_label_value(&id.address),
            );
            output.push('\n');
        }

        output.push_str("# HELP emerald_joules_total Counter of joules\n");
        output.push_str("# TYPE emerald_joules_total counter\n");
        let _ = writeln!(output, "emerald_joules_total {}\n", inner.joules_total);

        if let Some(latest) = &inner.latest {
            let ts = timestamp_millis(latest.received_at);

            output.push_str("# HELP emerald_latest_joules Number of joules in the last sample\n");
            output.push_str("# TYPE emerald_latest_joules gauge\n");
            let _ = writeln!(output, "emerald_latest_joules {} {}\n", latest.joules, ts);

            output.push_str(
                "# HELP emerald_latest_watts Watts demanded (avg) over the last sample\n",
            );
            output.push_str("# TYPE emerald_latest_watts gauge\n");
            let _ = writeln!(output, "emerald_latest_watts {} {}\n", latest.watts, ts);

            output.push_str(
                "# HELP emerald_last_sample_time Timestamp of last sample from sensor\n",
            );
            output.push_str("# TYPE emerald_last_sample_time gauge\n");
            let _ = writeln!(
                output,
                "emerald_last_sample_time {}\n",
                latest.received_at.unix_timestamp()
            );
        }
    }
}

/// Append session health and frame counters to `output`.
pub fn render_session(output: &mut String, state: &SessionState, stats: &StatsSnapshot) {
    output.push_str("# HELP emerald_session_streaming Whether the session is streaming (1=yes, 0=no)\n");
    output.push_str("# TYPE emerald_session_streaming gauge\n");
    let _ = writeln!(
        output,
        "emerald_session_streaming {}\n",
        u8::from(*state == SessionState::Streaming)
    );

    output.push_str("# HELP emerald_frames_total Notification frames by decode outcome\n");
    output.push_str("# TYPE emerald_frames_total counter\n");
    for (outcome, count) in [
        ("sample", stats.samples_emitted),
        ("uncalibrated", stats.uncalibrated_frames),
        ("calibration", stats.calibration_updates),
        ("malformed_calibration", stats.malformed_calibrations),
        ("unknown", stats.unknown_frames),
    ] {
        let _ = writeln!(output, "emerald_frames_total{{outcome=\"{}\"}} {}", outcome, count);
    }
    output.push('\n');

    output.push_str("# HELP emerald_length_mismatches_total Energy frames with unexpected length\n");
    output.push_str("# TYPE emerald_length_mismatches_total counter\n");
    let _ = writeln!(output, "emerald_length_mismatches_total {}\n", stats.length_mismatches);

    output.push_str("# HELP emerald_observer_panics_total Observer callbacks that panicked\n");
    output.push_str("# TYPE emerald_observer_panics_total counter\n");
    let _ = writeln!(output, "emerald_observer_panics_total {}", stats.observer_panics);
}

fn timestamp_millis(at: OffsetDateTime) -> i128 {
    at.unix_timestamp_nanos() / 1_000_000
}

/// Escape special characters in Prometheus label values.
pub fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
