//! Session lifecycle state and counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of an [`AdvisorSession`](crate::AdvisorSession).
///
/// ```text
/// Disconnected -> Connecting -> Identifying -> Streaming -> Disconnecting -> Disconnected
///                      |             |              (control write failure)
///                      +-------------+--------------------------> Failed(reason)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No link. Initial and final state of a clean run.
    #[default]
    Disconnected,
    /// Resetting stale links and connecting.
    Connecting,
    /// Reading the Device Information characteristics.
    Identifying,
    /// Subscribed and receiving reports.
    Streaming,
    /// Unsubscribing and disconnecting.
    Disconnecting,
    /// The run ended with a fatal error.
    Failed(String),
}

impl SessionState {
    /// Short lowercase name, used in logs and the health endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Streaming => "streaming",
            Self::Disconnecting => "disconnecting",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Frame counters for one session, shared through an `Arc`.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_received: AtomicU64,
    samples_emitted: AtomicU64,
    uncalibrated_frames: AtomicU64,
    calibration_updates: AtomicU64,
    malformed_calibrations: AtomicU64,
    unknown_frames: AtomicU64,
    length_mismatches: AtomicU64,
    observer_panics: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Notifications received on the telemetry characteristic.
    pub frames_received: u64,
    /// Energy samples delivered to measurement observers.
    pub samples_emitted: u64,
    /// Energy frames dropped because no impulse rate was known.
    pub uncalibrated_frames: u64,
    /// Impulse-rate frames applied.
    pub calibration_updates: u64,
    /// Impulse-rate frames rejected.
    pub malformed_calibrations: u64,
    /// Frames with an unrecognized tag.
    pub unknown_frames: u64,
    /// Energy frames whose length was not 11 bytes.
    pub length_mismatches: u64,
    /// Observer invocations that panicked.
    pub observer_panics: u64,
}

impl SessionStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sample(&self) {
        self.samples_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_uncalibrated(&self) {
        self.uncalibrated_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_calibration(&self) {
        self.calibration_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed_calibration(&self) {
        self.malformed_calibrations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown(&self) {
        self.unknown_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_length_mismatch(&self) {
        self.length_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_observer_panics(&self, count: usize) {
        self.observer_panics
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            samples_emitted: self.samples_emitted.load(Ordering::Relaxed),
            uncalibrated_frames: self.uncalibrated_frames.load(Ordering::Relaxed),
            calibration_updates: self.calibration_updates.load(Ordering::Relaxed),
            malformed_calibrations: self.malformed_calibrations.load(Ordering::Relaxed),
            unknown_frames: self.unknown_frames.load(Ordering::Relaxed),
            length_mismatches: self.length_mismatches.load(Ordering::Relaxed),
            observer_panics: self.observer_panics.load(Ordering::Relaxed),
        }
    }
}
