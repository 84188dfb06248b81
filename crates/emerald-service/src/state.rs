//! Shared application state for the HTTP server.

use std::sync::Arc;

use emerald_core::{SessionState, SessionStats};
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::metrics::EnergyMetrics;

/// State shared between the session observers and HTTP handlers.
pub struct AppState {
    /// Energy metrics fed by the session observers.
    pub metrics: Arc<EnergyMetrics>,
    /// Session frame counters.
    pub stats: Arc<SessionStats>,
    /// Session lifecycle.
    pub session_state: watch::Receiver<SessionState>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        metrics: Arc<EnergyMetrics>,
        stats: Arc<SessionStats>,
        session_state: watch::Receiver<SessionState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            metrics,
            stats,
            session_state,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        self.session_state.borrow().clone()
    }

    /// Seconds since the service started.
    pub fn uptime_secs(&self) -> i64 {
        (OffsetDateTime::now_utc() - self.started_at)
            .whole_seconds()
            .max(0)
    }
}
