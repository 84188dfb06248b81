//! Adapter access and device lookup.
//!
//! The advisor is always addressed directly (MAC address on Linux/Windows,
//! CoreBluetooth UUID on macOS), so lookup matches by address only.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::util::{address_matches, format_peripheral_id};

/// Number of scan attempts before giving up on a device.
const MAX_SCAN_ATTEMPTS: u32 = 3;

/// Shortest scan window per attempt.
const MIN_SCAN_WINDOW: Duration = Duration::from_secs(1);

/// Sum of the attempt weights 1..=MAX_SCAN_ATTEMPTS.
const SCAN_WEIGHT_TOTAL: u32 = MAX_SCAN_ATTEMPTS * (MAX_SCAN_ATTEMPTS + 1) / 2;

/// Options for locating a device.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Total time budget for scanning, shared by all attempts.
    pub duration: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Scan window for a given 1-based attempt.
    ///
    /// Windows grow linearly and add up to the budget, so attempt `n` gets
    /// `n / 6` of it with three attempts. Each window is at least one second.
    pub fn window_for_attempt(&self, attempt: u32) -> Duration {
        (self.duration * attempt / SCAN_WEIGHT_TOTAL).max(MIN_SCAN_WINDOW)
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Find an advisor by address, scanning if it is not already known.
///
/// Checks peripherals the adapter already knows about first, then performs
/// up to three scans with growing windows. BLE advertisements are easily
/// missed, so a single short scan is not enough.
#[tracing::instrument(
    level = "debug",
    skip(options),
    fields(scan_secs = options.duration.as_secs())
)]
pub async fn find_device(address: &str, options: &ScanOptions) -> Result<(Adapter, Peripheral)> {
    let adapter = get_adapter().await?;

    if let Some(peripheral) = find_known_peripheral(&adapter, address).await? {
        info!("Found device in cache (no scan needed)");
        return Ok((adapter, peripheral));
    }

    for attempt in 1..=MAX_SCAN_ATTEMPTS {
        let window = options.window_for_attempt(attempt);
        info!(
            "Scan attempt {}/{} ({:.1}s)...",
            attempt,
            MAX_SCAN_ATTEMPTS,
            window.as_secs_f32()
        );

        adapter.start_scan(ScanFilter::default()).await?;
        sleep(window).await;
        adapter.stop_scan().await?;

        if let Some(peripheral) = find_known_peripheral(&adapter, address).await? {
            info!("Found device on attempt {}", attempt);
            return Ok((adapter, peripheral));
        }

        if attempt < MAX_SCAN_ATTEMPTS {
            warn!("Device not found, retrying...");
        }
    }

    warn!(
        "Device not found after {} attempts: {}",
        MAX_SCAN_ATTEMPTS, address
    );
    Err(Error::device_not_found(address))
}

/// Search the adapter's known peripherals for one with the given address.
///
/// Does not scan.
pub async fn find_known_peripheral(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>> {
    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        let peripheral_id = format_peripheral_id(&peripheral.id());
        let props_address = match peripheral.properties().await {
            Ok(Some(props)) => props.address.to_string(),
            _ => String::new(),
        };

        if address_matches(address, &props_address, &peripheral_id) {
            debug!("Matched peripheral {}", peripheral_id);
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}
