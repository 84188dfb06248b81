//! Core types for advisor sessions and energy data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::protocol::{TIMESTAMP_LEN, WH_PER_KWH};

/// Identity of a connected advisor, read from the Device Information service.
///
/// Read once per session, immediately after connecting, and never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    /// BLE address (MAC on Linux/Windows, CoreBluetooth UUID on macOS).
    pub address: String,
    /// Manufacturer name string.
    pub manufacturer: String,
    /// Serial number string.
    pub serial: String,
    /// Firmware revision string.
    pub firmware_version: String,
}

impl DeviceIdentity {
    /// Create a new identity.
    pub fn new(
        address: impl Into<String>,
        manufacturer: impl Into<String>,
        serial: impl Into<String>,
        firmware_version: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            manufacturer: manufacturer.into(),
            serial: serial.into(),
            firmware_version: firmware_version.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} advisor (serial={}, firmware={}, address={})",
            self.manufacturer, self.serial, self.firmware_version, self.address
        )
    }
}

/// Impulse-rate calibration of the meter the advisor is clipped onto.
///
/// Starts unset. Each calibration response overwrites the rate; there is no
/// way back to the unset state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationState {
    impulse_rate: Option<u32>,
}

impl CalibrationState {
    /// Create an unset calibration state.
    pub const fn new() -> Self {
        Self { impulse_rate: None }
    }

    /// Impulse rate in pulses per kWh, if known.
    pub fn impulse_rate(&self) -> Option<u32> {
        self.impulse_rate
    }

    /// Whether an impulse rate has been received.
    pub fn is_calibrated(&self) -> bool {
        self.impulse_rate.is_some()
    }

    /// Record a new impulse rate, returning the previous one.
    pub fn set_impulse_rate(&mut self, pulses_per_kwh: u32) -> Option<u32> {
        self.impulse_rate.replace(pulses_per_kwh)
    }

    /// Convert a raw pulse count to watt-hours.
    ///
    /// Returns `None` while uncalibrated.
    pub fn energy_wh(&self, pulses: u16) -> Option<f64> {
        self.impulse_rate
            .map(|rate| f64::from(pulses) * (f64::from(rate) / WH_PER_KWH))
    }
}

/// One energy sample decoded from a telemetry notification.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnergySample {
    /// Energy consumed over the sample interval, in Wh.
    pub energy_wh: f64,
    /// Raw pulse count reported by the device.
    pub raw_pulse_count: u16,
    /// Device timestamp bytes; the format is not decoded.
    pub unparsed_timestamp: [u8; TIMESTAMP_LEN],
}
