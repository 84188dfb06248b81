//! Bluetooth UUIDs for the Emerald Electricity Advisor.
//!
//! The advisor exposes the standard Device Information service plus a
//! vendor "time" service that carries both the control-write and the
//! telemetry-notify characteristics.

use uuid::{Uuid, uuid};

// --- Standard BLE Service UUIDs ---

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

// --- Device Information Characteristic UUIDs ---

/// Manufacturer name string characteristic.
pub const MANUFACTURER_NAME: Uuid = uuid!("00002a29-0000-1000-8000-00805f9b34fb");

/// Serial number string characteristic.
pub const SERIAL_NUMBER: Uuid = uuid!("00002a25-0000-1000-8000-00805f9b34fb");

/// Firmware revision string characteristic.
pub const FIRMWARE_REVISION: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

// --- Advisor energy monitoring ---

/// Energy monitoring service (advertised by the firmware as a time service).
pub const ENERGY_SERVICE: Uuid = uuid!("00001910-0000-1000-8000-00805f9b34fb");

/// Read/notify characteristic that pushes telemetry and calibration frames.
pub const ENERGY_NOTIFY: Uuid = uuid!("00002b10-0000-1000-8000-00805f9b34fb");

/// Write characteristic that accepts control commands.
pub const ENERGY_CONTROL: Uuid = uuid!("00002b11-0000-1000-8000-00805f9b34fb");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_service_uuid() {
        assert_eq!(
            DEVICE_INFO_SERVICE.to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_device_info_characteristics() {
        assert_eq!(
            MANUFACTURER_NAME.to_string(),
            "00002a29-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            SERIAL_NUMBER.to_string(),
            "00002a25-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            FIRMWARE_REVISION.to_string(),
            "00002a26-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_energy_service_uuids() {
        assert_eq!(
            ENERGY_SERVICE.to_string(),
            "00001910-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            ENERGY_NOTIFY.to_string(),
            "00002b10-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            ENERGY_CONTROL.to_string(),
            "00002b11-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_energy_characteristics_are_distinct() {
        assert_ne!(ENERGY_NOTIFY, ENERGY_CONTROL);
        assert_ne!(ENERGY_SERVICE, DEVICE_INFO_SERVICE);
    }

    #[test]
    fn test_uuid_parsing_is_case_insensitive() {
        // Vendor documentation spells these in upper case.
        let upper: Uuid = "00002A29-0000-1000-8000-00805F9B34FB".parse().unwrap();
        assert_eq!(upper, MANUFACTURER_NAME);
    }
}
