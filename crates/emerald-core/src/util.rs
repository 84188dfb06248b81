//! Utility functions for emerald-core.

use std::string::FromUtf8Error;

use btleplug::platform::PeripheralId;

/// Address reported by CoreBluetooth, which hides MAC addresses.
const UNKNOWN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Normalize a Bluetooth address or peripheral UUID for comparison.
///
/// Lowercases and strips `:` and `-` separators, so `AA:BB:CC:DD:EE:FF`
/// and `aabbccddeeff` compare equal.
pub fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whether a peripheral (by address and formatted ID) matches a configured address.
pub fn address_matches(wanted: &str, address: &str, peripheral_id: &str) -> bool {
    let wanted = normalize_address(wanted);
    if wanted.is_empty() {
        return false;
    }
    if address != UNKNOWN_ADDRESS && normalize_address(address) == wanted {
        return true;
    }
    normalize_address(peripheral_id).contains(&wanted)
}

/// Decode a Device Information string characteristic.
///
/// The advisor pads some strings with trailing NULs.
pub fn decode_info_string(data: Vec<u8>) -> Result<String, FromUtf8Error> {
    String::from_utf8(data).map(|s| s.trim_end_matches('\0').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(normalize_address("aabbccddeeff"), "aabbccddeeff");
        assert_eq!(
            normalize_address("6A1B2C3D-0000-4000-8000-ABCDEF012345"),
            "6a1b2c3d000040008000abcdef012345"
        );
    }

    #[test]
    fn test_address_matches_mac() {
        assert!(address_matches(
            "aa:bb:cc:dd:ee:ff",
            "AA:BB:CC:DD:EE:FF",
            "hci0/dev_AA_BB_CC_DD_EE_FF"
        ));
        assert!(!address_matches(
            "11:22:33:44:55:66",
            "AA:BB:CC:DD:EE:FF",
            "hci0/dev_AA_BB_CC_DD_EE_FF"
        ));
    }

    #[test]
    fn test_address_matches_macos_uuid() {
        let uuid = "6A1B2C3D-0000-4000-8000-ABCDEF012345";
        assert!(address_matches(uuid, UNKNOWN_ADDRESS, uuid));
        assert!(!address_matches(
            "00:00:00:00:00:00",
            UNKNOWN_ADDRESS,
            "6A1B2C3D-0000-4000-8000-ABCDEF012345"
        ));
    }

    #[test]
    fn test_address_matches_empty() {
        assert!(!address_matches("", "AA:BB:CC:DD:EE:FF", "anything"));
    }

    #[test]
    fn test_decode_info_string() {
        assert_eq!(decode_info_string(b"Emerald\0\0".to_vec()).unwrap(), "Emerald");
        assert_eq!(decode_info_string(b"1.2.3".to_vec()).unwrap(), "1.2.3");
        assert_eq!(decode_info_string(Vec::new()).unwrap(), "");
        assert!(decode_info_string(vec![0xFF, 0xFE]).is_err());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalize_is_idempotent(address in "[0-9A-Fa-f:-]{0,40}") {
                let once = normalize_address(&address);
                prop_assert_eq!(normalize_address(&once), once);
            }

            #[test]
            fn mac_matches_regardless_of_format(bytes in proptest::array::uniform6(any::<u8>())) {
                let upper = bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":");
                let lower = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
                prop_assume!(upper != UNKNOWN_ADDRESS);
                prop_assert!(address_matches(&lower, &upper, "unrelated"));
            }
        }
    }
}
