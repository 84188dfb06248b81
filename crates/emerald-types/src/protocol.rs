//! Command payloads and notification tags of the advisor wire protocol.
//!
//! Every frame exchanged over the energy service starts with a 5-byte
//! command tag. Commands written to [`ENERGY_CONTROL`](crate::uuid::ENERGY_CONTROL)
//! are sent verbatim; frames pushed on [`ENERGY_NOTIFY`](crate::uuid::ENERGY_NOTIFY)
//! are classified by their tag.

/// Length of the command tag at the start of every frame.
pub const TAG_LEN: usize = 5;

/// Enable periodic (30 second) automatic upload of energy samples.
pub const CMD_ENABLE_AUTO_REPORT: [u8; 6] = [0x00, 0x01, 0x02, 0x0b, 0x01, 0x01];

/// Ask the device to report its impulse rate.
pub const CMD_REQUEST_CALIBRATION: [u8; 5] = [0x00, 0x01, 0x01, 0x05, 0x00];

/// Tag of a 30 second energy sample notification.
pub const TAG_ENERGY_SAMPLE: [u8; TAG_LEN] = [0x00, 0x01, 0x02, 0x0a, 0x06];

/// Tag of an impulse-rate (calibration) response notification.
pub const TAG_IMPULSE_RATE: [u8; TAG_LEN] = [0x00, 0x01, 0x01, 0x06, 0x02];

/// Expected total length of an energy sample frame.
///
/// Layout: tag (5) + opaque timestamp (4) + pulse count (2, big-endian).
pub const ENERGY_SAMPLE_LEN: usize = 11;

/// Length of the opaque timestamp carried by an energy sample.
pub const TIMESTAMP_LEN: usize = 4;

/// Offset of the timestamp within an energy sample frame.
pub const TIMESTAMP_OFFSET: usize = TAG_LEN;

/// Offset of the pulse count within an energy sample frame.
pub const PULSES_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_LEN;

/// Impulse rates are reported in pulses per kWh; samples are reported in Wh.
pub const WH_PER_KWH: f64 = 1000.0;
