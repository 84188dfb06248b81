//! Platform-agnostic types for the Emerald Electricity Advisor.
//!
//! This crate holds everything about the advisor that does not need a
//! Bluetooth stack: GATT UUIDs, wire protocol constants, the data model,
//! and the pure frame decoder used by `emerald-core`.
//!
//! # Example
//!
//! ```
//! use emerald_types::{CalibrationState, decode_frame};
//!
//! let mut calibration = CalibrationState::new();
//!
//! // Impulse-rate response: 1000 pulses per kWh.
//! decode_frame(&[0x00, 0x01, 0x01, 0x06, 0x02, 0x03, 0xE8], &mut calibration);
//!
//! // Energy sample: opaque timestamp, then 10 pulses.
//! let frame = [0x00, 0x01, 0x02, 0x0a, 0x06, 0, 0, 0, 0, 0x00, 0x0A];
//! let decoded = decode_frame(&frame, &mut calibration);
//! assert_eq!(decoded.sample().map(|s| s.energy_wh), Some(10.0));
//! ```

pub mod error;
pub mod frame;
pub mod protocol;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use frame::{Decoded, FrameKind, RawFrame, decode_frame};
pub use types::{CalibrationState, DeviceIdentity, EnergySample};
