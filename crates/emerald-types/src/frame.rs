//! Notification frame decoding.
//!
//! The advisor pushes two kinds of frames on its notify characteristic:
//! energy samples and impulse-rate (calibration) responses. Both start with
//! a 5-byte tag (see [`crate::protocol`]). Decoding is a pure state
//! transition over a [`CalibrationState`]: calibration frames update it,
//! energy frames read it.
//!
//! Energy sample layout (11 bytes):
//! - bytes 0-4: tag `00 01 02 0a 06`
//! - bytes 5-8: device timestamp (format unknown, kept opaque)
//! - bytes 9-10: pulse count (u16 BE)
//!
//! Impulse-rate layout:
//! - bytes 0-4: tag `00 01 01 06 02`
//! - bytes 5..: impulse rate in pulses per kWh (unsigned BE, any width)
//!
//! Energy frames of the wrong length are decoded from whatever bytes are
//! present and reported through [`Decoded::length_mismatch`].

use bytes::Buf;

use crate::error::{ParseError, ParseResult};
use crate::protocol::{
    ENERGY_SAMPLE_LEN, TAG_ENERGY_SAMPLE, TAG_IMPULSE_RATE, TAG_LEN, TIMESTAMP_LEN,
};
use crate::types::{CalibrationState, EnergySample};

/// Classification of a frame by its command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Periodic energy sample.
    EnergySample,
    /// Impulse-rate response.
    ImpulseRate,
    /// Any other tag.
    Unknown,
}

/// A notification split into its command tag and payload.
///
/// Borrows from the notification buffer; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// The 5-byte command tag.
    pub command_code: [u8; TAG_LEN],
    /// Everything after the tag.
    pub payload: &'a [u8],
}

impl<'a> RawFrame<'a> {
    /// Split a notification into tag and payload.
    ///
    /// Fails if the notification is shorter than a tag.
    pub fn parse(data: &'a [u8]) -> ParseResult<Self> {
        if data.len() < TAG_LEN {
            return Err(ParseError::InsufficientBytes {
                expected: TAG_LEN,
                actual: data.len(),
            });
        }
        let (tag, payload) = data.split_at(TAG_LEN);
        let mut command_code = [0u8; TAG_LEN];
        command_code.copy_from_slice(tag);
        Ok(Self {
            command_code,
            payload,
        })
    }

    /// Classify the frame by its tag.
    pub fn kind(&self) -> FrameKind {
        match self.command_code {
            TAG_ENERGY_SAMPLE => FrameKind::EnergySample,
            TAG_IMPULSE_RATE => FrameKind::ImpulseRate,
            _ => FrameKind::Unknown,
        }
    }

    /// Total frame length including the tag.
    pub fn len(&self) -> usize {
        TAG_LEN + self.payload.len()
    }

    /// Always false; a frame carries at least its tag.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Outcome of decoding one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<'a> {
    /// An energy sample converted with the current impulse rate.
    Sample {
        /// The decoded sample.
        sample: EnergySample,
        /// Length of the notification that carried it.
        frame_len: usize,
    },
    /// An energy frame that arrived before any impulse rate; no sample produced.
    Uncalibrated {
        /// Raw pulse count that could not be converted.
        raw_pulse_count: u16,
        /// Device timestamp bytes.
        unparsed_timestamp: [u8; TIMESTAMP_LEN],
        /// Length of the notification.
        frame_len: usize,
    },
    /// The impulse rate was updated.
    Calibrated {
        /// New impulse rate in pulses per kWh.
        impulse_rate: u32,
        /// Impulse rate before this frame.
        previous: Option<u32>,
    },
    /// An impulse-rate frame whose payload could not be used; state unchanged.
    MalformedCalibration {
        /// Why the payload was rejected.
        error: ParseError,
        /// The rejected payload.
        payload: &'a [u8],
    },
    /// A frame with an unrecognized (or truncated) tag.
    Unknown {
        /// The tag bytes (fewer than 5 if the frame was truncated).
        tag: &'a [u8],
        /// Bytes after the tag.
        payload: &'a [u8],
    },
}

impl Decoded<'_> {
    /// The energy sample, if one was produced.
    pub fn sample(&self) -> Option<&EnergySample> {
        match self {
            Decoded::Sample { sample, .. } => Some(sample),
            _ => None,
        }
    }

    /// Actual length of an energy frame whose length is not the expected 11 bytes.
    pub fn length_mismatch(&self) -> Option<usize> {
        match *self {
            Decoded::Sample { frame_len, .. } | Decoded::Uncalibrated { frame_len, .. }
                if frame_len != ENERGY_SAMPLE_LEN =>
            {
                Some(frame_len)
            }
            _ => None,
        }
    }
}

/// Decode one notification against the current calibration.
///
/// Never panics and never fails: anything that cannot be used is reported
/// as a [`Decoded`] variant so the caller can log it and carry on.
pub fn decode_frame<'a>(data: &'a [u8], calibration: &mut CalibrationState) -> Decoded<'a> {
    let frame = match RawFrame::parse(data) {
        Ok(frame) => frame,
        Err(_) => {
            return Decoded::Unknown {
                tag: data,
                payload: &[],
            };
        }
    };

    match frame.kind() {
        FrameKind::EnergySample => {
            let (raw_pulse_count, unparsed_timestamp) = read_energy_payload(frame.payload);
            match calibration.energy_wh(raw_pulse_count) {
                Some(energy_wh) => Decoded::Sample {
                    sample: EnergySample {
                        energy_wh,
                        raw_pulse_count,
                        unparsed_timestamp,
                    },
                    frame_len: frame.len(),
                },
                None => Decoded::Uncalibrated {
                    raw_pulse_count,
                    unparsed_timestamp,
                    frame_len: frame.len(),
                },
            }
        }
        FrameKind::ImpulseRate => match parse_impulse_rate(frame.payload) {
            Ok(impulse_rate) => Decoded::Calibrated {
                impulse_rate,
                previous: calibration.set_impulse_rate(impulse_rate),
            },
            Err(error) => Decoded::MalformedCalibration {
                error,
                payload: frame.payload,
            },
        },
        FrameKind::Unknown => Decoded::Unknown {
            tag: &data[..TAG_LEN],
            payload: frame.payload,
        },
    }
}

/// Read timestamp and pulse count from an energy payload of any length.
///
/// Missing timestamp bytes are zero-filled; the pulse count is read big-endian
/// from whatever of its two bytes are present. Trailing bytes are ignored.
fn read_energy_payload(payload: &[u8]) -> (u16, [u8; TIMESTAMP_LEN]) {
    let mut buf = payload;

    let mut timestamp = [0u8; TIMESTAMP_LEN];
    let ts_len = buf.remaining().min(TIMESTAMP_LEN);
    buf.copy_to_slice(&mut timestamp[..ts_len]);

    let pulse_len = buf.remaining().min(2);
    let pulses = if pulse_len == 0 {
        0
    } else {
        buf.get_uint(pulse_len) as u16
    };

    (pulses, timestamp)
}

/// Parse an impulse rate (pulses per kWh) from a big-endian payload.
pub fn parse_impulse_rate(payload: &[u8]) -> ParseResult<u32> {
    if payload.is_empty() {
        return Err(ParseError::InsufficientBytes {
            expected: 1,
            actual: 0,
        });
    }

    let first_significant = payload
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(payload.len());
    let mut significant = &payload[first_significant..];

    if significant.len() > 4 {
        return Err(ParseError::InvalidValue(format!(
            "impulse rate does not fit in 32 bits ({} significant bytes)",
            significant.len()
        )));
    }
    if significant.is_empty() {
        return Err(ParseError::InvalidValue("impulse rate is zero".to_string()));
    }

    let len = significant.len();
    Ok(significant.get_uint(len) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy_frame(timestamp: [u8; 4], pulses: u16) -> Vec<u8> {
        let mut data = TAG_ENERGY_SAMPLE.to_vec();
        data.extend_from_slice(&timestamp);
        data.extend_from_slice(&pulses.to_be_bytes());
        data
    }

    fn impulse_frame(payload: &[u8]) -> Vec<u8> {
        let mut data = TAG_IMPULSE_RATE.to_vec();
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_raw_frame_parse() {
        let data = [0x00, 0x01, 0x02, 0x0a, 0x06, 0xAA];
        let frame = RawFrame::parse(&data).unwrap();
        assert_eq!(frame.command_code, TAG_ENERGY_SAMPLE);
        assert_eq!(frame.payload, &[0xAA]);
        assert_eq!(frame.len(), 6);
        assert_eq!(frame.kind(), FrameKind::EnergySample);
    }

    #[test]
    fn test_raw_frame_too_short() {
        let err = RawFrame::parse(&[0x00, 0x01]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientBytes {
                expected: 5,
                actual: 2
            }
        );
    }

    #[test]
    fn test_raw_frame_kinds() {
        let cal = impulse_frame(&[0x03, 0xE8]);
        assert_eq!(RawFrame::parse(&cal).unwrap().kind(), FrameKind::ImpulseRate);

        let other = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(RawFrame::parse(&other).unwrap().kind(), FrameKind::Unknown);
    }

    #[test]
    fn test_calibration_frame_sets_rate() {
        let mut state = CalibrationState::new();
        let data = impulse_frame(&[0x00, 0x00, 0x03, 0xE8]);

        let decoded = decode_frame(&data, &mut state);
        assert_eq!(
            decoded,
            Decoded::Calibrated {
                impulse_rate: 1000,
                previous: None
            }
        );
        assert_eq!(state.impulse_rate(), Some(1000));
    }

    #[test]
    fn test_calibration_frame_overwrites() {
        let mut state = CalibrationState::new();
        decode_frame(&impulse_frame(&[0x03, 0xE8]), &mut state);
        let frame = impulse_frame(&[0x0C, 0x80]);
        let decoded = decode_frame(&frame, &mut state);
        assert_eq!(
            decoded,
            Decoded::Calibrated {
                impulse_rate: 3200,
                previous: Some(1000)
            }
        );
        assert_eq!(state.impulse_rate(), Some(3200));
    }

    #[test]
    fn test_malformed_calibration_keeps_state() {
        let mut state = CalibrationState::new();
        decode_frame(&impulse_frame(&[0x03, 0xE8]), &mut state);

        let empty = impulse_frame(&[]);
        assert!(matches!(
            decode_frame(&empty, &mut state),
            Decoded::MalformedCalibration { .. }
        ));

        let zero = impulse_frame(&[0x00, 0x00]);
        assert!(matches!(
            decode_frame(&zero, &mut state),
            Decoded::MalformedCalibration { .. }
        ));

        let huge = impulse_frame(&[0x01, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(
            decode_frame(&huge, &mut state),
            Decoded::MalformedCalibration { .. }
        ));

        assert_eq!(state.impulse_rate(), Some(1000));
    }

    #[test]
    fn test_parse_impulse_rate_widths() {
        assert_eq!(parse_impulse_rate(&[0x07]).unwrap(), 7);
        assert_eq!(parse_impulse_rate(&[0x03, 0xE8]).unwrap(), 1000);
        assert_eq!(parse_impulse_rate(&[0x00, 0x00, 0x00, 0x00, 0x03, 0xE8]).unwrap(), 1000);
        assert_eq!(
            parse_impulse_rate(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            u32::MAX
        );
    }

    #[test]
    fn test_energy_frame_with_calibration() {
        let mut state = CalibrationState::new();
        state.set_impulse_rate(1000);

        let data = energy_frame([0xDE, 0xAD, 0xBE, 0xEF], 10);
        let decoded = decode_frame(&data, &mut state);
        let sample = decoded.sample().unwrap();

        assert_eq!(sample.energy_wh, 10.0);
        assert_eq!(sample.raw_pulse_count, 10);
        assert_eq!(sample.unparsed_timestamp, [0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(decoded.length_mismatch(), None);
    }

    #[test]
    fn test_energy_frame_fractional() {
        let mut state = CalibrationState::new();
        state.set_impulse_rate(800);

        let data = energy_frame([0; 4], 3);
        let sample = *decode_frame(&data, &mut state).sample().unwrap();
        assert!((sample.energy_wh - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_energy_frame_without_calibration() {
        let mut state = CalibrationState::new();
        let data = energy_frame([0xDE, 0xAD, 0xBE, 0xEF], 10);

        let decoded = decode_frame(&data, &mut state);
        assert_eq!(
            decoded,
            Decoded::Uncalibrated {
                raw_pulse_count: 10,
                unparsed_timestamp: [0xDE, 0xAD, 0xBE, 0xEF],
                frame_len: 11,
            }
        );
        assert!(decoded.sample().is_none());
        assert!(!state.is_calibrated());
    }

    #[test]
    fn test_short_energy_frame_best_effort() {
        let mut state = CalibrationState::new();
        state.set_impulse_rate(1000);

        // Timestamp complete, one pulse byte.
        let data = [0x00, 0x01, 0x02, 0x0a, 0x06, 0x01, 0x02, 0x03, 0x04, 0x07];
        let decoded = decode_frame(&data, &mut state);
        assert_eq!(decoded.length_mismatch(), Some(10));
        let sample = decoded.sample().unwrap();
        assert_eq!(sample.raw_pulse_count, 7);
        assert_eq!(sample.unparsed_timestamp, [0x01, 0x02, 0x03, 0x04]);

        // Truncated timestamp, no pulse bytes.
        let data = [0x00, 0x01, 0x02, 0x0a, 0x06, 0xAB, 0xCD];
        let decoded = decode_frame(&data, &mut state);
        assert_eq!(decoded.length_mismatch(), Some(7));
        let sample = decoded.sample().unwrap();
        assert_eq!(sample.raw_pulse_count, 0);
        assert_eq!(sample.unparsed_timestamp, [0xAB, 0xCD, 0x00, 0x00]);

        // Bare tag.
        let decoded = decode_frame(&TAG_ENERGY_SAMPLE, &mut state);
        assert_eq!(decoded.length_mismatch(), Some(5));
        assert_eq!(decoded.sample().unwrap().energy_wh, 0.0);
    }

    #[test]
    fn test_long_energy_frame_ignores_trailing_bytes() {
        let mut state = CalibrationState::new();
        state.set_impulse_rate(1000);

        let mut data = energy_frame([1, 2, 3, 4], 0x0102);
        data.extend_from_slice(&[0xFF, 0xFF]);
        let decoded = decode_frame(&data, &mut state);
        assert_eq!(decoded.length_mismatch(), Some(13));
        assert_eq!(decoded.sample().unwrap().raw_pulse_count, 0x0102);
    }

    #[test]
    fn test_unknown_tag() {
        let mut state = CalibrationState::new();
        let data = [0x00, 0x01, 0x03, 0x01, 0x00, 0x42];
        let decoded = decode_frame(&data, &mut state);
        assert_eq!(
            decoded,
            Decoded::Unknown {
                tag: &[0x00, 0x01, 0x03, 0x01, 0x00],
                payload: &[0x42],
            }
        );
        assert_eq!(decoded.length_mismatch(), None);
        assert!(!state.is_calibrated());
    }

    #[test]
    fn test_truncated_tag_is_unknown() {
        let mut state = CalibrationState::new();
        let decoded = decode_frame(&[0x00, 0x01, 0x02], &mut state);
        assert_eq!(
            decoded,
            Decoded::Unknown {
                tag: &[0x00, 0x01, 0x02],
                payload: &[],
            }
        );

        let decoded = decode_frame(&[], &mut state);
        assert!(matches!(decoded, Decoded::Unknown { .. }));
    }
}

/// Property-based tests for frame decoding.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Decoding arbitrary bytes never panics.
        #[test]
        fn decode_never_panics(data: Vec<u8>, rate in proptest::option::of(1u32..)) {
            let mut state = CalibrationState::new();
            if let Some(rate) = rate {
                state.set_impulse_rate(rate);
            }
            let _ = decode_frame(&data, &mut state);
        }

        /// Energy is pulses times the per-Wh scale factor.
        #[test]
        fn energy_matches_formula(rate in 1u32.., pulses: u16, ts: [u8; 4]) {
            let mut state = CalibrationState::new();
            state.set_impulse_rate(rate);

            let mut data = TAG_ENERGY_SAMPLE.to_vec();
            data.extend_from_slice(&ts);
            data.extend_from_slice(&pulses.to_be_bytes());

            let decoded = decode_frame(&data, &mut state);
            let sample = decoded.sample().copied().unwrap();
            prop_assert_eq!(sample.energy_wh, f64::from(pulses) * (f64::from(rate) / 1000.0));
            prop_assert_eq!(sample.raw_pulse_count, pulses);
            prop_assert_eq!(sample.unparsed_timestamp, ts);
        }

        /// Without calibration no sample is ever produced.
        #[test]
        fn uncalibrated_never_samples(body in proptest::collection::vec(any::<u8>(), 0..16)) {
            let mut state = CalibrationState::new();
            let mut data = TAG_ENERGY_SAMPLE.to_vec();
            data.extend_from_slice(&body);
            let decoded = decode_frame(&data, &mut state);
            prop_assert!(decoded.sample().is_none());
        }

        /// Calibration is last-write-wins.
        #[test]
        fn calibration_last_write_wins(rates in proptest::collection::vec(1u32.., 1..8)) {
            let mut state = CalibrationState::new();
            for rate in &rates {
                let mut data = TAG_IMPULSE_RATE.to_vec();
                data.extend_from_slice(&rate.to_be_bytes());
                decode_frame(&data, &mut state);
            }
            prop_assert_eq!(state.impulse_rate(), rates.last().copied());
        }

        /// Unknown tags leave calibration untouched and produce nothing.
        #[test]
        fn unknown_tags_are_discarded(tag: [u8; 5], payload: Vec<u8>) {
            prop_assume!(tag != TAG_ENERGY_SAMPLE && tag != TAG_IMPULSE_RATE);
            let mut state = CalibrationState::new();
            state.set_impulse_rate(1000);
            let mut data = tag.to_vec();
            data.extend_from_slice(&payload);
            let decoded = decode_frame(&data, &mut state);
            let is_unknown = matches!(decoded, Decoded::Unknown { .. });
            prop_assert!(is_unknown);
            prop_assert_eq!(state.impulse_rate(), Some(1000));
        }

        /// Energy frames of any other length still decode and are flagged.
        #[test]
        fn wrong_length_is_flagged(body in proptest::collection::vec(any::<u8>(), 0..24)) {
            prop_assume!(body.len() != 6);
            let mut state = CalibrationState::new();
            state.set_impulse_rate(1000);
            let mut data = TAG_ENERGY_SAMPLE.to_vec();
            data.extend_from_slice(&body);
            let decoded = decode_frame(&data, &mut state);
            prop_assert!(decoded.sample().is_some());
            prop_assert_eq!(decoded.length_mismatch(), Some(data.len()));
        }
    }
}
