//! Error types for frame parsing in emerald-types.

use thiserror::Error;

/// Errors that can occur when parsing advisor frames.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in emerald-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The frame is too short to carry what it claims to carry.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// A field decoded to a value outside its valid range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using emerald-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
