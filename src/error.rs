//! Error types for the mipot driver library.

use thiserror::Error;

use crate::session::SessionState;

/// The main error type for driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// No response from the module within the request timeout.
    #[error("no response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Operation attempted in a session state that does not allow it.
    #[error("{operation} is not valid while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The module rejected a configuration write.
    #[error("configuration rejected: {reason}")]
    Config { reason: String },

    /// Join handshake failed or was rejected.
    #[error("join failed: {0}")]
    Join(#[from] JoinFailure),

    /// Uplink was not accepted or not acknowledged.
    #[error("uplink failed: {0}")]
    Transmit(#[from] TransmitFailure),

    /// Sensor payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    /// Invalid EUI format.
    #[error("invalid EUI: {reason}")]
    InvalidEui { reason: String },

    /// Invalid application key format.
    #[error("invalid application key: {reason}")]
    InvalidKey { reason: String },

    /// Malformed or unexpected reply from the module.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl Error {
    /// Returns true for transport-level hiccups that warrant re-sending the
    /// command unchanged (read timeout, corrupted frame). Semantic rejections
    /// are never transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Frame(FrameError::ChecksumMismatch { .. } | FrameError::Truncated { .. })
        )
    }
}

/// Frame-specific errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame shorter than the length byte announced.
    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Frame checksum did not sum to zero.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Reasons a join attempt can fail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JoinFailure {
    /// The module rejected the join command parameters.
    #[error("module rejected the join parameters")]
    InvalidParameter,

    /// The module was busy and did not start the join.
    #[error("module busy, join not started")]
    ModuleBusy,

    /// The network rejected the join request.
    #[error("join request rejected by the network")]
    Rejected,

    /// The module MAC layer reported an error.
    #[error("MAC error during join")]
    MacError,

    /// The module never reported a joined state within the join window.
    #[error("module did not join within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Reasons an uplink can fail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransmitFailure {
    /// The module was busy with a previous operation.
    #[error("module busy")]
    Busy,

    /// The module has no active network session.
    #[error("module not activated")]
    NotActivated,

    /// All channels are blocked by duty-cycle limits.
    #[error("channel blocked by duty cycle")]
    DutyCycle,

    /// The frame port is outside the supported range.
    #[error("frame port not supported")]
    PortNotSupported,

    /// The payload is longer than the current data rate allows.
    #[error("payload length not supported")]
    LengthNotSupported,

    /// The module is in silent state and may not transmit.
    #[error("module in silent state")]
    Silent,

    /// A confirmed uplink received no acknowledgment from the network.
    #[error("no acknowledgment received")]
    NoAck,

    /// The module reported a transmission failure.
    #[error("transmission failed")]
    Failed,

    /// No transmit indication arrived within the uplink timeout.
    #[error("no transmit indication within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The module returned a status code this library does not know.
    #[error("unknown transmit status 0x{0:02X}")]
    Unknown(u8),
}

/// Payload encoding errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodingError {
    /// The encoded payload would exceed the maximum uplink size.
    #[error("encoded payload too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// A reading's value cannot be represented at its type's scale.
    #[error("{kind} value out of range on channel {channel}")]
    OutOfRange { kind: &'static str, channel: u8 },
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;
