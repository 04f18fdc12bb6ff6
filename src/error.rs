//! Error types for the bm6-ble library.

use thiserror::Error;
use uuid::Uuid;

/// The main error type for bm6-ble operations.
///
/// Codec, connection and protocol failures are absorbed by the connection
/// driver and surface as events; only lifecycle misuse reaches the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The hub is already running.
    #[error("hub already running")]
    AlreadyRunning,

    /// The BLE link was lost together with a failed connection task.
    #[error("BLE link lost with the connection task")]
    LinkLost,
}

/// Frame-specific errors.
///
/// These never leave the connection driver: a frame that fails to decode is
/// dropped and the session continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Frame shorter than the revision's minimum size.
    #[error("frame too short: need at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },

    /// Leading marker bytes do not match.
    #[error("bad frame marker")]
    BadMarker,

    /// Declared or received length is not the revision's frame size.
    #[error("bad frame length: declared {declared} bytes, got {got}")]
    BadLength { declared: usize, got: usize },

    /// Checksum over the payload does not match.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    ChecksumMismatch { expected: u8, got: u8 },
}

/// BLE stack level failures. These trigger backoff and retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// A link operation did not complete in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The BLE stack reported a failure.
    #[error("link failure: {message}")]
    Link { message: String },

    /// Operation requires an established link.
    #[error("not connected")]
    NotConnected,

    /// The link's event channel is gone.
    #[error("link closed")]
    Closed,
}

impl ConnectionError {
    /// Creates a link failure from any displayable stack error.
    pub fn link(err: impl std::fmt::Display) -> Self {
        Self::Link {
            message: err.to_string(),
        }
    }
}

/// The device is reachable but does not speak the expected protocol.
///
/// Fatal for the session: no retry is scheduled until the host signals the
/// device as available again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The vendor service is absent.
    #[error("service {service} not found")]
    ServiceMissing { service: Uuid },

    /// A required characteristic is absent.
    #[error("characteristic {characteristic} not found in service {service}")]
    CharacteristicMissing { service: Uuid, characteristic: Uuid },
}

/// Result type alias for bm6-ble operations.
pub type Result<T> = std::result::Result<T, Error>;
