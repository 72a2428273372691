//! Error types for odin.

use std::io;
use thiserror::Error;

/// Result type for odin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for odin operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No device matching the expected vendor ID was found.
    #[error("device not found or not in download mode")]
    DeviceNotFound,

    /// I/O was attempted before a session was started.
    #[error("no session started")]
    NoSession,

    /// The handshake read timed out.
    #[error("session start failed: {0}")]
    SessionStartError(String),

    /// The device's handshake reply was not `"LOKE"`.
    #[error("handshake mismatch: expected LOKE, got {0:?}")]
    HandshakeMismatch(Vec<u8>),

    /// The PIT magic number did not match.
    #[error("PIT magic mismatch: expected {expected:#010x}, got {actual:#010x}")]
    MagicMismatch {
        /// Expected magic value.
        expected: u32,
        /// Magic value actually read.
        actual: u32,
    },

    /// Malformed bytes on the wire (truncated response, bad UTF-8, ...).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A read exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    TransportError(String),

    /// `flash` was asked for a partition name absent from the PIT.
    #[error("unknown partition: {0}")]
    UnknownPartition(String),

    /// Low-level I/O error (file access for image sources, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Low-level USB error, bridged from `rusb`.
    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}
