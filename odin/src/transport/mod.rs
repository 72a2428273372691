//! Abstract bulk USB transport.
//!
//! The protocol engine never talks to a USB stack directly; it only ever
//! sees a [`Transport`]. Tests substitute [`crate::testing::MockTransport`]
//! for the real USB device.

use std::time::Duration;

use crate::error::Result;

#[cfg(feature = "usb")]
pub mod usb;

/// Samsung's USB vendor ID used for ODIN download-mode devices.
pub const VENDOR_ID: u16 = 0x04E8;

/// Bulk OUT endpoint address.
pub const ENDPOINT_OUT: u8 = 0x01;

/// Bulk IN endpoint address.
pub const ENDPOINT_IN: u8 = 0x81;

/// Default read burst size.
pub const READ_BURST_SIZE: usize = 0x1000;

/// Default read timeout for ordinary command/ack exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for per-sequence flash finalization acks.
pub const FLASH_FINALIZE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for factory-reset and T-Flash-enable acks.
pub const LONG_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// An abstract bulk byte channel to a device in download mode.
///
/// Implementations own the underlying handle exclusively; the session
/// manager above never interleaves a write with another write, or a read
/// with another read, so no internal locking is required.
pub trait Transport: Send {
    /// Write `data` to the bulk OUT endpoint.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `max_len` bytes from the bulk IN endpoint, bounded by
    /// `timeout`.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Read with the transport's default timeout.
    fn read_default(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.read(max_len, DEFAULT_TIMEOUT)
    }
}
