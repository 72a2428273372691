//! Command frame codec.
//!
//! Every non-handshake command the host sends to the device is a fixed
//! 1024-byte, zero-padded buffer with signed 32-bit little-endian integer
//! fields at well-known offsets.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Size in bytes of every outbound command frame.
pub const FRAME_SIZE: usize = 1024;

/// A 1024-byte zeroed command buffer with LE i32 fields set at arbitrary
/// byte offsets.
#[derive(Clone)]
pub struct CommandFrame {
    buf: [u8; FRAME_SIZE],
}

impl CommandFrame {
    /// Build a new, all-zero frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: [0u8; FRAME_SIZE],
        }
    }

    /// Write a signed 32-bit little-endian integer at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4 > FRAME_SIZE`; all call sites in this crate use
    /// fixed, in-range offsets from the wire format.
    pub fn set_i32(&mut self, offset: usize, value: i32) -> &mut Self {
        LittleEndian::write_i32(&mut self.buf[offset..offset + 4], value);
        self
    }

    /// Convenience constructor: an opcode/sub-opcode pair at offsets 0/4.
    #[must_use]
    pub fn with_opcode(opcode: i32, sub: i32) -> Self {
        let mut frame = Self::new();
        frame.set_i32(0, opcode).set_i32(4, sub);
        frame
    }

    /// The full 1024-byte wire representation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.buf
    }
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Read an unsigned 32-bit little-endian integer at `offset`.
///
/// Returns `None` if the buffer is too short, letting callers turn this
/// into a `ProtocolError` with context.
#[must_use]
pub fn decode_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    if buf.len() < offset + 4 {
        return None;
    }
    Some(LittleEndian::read_u32(&buf[offset..offset + 4]))
}

/// Narrow a wire-bound length to a signed 32-bit integer, failing loudly
/// instead of silently wrapping.
///
/// The original's `struct.pack_into("i", …)` raises `struct.error` on an
/// out-of-range value rather than sending a truncated length to hardware
/// mid-flash; this is the same check expressed as a `Result`.
pub fn checked_i32(value: u64, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        Error::ProtocolError(format!(
            "{what} ({value}) exceeds the protocol's signed 32-bit frame field"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_exactly_1024_bytes_and_zero_padded() {
        let frame = CommandFrame::with_opcode(0x64, 0x00);
        assert_eq!(frame.as_bytes().len(), FRAME_SIZE);
        assert_eq!(frame.as_bytes()[8..], [0u8; FRAME_SIZE - 8]);
    }

    #[test]
    fn set_i32_writes_little_endian() {
        let mut frame = CommandFrame::new();
        frame.set_i32(8, 0xFFFF);
        assert_eq!(&frame.as_bytes()[8..12], &[0xFF, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn version_probe_frame_matches_expected_bytes() {
        let mut frame = CommandFrame::with_opcode(0x64, 0x00);
        frame.set_i32(8, 0xFFFF);
        assert_eq!(
            &frame.as_bytes()[0..12],
            &[0x64, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 0, 0]
        );
    }

    #[test]
    fn pktsize_frame_matches_expected_bytes() {
        let mut frame = CommandFrame::with_opcode(0x64, 0x05);
        frame.set_i32(8, 1_048_576);
        assert_eq!(
            &frame.as_bytes()[0..12],
            &[0x64, 0, 0, 0, 0x05, 0, 0, 0, 0, 0, 0x10, 0]
        );
    }

    #[test]
    fn decode_u32_at_out_of_bounds_is_none() {
        let buf = [0u8; 4];
        assert_eq!(decode_u32_at(&buf, 2), None);
    }

    #[test]
    fn decode_u32_at_reads_little_endian() {
        let buf = [0x00, 0x00, 0x10, 0x00];
        assert_eq!(decode_u32_at(&buf, 0), Some(0x0010_0000));
    }

    #[test]
    fn checked_i32_accepts_values_in_range() {
        assert_eq!(checked_i32(0, "x").unwrap(), 0);
        assert_eq!(checked_i32(i32::MAX as u64, "x").unwrap(), i32::MAX);
    }

    #[test]
    fn checked_i32_rejects_values_that_would_wrap() {
        let err = checked_i32(i32::MAX as u64 + 1, "image length").unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }
}
