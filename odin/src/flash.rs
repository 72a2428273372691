//! Flash sequence planning and the abstract image source/progress traits.
//!
//! The actual wire transfer lives on [`crate::session::Session::flash`];
//! this module holds the parts of the flash engine that don't touch I/O at
//! all, so they can be tested by direct hand-calculation against the
//! scenarios in the original design.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;
use crate::frame::{CommandFrame, checked_i32};
use crate::pit::PartitionEntry;

/// An abstract byte source of known length, read in fixed-size chunks.
///
/// A short read at end-of-stream leaves the remainder of `buf` as it was
/// (callers zero it first), matching the padding semantics of the flash
/// protocol's last, possibly-aligned packet.
pub trait FlashSource {
    /// Total length of the stream.
    fn len(&self) -> u64;

    /// True if the stream is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes, returning the number actually read.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// A [`FlashSource`] backed by an in-memory buffer.
pub struct VecSource {
    data: Vec<u8>,
    pos: usize,
}

impl VecSource {
    /// Wrap `data` as a flash source.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl FlashSource for VecSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// A [`FlashSource`] backed by an open file.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    /// Open `path` and determine its length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl FlashSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        loop {
            match self.file.read(&mut buf[total..])? {
                0 => break,
                n => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
            }
        }
        Ok(total)
    }
}

/// Observer invoked as a flash progresses.
///
/// The engine calls this after every acknowledged packet with the
/// in-sequence completion percentage, and once more per sequence with
/// exactly `100.0`.
pub trait ProgressSink {
    /// Report progress, as a percentage of the current sequence.
    fn on_progress(&mut self, percent: f64);
}

impl<F: FnMut(f64)> ProgressSink for F {
    fn on_progress(&mut self, percent: f64) {
        self(percent);
    }
}

/// A no-op progress sink.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&mut self, _percent: f64) {}
}

/// The pre-flight plan for one sequence of a flash transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceInfo {
    /// Zero-based index of this sequence.
    pub index: usize,
    /// True iff this is the final sequence.
    pub is_last: bool,
    /// The actual (unpadded) byte count carried by this sequence.
    pub real_size: u64,
    /// `real_size` rounded up to a multiple of `flash_packet_size`.
    pub aligned_size: u64,
    /// `aligned_size / flash_packet_size`, i.e. number of packets to send.
    pub parts: u64,
}

/// Compute the sequence plan for an image of `total_len` bytes, given the
/// session's negotiated `flash_packet_size` and `sequence_size`.
///
/// This mirrors the source's arithmetic exactly, except `is_last` is
/// computed directly from the loop index rather than carried as mutable
/// state from a previous iteration (see the design notes on the source's
/// uninitialized-`last` bug).
#[must_use]
pub fn plan_sequences(
    total_len: u64,
    flash_packet_size: u64,
    sequence_size: u64,
) -> Vec<SequenceInfo> {
    if total_len == 0 {
        return Vec::new();
    }

    let sequence = flash_packet_size * sequence_size;
    let mut sequences = total_len / sequence;
    let mut last_sequence = total_len % sequence;
    if last_sequence == 0 {
        last_sequence = sequence;
    } else {
        sequences += 1;
    }

    (0..sequences)
        .map(|i| {
            let is_last = i + 1 == sequences;
            let real_size = if is_last { last_sequence } else { sequence };
            let remainder = real_size % flash_packet_size;
            let aligned_size = if remainder == 0 {
                real_size
            } else {
                real_size + (flash_packet_size - remainder)
            };
            SequenceInfo {
                index: i as usize,
                is_last,
                real_size,
                aligned_size,
                parts: aligned_size / flash_packet_size,
            }
        })
        .collect()
}

/// Build the per-sequence finalization frame (opcode `0x66`, sub `0x03`).
///
/// Modem partitions (`binary_type == 1`) use a shorter frame that omits
/// `partition_id`/`efs_clear`/`update_bootloader`.
///
/// Fails rather than silently truncating if `real_size` doesn't fit in the
/// wire's signed 32-bit field (see [`checked_i32`]).
pub fn build_finalize_frame(
    entry: &PartitionEntry,
    real_size: u64,
    is_last: bool,
    efs_clear: bool,
    update_bootloader: bool,
) -> Result<CommandFrame> {
    let mut frame = CommandFrame::with_opcode(0x66, 0x03);
    let real_size = checked_i32(real_size, "sequence real size")?;
    if entry.binary_type == 1 {
        frame
            .set_i32(8, 0x01)
            .set_i32(12, real_size)
            .set_i32(16, entry.binary_type)
            .set_i32(20, entry.device_type)
            .set_i32(24, i32::from(is_last));
    } else {
        frame
            .set_i32(8, 0x00)
            .set_i32(12, real_size)
            .set_i32(16, entry.binary_type)
            .set_i32(20, entry.device_type)
            .set_i32(24, entry.partition_id)
            .set_i32(28, i32::from(is_last))
            .set_i32(32, i32::from(efs_clear))
            .set_i32(36, i32::from(update_bootloader));
    }
    Ok(frame)
}
