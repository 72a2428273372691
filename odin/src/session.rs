//! The session manager: handshake, sizing negotiation, PIT retrieval, and
//! the flash transfer itself.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::flash::{self, FlashSource, ProgressSink};
use crate::frame::{self, CommandFrame, decode_u32_at};
use crate::pit::{self, Pit};
use crate::transport::{self, Transport};

/// A handle to a device that has been opened over a [`Transport`] and
/// (optionally) taken through the ODIN handshake.
///
/// `Session` owns its transport exclusively. `reboot`/`shutdown` drop it
/// and clear the partition table, matching the source's "global mutable
/// state is reset on power operations" behavior.
pub struct Session<T: Transport> {
    transport: Option<T>,
    session_started: bool,
    t_flash_enabled: bool,
    flash_packet_size: u32,
    sequence_size: u32,
    pit: Pit,
    default_timeout: Duration,
}

impl<T: Transport> Session<T> {
    /// Wrap an already-opened transport. No I/O happens until
    /// [`Session::begin_session`] is called.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
            session_started: false,
            t_flash_enabled: false,
            flash_packet_size: 0,
            sequence_size: 0,
            pit: Pit::default(),
            default_timeout: transport::DEFAULT_TIMEOUT,
        }
    }

    /// Override the read timeout used for ordinary command acknowledgements
    /// (handshake, sizing negotiation, PIT blocks, per-packet flash acks).
    ///
    /// Does not affect the fixed 120s finalize or 600s long-operation
    /// timeouts; those are protocol-mandated minimums for slow device-side
    /// work, not "defaults" a caller should be shortening.
    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    /// Whether a session has been started.
    #[must_use]
    pub fn is_session_started(&self) -> bool {
        self.session_started
    }

    /// Whether T-Flash has been enabled on this device.
    #[must_use]
    pub fn t_flash_enabled(&self) -> bool {
        self.t_flash_enabled
    }

    /// The negotiated per-packet size, or 0 before `begin_session`.
    #[must_use]
    pub fn flash_packet_size(&self) -> u32 {
        self.flash_packet_size
    }

    /// The negotiated packets-per-sequence count, or 0 before
    /// `begin_session`.
    #[must_use]
    pub fn sequence_size(&self) -> u32 {
        self.sequence_size
    }

    /// The most recently fetched partition table.
    #[must_use]
    pub fn pit(&self) -> &Pit {
        &self.pit
    }

    fn guarded_write(&mut self, data: &[u8]) -> Result<()> {
        if !self.session_started {
            return Err(Error::NoSession);
        }
        let transport = self.transport.as_mut().ok_or(Error::NoSession)?;
        transport.write(data)
    }

    fn guarded_read(&mut self, max_len: usize, timeout: std::time::Duration) -> Result<Vec<u8>> {
        if !self.session_started {
            return Err(Error::NoSession);
        }
        let transport = self.transport.as_mut().ok_or(Error::NoSession)?;
        transport.read(max_len, timeout)
    }

    fn command_ack(&mut self, frame: &CommandFrame) -> Result<Vec<u8>> {
        self.guarded_write(frame.as_bytes())?;
        self.guarded_read(transport::READ_BURST_SIZE, self.default_timeout)
    }

    /// Begin an ODIN session: handshake, bootloader version probe, and
    /// packet-size negotiation.
    ///
    /// The source sets `session_started` *before* the handshake write,
    /// which lets that very write pass what would otherwise be a
    /// `NoSession` gate. We preserve that: the flag flips true first, and
    /// is rolled back only if the handshake itself fails outright (not on
    /// a mismatched reply, which the source also does not roll back).
    ///
    /// If `resume` is true, the `"ODIN"`/`"LOKE"` exchange is skipped and
    /// only the version probe and sizing steps run.
    pub fn begin_session(&mut self, resume: bool) -> Result<()> {
        self.session_started = true;

        if !resume {
            let handshake_result = self
                .guarded_write(b"ODIN")
                .and_then(|()| self.guarded_read(transport::READ_BURST_SIZE, self.default_timeout));

            // The original only catches a timeout around this exchange
            // (`USBTimeoutError`); any other transport failure propagates
            // as-is and leaves `session_started` set, since its `except`
            // clause is never entered. Preserve that: roll back only on a
            // timeout, let anything else surface unchanged.
            let reply = match handshake_result {
                Ok(reply) => reply,
                Err(Error::Timeout(msg)) => {
                    self.session_started = false;
                    return Err(Error::SessionStartError(msg));
                }
                Err(err) => return Err(err),
            };

            if reply != b"LOKE" {
                return Err(Error::HandshakeMismatch(reply));
            }
            debug!("handshake complete");
        }

        let mut probe = CommandFrame::with_opcode(0x64, 0x00);
        probe.set_i32(8, 0xFFFF);
        let reply = self.command_ack(&probe)?;
        let version = *reply
            .get(6)
            .ok_or_else(|| Error::ProtocolError("version probe reply too short".into()))?;
        debug!("bootloader version: {version}");

        let (flash_packet_size, sequence_size) = if version == 0 || version == 1 {
            (131_072, 240)
        } else {
            (1_048_576, 30)
        };
        self.flash_packet_size = flash_packet_size;
        self.sequence_size = sequence_size;

        let mut size_frame = CommandFrame::with_opcode(0x64, 0x05);
        #[allow(clippy::cast_possible_wrap)]
        size_frame.set_i32(8, flash_packet_size as i32);
        self.command_ack(&size_frame)?;

        info!(
            "session started: flash_packet_size={flash_packet_size}, sequence_size={sequence_size}"
        );
        Ok(())
    }

    /// End the current ODIN session. Does not close the transport.
    pub fn end_session(&mut self) -> Result<()> {
        let frame = CommandFrame::with_opcode(0x67, 0x00);
        self.command_ack(&frame)?;
        Ok(())
    }

    /// Reboot the device. Performs `end_session` first, then drops the
    /// transport and clears the partition table.
    pub fn reboot(&mut self) -> Result<()> {
        self.end_session()?;
        let frame = CommandFrame::with_opcode(0x67, 0x01);
        self.command_ack(&frame)?;
        self.transport = None;
        self.pit = Pit::default();
        self.session_started = false;
        Ok(())
    }

    /// Shut down the device. Not supported on all hardware. Drops the
    /// transport and clears the partition table, like `reboot`.
    pub fn shutdown(&mut self) -> Result<()> {
        let frame = CommandFrame::with_opcode(0x67, 0x03);
        self.command_ack(&frame)?;
        self.transport = None;
        self.pit = Pit::default();
        self.session_started = false;
        Ok(())
    }

    /// Factory reset (erase userdata). Allows up to 600s for the device to
    /// respond.
    pub fn factory_reset(&mut self) -> Result<()> {
        let frame = CommandFrame::with_opcode(0x64, 0x07);
        self.guarded_write(frame.as_bytes())?;
        self.guarded_read(transport::READ_BURST_SIZE, transport::LONG_OPERATION_TIMEOUT)?;
        Ok(())
    }

    /// Enable T-Flash mode. Allows up to 600s for the device to respond.
    pub fn enable_tflash(&mut self) -> Result<()> {
        let frame = CommandFrame::with_opcode(0x64, 0x08);
        self.guarded_write(frame.as_bytes())?;
        self.guarded_read(transport::READ_BURST_SIZE, transport::LONG_OPERATION_TIMEOUT)?;
        self.t_flash_enabled = true;
        Ok(())
    }

    /// Fetch and parse the PIT from the device, storing it for subsequent
    /// `flash` calls.
    pub fn get_pit(&mut self) -> Result<&Pit> {
        let init = CommandFrame::with_opcode(0x65, 0x01);
        let reply = self.command_ack(&init)?;
        let size = decode_u32_at(&reply, 4)
            .ok_or_else(|| Error::ProtocolError("PIT size reply too short".into()))?
            as usize;
        let blocks = size.div_ceil(pit::PIT_BLOCK_SIZE);
        debug!("PIT size is {size}, {blocks} total blocks");

        let mut pit_buf = vec![0u8; size];
        for i in 0..blocks {
            let mut block_frame = CommandFrame::with_opcode(0x65, 0x02);
            #[allow(clippy::cast_possible_wrap)]
            block_frame.set_i32(8, i as i32);
            let chunk = self.command_ack(&block_frame)?;
            let start = i * pit::PIT_BLOCK_SIZE;
            let end = (start + chunk.len()).min(pit_buf.len());
            pit_buf[start..end].copy_from_slice(&chunk[..end - start]);
        }

        // Tolerate a spurious ZLP/timeout here before the finish frame;
        // the device sometimes emits one extra packet mid-sync.
        match self.guarded_read(transport::READ_BURST_SIZE, self.default_timeout) {
            Ok(_) | Err(Error::TransportError(_)) | Err(Error::Timeout(_)) => {}
            Err(other) => return Err(other),
        }

        let finish = CommandFrame::with_opcode(0x65, 0x03);
        self.command_ack(&finish)?;

        self.pit = pit::parse_pit(&pit_buf)?;
        Ok(&self.pit)
    }

    /// Upload `source` to the named partition.
    ///
    /// If the partition table hasn't been fetched yet, it is fetched
    /// first. Fails with `UnknownPartition` if `partition_name` isn't in
    /// the table.
    pub fn flash(
        &mut self,
        source: &mut dyn FlashSource,
        partition_name: &str,
        progress: &mut dyn ProgressSink,
        update_bootloader: bool,
        efs_clear: bool,
    ) -> Result<()> {
        if self.pit.partitions.is_empty() {
            self.get_pit()?;
        }
        let entry = self
            .pit
            .partitions
            .get(partition_name)
            .cloned()
            .ok_or_else(|| Error::UnknownPartition(partition_name.to_string()))?;

        let length = source.len();

        let mut total_frame = CommandFrame::with_opcode(0x64, 0x02);
        total_frame.set_i32(8, frame::checked_i32(length, "image length")?);
        self.command_ack(&total_frame)?;

        let begin_frame = CommandFrame::with_opcode(0x66, 0x00);
        self.command_ack(&begin_frame)?;

        let plan = flash::plan_sequences(
            length,
            u64::from(self.flash_packet_size),
            u64::from(self.sequence_size),
        );

        for seq in &plan {
            let mut header_frame = CommandFrame::with_opcode(0x66, 0x02);
            header_frame.set_i32(8, frame::checked_i32(seq.aligned_size, "aligned sequence size")?);
            self.command_ack(&header_frame)?;

            let mut buf = vec![0u8; self.flash_packet_size as usize];
            for j in 0..seq.parts {
                buf.iter_mut().for_each(|b| *b = 0);
                source.read_into(&mut buf)?;
                self.guarded_write(&buf)?;
                let ack = self.guarded_read(transport::READ_BURST_SIZE, self.default_timeout)?;
                if let Some(&idx) = ack.get(4) {
                    if u64::from(idx) != j {
                        warn!("bootloader index is wrong: expected {j}, got {idx}");
                    }
                }
                #[allow(clippy::cast_precision_loss)]
                progress.on_progress((j as f64 / seq.parts as f64) * 100.0);
            }
            progress.on_progress(100.0);

            let finalize = flash::build_finalize_frame(
                &entry,
                seq.real_size,
                seq.is_last,
                efs_clear,
                update_bootloader,
            )?;
            self.guarded_write(finalize.as_bytes())?;
            self.guarded_read(transport::READ_BURST_SIZE, transport::FLASH_FINALIZE_TIMEOUT)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn version_probe_frame() -> CommandFrame {
        let mut frame = CommandFrame::with_opcode(0x64, 0x00);
        frame.set_i32(8, 0xFFFF);
        frame
    }

    fn size_frame(size: i32) -> CommandFrame {
        let mut frame = CommandFrame::with_opcode(0x64, 0x05);
        frame.set_i32(8, size);
        frame
    }

    #[test]
    fn scenario_s1_handshake_happy_path() {
        let transport = MockTransport::new()
            .expect_write(b"ODIN".to_vec())
            .reply(b"LOKE".to_vec())
            .expect_write(version_probe_frame().as_bytes().to_vec())
            .reply(vec![0, 0, 0, 0, 0, 0, 0x02, 0])
            .expect_write(size_frame(1_048_576).as_bytes().to_vec())
            .reply(vec![0u8; 8]);

        let mut session = Session::new(transport);
        session.begin_session(false).unwrap();

        assert!(session.is_session_started());
        assert_eq!(session.flash_packet_size(), 1_048_576);
        assert_eq!(session.sequence_size(), 30);
        assert!(session.transport.as_ref().unwrap().is_exhausted());
    }

    #[test]
    fn scenario_s2_handshake_mismatch() {
        let transport = MockTransport::new()
            .expect_write(b"ODIN".to_vec())
            .reply(b"XXXX".to_vec());

        let mut session = Session::new(transport);
        let err = session.begin_session(false).unwrap_err();
        assert!(matches!(err, Error::HandshakeMismatch(_)));
    }

    #[test]
    fn handshake_timeout_rolls_back_session_started() {
        let transport = MockTransport::new()
            .expect_write(b"ODIN".to_vec())
            .fail_read(Error::Timeout("no reply".into()));

        let mut session = Session::new(transport);
        let err = session.begin_session(false).unwrap_err();
        assert!(matches!(err, Error::SessionStartError(_)));
        assert!(!session.is_session_started());
    }

    #[test]
    fn handshake_non_timeout_error_propagates_without_rollback() {
        let transport = MockTransport::new()
            .expect_write(b"ODIN".to_vec())
            .fail_read(Error::TransportError("usb disconnected".into()));

        let mut session = Session::new(transport);
        let err = session.begin_session(false).unwrap_err();
        assert!(matches!(err, Error::TransportError(_)));
        assert!(session.is_session_started());
    }

    #[test]
    fn resume_skips_handshake_exchange() {
        let transport = MockTransport::new()
            .expect_write(version_probe_frame().as_bytes().to_vec())
            .reply(vec![0, 0, 0, 0, 0, 0, 0x00, 0])
            .expect_write(size_frame(131_072).as_bytes().to_vec())
            .reply(vec![0u8; 8]);

        let mut session = Session::new(transport);
        session.begin_session(true).unwrap();
        assert_eq!(session.flash_packet_size(), 131_072);
        assert_eq!(session.sequence_size(), 240);
    }

    #[test]
    fn property_gate_rejects_io_without_session() {
        let transport = MockTransport::new();
        let mut session = Session::new(transport);
        let err = session.guarded_write(b"ODIN").unwrap_err();
        assert!(matches!(err, Error::NoSession));
        let err = session
            .guarded_read(transport::READ_BURST_SIZE, transport::DEFAULT_TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, Error::NoSession));
    }

    struct RecordingTransport {
        replies: std::collections::VecDeque<Vec<u8>>,
        read_timeouts: Vec<Duration>,
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, _max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
            self.read_timeouts.push(timeout);
            self.replies.pop_front().ok_or(Error::NoSession)
        }
    }

    #[test]
    fn set_default_timeout_is_used_for_ordinary_acks_not_finalize() {
        let transport = RecordingTransport {
            replies: std::collections::VecDeque::from(vec![
                b"LOKE".to_vec(),
                vec![0, 0, 0, 0, 0, 0, 0x02, 0],
                vec![0u8; 8],
            ]),
            read_timeouts: Vec::new(),
        };
        let custom = Duration::from_millis(250);
        let mut session = Session::new(transport);
        session.set_default_timeout(custom);
        session.begin_session(false).unwrap();

        let timeouts = &session.transport.as_ref().unwrap().read_timeouts;
        assert!(timeouts.iter().all(|&t| t == custom));
        assert_ne!(custom, transport::DEFAULT_TIMEOUT);
    }

    #[test]
    fn reboot_clears_transport_and_partitions() {
        let transport = MockTransport::new()
            .expect_write(CommandFrame::with_opcode(0x67, 0x00).as_bytes().to_vec())
            .reply(vec![0u8; 8])
            .expect_write(CommandFrame::with_opcode(0x67, 0x01).as_bytes().to_vec())
            .reply(vec![0u8; 8]);

        let mut session = Session::new(transport);
        session.session_started = true;
        session.reboot().unwrap();

        assert!(session.transport.is_none());
        assert!(session.pit().partitions.is_empty());
        assert!(!session.is_session_started());
    }
}
