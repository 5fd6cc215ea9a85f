//! Update session - the device-side command loop.

use std::fmt;

use tracing::{debug, error, info, instrument, warn};

use crate::channel::ByteChannel;
use crate::config::DeviceLayout;
use crate::fault::{Fault, SessionError};
use crate::flash::{FlashEngine, FlashProgrammer, UnlockFlag};
use crate::notify::{Notification, NotificationSink};
use crate::protocol::constants::*;
use crate::protocol::{Command, RawBuffer, read_frame};
use crate::vector::{FinishReport, VectorPatcher};

/// Mutable state owned by one update session.
#[derive(Default)]
pub struct SessionContext {
    /// Receive buffer reused by every frame.
    pub buffer: RawBuffer,
    /// Captured application reset vector.
    pub vector: VectorPatcher,
    /// Only set while Finish relocates the vector.
    pub unlock: UnlockFlag,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lifecycle of a `Bootloader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    /// Terminal: the device sits halted until power cycled.
    Faulted(Fault),
    /// Finish completed and the device reset.
    Reset,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Running => write!(f, "RUNNING"),
            SessionState::Faulted(fault) => write!(f, "FAULTED({fault})"),
            SessionState::Reset => write!(f, "RESET"),
        }
    }
}

/// Receive-only update engine.
///
/// Reads frames from the channel and applies them to flash until Finish
/// resets the device or a fault halts it. Nothing is ever sent back.
pub struct Bootloader<C, F, N> {
    channel: C,
    flash: F,
    notifier: N,
    layout: DeviceLayout,
    ctx: SessionContext,
    state: SessionState,
    frames: usize,
}

impl<C: ByteChannel, F: FlashEngine, N: NotificationSink> Bootloader<C, F, N> {
    pub fn new(channel: C, flash: F, notifier: N, layout: DeviceLayout) -> Self {
        Self {
            channel,
            flash,
            notifier,
            layout,
            ctx: SessionContext::new(),
            state: SessionState::Idle,
            frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Frames processed since construction.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_parts(self) -> (C, F, N) {
        (self.channel, self.flash, self.notifier)
    }

    /// Run a complete session: announce entry, wait out the host's
    /// auto-baud preamble, then process frames until Finish.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<FinishReport, SessionError> {
        if let SessionState::Faulted(fault) = self.state {
            return Err(fault.into());
        }
        if self.state == SessionState::Reset {
            // A reset starts from power-on state.
            self.ctx = SessionContext::new();
        }
        self.state = SessionState::Running;
        self.notifier.notify(Notification::Entry);
        self.await_host()?;
        info!("Host synchronized, accepting frames");

        loop {
            if let Some(report) = self.step()? {
                info!(
                    frames = self.frames,
                    vector_restored = report.vector_restored,
                    config_bytes = report.config_written,
                    "Update finished, resetting device"
                );
                return Ok(report);
            }
        }
    }

    /// Receive and apply one frame.
    ///
    /// Returns the Finish report when the frame ended the session.
    pub fn step(&mut self) -> Result<Option<FinishReport>, SessionError> {
        if let SessionState::Faulted(fault) = self.state {
            return Err(fault.into());
        }
        self.state = SessionState::Running;
        match self.process_frame() {
            Ok(Some(report)) => {
                self.state = SessionState::Reset;
                Ok(Some(report))
            }
            Ok(None) => Ok(None),
            Err(SessionError::Fault(fault)) => {
                self.halt(fault);
                Err(fault.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Signal `fault` and enter the terminal state.
    pub(crate) fn halt(&mut self, fault: Fault) {
        error!(fault = %fault, frames = self.frames, "Device halted");
        self.notifier.notify(fault.notification());
        self.state = SessionState::Faulted(fault);
    }

    /// Skip the sync bytes and the single byte that ends them.
    fn await_host(&mut self) -> Result<(), SessionError> {
        let mut skipped = 0usize;
        loop {
            let b = self.channel.read_byte()?;
            if b != SYNC_BYTE {
                debug!(skipped, terminator = %format!("0x{:02X}", b), "Sync preamble done");
                return Ok(());
            }
            skipped += 1;
        }
    }

    fn process_frame(&mut self) -> Result<Option<FinishReport>, SessionError> {
        let frame = read_frame(&mut self.channel, &mut self.ctx.buffer)?;
        self.frames += 1;

        match Command::parse(frame)? {
            Command::Empty => {
                debug!("Empty frame ignored");
            }
            Command::Erase(blocks) => {
                if blocks.trailing() != 0 {
                    warn!(trailing = blocks.trailing(), "Partial erase descriptor ignored");
                }
                FlashProgrammer::new(&mut self.flash, &self.notifier, &self.layout, self.ctx.unlock)
                    .erase_blocks(blocks.iter());
            }
            Command::Write(req) => {
                let base = req.aligned_base();
                let short = req.data.len();
                let mut padded = [ERASED_BYTE; RESET_VECTOR_LEN];
                let data: &mut [u8] =
                    if base == RESET_VECTOR_ADDR && short > 0 && short < RESET_VECTOR_LEN {
                        padded[..short].copy_from_slice(req.data);
                        &mut padded
                    } else {
                        req.data
                    };
                self.ctx.vector.intercept(base, data, &self.layout);
                FlashProgrammer::new(&mut self.flash, &self.notifier, &self.layout, self.ctx.unlock)
                    .write_page(base, data);
            }
            Command::Finish { config } => {
                let report = self.ctx.vector.finish(
                    &mut self.flash,
                    &self.notifier,
                    &self.layout,
                    &mut self.ctx.unlock,
                    config,
                );
                return Ok(Some(report));
            }
            Command::Malformed { command, len } => {
                warn!(command = %format!("0x{:02X}", command), len, "Malformed payload ignored");
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, MockChannel};
    use crate::flash::{FlashOp, SimulatedFlash};
    use crate::notify::RecordingSink;
    use crate::protocol::command::{erase_payload, write_payload};
    use crate::protocol::{EraseBlock, encode_frame};
    use crate::vector::{VectorState, trampoline};

    type TestLoader = Bootloader<MockChannel, SimulatedFlash, RecordingSink>;

    fn loader() -> TestLoader {
        let layout = DeviceLayout::default();
        Bootloader::new(
            MockChannel::new(),
            SimulatedFlash::new(&layout),
            RecordingSink::new(),
            layout,
        )
    }

    fn send(bl: &mut TestLoader, command: u8, payload: &[u8]) {
        let wire = encode_frame(command, payload).unwrap();
        bl.channel_mut().queue(&wire);
    }

    #[test]
    fn test_erase_scenario() {
        let mut bl = loader();
        send(&mut bl, CMD_ERASE, &erase_payload(&[EraseBlock::new(0x0040, 2)]));
        assert!(bl.step().unwrap().is_none());
        assert_eq!(
            bl.flash().ops(),
            &[
                FlashOp::Erase { address: 0x0040 },
                FlashOp::Erase { address: 0x0080 }
            ]
        );
    }

    #[test]
    fn test_write_to_reset_vector_is_patched() {
        let mut bl = loader();
        let app_vector = [0x12, 0xEF, 0x34, 0xF0];
        send(&mut bl, CMD_WRITE, &write_payload(0x0000, &app_vector));
        bl.step().unwrap();

        let tramp = trampoline(0x7C00);
        assert_eq!(
            bl.flash().ops(),
            &[FlashOp::Write {
                address: 0x0000,
                data: tramp.to_vec()
            }]
        );
        assert_eq!(bl.context().vector.saved(), Some(app_vector));
        assert_eq!(bl.context().vector.state(), VectorState::Patched);
    }

    #[test]
    fn test_finish_relocates_vector() {
        let mut bl = loader();
        let app_vector = [0x12, 0xEF, 0x34, 0xF0];
        send(&mut bl, CMD_WRITE, &write_payload(0x0000, &app_vector));
        bl.step().unwrap();
        assert!(!bl.context().unlock.is_set());

        send(&mut bl, CMD_FINISH, &[]);
        let report = bl.step().unwrap().expect("finish ends the session");
        assert!(report.vector_restored);
        assert!(!bl.context().unlock.is_set());
        assert_eq!(bl.state(), SessionState::Reset);
        assert_eq!(bl.flash().read_vec(0x7FC0, 4), app_vector.to_vec());
        assert_eq!(bl.flash().read_vec(0x0000, 4), trampoline(0x7C00).to_vec());
        assert_eq!(bl.context().vector.state(), VectorState::Finalized);
    }

    #[test]
    fn test_second_vector_write_wins() {
        let mut bl = loader();
        send(&mut bl, CMD_WRITE, &write_payload(0x0000, &[1, 2, 3, 4]));
        send(&mut bl, CMD_WRITE, &write_payload(0x0000, &[5, 6, 7, 8]));
        send(&mut bl, CMD_FINISH, &[]);
        bl.step().unwrap();
        bl.step().unwrap();
        bl.step().unwrap();
        assert_eq!(bl.flash().read_vec(0x7FC0, 4), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_short_vector_write_is_padded() {
        let mut bl = loader();
        send(&mut bl, CMD_WRITE, &write_payload(0x0003, &[0xAB, 0xCD]));
        bl.step().unwrap();
        assert_eq!(bl.context().vector.saved(), Some([0xAB, 0xCD, 0xFF, 0xFF]));
        assert_eq!(bl.flash().read_vec(0x0000, 4), trampoline(0x7C00).to_vec());
    }

    #[test]
    fn test_writes_to_bootloader_are_blocked() {
        let mut bl = loader();
        send(&mut bl, CMD_ERASE, &erase_payload(&[EraseBlock::new(0x7C00, 16)]));
        send(&mut bl, CMD_WRITE, &write_payload(0x7C00, &[0u8; 32]));
        bl.step().unwrap();
        bl.step().unwrap();
        assert!(bl.flash().ops().is_empty());
        assert_eq!(bl.notifier().count(Notification::BeginFlash), 17);
    }

    #[test]
    fn test_unknown_command_halts() {
        let mut bl = loader();
        send(&mut bl, 0x7F, &[0x00]);
        send(&mut bl, CMD_FINISH, &[]);
        let err = bl.step().unwrap_err();
        assert_eq!(err.fault(), Some(Fault::UnknownCommand(0x7F)));
        assert_eq!(bl.state(), SessionState::Faulted(Fault::UnknownCommand(0x7F)));
        assert_eq!(bl.notifier().diagnostics(), vec![Notification::UnknownCommand]);

        // The queued Finish is never read.
        let remaining = bl.channel_mut().remaining();
        assert!(bl.step().is_err());
        assert!(bl.run().is_err());
        assert_eq!(bl.channel_mut().remaining(), remaining);
        assert!(bl.flash().ops().is_empty());
    }

    #[test]
    fn test_run_full_session() {
        let mut bl = loader();
        bl.channel_mut().queue(&[SYNC_BYTE; 16]);
        bl.channel_mut().queue(&[SYNC_END]);
        send(&mut bl, CMD_ERASE, &erase_payload(&[EraseBlock::new(0x0000, 1)]));
        send(&mut bl, CMD_WRITE, &write_payload(0x0000, &[0xAA, 0xEF, 0x00, 0xF0, 0x01, 0x02]));
        send(&mut bl, CMD_FINISH, &[0x08, 0x1E]);

        let report = bl.run().unwrap();
        assert_eq!(report.config_written, 2);
        assert_eq!(bl.frames(), 3);
        assert_eq!(bl.flash().read_vec(0x0004, 2), vec![0x01, 0x02]);
        assert_eq!(bl.flash().config_byte(0x30_0001), Some(0x1E));
        assert_eq!(bl.notifier().diagnostics(), vec![Notification::Entry]);
    }

    #[test]
    fn test_bad_checksum_halts_run() {
        let mut bl = loader();
        bl.channel_mut().queue(&[SYNC_BYTE, SYNC_END]);
        let mut wire = encode_frame(CMD_ERASE, &[0x00, 0x40, 0x01]).unwrap();
        wire[3] = 0x01;
        bl.channel_mut().queue(&wire);
        let err = bl.run().unwrap_err();
        assert_eq!(err.fault(), Some(Fault::ChecksumMismatch));
        assert_eq!(
            bl.notifier().diagnostics(),
            vec![Notification::Entry, Notification::BadChecksum]
        );
    }

    #[test]
    fn test_overrun_halts() {
        let mut bl = loader();
        bl.channel_mut().queue(&[STX, STX]);
        bl.channel_mut().queue(&[0x11; BUFFER_CAPACITY + 1]);
        bl.channel_mut().queue(&[ETX]);

        let err = bl.step().unwrap_err();
        assert_eq!(err.fault(), Some(Fault::BufferOverrun));
        assert_eq!(bl.state(), SessionState::Faulted(Fault::BufferOverrun));
        assert_eq!(bl.notifier().diagnostics(), vec![Notification::Overrun]);
        // Stops at the byte that did not fit.
        assert_eq!(bl.channel_mut().remaining(), 1);
        assert!(bl.flash().ops().is_empty());
    }

    #[test]
    fn test_unexpected_start_halts() {
        let mut bl = loader();
        bl.channel_mut().queue(&[STX, STX, CMD_ERASE, 0x00, STX, 0x40, 0x01, ETX]);
        send(&mut bl, CMD_FINISH, &[]);

        let err = bl.step().unwrap_err();
        assert_eq!(err.fault(), Some(Fault::UnexpectedStartOfFrame));
        assert_eq!(bl.state(), SessionState::Faulted(Fault::UnexpectedStartOfFrame));
        assert_eq!(bl.notifier().diagnostics(), vec![Notification::UnexpectedStart]);

        let remaining = bl.channel_mut().remaining();
        assert!(bl.step().is_err());
        assert_eq!(bl.channel_mut().remaining(), remaining);
        assert!(bl.flash().ops().is_empty());
    }

    #[test]
    fn test_channel_close_is_not_a_fault() {
        let mut bl = loader();
        match bl.step() {
            Err(SessionError::Channel(ChannelError::Closed)) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(bl.state(), SessionState::Running);
    }
}
