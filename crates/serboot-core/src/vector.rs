//! Reset vector relocation.
//!
//! The bootloader owns address 0 permanently. When the host writes the
//! application's reset instruction there, the four bytes are captured and
//! replaced with a `GOTO` into the bootloader. Finish then stores the
//! captured instruction in the relocation slot, which the bootloader's
//! startup code jumps to once no host is present.
//!
//! ```text
//!  0x0000  GOTO bootloader_base      (trampoline)
//!  ...     application
//!  base    bootloader
//!  slot    application reset instruction (relocated)
//! ```

use std::fmt;

use tracing::{info, warn};

use crate::config::DeviceLayout;
use crate::flash::{FlashEngine, FlashProgrammer, UnlockFlag};
use crate::notify::NotificationSink;
use crate::protocol::constants::*;

/// Relocation progress within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorState {
    /// Address 0 has not been written this session.
    #[default]
    Normal,
    /// Trampoline written; application vector held in memory.
    Patched,
    /// Vector relocated and configuration written; device resets.
    Finalized,
}

impl fmt::Display for VectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorState::Normal => write!(f, "NORMAL"),
            VectorState::Patched => write!(f, "PATCHED"),
            VectorState::Finalized => write!(f, "FINALIZED"),
        }
    }
}

/// PIC18 `GOTO target` as it sits in program memory.
pub fn trampoline(target: u32) -> [u8; RESET_VECTOR_LEN] {
    let word = target / 2;
    [
        (word & 0xFF) as u8,
        GOTO_OPCODE_LO,
        ((word >> 8) & 0xFF) as u8,
        GOTO_OPCODE_HI | ((word >> 16) & 0x0F) as u8,
    ]
}

/// What Finish did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishReport {
    pub vector_restored: bool,
    pub config_written: usize,
}

/// Tracks the captured application vector across a session.
#[derive(Debug, Default)]
pub struct VectorPatcher {
    state: VectorState,
    saved: Option<[u8; RESET_VECTOR_LEN]>,
}

impl VectorPatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> VectorState {
        self.state
    }

    pub fn saved(&self) -> Option<[u8; RESET_VECTOR_LEN]> {
        self.saved
    }

    fn goto_state(&mut self, new_state: VectorState) {
        if self.state != new_state {
            info!(from = %self.state, to = %new_state, "Vector state transition");
        }
        self.state = new_state;
    }

    /// Patch an outgoing write in place.
    ///
    /// `data` must hold at least the four vector bytes when `base` is the
    /// reset vector address. Returns whether the write was patched. A
    /// second write to address 0 replaces the earlier capture.
    pub fn intercept(&mut self, base: u32, data: &mut [u8], layout: &DeviceLayout) -> bool {
        if base != RESET_VECTOR_ADDR || data.len() < RESET_VECTOR_LEN {
            return false;
        }
        let head = &mut data[..RESET_VECTOR_LEN];
        let mut original = [0u8; RESET_VECTOR_LEN];
        original.copy_from_slice(head);
        if let Some(prev) = self.saved.replace(original) {
            warn!(previous = ?prev, current = ?original, "Reset vector captured again, keeping latest");
        }
        head.copy_from_slice(&trampoline(layout.bootloader_base));
        self.goto_state(VectorState::Patched);
        true
    }

    /// Relocate the captured vector and write the configuration bytes.
    ///
    /// The unlock flag is raised only around the relocation write.
    pub fn finish<F, N>(
        &mut self,
        engine: &mut F,
        notifier: &N,
        layout: &DeviceLayout,
        unlock: &mut UnlockFlag,
        config: &[u8],
    ) -> FinishReport
    where
        F: FlashEngine + ?Sized,
        N: NotificationSink + ?Sized,
    {
        let vector = self.saved.take();
        match vector {
            Some(vector) => {
                unlock.set();
                FlashProgrammer::new(&mut *engine, notifier, layout, *unlock)
                    .write_rebased_vector(vector);
                unlock.clear();
            }
            None => {
                warn!("Finish without a captured reset vector, relocation slot left untouched");
            }
        }

        let mut programmer = FlashProgrammer::new(engine, notifier, layout, *unlock);
        for (address, &value) in (layout.config_base..).zip(config) {
            programmer.write_config_byte(address, value);
        }

        self.goto_state(VectorState::Finalized);
        FinishReport {
            vector_restored: vector.is_some(),
            config_written: config.len(),
        }
    }
}
