//! Flash programming operations.
//!
//! Erase runs, page writes, the rebased reset vector and configuration
//! bytes, expressed over the `FlashEngine` commit primitives.

use tracing::{debug, trace};

use super::traits::FlashEngine;
use crate::config::DeviceLayout;
use crate::notify::{Notification, NotificationSink};
use crate::protocol::EraseBlock;
use crate::protocol::constants::*;

/// Write-protection override for the bootloader region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnlockFlag(bool);

impl UnlockFlag {
    pub fn set(&mut self) {
        self.0 = true;
    }

    pub fn clear(&mut self) {
        self.0 = false;
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}

/// Drives one `FlashEngine` on behalf of a session.
pub struct FlashProgrammer<'a, F: FlashEngine + ?Sized, N: NotificationSink + ?Sized> {
    engine: &'a mut F,
    notifier: &'a N,
    layout: &'a DeviceLayout,
    unlock: UnlockFlag,
}

impl<'a, F: FlashEngine + ?Sized, N: NotificationSink + ?Sized> FlashProgrammer<'a, F, N> {
    pub fn new(
        engine: &'a mut F,
        notifier: &'a N,
        layout: &'a DeviceLayout,
        unlock: UnlockFlag,
    ) -> Self {
        Self {
            engine,
            notifier,
            layout,
            unlock,
        }
    }

    /// Erase every block named by `blocks`, in order.
    pub fn erase_blocks(&mut self, blocks: impl IntoIterator<Item = EraseBlock>) {
        for block in blocks {
            debug!(
                start = %format!("0x{:04X}", block.aligned_start()),
                count = block.count,
                "Erase"
            );
            for address in block.block_addresses() {
                self.commit(address, |e| e.erase_block(address));
            }
        }
    }

    /// Write `data` row by row starting at the row-aligned `base`.
    pub fn write_page(&mut self, base: u32, data: &[u8]) {
        let base = base & WRITE_ALIGN_MASK;
        debug!(base = %format!("0x{:04X}", base), len = data.len(), "Write");
        let mut address = base;
        for row in data.chunks(WRITE_ROW_SIZE as usize) {
            self.commit(address, |e| e.write_row(address, row));
            address += WRITE_ROW_SIZE;
        }
    }

    /// Replace the relocation slot with `vector`.
    ///
    /// The slot sits inside the protected region, so this only lands when
    /// the programmer was created with the unlock flag set.
    pub fn write_rebased_vector(&mut self, vector: [u8; RESET_VECTOR_LEN]) {
        let slot = self.layout.relocation_slot;
        debug!(slot = %format!("0x{:04X}", slot), vector = ?vector, "Write rebased vector");
        let block = slot & ERASE_ALIGN_MASK;
        self.commit(block, |e| e.erase_block(block));
        self.commit(slot, |e| e.write_row(slot, &vector));
    }

    /// Commit one configuration byte.
    pub fn write_config_byte(&mut self, address: u32, value: u8) {
        debug!(address = %format!("0x{:06X}", address), value = %format!("0x{:02X}", value), "Write config");
        self.commit(address, |e| e.write_config(address, value));
    }

    fn commit(&mut self, address: u32, op: impl FnOnce(&mut F)) {
        self.notifier.notify(Notification::BeginFlash);
        if self.layout.is_protected(address) && !self.unlock.is_set() {
            trace!(address = %format!("0x{:04X}", address), "Commit suppressed by write protection");
        } else {
            op(&mut *self.engine);
        }
        self.notifier.notify(Notification::EndFlash);
    }
}
