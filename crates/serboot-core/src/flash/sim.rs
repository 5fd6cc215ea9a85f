//! In-memory flash for tests and the emulator.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use tracing::warn;

use super::traits::FlashEngine;
use crate::config::DeviceLayout;
use crate::protocol::constants::{ERASE_BLOCK_SIZE, ERASED_BYTE, WRITE_ROW_SIZE};

/// One recorded commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOp {
    Erase { address: u32 },
    Write { address: u32, data: Vec<u8> },
    Config { address: u32, value: u8 },
}

/// Program flash with NOR semantics: erase sets bytes to `0xFF`,
/// programming can only clear bits.
#[derive(Debug, Clone)]
pub struct SimulatedFlash {
    memory: Vec<u8>,
    config: BTreeMap<u32, u8>,
    ops: Vec<FlashOp>,
}

impl SimulatedFlash {
    /// Fully erased part.
    pub fn new(layout: &DeviceLayout) -> Self {
        Self::with_size(layout.flash_size as usize)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            memory: vec![ERASED_BYTE; size],
            config: BTreeMap::new(),
            ops: Vec::new(),
        }
    }

    /// Load a raw image; missing tail bytes read as erased.
    pub fn load_image<P: AsRef<Path>>(path: P, layout: &DeviceLayout) -> Result<Self> {
        let data = std::fs::read(path)?;
        let mut flash = Self::new(layout);
        if data.len() > flash.memory.len() {
            bail!(
                "Image is {} bytes, flash is only {} bytes",
                data.len(),
                flash.memory.len()
            );
        }
        flash.memory[..data.len()].copy_from_slice(&data);
        Ok(flash)
    }

    pub fn save_image<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, &self.memory)?;
        Ok(())
    }

    /// Place bytes directly, bypassing the commit log.
    pub fn preload(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        if let Some(dst) = self.memory.get_mut(start..start + data.len()) {
            dst.copy_from_slice(data);
        }
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    pub fn config_byte(&self, address: u32) -> Option<u8> {
        self.config.get(&address).copied()
    }

    pub fn read_vec(&self, address: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.read(address, &mut buf);
        buf
    }

    fn range(&self, address: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = address as usize;
        let end = start.checked_add(len)?;
        (end <= self.memory.len()).then_some(start..end)
    }
}

impl FlashEngine for SimulatedFlash {
    fn erase_block(&mut self, address: u32) {
        self.ops.push(FlashOp::Erase { address });
        match self.range(address, ERASE_BLOCK_SIZE as usize) {
            Some(r) => self.memory[r].fill(ERASED_BYTE),
            None => warn!(address = %format!("0x{:05X}", address), "Erase outside flash ignored"),
        }
    }

    fn write_row(&mut self, address: u32, data: &[u8]) {
        let data = &data[..data.len().min(WRITE_ROW_SIZE as usize)];
        self.ops.push(FlashOp::Write {
            address,
            data: data.to_vec(),
        });
        match self.range(address, data.len()) {
            Some(r) => {
                for (cell, &b) in self.memory[r].iter_mut().zip(data) {
                    *cell &= b;
                }
            }
            None => warn!(address = %format!("0x{:05X}", address), "Write outside flash ignored"),
        }
    }

    fn write_config(&mut self, address: u32, value: u8) {
        self.ops.push(FlashOp::Config { address, value });
        self.config.insert(address, value);
    }

    fn read(&self, address: u32, buf: &mut [u8]) {
        match self.range(address, buf.len()) {
            Some(r) => buf.copy_from_slice(&self.memory[r]),
            None => buf.fill(ERASED_BYTE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programming_only_clears_bits() {
        let mut flash = SimulatedFlash::with_size(0x100);
        flash.write_row(0x20, &[0xF0]);
        flash.write_row(0x20, &[0x0F]);
        assert_eq!(flash.read_vec(0x20, 1), vec![0x00]);

        flash.erase_block(0x00);
        assert_eq!(flash.read_vec(0x20, 1), vec![0xFF]);
        assert_eq!(flash.ops().len(), 3);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut flash = SimulatedFlash::with_size(0x40);
        flash.write_row(0x40, &[0x00]);
        flash.erase_block(0x1000);
        assert!(flash.memory().iter().all(|&b| b == ERASED_BYTE));
        assert_eq!(flash.read_vec(0x3F, 2), vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_image_roundtrip() {
        let layout = DeviceLayout::default();
        let path = std::env::temp_dir().join(format!("serboot-sim-{}.bin", std::process::id()));
        let mut flash = SimulatedFlash::new(&layout);
        flash.preload(0x0100, &[1, 2, 3]);
        flash.save_image(&path).unwrap();
        let loaded = SimulatedFlash::load_image(&path, &layout).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.read_vec(0x0100, 3), vec![1, 2, 3]);
    }
}
