//! Turn firmware regions into the frame sequence of one update.
//!
//! An update is every Erase first, then every Write, then a single Finish.
//! Only regions below the bootloader are sent; the device would refuse
//! anything above it anyway.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::hex::HexRegion;
use super::pager::Pager;
use crate::config::DeviceLayout;
use crate::protocol::command::{erase_payload, write_payload};
use crate::protocol::{EncodeError, EraseBlock, encode_frame};
use crate::protocol::constants::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("Address 0x{0:X} does not fit the 16-bit command address")]
    AddressTooLarge(u32),
    #[error("Image has no data below the bootloader")]
    NothingToProgram,
    #[error("{0} configuration bytes do not fit one Finish frame")]
    TooManyConfigBytes(usize),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// One logical frame of the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFrame {
    pub command: u8,
    pub payload: Vec<u8>,
    /// How long the device is busy after receiving this frame.
    pub settle: Duration,
}

impl PlannedFrame {
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode_frame(self.command, &self.payload)
    }

    pub fn kind(&self) -> &'static str {
        match self.command {
            CMD_ERASE => "erase",
            CMD_WRITE => "write",
            CMD_FINISH => "finish",
            _ => "unknown",
        }
    }
}

/// Row-aligned data for one Write frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteChunk {
    pub address: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    pub erase: Vec<EraseBlock>,
    pub writes: Vec<WriteChunk>,
    pub config: Vec<u8>,
}

impl UpdatePlan {
    /// Plan an update of `regions` onto a part with `layout`.
    ///
    /// Data at or above the bootloader base is dropped with a warning.
    pub fn build(
        regions: &[HexRegion],
        layout: &DeviceLayout,
        config: Vec<u8>,
    ) -> Result<Self, PlanError> {
        if config.len() > MAX_PAYLOAD_LEN {
            return Err(PlanError::TooManyConfigBytes(config.len()));
        }

        let limit = layout.bootloader_base;
        let mut pager = Pager::default();
        let mut erase = Vec::new();
        for region in regions {
            if region.start >= limit {
                debug!(start = %format!("0x{:X}", region.start), "Region above bootloader skipped");
                continue;
            }
            let end = region.end().min(limit);
            if end < region.end() {
                warn!(
                    start = %format!("0x{:X}", region.start),
                    dropped = region.end() - end,
                    "Region overlaps the bootloader, tail dropped"
                );
            }
            let data = &region.data[..(end - region.start) as usize];
            pager.write(region.start, data);
            erase_descriptors(region.start, end, &mut erase)?;
        }

        if pager.is_empty() {
            return Err(PlanError::NothingToProgram);
        }

        let writes = pager
            .runs(MAX_WRITE_ROWS)
            .into_iter()
            .map(|run| {
                Ok(WriteChunk {
                    address: short_address(run.address)?,
                    data: run.data,
                })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;

        Ok(Self {
            erase,
            writes,
            config,
        })
    }

    pub fn blocks_erased(&self) -> u32 {
        self.erase.iter().map(|b| u32::from(b.count)).sum()
    }

    pub fn bytes_written(&self) -> usize {
        self.writes.iter().map(|w| w.data.len()).sum()
    }

    /// Logical frames in transmission order.
    pub fn frames(&self) -> Vec<PlannedFrame> {
        let mut frames = Vec::new();
        for group in self.erase.chunks(MAX_ERASE_DESCRIPTORS) {
            let busy: u64 = group.iter().map(|b| u64::from(b.count) * 3 + 1).sum();
            frames.push(PlannedFrame {
                command: CMD_ERASE,
                payload: erase_payload(group),
                settle: Duration::from_millis(1 + busy),
            });
        }
        for chunk in &self.writes {
            let rows = chunk.data.len() / WRITE_ROW_SIZE as usize;
            frames.push(PlannedFrame {
                command: CMD_WRITE,
                payload: write_payload(chunk.address, &chunk.data),
                settle: Duration::from_millis(3 + rows as u64 * 4),
            });
        }
        frames.push(PlannedFrame {
            command: CMD_FINISH,
            payload: self.config.clone(),
            settle: Duration::from_millis(10),
        });
        frames
    }
}

impl fmt::Display for UpdatePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Erase: {} blocks in {} runs", self.blocks_erased(), self.erase.len())?;
        for b in &self.erase {
            writeln!(f, "  0x{:04X} x{}", b.address, b.count)?;
        }
        writeln!(
            f,
            "Write: {} bytes in {} frames",
            self.bytes_written(),
            self.writes.len()
        )?;
        for w in &self.writes {
            writeln!(f, "  0x{:04X} +{}", w.address, w.data.len())?;
        }
        write!(f, "Finish: {} config bytes", self.config.len())
    }
}

/// Bytes of `regions` starting exactly at the configuration base.
pub fn config_from_regions(regions: &[HexRegion], layout: &DeviceLayout) -> Vec<u8> {
    regions
        .iter()
        .find(|r| r.start == layout.config_base)
        .map(|r| r.data.clone())
        .unwrap_or_default()
}

fn short_address(address: u32) -> Result<u16, PlanError> {
    u16::try_from(address).map_err(|_| PlanError::AddressTooLarge(address))
}

/// Cover `[start, end)` with erase runs of at most 255 blocks.
fn erase_descriptors(start: u32, end: u32, out: &mut Vec<EraseBlock>) -> Result<(), PlanError> {
    let mut at = start & ERASE_ALIGN_MASK;
    while at < end {
        let remaining = (end - at).div_ceil(ERASE_BLOCK_SIZE);
        let count = remaining.min(MAX_ERASE_BLOCKS);
        out.push(EraseBlock::new(short_address(at)?, count as u8));
        at += count * ERASE_BLOCK_SIZE;
    }
    Ok(())
}
