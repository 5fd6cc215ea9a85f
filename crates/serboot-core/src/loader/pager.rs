//! Row-aligned view of a firmware image.
//!
//! The device programs whole 32-byte rows, so every region is spread over
//! the rows it touches and the gaps are filled with the erased value.

use std::collections::BTreeMap;

use tracing::warn;

use crate::protocol::constants::{ERASED_BYTE, WRITE_ROW_SIZE};

/// One programmable row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub address: u32,
    pub data: Vec<u8>,
}

/// A run of consecutive pages sent as one Write frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRun {
    pub address: u32,
    pub data: Vec<u8>,
}

impl PageRun {
    pub fn rows(&self, page_size: usize) -> usize {
        self.data.len() / page_size
    }
}

#[derive(Debug, Clone)]
pub struct Pager {
    page_size: usize,
    fill: u8,
    pages: BTreeMap<u32, Vec<u8>>,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(WRITE_ROW_SIZE as usize, ERASED_BYTE)
    }
}

impl Pager {
    pub fn new(page_size: usize, fill: u8) -> Self {
        Self {
            page_size,
            fill,
            pages: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Overlay `data` at `address`. Later writes win on overlap.
    ///
    /// Bytes past the end of the 32-bit address space are dropped.
    pub fn write(&mut self, address: u32, data: &[u8]) {
        let (size, fill) = (self.page_size, self.fill);
        for (offset, &byte) in data.iter().enumerate() {
            let Some(addr) = address.checked_add(offset as u32) else {
                warn!(dropped = data.len() - offset, "Data past the address space dropped");
                break;
            };
            let base = addr - addr % size as u32;
            let page = self
                .pages
                .entry(base)
                .or_insert_with(|| vec![fill; size]);
            page[(addr - base) as usize] = byte;
        }
    }

    pub fn pages(&self) -> impl Iterator<Item = Page> + '_ {
        self.pages.iter().map(|(&address, data)| Page {
            address,
            data: data.clone(),
        })
    }

    /// Group consecutive pages, at most `max_pages` per run.
    pub fn runs(&self, max_pages: usize) -> Vec<PageRun> {
        let mut runs: Vec<PageRun> = Vec::new();
        for (&address, data) in &self.pages {
            match runs.last_mut() {
                Some(run)
                    if run.address.checked_add(run.data.len() as u32) == Some(address)
                        && run.data.len() < max_pages * self.page_size =>
                {
                    run.data.extend_from_slice(data);
                }
                _ => runs.push(PageRun {
                    address,
                    data: data.clone(),
                }),
            }
        }
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_rows_are_filled() {
        let mut pager = Pager::default();
        pager.write(0x0022, &[0xAA, 0xBB]);
        let pages: Vec<_> = pager.pages().collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].address, 0x0020);
        assert_eq!(pages[0].data.len(), 32);
        assert_eq!(&pages[0].data[..4], &[0xFF, 0xFF, 0xAA, 0xBB]);
        assert!(pages[0].data[4..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_write_spanning_rows() {
        let mut pager = Pager::default();
        pager.write(0x001E, &[1, 2, 3, 4]);
        let pages: Vec<_> = pager.pages().collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(&pages[0].data[30..], &[1, 2]);
        assert_eq!(&pages[1].data[..2], &[3, 4]);
    }

    #[test]
    fn test_write_at_top_of_address_space() {
        let mut pager = Pager::default();
        pager.write(0xFFFF_FFFE, &[1, 2, 3]);
        let pages: Vec<_> = pager.pages().collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].address, 0xFFFF_FFE0);
        assert_eq!(&pages[0].data[30..], &[1, 2]);
        assert_eq!(pager.runs(7).len(), 1);
    }

    #[test]
    fn test_runs_split_on_gap_and_limit() {
        let mut pager = Pager::default();
        // Nine consecutive rows, a gap, then one more.
        pager.write(0x0000, &[0u8; 9 * 32]);
        pager.write(0x0400, &[0u8; 1]);
        let runs = pager.runs(7);
        assert_eq!(runs.len(), 3);
        assert_eq!((runs[0].address, runs[0].rows(32)), (0x0000, 7));
        assert_eq!((runs[1].address, runs[1].rows(32)), (0x00E0, 2));
        assert_eq!((runs[2].address, runs[2].rows(32)), (0x0400, 1));
    }
}
