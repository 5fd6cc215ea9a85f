//! Flash hardware seam.
//!
//! Defines the `FlashEngine` trait: the commit primitives of the part's
//! table-write unit. Alignment, latch grouping, write protection and
//! diagnostics are layered on top by `FlashProgrammer`, so a backend only
//! has to run the physical sequences.

/// Physical program-memory commit sequences.
///
/// Every call is one hardware commit and blocks until the part reports it
/// finished. Commits are assumed to succeed.
pub trait FlashEngine {
    /// Erase the 64-byte block starting at `address` (block aligned).
    fn erase_block(&mut self, address: u32);

    /// Load `data` (at most one 32-byte row) into the write latch starting
    /// at the row-aligned `address` and commit it. Latch bytes not loaded
    /// stay erased.
    fn write_row(&mut self, address: u32, data: &[u8]);

    /// Commit a single configuration byte.
    fn write_config(&mut self, address: u32, value: u8);

    /// Read program memory into `buf`.
    fn read(&self, address: u32, buf: &mut [u8]);
}

impl<T: FlashEngine + ?Sized> FlashEngine for &mut T {
    fn erase_block(&mut self, address: u32) {
        (**self).erase_block(address)
    }

    fn write_row(&mut self, address: u32, data: &[u8]) {
        (**self).write_row(address, data)
    }

    fn write_config(&mut self, address: u32, value: u8) {
        (**self).write_config(address, value)
    }

    fn read(&self, address: u32, buf: &mut [u8]) {
        (**self).read(address, buf)
    }
}
