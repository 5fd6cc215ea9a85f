//! Frame checksum.
//!
//! CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF) computed a byte at a
//! time on two 8-bit halves. A frame carries the CRC of its logical bytes
//! high byte first, so running the update over the whole frame including
//! the trailing pair leaves both halves at zero.

/// Running checksum state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    high: u8,
    low: u8,
}

impl Crc16 {
    pub const fn new() -> Self {
        Self {
            high: 0xFF,
            low: 0xFF,
        }
    }

    /// Feed one byte.
    pub fn update(&mut self, byte: u8) {
        core::mem::swap(&mut self.high, &mut self.low);
        self.low ^= byte;
        self.low ^= self.low >> 4;
        self.high ^= self.low << 4;
        self.high ^= self.low >> 3;
        self.low ^= self.low << 5;
    }

    pub fn update_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.update(b);
        }
    }

    pub fn value(&self) -> u16 {
        u16::from_be_bytes([self.high, self.low])
    }

    /// Trailing bytes a sender appends to make the frame self-annulling.
    pub fn to_trailer(&self) -> [u8; 2] {
        [self.high, self.low]
    }

    /// True once a frame and its own trailer have been consumed intact.
    pub fn is_residue_zero(&self) -> bool {
        self.high == 0 && self.low == 0
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update_slice(data);
    crc.value()
}

/// Check a frame body whose last two bytes are its checksum.
pub fn verify(frame: &[u8]) -> bool {
    let mut crc = Crc16::new();
    crc.update_slice(frame);
    crc.is_residue_zero()
}
