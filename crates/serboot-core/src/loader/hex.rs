//! Intel HEX reader.
//!
//! Parses `.hex` firmware images into contiguous memory regions.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum HexError {
    #[error("Line {line}: record does not start with ':'")]
    MissingColon { line: usize },
    #[error("Line {line}: invalid hex digits")]
    InvalidDigits { line: usize },
    #[error("Line {line}: record length mismatch")]
    Truncated { line: usize },
    #[error("Line {line}: checksum 0x{actual:02X}, expected 0x{expected:02X}")]
    BadChecksum {
        line: usize,
        expected: u8,
        actual: u8,
    },
    #[error("Line {line}: data runs past the 32-bit address space")]
    AddressOverflow { line: usize },
    #[error("Line {line}: unsupported record type 0x{kind:02X}")]
    UnsupportedRecord { line: usize, kind: u8 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Data,
    EndOfFile,
    ExtendedSegmentAddress,
    StartSegmentAddress,
    ExtendedLinearAddress,
    StartLinearAddress,
}

impl RecordType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::EndOfFile),
            0x02 => Some(Self::ExtendedSegmentAddress),
            0x03 => Some(Self::StartSegmentAddress),
            0x04 => Some(Self::ExtendedLinearAddress),
            0x05 => Some(Self::StartLinearAddress),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0x00,
            Self::EndOfFile => 0x01,
            Self::ExtendedSegmentAddress => 0x02,
            Self::StartSegmentAddress => 0x03,
            Self::ExtendedLinearAddress => 0x04,
            Self::StartLinearAddress => 0x05,
        }
    }
}

/// One `:LLAAAATT[DD...]CC` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    pub address: u16,
    pub kind: RecordType,
    pub data: Vec<u8>,
}

impl HexRecord {
    pub fn parse(text: &str, line: usize) -> Result<Self, HexError> {
        let body = text
            .trim()
            .strip_prefix(':')
            .ok_or(HexError::MissingColon { line })?;
        if body.len() % 2 != 0 || !body.is_ascii() {
            return Err(HexError::InvalidDigits { line });
        }
        let bytes = (0..body.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&body[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| HexError::InvalidDigits { line })?;

        // count, address (2), type, data, checksum
        if bytes.len() < 5 || bytes.len() != 5 + bytes[0] as usize {
            return Err(HexError::Truncated { line });
        }
        let kind_byte = bytes[3];
        let kind = RecordType::from_u8(kind_byte).ok_or(HexError::UnsupportedRecord {
            line,
            kind: kind_byte,
        })?;
        let record = Self {
            address: u16::from_be_bytes([bytes[1], bytes[2]]),
            kind,
            data: bytes[4..bytes.len() - 1].to_vec(),
        };

        let actual = bytes[bytes.len() - 1];
        let expected = record.checksum();
        if actual != expected {
            return Err(HexError::BadChecksum {
                line,
                expected,
                actual,
            });
        }
        Ok(record)
    }

    /// Two's complement of the byte sum of the record.
    pub fn checksum(&self) -> u8 {
        let [hi, lo] = self.address.to_be_bytes();
        let sum = self
            .data
            .iter()
            .fold(
                (self.data.len() as u8)
                    .wrapping_add(hi)
                    .wrapping_add(lo)
                    .wrapping_add(self.kind.as_u8()),
                |acc, &b| acc.wrapping_add(b),
            );
        sum.wrapping_neg()
    }

    pub fn to_line(&self) -> String {
        let mut line = format!(
            ":{:02X}{:04X}{:02X}",
            self.data.len(),
            self.address,
            self.kind.as_u8()
        );
        for b in &self.data {
            line.push_str(&format!("{:02X}", b));
        }
        line.push_str(&format!("{:02X}", self.checksum()));
        line
    }
}

/// Contiguous bytes at an absolute address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRegion {
    pub start: u32,
    pub data: Vec<u8>,
}

impl HexRegion {
    /// First address past the region, saturating at `u32::MAX`.
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.data.len() as u32)
    }
}

/// A parsed HEX file.
#[derive(Debug, Clone)]
pub struct HexFile {
    records: Vec<(usize, HexRecord)>,
}

impl HexFile {
    pub fn parse(text: &str) -> Result<Self, HexError> {
        let records = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| HexRecord::parse(l, i + 1).map(|r| (i + 1, r)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, HexError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Data records resolved to absolute addresses, sorted, with adjacent
    /// records merged.
    pub fn regions(&self) -> Result<Vec<HexRegion>, HexError> {
        let mut blocks = Vec::new();
        let mut base = 0u32;
        for (line, record) in &self.records {
            match record.kind {
                RecordType::EndOfFile => break,
                RecordType::Data => {
                    let start = base
                        .checked_add(u32::from(record.address))
                        .filter(|s| s.checked_add(record.data.len() as u32).is_some())
                        .ok_or(HexError::AddressOverflow { line: *line })?;
                    blocks.push(HexRegion {
                        start,
                        data: record.data.clone(),
                    });
                }
                RecordType::ExtendedLinearAddress | RecordType::ExtendedSegmentAddress => {
                    if record.data.len() != 2 {
                        return Err(HexError::Truncated { line: *line });
                    }
                    let value = u32::from(u16::from_be_bytes([record.data[0], record.data[1]]));
                    base = if record.kind == RecordType::ExtendedLinearAddress {
                        value << 16
                    } else {
                        value << 4
                    };
                }
                RecordType::StartSegmentAddress | RecordType::StartLinearAddress => {
                    debug!(line, "Start address record ignored");
                }
            }
        }

        blocks.sort_by_key(|b| b.start);
        let mut regions: Vec<HexRegion> = Vec::new();
        for block in blocks {
            match regions.last_mut() {
                Some(last) if last.end() == block.start => last.data.extend(block.data),
                _ => regions.push(block),
            }
        }
        Ok(regions)
    }
}
