//! Command payload layouts.
//!
//! - Erase  `0x11`: `[ADDRH, ADDRL, COUNT]*`
//! - Write  `0x12`: `ADDRH, ADDRL, [DATA]*`
//! - Finish `0x13`: `[CONFIG]*`

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use super::constants::*;
use super::frame::Frame;
use crate::fault::Fault;

/// One run of contiguous 64-byte erase blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseBlock {
    /// Start address as sent; low 6 bits are ignored.
    pub address: u16,
    pub count: u8,
}

impl EraseBlock {
    pub fn new(address: u16, count: u8) -> Self {
        Self { address, count }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            address: BigEndian::read_u16(&bytes[..2]),
            count: bytes[2],
        }
    }

    pub fn to_bytes(&self) -> [u8; ERASE_DESCRIPTOR_LEN] {
        let [hi, lo] = self.address.to_be_bytes();
        [hi, lo, self.count]
    }

    /// First block actually erased.
    pub fn aligned_start(&self) -> u32 {
        u32::from(self.address) & ERASE_ALIGN_MASK
    }

    /// Addresses of every block this descriptor erases.
    pub fn block_addresses(&self) -> impl Iterator<Item = u32> + use<> {
        let start = self.aligned_start();
        (0..u32::from(self.count)).map(move |i| start + i * ERASE_BLOCK_SIZE)
    }
}

/// Descriptors packed in an Erase payload.
#[derive(Debug, Clone, Copy)]
pub struct EraseBlocks<'a> {
    raw: &'a [u8],
}

impl<'a> EraseBlocks<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    pub fn iter(&self) -> impl Iterator<Item = EraseBlock> + use<'a> {
        self.raw
            .chunks_exact(ERASE_DESCRIPTOR_LEN)
            .map(EraseBlock::from_bytes)
    }

    /// Bytes after the last whole descriptor.
    pub fn trailing(&self) -> usize {
        self.raw.len() % ERASE_DESCRIPTOR_LEN
    }
}

/// Data destined for program memory.
#[derive(Debug)]
pub struct WriteRequest<'a> {
    /// Base address as sent; low 5 bits are ignored.
    pub address: u16,
    pub data: &'a mut [u8],
}

impl WriteRequest<'_> {
    pub fn aligned_base(&self) -> u32 {
        u32::from(self.address) & WRITE_ALIGN_MASK
    }
}

/// A decoded command.
#[derive(Debug)]
pub enum Command<'a> {
    /// Frame carried no command byte.
    Empty,
    Erase(EraseBlocks<'a>),
    Write(WriteRequest<'a>),
    Finish { config: &'a [u8] },
    /// Known command whose payload is too short to act on.
    Malformed { command: u8, len: usize },
}

impl<'a> Command<'a> {
    pub fn parse(frame: Frame<'a>) -> Result<Self, Fault> {
        let Some((command, payload)) = frame.into_parts() else {
            return Ok(Command::Empty);
        };
        match command {
            CMD_ERASE => Ok(Command::Erase(EraseBlocks::new(payload))),
            CMD_WRITE => {
                if payload.len() < WRITE_HEADER_LEN {
                    return Ok(Command::Malformed {
                        command,
                        len: payload.len(),
                    });
                }
                let (header, data) = payload.split_at_mut(WRITE_HEADER_LEN);
                Ok(Command::Write(WriteRequest {
                    address: BigEndian::read_u16(header),
                    data,
                }))
            }
            CMD_FINISH => Ok(Command::Finish { config: payload }),
            other => Err(Fault::UnknownCommand(other)),
        }
    }
}

/// Erase payload for `blocks`.
pub fn erase_payload(blocks: &[EraseBlock]) -> Vec<u8> {
    blocks.iter().flat_map(|b| b.to_bytes()).collect()
}

/// Write payload: big-endian address followed by the data.
pub fn write_payload(address: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(WRITE_HEADER_LEN + data.len());
    // Writing into a Vec cannot fail.
    let _ = out.write_u16::<BigEndian>(address);
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::protocol::frame::{RawBuffer, encode_frame, read_frame};

    fn with_command<R>(command: u8, payload: &[u8], f: impl FnOnce(Result<Command<'_>, Fault>) -> R) -> R {
        let wire = encode_frame(command, payload).unwrap();
        let mut ch = MockChannel::from_bytes(&wire);
        let mut buf = RawBuffer::new();
        let frame = read_frame(&mut ch, &mut buf).unwrap();
        f(Command::parse(frame))
    }

    #[test]
    fn test_erase_alignment() {
        // Low 6 bits are dropped, never rounded.
        let block = EraseBlock::new(0x2041, 3);
        assert_eq!(block.aligned_start(), 0x2040);
        let addrs: Vec<u32> = block.block_addresses().collect();
        assert_eq!(addrs, vec![0x2040, 0x2080, 0x20C0]);
        assert_eq!(EraseBlock::new(0x203F, 1).aligned_start(), 0x2000);
    }

    #[test]
    fn test_write_alignment() {
        let mut data = [0u8; 1];
        let req = WriteRequest {
            address: 0x1005,
            data: &mut data,
        };
        assert_eq!(req.aligned_base(), 0x1000);
    }

    #[test]
    fn test_parse_erase() {
        let payload = erase_payload(&[EraseBlock::new(0x0040, 2), EraseBlock::new(0x1000, 1)]);
        with_command(CMD_ERASE, &payload, |cmd| match cmd {
            Ok(Command::Erase(blocks)) => {
                let list: Vec<EraseBlock> = blocks.iter().collect();
                assert_eq!(list, vec![EraseBlock::new(0x0040, 2), EraseBlock::new(0x1000, 1)]);
                assert_eq!(blocks.trailing(), 0);
            }
            other => panic!("unexpected {other:?}"),
        });
    }

    #[test]
    fn test_parse_write() {
        let payload = write_payload(0x1234, &[0xAA, 0xBB]);
        assert_eq!(payload, vec![0x12, 0x34, 0xAA, 0xBB]);
        with_command(CMD_WRITE, &payload, |cmd| match cmd {
            Ok(Command::Write(req)) => {
                assert_eq!(req.address, 0x1234);
                assert_eq!(&*req.data, &[0xAA, 0xBB][..]);
            }
            other => panic!("unexpected {other:?}"),
        });
    }

    #[test]
    fn test_parse_short_write() {
        with_command(CMD_WRITE, &[0x10], |cmd| {
            assert!(matches!(cmd, Ok(Command::Malformed { command: CMD_WRITE, len: 1 })));
        });
    }

    #[test]
    fn test_parse_unknown() {
        with_command(0x7F, &[], |cmd| {
            assert_eq!(cmd.unwrap_err(), Fault::UnknownCommand(0x7F));
        });
    }
}
