//! Protocol module - wire format of the serial update stream.

pub mod checksum;
pub mod command;
pub mod constants;
pub mod frame;

pub use checksum::Crc16;
pub use command::{Command, EraseBlock, EraseBlocks, WriteRequest};
pub use constants::*;
pub use frame::{EncodeError, Frame, RawBuffer, encode_frame, push_escaped, read_frame};
