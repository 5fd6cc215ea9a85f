// Frame markers
pub const STX: u8 = 0x0F;
pub const ETX: u8 = 0x04;
pub const DLE: u8 = 0x05;

// Auto-baud preamble: the host repeats SYNC_BYTE, then sends SYNC_END once.
pub const SYNC_BYTE: u8 = 0x55;
pub const SYNC_END: u8 = 0x00;

// Command bytes
pub const CMD_ERASE: u8 = 0x11;
pub const CMD_WRITE: u8 = 0x12;
pub const CMD_FINISH: u8 = 0x13;

pub const BUFFER_CAPACITY: usize = 256;
pub const CHECKSUM_LEN: usize = 2;
/// Largest logical frame (command + payload + checksum) a sender may emit.
pub const MAX_FRAME_LEN: usize = BUFFER_CAPACITY - 1;
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - 1 - CHECKSUM_LEN;

pub const ERASE_BLOCK_SIZE: u32 = 64;
pub const WRITE_ROW_SIZE: u32 = 32;
pub const ERASE_ALIGN_MASK: u32 = !(ERASE_BLOCK_SIZE - 1);
pub const WRITE_ALIGN_MASK: u32 = !(WRITE_ROW_SIZE - 1);

pub const ERASE_DESCRIPTOR_LEN: usize = 3;
pub const WRITE_HEADER_LEN: usize = 2;
pub const RESET_VECTOR_LEN: usize = 4;
pub const RESET_VECTOR_ADDR: u32 = 0x0000;

pub const MAX_ERASE_BLOCKS: u32 = 255;
/// Rows per Write frame the host loader emits (7 * 32 = 224 data bytes).
pub const MAX_WRITE_ROWS: usize = 7;
pub const MAX_ERASE_DESCRIPTORS: usize = MAX_PAYLOAD_LEN / ERASE_DESCRIPTOR_LEN;

pub const ERASED_BYTE: u8 = 0xFF;

// PIC18 GOTO opcode halves
pub const GOTO_OPCODE_LO: u8 = 0xEF;
pub const GOTO_OPCODE_HI: u8 = 0xF0;
