//! Byte channel abstraction.
//!
//! Defines the `ByteChannel` trait the frame decoder reads from,
//! allowing different implementations (UART, serial port, mock).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking single-byte input.
///
/// A hardware UART never returns an error: line-level framing and
/// overrun conditions are cleared inside the implementation before a
/// byte is handed out. Host-side channels use the error to report that
/// the stream has ended.
pub trait ByteChannel {
    /// Block until one byte is available.
    fn read_byte(&mut self) -> Result<u8, ChannelError>;
}

impl<T: ByteChannel + ?Sized> ByteChannel for &mut T {
    fn read_byte(&mut self) -> Result<u8, ChannelError> {
        (**self).read_byte()
    }
}
