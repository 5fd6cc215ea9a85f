//! Serial port channel using the `serialport` crate.

use std::io::{ErrorKind, Read};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use super::traits::{ByteChannel, ChannelError};

/// Poll interval used while blocking for the next byte.
const READ_POLL: Duration = Duration::from_millis(100);

/// Open `path` as 8N1 at `baud`.
pub fn open_port(path: &str, baud: u32) -> Result<Box<dyn SerialPort>, ChannelError> {
    let port = serialport::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(READ_POLL)
        .open()
        .map_err(|e| ChannelError::ReadFailed(format!("{path}: {e}")))?;
    info!(port = %path, baud, "Serial port open");
    Ok(port)
}

/// Blocking byte channel over a serial port.
///
/// Read timeouts are absorbed, so `read_byte` only returns once a byte
/// arrives or the port reports a real error.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    pub fn open(path: &str, baud: u32) -> Result<Self, ChannelError> {
        Ok(Self::new(open_port(path, baud)?))
    }
}

impl ByteChannel for SerialChannel {
    fn read_byte(&mut self) -> Result<u8, ChannelError> {
        let mut b = [0u8; 1];
        loop {
            match self.port.read(&mut b) {
                Ok(1) => return Ok(b[0]),
                Ok(_) => return Err(ChannelError::Closed),
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    debug!("Serial read interrupted, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
