//! Frame decoding and encoding.
//!
//! Wire layout:
//!
//! ```text
//! STX STX <command> [payload]... <crc hi> <crc lo> ETX
//! ```
//!
//! Every byte between the start pair and ETX that equals STX, ETX or DLE
//! is preceded by DLE. The checksum covers the command and payload.

use thiserror::Error;
use tracing::{debug, trace};

use super::checksum::{self, Crc16};
use super::constants::*;
use crate::channel::ByteChannel;
use crate::fault::{Fault, SessionError};

/// The single receive buffer shared by every frame of a session.
pub struct RawBuffer {
    data: [u8; BUFFER_CAPACITY],
    len: usize,
}

impl RawBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0; BUFFER_CAPACITY],
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Store one byte. Storing into a full buffer is an overrun, never a wrap.
    pub fn push(&mut self, byte: u8) -> Result<(), Fault> {
        if self.len == BUFFER_CAPACITY {
            return Err(Fault::BufferOverrun);
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A checksum-validated frame, borrowed from the receive buffer.
///
/// Holds the command byte and payload with the checksum stripped. An
/// empty frame (nothing but a checksum, or nothing at all) has no command.
#[derive(Debug)]
pub struct Frame<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Frame<'a> {
    pub fn command(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    pub fn payload(&self) -> &[u8] {
        self.bytes.get(1..).unwrap_or(&[])
    }

    /// Split into command byte and mutable payload.
    pub fn into_parts(self) -> Option<(u8, &'a mut [u8])> {
        let (command, payload) = self.bytes.split_first_mut()?;
        Some((*command, payload))
    }
}

/// Read bytes until one complete, valid frame has been received.
///
/// Blocks on the channel for as long as it takes. Protocol violations are
/// returned as `SessionError::Fault` and must be treated as terminal.
pub fn read_frame<'b, C: ByteChannel>(
    channel: &mut C,
    buffer: &'b mut RawBuffer,
) -> Result<Frame<'b>, SessionError> {
    synchronize(channel)?;

    buffer.clear();
    loop {
        let byte = match channel.read_byte()? {
            DLE => channel.read_byte()?,
            STX => return Err(Fault::UnexpectedStartOfFrame.into()),
            ETX => break,
            b => b,
        };
        buffer.push(byte)?;
    }

    let stored = buffer.len();
    let usable = match stored {
        0 => 0,
        1 => return Err(Fault::ChecksumMismatch.into()),
        n => n - CHECKSUM_LEN,
    };
    if usable != 0 && !checksum::verify(buffer.as_slice()) {
        return Err(Fault::ChecksumMismatch.into());
    }

    debug!(len = usable, "Frame received");
    Ok(Frame {
        bytes: &mut buffer.data[..usable],
    })
}

/// Discard input until two consecutive start markers.
fn synchronize<C: ByteChannel>(channel: &mut C) -> Result<(), SessionError> {
    let mut skipped = 0usize;
    loop {
        if channel.read_byte()? != STX {
            skipped += 1;
            continue;
        }
        if channel.read_byte()? == STX {
            if skipped > 0 {
                trace!(skipped, "Resynchronized on start marker");
            }
            return Ok(());
        }
        skipped += 2;
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Frame too long: {len} logical bytes, maximum {max}")]
    TooLong { len: usize, max: usize },
}

/// Append `byte` to `out`, escaping it if it collides with a marker.
pub fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    if matches!(byte, STX | ETX | DLE) {
        out.push(DLE);
    }
    out.push(byte);
}

/// Build the wire bytes of one frame.
pub fn encode_frame(command: u8, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let len = 1 + payload.len() + CHECKSUM_LEN;
    if len > MAX_FRAME_LEN {
        return Err(EncodeError::TooLong {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut crc = Crc16::new();
    let mut out = Vec::with_capacity(2 + len * 2 + 1);
    out.push(STX);
    out.push(STX);
    for &b in std::iter::once(&command).chain(payload) {
        crc.update(b);
        push_escaped(&mut out, b);
    }
    for b in crc.to_trailer() {
        push_escaped(&mut out, b);
    }
    out.push(ETX);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, MockChannel};

    fn decode(wire: &[u8]) -> Result<(Option<u8>, Vec<u8>), SessionError> {
        let mut ch = MockChannel::from_bytes(wire);
        let mut buf = RawBuffer::new();
        let frame = read_frame(&mut ch, &mut buf)?;
        Ok((frame.command(), frame.payload().to_vec()))
    }

    fn fault_of(r: Result<(Option<u8>, Vec<u8>), SessionError>) -> Option<Fault> {
        r.err().and_then(|e| e.fault())
    }

    /// Raw body bytes (already containing their checksum) wrapped without escaping.
    fn with_checksum(body: &[u8]) -> Vec<u8> {
        let mut crc = Crc16::new();
        crc.update_slice(body);
        let mut v = body.to_vec();
        v.extend_from_slice(&crc.to_trailer());
        v
    }

    #[test]
    fn test_roundtrip_with_marker_bytes() {
        let payload = [STX, ETX, DLE, 0x00, DLE, DLE, 0xFF, STX, 0x42];
        let wire = encode_frame(CMD_WRITE, &payload).unwrap();
        let (cmd, decoded) = decode(&wire).unwrap();
        assert_eq!(cmd, Some(CMD_WRITE));
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let payload: Vec<u8> = (0u8..=250).collect();
        let wire = encode_frame(0x12, &payload).unwrap();
        let (_, decoded) = decode(&wire).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_sync_skips_noise_and_single_stx() {
        let mut wire = vec![0x55, 0x55, 0x00, STX, 0x33, 0x99];
        wire.extend(encode_frame(CMD_FINISH, &[0x01]).unwrap());
        let (cmd, payload) = decode(&wire).unwrap();
        assert_eq!(cmd, Some(CMD_FINISH));
        assert_eq!(payload, vec![0x01]);
    }

    #[test]
    fn test_unexpected_stx() {
        let wire = [STX, STX, 0x11, STX, ETX];
        assert_eq!(fault_of(decode(&wire)), Some(Fault::UnexpectedStartOfFrame));
    }

    #[test]
    fn test_escaped_stx_is_data() {
        let body = with_checksum(&[0x11, STX]);
        let mut wire = vec![STX, STX];
        for b in body {
            push_escaped(&mut wire, b);
        }
        wire.push(ETX);
        let (_, payload) = decode(&wire).unwrap();
        assert_eq!(payload, vec![STX]);
    }

    #[test]
    fn test_bad_checksum() {
        let mut wire = encode_frame(CMD_ERASE, &[0x00, 0x40, 0x02]).unwrap();
        // Flip a payload bit (index 4 is the unescaped 0x40).
        wire[4] ^= 0x01;
        assert_eq!(fault_of(decode(&wire)), Some(Fault::ChecksumMismatch));
    }

    #[test]
    fn test_empty_frames_skip_checksum() {
        let (cmd, payload) = decode(&[STX, STX, ETX]).unwrap();
        assert_eq!(cmd, None);
        assert!(payload.is_empty());

        // Two arbitrary bytes are taken as a checksum and not verified.
        let (cmd, _) = decode(&[STX, STX, 0xAB, 0xCD, ETX]).unwrap();
        assert_eq!(cmd, None);
    }

    #[test]
    fn test_single_byte_body_rejected() {
        assert_eq!(
            fault_of(decode(&[STX, STX, 0x11, ETX])),
            Some(Fault::ChecksumMismatch)
        );
    }

    #[test]
    fn test_overrun_boundary() {
        // 254 logical bytes + checksum = exactly 256 stored bytes: accepted.
        let logical: Vec<u8> = std::iter::once(CMD_WRITE)
            .chain((0..253).map(|i| (i % 200) as u8 + 0x20))
            .collect();
        let body = with_checksum(&logical);
        assert_eq!(body.len(), BUFFER_CAPACITY);
        let mut wire = vec![STX, STX];
        for &b in &body {
            push_escaped(&mut wire, b);
        }
        wire.push(ETX);
        let (_, payload) = decode(&wire).unwrap();
        assert_eq!(payload.len(), 253);

        // One more stored byte faults before any terminator is seen.
        let mut wire = vec![STX, STX];
        wire.extend(std::iter::repeat_n(0x20, BUFFER_CAPACITY + 1));
        let mut ch = MockChannel::from_bytes(&wire);
        let mut buf = RawBuffer::new();
        let err = read_frame(&mut ch, &mut buf).unwrap_err();
        assert_eq!(err.fault(), Some(Fault::BufferOverrun));
        assert_eq!(buf.len(), BUFFER_CAPACITY);
        assert_eq!(ch.remaining(), 0);
    }

    #[test]
    fn test_truncated_stream() {
        let wire = [STX, STX, 0x11, 0x00];
        match decode(&wire) {
            Err(SessionError::Channel(ChannelError::Closed)) => {}
            other => panic!("expected closed channel, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_rejects_oversized() {
        assert!(encode_frame(CMD_WRITE, &[0u8; MAX_PAYLOAD_LEN]).is_ok());
        assert_eq!(
            encode_frame(CMD_WRITE, &[0u8; MAX_PAYLOAD_LEN + 1]),
            Err(EncodeError::TooLong {
                len: MAX_FRAME_LEN + 1,
                max: MAX_FRAME_LEN
            })
        );
    }
}
