//! Mock byte channel for testing.

use std::collections::VecDeque;

use super::traits::{ByteChannel, ChannelError};

/// Replays queued bytes, then reports `Closed`.
#[derive(Debug, Default)]
pub struct MockChannel {
    rx: VecDeque<u8>,
    consumed: usize,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut ch = Self::new();
        ch.queue(bytes);
        ch
    }

    /// Queue bytes to be returned by subsequent reads.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Bytes still waiting to be read.
    pub fn remaining(&self) -> usize {
        self.rx.len()
    }

    /// Bytes handed out so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl ByteChannel for MockChannel {
    fn read_byte(&mut self) -> Result<u8, ChannelError> {
        let b = self.rx.pop_front().ok_or(ChannelError::Closed)?;
        self.consumed += 1;
        Ok(b)
    }
}
