//! Fatal protocol faults.
//!
//! Every fault is terminal for the session: the diagnostic is signalled,
//! the session stops accepting frames, and only a power cycle recovers.

use crate::channel::ChannelError;
use crate::notify::Notification;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("Unexpected start-of-frame inside frame body")]
    UnexpectedStartOfFrame,

    #[error("Frame body exceeded buffer capacity")]
    BufferOverrun,

    #[error("Bad checksum")]
    ChecksumMismatch,

    #[error("Unknown command 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("No firmware installed")]
    NoFirmwareInstalled,
}

impl Fault {
    /// Diagnostic raised when this fault halts the device.
    pub fn notification(&self) -> Notification {
        match self {
            Fault::UnexpectedStartOfFrame => Notification::UnexpectedStart,
            Fault::BufferOverrun => Notification::Overrun,
            Fault::ChecksumMismatch => Notification::BadChecksum,
            Fault::UnknownCommand(_) => Notification::UnknownCommand,
            Fault::NoFirmwareInstalled => Notification::NoFirmware,
        }
    }
}

/// Anything that stops a session before it resets the device.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Device halted: {0}")]
    Fault(#[from] Fault),

    #[error("Byte channel: {0}")]
    Channel(#[from] ChannelError),
}

impl SessionError {
    pub fn fault(&self) -> Option<Fault> {
        match self {
            SessionError::Fault(f) => Some(*f),
            SessionError::Channel(_) => None,
        }
    }
}
