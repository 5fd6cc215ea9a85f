//! Diagnostic notifications.
//!
//! The bootloader never answers the host; the only feedback it gives is a
//! one-way diagnostic signal (LEDs on the reference board). Implement
//! `NotificationSink` to route those signals somewhere observable.

use std::fmt;
use std::sync::Mutex;

/// Diagnostic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Bootloader started and found a host.
    Entry,
    UnknownCommand,
    UnexpectedStart,
    Overrun,
    BadChecksum,
    /// Startup found an erased relocation slot.
    NoFirmware,
    /// A flash commit is about to start.
    BeginFlash,
    /// The flash commit finished.
    EndFlash,
}

/// How a notification drives the port B LED bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    /// Latch the whole port.
    Port(u8),
    /// Drive one bit high.
    Set(u8),
    /// Drive one bit low.
    Clear(u8),
}

impl Notification {
    /// LED pattern of the reference board.
    pub fn led_pattern(&self) -> LedPattern {
        match self {
            Notification::Entry => LedPattern::Port(0x01),
            Notification::UnknownCommand => LedPattern::Port(0x08),
            Notification::UnexpectedStart => LedPattern::Port(0x18),
            Notification::Overrun => LedPattern::Port(0x38),
            Notification::BadChecksum => LedPattern::Port(0x78),
            Notification::NoFirmware => LedPattern::Port(0xF8),
            Notification::BeginFlash => LedPattern::Set(1),
            Notification::EndFlash => LedPattern::Clear(1),
        }
    }

    /// Whether the device halts right after signalling this.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Notification::Entry | Notification::BeginFlash | Notification::EndFlash
        )
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Entry => write!(f, "ENTRY"),
            Notification::UnknownCommand => write!(f, "UNKNOWN_COMMAND"),
            Notification::UnexpectedStart => write!(f, "UNEXPECTED_STX"),
            Notification::Overrun => write!(f, "OVERRUN"),
            Notification::BadChecksum => write!(f, "BAD_CHECKSUM"),
            Notification::NoFirmware => write!(f, "NO_FIRMWARE"),
            Notification::BeginFlash => write!(f, "BEGIN_FLASH"),
            Notification::EndFlash => write!(f, "END_FLASH"),
        }
    }
}

/// Fire-and-forget diagnostic output.
pub trait NotificationSink {
    fn notify(&self, notification: Notification);
}

impl<T: NotificationSink + ?Sized> NotificationSink for &T {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Sink that logs notifications using tracing.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        let led = format!("{:?}", notification.led_pattern());
        match notification {
            Notification::BeginFlash | Notification::EndFlash => {
                tracing::trace!(led = %led, "{}", notification);
            }
            Notification::Entry => {
                tracing::info!(led = %led, "Bootloader entry");
            }
            _ => {
                tracing::error!(led = %led, "Device halted: {}", notification);
            }
        }
    }
}

/// Sink that keeps every notification, for tests and the emulator.
#[derive(Debug, Default)]
pub struct RecordingSink {
    log: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Notifications other than the flash bracketing pair.
    pub fn diagnostics(&self) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| !matches!(n, Notification::BeginFlash | Notification::EndFlash))
            .collect()
    }

    pub fn count(&self, notification: Notification) -> usize {
        self.notifications()
            .iter()
            .filter(|&&n| n == notification)
            .count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        if let Ok(mut log) = self.log.lock() {
            log.push(notification);
        }
    }
}
