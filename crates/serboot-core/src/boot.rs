//! Power-on decision: update session or hand-off to the application.

use tracing::info;

use crate::channel::ByteChannel;
use crate::config::DeviceLayout;
use crate::fault::{Fault, SessionError};
use crate::flash::FlashEngine;
use crate::notify::NotificationSink;
use crate::protocol::constants::{ERASED_BYTE, RESET_VECTOR_LEN};
use crate::session::Bootloader;
use crate::vector::FinishReport;

/// Where control goes after the bootloader's startup code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// An update session finished; the device resets into the new image.
    Updated(FinishReport),
    /// Jump to the relocated application reset instruction.
    Application { entry: u32 },
}

/// Check the relocation slot for an installed application.
pub fn application_entry<F: FlashEngine + ?Sized>(
    flash: &F,
    layout: &DeviceLayout,
) -> Result<u32, Fault> {
    let mut slot = [0u8; RESET_VECTOR_LEN];
    flash.read(layout.relocation_slot, &mut slot);
    if slot.iter().all(|&b| b == ERASED_BYTE) {
        return Err(Fault::NoFirmwareInstalled);
    }
    Ok(layout.relocation_slot)
}

/// Startup sequence.
///
/// `host_detected` is the result of the UART auto-baud probe: when a host
/// is talking, the update session runs; otherwise the installed
/// application is started, or the device halts with `NoFirmware`.
pub fn startup<C, F, N>(
    bootloader: &mut Bootloader<C, F, N>,
    host_detected: bool,
) -> Result<BootOutcome, SessionError>
where
    C: ByteChannel,
    F: FlashEngine,
    N: NotificationSink,
{
    if host_detected {
        return bootloader.run().map(BootOutcome::Updated);
    }

    match application_entry(bootloader.flash(), bootloader.layout()) {
        Ok(entry) => {
            info!(entry = %format!("0x{:04X}", entry), "No host, starting application");
            Ok(BootOutcome::Application { entry })
        }
        Err(fault) => {
            bootloader.halt(fault);
            Err(fault.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::flash::SimulatedFlash;
    use crate::notify::{Notification, RecordingSink};
    use crate::session::SessionState;

    fn bootloader(flash: SimulatedFlash) -> Bootloader<MockChannel, SimulatedFlash, RecordingSink> {
        Bootloader::new(
            MockChannel::new(),
            flash,
            RecordingSink::new(),
            DeviceLayout::default(),
        )
    }

    #[test]
    fn test_blank_part_has_no_firmware() {
        let layout = DeviceLayout::default();
        let mut bl = bootloader(SimulatedFlash::new(&layout));
        let err = startup(&mut bl, false).unwrap_err();
        assert_eq!(err.fault(), Some(Fault::NoFirmwareInstalled));
        assert_eq!(bl.state(), SessionState::Faulted(Fault::NoFirmwareInstalled));
        assert_eq!(bl.notifier().diagnostics(), vec![Notification::NoFirmware]);
    }

    #[test]
    fn test_installed_application_is_started() {
        let layout = DeviceLayout::default();
        let mut flash = SimulatedFlash::new(&layout);
        flash.preload(layout.relocation_slot, &[0x12, 0xEF, 0x00, 0xF0]);
        let mut bl = bootloader(flash);
        assert_eq!(
            startup(&mut bl, false).unwrap(),
            BootOutcome::Application { entry: 0x7FC0 }
        );
        assert!(bl.notifier().diagnostics().is_empty());
    }

    #[test]
    fn test_partially_erased_slot_counts_as_installed() {
        let layout = DeviceLayout::default();
        let mut flash = SimulatedFlash::new(&layout);
        flash.preload(layout.relocation_slot + 3, &[0x00]);
        assert_eq!(application_entry(&flash, &layout), Ok(0x7FC0));
    }
}
