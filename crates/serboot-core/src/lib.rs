//! Serboot-Core: serial in-field firmware update for PIC18 parts.
//!
//! The device side is a small bootloader that lives at the top of program
//! flash and accepts framed commands over a UART. The host side turns an
//! Intel HEX image into the matching frame stream.
//!
//! # Architecture
//!
//! - **Protocol**: Framing, CRC-16/CCITT, command payloads
//! - **Channel**: Byte source abstraction (serial port, mock)
//! - **Flash**: Programming engine with bootloader write protection
//! - **Vector**: Reset vector relocation
//! - **Session**: Frame dispatcher and fault handling
//! - **Boot**: Power-on decision between update and application
//! - **Loader**: HEX parsing, update planning, host transmission
//!
//! # Example
//!
//! ```no_run
//! use serboot_core::{Bootloader, DeviceLayout, MockChannel, NullSink, SimulatedFlash};
//!
//! let layout = DeviceLayout::default();
//! let flash = SimulatedFlash::new(&layout);
//! let mut device = Bootloader::new(MockChannel::new(), flash, NullSink, layout);
//! let report = device.run().expect("update failed");
//! println!("vector restored: {}", report.vector_restored);
//! ```

pub mod boot;
pub mod channel;
pub mod config;
pub mod fault;
pub mod flash;
pub mod loader;
pub mod notify;
pub mod protocol;
pub mod session;
pub mod vector;

// Re-exports for convenience
pub use boot::{BootOutcome, application_entry, startup};
pub use channel::{ByteChannel, ChannelError, MockChannel, SerialChannel};
pub use config::{DeviceLayout, LayoutError};
pub use fault::{Fault, SessionError};
pub use flash::{FlashEngine, FlashOp, FlashProgrammer, SimulatedFlash, UnlockFlag};
pub use loader::{
    HexFile, LoadSummary, Loader, LoaderConfig, LoaderError, UpdatePlan, simulate,
};
pub use notify::{Notification, NotificationSink, NullSink, RecordingSink, TracingSink};
pub use session::{Bootloader, SessionState};
pub use vector::{FinishReport, VectorState, trampoline};
