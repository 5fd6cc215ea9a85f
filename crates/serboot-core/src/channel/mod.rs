//! Byte channel module.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::MockChannel;
pub use serial::{SerialChannel, open_port};
pub use traits::{ByteChannel, ChannelError};
