//! Flash module - program memory access.

pub mod programmer;
pub mod sim;
pub mod traits;

pub use programmer::{FlashProgrammer, UnlockFlag};
pub use sim::{FlashOp, SimulatedFlash};
pub use traits::FlashEngine;
