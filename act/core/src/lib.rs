//! Emulator core for the ACT processor, the 4-bit serial arithmetic
//! controller behind a family of late-1970s handheld RPN calculators.
//!
//! The core is cycle stepped: the host owns the loop and calls
//! [`Processor::tick`] at whatever rate it likes; each tick fetches one
//! 10-bit word from the borrowed [`RomImage`] and applies its effect to
//! the processor state. Mask-ROM images from the physical devices run
//! unchanged, so the carry discipline, the permuted pointer tables and
//! the sticky status bits are reproduced bit for bit.
//!
//! The windowing shell, keypad layouts and display rendering live with
//! the host; the observable surface here is the register file, the
//! status and flag words, and the optional execution trace.

pub mod constants;
pub mod decode;
pub mod execute;
pub mod processor;
pub mod register;
pub mod rom;

use thiserror::Error;

pub use decode::{mnemonic, Field};
pub use execute::Fault;
pub use processor::{Flags, Processor, StateSummary};
pub use register::{RegId, Register, RegisterTag};
pub use rom::RomImage;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rom error: {0}")]
    InvalidRom(String),
    #[error("processor fault: {0}")]
    Fault(#[from] Fault),
}
