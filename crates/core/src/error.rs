//! Error types for the diagnostic monitor.
//!
//! Every variant here is a per-token fault: the dispatcher answers it with
//! the `?<token>?` reply on the diagnostic stream and resumes parsing at the
//! next whitespace boundary. Nothing in this module ever tears down a
//! session or the simulator.

use thiserror::Error;

/// Faults raised while parsing or applying one diagnostic command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiagError {
    /// Token shape not recognized at all
    #[error("malformed token")]
    Malformed,

    /// Valid shape, but the device has no such register
    #[error("no register {index} on {device}")]
    BadRegister { device: &'static str, index: u8 },

    /// Valid shape, but the pin index is outside the port width
    #[error("no input pin {0}")]
    BadPin(u32),

    /// Address outside the simulated flash/SRAM/peripheral ranges
    #[error("address 0x{0:08x} outside simulated memory")]
    BadAddress(u32),

    /// Memory cells are 32-bit words; the address must be 4-byte aligned
    #[error("address 0x{0:08x} is not word aligned")]
    Unaligned(u32),

    /// Mutating action aimed at a read-only cell
    #[error("{0} is read-only")]
    ReadOnly(&'static str),

    /// Action requires a parameter and none was given
    #[error("missing parameter")]
    MissingParam,

    /// Action takes no parameter but one was given
    #[error("unexpected parameter")]
    UnexpectedParam,

    /// Single-bit action with an index above 31
    #[error("bit index {0} out of range")]
    BadBitIndex(u32),
}

pub type Result<T> = std::result::Result<T, DiagError>;
