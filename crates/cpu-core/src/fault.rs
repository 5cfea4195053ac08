//! Guest-visible fault taxonomy.
//!
//! Faults are delivered into the guest's own handler path through the
//! vector table; they are never surfaced to the host as errors. A fault
//! raised while another fault is being delivered escalates to a double
//! fault, and a failed double-fault delivery shuts the core down (the
//! triple-fault condition).

use thiserror::Error;

/// Faults the execution engine can inject into the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Fault {
    /// The fetched byte sequence does not decode to a known instruction.
    #[error("invalid opcode")]
    InvalidOpcode,
    /// A fault occurred while a fault was already being delivered.
    #[error("double fault")]
    DoubleFault,
}

impl Fault {
    /// Returns the architectural vector this fault is delivered through.
    #[must_use]
    pub const fn vector(self) -> u8 {
        match self {
            Self::InvalidOpcode => 6,
            Self::DoubleFault => 8,
        }
    }

    /// Returns `true` when a failed delivery of this fault shuts the core
    /// down instead of escalating further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::DoubleFault)
    }
}
