//! Execution core for the Arclight PC emulator.
//!
//! A [`Cpu`] context fetches, decodes and executes guest instructions
//! against emulated RAM/ROM, tracks elapsed cycles, and returns control
//! to the host through a cooperative run/exit protocol: the host hands
//! [`Cpu::run`] a cycle budget, then reads [`Cpu::exit_reason`] to learn
//! why control came back (budget exhausted, `HLT`, or an asynchronous
//! yield) and reacts: delivering interrupts, servicing device work, or
//! simply resuming. The core never spawns threads and never blocks;
//! suspension is purely return-based, and the host serializes all access
//! to a context.

/// The CPU context and host-facing control surface.
pub mod cpu;
pub use cpu::Cpu;

/// Processor identity model consulted by `CPUID`.
pub mod cpuid;
pub use cpuid::{
    CpuidConfig, CpuidConfigError, CpuidLeaf, CpuidLevelInfo, CpuidResult, IdentityTable,
    CPUID_LEAF_COUNT, VENDOR_ID_BYTES,
};

/// Fetch-decode-execute engine and run loop.
pub mod exec;
pub use exec::decode::{decode, DecodedInst, Op, MAX_INST_LEN};

/// Guest-visible fault taxonomy.
pub mod fault;
pub use fault::Fault;

/// INTR line state and the external interrupt-controller seam.
pub mod intr;
pub use intr::{InterruptController, IntrLine};

/// Guest physical memory model and code-translation cache.
pub mod memory;
pub use memory::{
    page_base, CodeCache, MemoryError, PhysMemory, RomRegion, A20_BIT, OPEN_BUS, PAGE_SHIFT,
    PAGE_SIZE, PHYS_ADDRESS_SPACE_BYTES,
};

/// Architectural CPU state model primitives.
pub mod state;
pub use state::exit::ExitReason;
pub use state::registers::{
    GeneralRegister, RegisterFile, SegmentRegister, EFLAGS_ACTIVE_MASK, EFLAGS_CF, EFLAGS_IF,
    EFLAGS_OF, EFLAGS_RESERVED1, EFLAGS_SF, EFLAGS_ZF, GENERAL_REGISTER_COUNT, RESET_EIP,
    SEGMENT_REGISTER_COUNT,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
