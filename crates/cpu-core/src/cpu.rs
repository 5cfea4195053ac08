//! The CPU context: exclusive owner of register, memory, interrupt and
//! accounting state, plus the host-facing setup and control surface.
//!
//! A context is an explicitly owned value; nothing in this crate keeps
//! process-wide state. Hosts serialize access themselves: the core runs
//! entirely on the calling thread and suspension is purely return-based.

#![allow(clippy::cast_possible_truncation)]

use std::fmt::Write as _;
use std::sync::Arc;

use crate::cpuid::{CpuidConfig, CpuidConfigError, IdentityTable};
use crate::exec::decode::DecodedInst;
use crate::intr::IntrLine;
use crate::memory::{CodeCache, MemoryError, PhysMemory};
use crate::state::exit::ExitReason;
use crate::state::registers::RegisterFile;

/// A single emulated CPU with its memory, identity and interrupt state.
#[derive(Debug)]
pub struct Cpu {
    /// Architectural register file. Public so hosts, loaders and tests
    /// can stage or inspect guest state directly.
    pub regs: RegisterFile,
    pub(crate) mem: PhysMemory,
    pub(crate) code_cache: CodeCache<DecodedInst>,
    pub(crate) identity: IdentityTable,
    pub(crate) intr_line: IntrLine,
    pub(crate) intr_inhibit: bool,
    pub(crate) fast_return: bool,
    pub(crate) halted: bool,
    pub(crate) shutdown: bool,
    pub(crate) exit: ExitReason,
    pub(crate) cycles: u64,
    pub(crate) retired: u64,
    pub(crate) apic_connected: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Creates a context in its power-on state: no RAM, no ROM, no
    /// identity installed, A20 enabled, INTR line low.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::default(),
            mem: PhysMemory::new(),
            code_cache: CodeCache::new(),
            identity: IdentityTable::default(),
            intr_line: IntrLine::new(),
            intr_inhibit: false,
            fast_return: false,
            halted: false,
            shutdown: false,
            exit: ExitReason::Normal,
            cycles: 0,
            retired: 0,
            apic_connected: false,
        }
    }

    /// Restores the power-on execution state without reallocating.
    ///
    /// RAM contents, ROM registrations, the installed identity table and
    /// the APIC wiring survive; registers, counters, the INTR line, the
    /// halt/shutdown latches, the stored exit reason and the A20 gate do
    /// not. Cached translations are dropped.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.intr_line.lower();
        self.intr_inhibit = false;
        self.fast_return = false;
        self.halted = false;
        self.shutdown = false;
        self.exit = ExitReason::Normal;
        self.cycles = 0;
        self.retired = 0;
        self.mem.set_a20(true);
        self.code_cache.clear();
    }

    /// Sizes and zero-fills the RAM extent at physical address zero.
    ///
    /// # Errors
    ///
    /// See [`MemoryError`]; the context is unchanged on failure.
    pub fn init_mem(&mut self, size: u64) -> Result<(), MemoryError> {
        self.mem.init_ram(size)
    }

    /// Registers a read-only region backed by `data`.
    ///
    /// Guest and host writes into the region are silently dropped; the
    /// backing buffer is never mutated.
    ///
    /// # Errors
    ///
    /// See [`MemoryError`]; the context is unchanged on failure.
    pub fn add_rom(&mut self, addr: u32, data: Arc<[u8]>) -> Result<(), MemoryError> {
        self.mem.add_rom(addr, data)
    }

    /// Validates and installs the processor identity configuration.
    ///
    /// Identity-query instructions read the installed table verbatim from
    /// then on.
    ///
    /// # Errors
    ///
    /// See [`CpuidConfigError`]; the previous identity survives a failed
    /// install.
    pub fn set_cpuid(&mut self, config: &CpuidConfig) -> Result<(), CpuidConfigError> {
        self.identity = IdentityTable::install(config)?;
        Ok(())
    }

    /// Host-side bulk write that bypasses guest write semantics.
    ///
    /// Used for initial state loading and debugger pokes. Translation
    /// cache pages aliased by the range are invalidated before their
    /// bytes land; ROM-backed and unmapped bytes in the range are
    /// skipped.
    pub fn write_memory(&mut self, addr: u32, bytes: &[u8]) {
        for (offset, byte) in bytes.iter().enumerate() {
            self.guest_write_u8(addr.wrapping_add(offset as u32), *byte);
        }
    }

    /// Drops cached code translations for the page containing `addr`.
    pub fn invalidate_page(&mut self, addr: u32) {
        let phys = self.mem.mask_addr(addr);
        self.code_cache.invalidate_page(phys);
    }

    /// Borrows the RAM extent for external inspection (debuggers, DMA
    /// models). Empty until [`Cpu::init_mem`] succeeds.
    #[must_use]
    pub fn ram(&self) -> &[u8] {
        self.mem.ram()
    }

    /// Enables or disables address-line-20 masking for every subsequent
    /// fetch, read and write.
    pub fn set_a20(&mut self, enabled: bool) {
        self.mem.set_a20(enabled);
    }

    /// Returns the current A20 gate state.
    #[must_use]
    pub const fn a20_enabled(&self) -> bool {
        self.mem.a20_enabled()
    }

    /// Forces the halted micro-state outside the normal instruction
    /// stream.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Reports whether the CPU sits in the halted micro-state, waiting
    /// for an interrupt (or, after a triple fault, for reset).
    #[must_use]
    pub const fn is_in_halt(&self) -> bool {
        self.halted
    }

    /// Reports whether a triple fault latched the context shut.
    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    /// Asks the engine to stop consuming budget at the next instruction
    /// boundary, regardless of cycles remaining.
    ///
    /// Advisory: honored at the next boundary, never preemptively. The
    /// run exits with [`ExitReason::Async`] and the halted/running
    /// micro-state is left as it was.
    pub fn request_fast_return(&mut self, enable: bool) {
        self.fast_return = enable;
    }

    /// Reserved host hook for preemptive break-out designs.
    ///
    /// The cooperative engine already returns at every exit condition, so
    /// this does nothing today; use [`Cpu::request_fast_return`] to end a
    /// run early.
    #[allow(clippy::unused_self)]
    pub fn set_break(&mut self) {}

    /// Drives the level-triggered INTR line high. Idempotent.
    pub fn raise_intr_line(&mut self) {
        self.intr_line.raise();
    }

    /// Drives the level-triggered INTR line low. Idempotent.
    pub fn lower_intr_line(&mut self) {
        self.intr_line.lower();
    }

    /// Returns `true` iff the INTR line is raised and the guest's
    /// interrupt-enable flag is set.
    #[must_use]
    pub const fn interrupt_pending(&self) -> bool {
        self.intr_line.is_raised() && self.regs.interrupts_enabled()
    }

    /// Returns and consumes the reason the last run terminated.
    ///
    /// Reading resets the stored reason to [`ExitReason::Normal`], so
    /// each exit is observed exactly once.
    pub fn exit_reason(&mut self) -> ExitReason {
        std::mem::take(&mut self.exit)
    }

    /// Advances the device-timing cycle counter without executing
    /// anything; the host calls this to model elapsed idle time while
    /// the CPU is halted.
    pub fn add_cycles(&mut self, count: u64) {
        self.cycles = self.cycles.saturating_add(count);
    }

    /// Total cycle-equivalent count: advanced per executed instruction
    /// and by [`Cpu::add_cycles`]. Monotonically non-decreasing between
    /// resets; suitable for device timing.
    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Instructions actually retired. Never advances while halted or
    /// faulting; suitable for instructions-per-second reporting.
    #[must_use]
    pub const fn real_cycles(&self) -> u64 {
        self.retired
    }

    /// Reports whether an external APIC is wired to this context,
    /// consulted by identity semantics and interrupt-delivery policy.
    #[must_use]
    pub const fn apic_connected(&self) -> bool {
        self.apic_connected
    }

    /// Wires or unwires an external APIC.
    pub fn set_apic_connected(&mut self, connected: bool) {
        self.apic_connected = connected;
    }

    /// Renders a one-stop state summary for debug front-ends.
    #[must_use]
    pub fn debug_dump(&self) -> String {
        use crate::state::registers::{GeneralRegister, SegmentRegister};

        let mut out = String::new();
        for reg in GeneralRegister::ALL {
            let _ = write!(out, "{reg:?}={:08x} ", self.regs.gpr(reg));
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "eip={:08x} eflags={:08x}",
            self.regs.eip(),
            self.regs.eflags()
        );
        for seg in SegmentRegister::ALL {
            let _ = write!(out, "{seg:?}={:04x} ", self.regs.seg(seg));
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "halted={} shutdown={} intr_line={} cycles={} retired={}",
            self.halted,
            self.shutdown,
            self.intr_line.is_raised(),
            self.cycles,
            self.retired
        );
        out
    }

    /// Guest-visible byte write: invalidates aliased code translations
    /// before routing the byte through the memory map.
    pub(crate) fn guest_write_u8(&mut self, addr: u32, value: u8) {
        let phys = self.mem.mask_addr(addr);
        if self.code_cache.contains_page(phys) {
            self.code_cache.invalidate_page(phys);
        }
        self.mem.write_u8(phys, value);
    }

    /// Guest-visible 32-bit write, one masked byte at a time.
    pub(crate) fn guest_write_u32(&mut self, addr: u32, value: u32) {
        for (offset, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.guest_write_u8(addr.wrapping_add(offset as u32), byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cpu;
    use crate::memory::MemoryError;
    use crate::state::exit::ExitReason;
    use crate::state::registers::{GeneralRegister, EFLAGS_IF, RESET_EIP};

    #[test]
    fn new_context_is_quiescent() {
        let mut cpu = Cpu::new();
        assert!(!cpu.is_in_halt());
        assert!(!cpu.interrupt_pending());
        assert_eq!(cpu.cycles(), 0);
        assert_eq!(cpu.real_cycles(), 0);
        assert_eq!(cpu.exit_reason(), ExitReason::Normal);
        assert!(cpu.ram().is_empty());
        assert!(!cpu.apic_connected());
    }

    #[test]
    fn setup_errors_leave_prior_state_unchanged() {
        let mut cpu = Cpu::new();
        cpu.init_mem(0x1000).expect("ram");

        assert_eq!(cpu.init_mem(0x2000), Err(MemoryError::AlreadyInitialized));
        assert_eq!(cpu.ram().len(), 0x1000);
    }

    #[test]
    fn reset_restores_execution_state_but_keeps_memory() {
        let mut cpu = Cpu::new();
        cpu.init_mem(0x1000).expect("ram");
        cpu.write_memory(0x0100, &[0xAB]);
        cpu.regs.set_gpr(GeneralRegister::Eax, 7);
        cpu.regs.set_flag(EFLAGS_IF, true);
        cpu.raise_intr_line();
        cpu.halt();
        cpu.add_cycles(50);
        cpu.set_a20(false);

        cpu.reset();

        assert_eq!(cpu.regs.eip(), RESET_EIP);
        assert_eq!(cpu.regs.gpr(GeneralRegister::Eax), 0);
        assert!(!cpu.is_in_halt());
        assert!(!cpu.interrupt_pending());
        assert_eq!(cpu.cycles(), 0);
        assert!(cpu.a20_enabled());
        assert_eq!(cpu.ram()[0x0100], 0xAB);
    }

    #[test]
    fn exit_reason_is_consumed_exactly_once() {
        let mut cpu = Cpu::new();
        cpu.exit = ExitReason::Hlt;

        assert_eq!(cpu.exit_reason(), ExitReason::Hlt);
        assert_eq!(cpu.exit_reason(), ExitReason::Normal);
    }

    #[test]
    fn pending_predicate_needs_both_line_and_enable_flag() {
        let mut cpu = Cpu::new();
        assert!(!cpu.interrupt_pending());

        cpu.raise_intr_line();
        assert!(!cpu.interrupt_pending());

        cpu.regs.set_flag(EFLAGS_IF, true);
        assert!(cpu.interrupt_pending());

        cpu.lower_intr_line();
        assert!(!cpu.interrupt_pending());
    }

    #[test]
    fn add_cycles_advances_only_the_timing_counter() {
        let mut cpu = Cpu::new();
        cpu.add_cycles(123);
        assert_eq!(cpu.cycles(), 123);
        assert_eq!(cpu.real_cycles(), 0);
    }

    #[test]
    fn set_break_is_a_functional_no_op() {
        let mut cpu = Cpu::new();
        let before = cpu.debug_dump();
        cpu.set_break();
        assert_eq!(cpu.debug_dump(), before);
    }

    #[test]
    fn debug_dump_mentions_key_state() {
        let mut cpu = Cpu::new();
        cpu.halt();
        let dump = cpu.debug_dump();
        assert!(dump.contains("eip="));
        assert!(dump.contains("halted=true"));
    }
}
