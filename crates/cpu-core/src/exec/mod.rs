//! Fetch-decode-execute engine and the cooperative run loop.
//!
//! The run loop consumes a cycle budget one instruction at a time. At
//! every instruction boundary it honours, in order: a pending fast-return
//! request, the shutdown latch, the halted micro-state, the one-boundary
//! interrupt shadow left by `STI`, and finally maskable-interrupt
//! sampling. Taking a line-based interrupt acknowledges the external
//! controller for the vector and re-enters the loop without surfacing
//! anything to the host; only budget exhaustion, `HLT` and fast-return
//! end a run.
//!
//! Faults are delivered through the guest's vector table (four-byte
//! little-endian handler addresses starting at physical zero). A vector
//! entry reading as the open-bus pattern is treated as unwired: delivery
//! fails, escalates to a double fault, and a failed double-fault delivery
//! shuts the core down until reset. The same escalation applies when a
//! software interrupt or an acknowledged hardware vector is unwired.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

/// Instruction decoder for the supported subset.
pub mod decode;

use crate::cpu::Cpu;
use crate::exec::decode::{decode, DecodedInst, Op, MAX_INST_LEN};
use crate::fault::Fault;
use crate::intr::InterruptController;
use crate::state::exit::ExitReason;
use crate::state::registers::{
    GeneralRegister, EFLAGS_CF, EFLAGS_IF, EFLAGS_OF, EFLAGS_SF, EFLAGS_ZF,
};

/// Vector-table entry value meaning "nothing is wired here" (the open-bus
/// read pattern).
const UNWIRED_ENTRY: u32 = u32::MAX;

/// Boundary decision taken before each instruction. The interrupt case is
/// internal control flow only; it never reaches the host.
enum LoopStatus {
    Continue,
    TakeIrq,
    Exit(ExitReason),
}

/// Outcome of one executed (or faulted) instruction.
enum StepOutcome {
    Retired,
    Halted,
    Faulted,
    Shutdown,
}

struct DeliveryFailed;

impl Cpu {
    /// Executes guest instructions until the cycle budget is exhausted,
    /// the CPU halts, or an asynchronous exit is requested.
    ///
    /// Returns the number of cycles actually consumed, never more than
    /// `budget`. The exit reason is stored on every return path and read
    /// (once) through [`Cpu::exit_reason`]. `intc` is acknowledged
    /// whenever a line-based interrupt is taken.
    ///
    /// Calling this before memory is initialized is not fatal: fetches
    /// read open-bus bytes and the guest immediately walks the fault
    /// escalation path.
    pub fn run(&mut self, budget: u64, intc: &mut dyn InterruptController) -> u64 {
        let mut executed = 0_u64;

        let reason = loop {
            if executed >= budget {
                break ExitReason::Normal;
            }

            match self.boundary_status() {
                LoopStatus::Exit(reason) => break reason,
                LoopStatus::TakeIrq => {
                    if self.take_line_interrupt(intc) {
                        continue;
                    }
                    // Spurious acknowledge: nothing was delivered.
                    if self.halted {
                        break ExitReason::Hlt;
                    }
                }
                LoopStatus::Continue => {}
            }

            executed += 1;
            self.cycles += 1;

            match self.step() {
                StepOutcome::Retired | StepOutcome::Faulted => {}
                StepOutcome::Halted | StepOutcome::Shutdown => break ExitReason::Hlt,
            }
        };

        self.exit = reason;
        executed
    }

    /// Injects a specific vector right now, bypassing the INTR-line
    /// protocol and the maskable-interrupt gate.
    ///
    /// Wakes a halted CPU. An unwired vector entry escalates through the
    /// double-fault path like any other failed delivery. Ignored after a
    /// triple-fault shutdown; only [`Cpu::reset`] recovers from that.
    pub fn raise_interrupt(&mut self, vector: u8) {
        if self.shutdown {
            return;
        }
        self.halted = false;
        if self.deliver_event(vector).is_err() {
            let _ = self.raise_fault(Fault::DoubleFault);
        }
    }

    fn boundary_status(&mut self) -> LoopStatus {
        if self.fast_return {
            self.fast_return = false;
            return LoopStatus::Exit(ExitReason::Async);
        }
        if self.shutdown {
            return LoopStatus::Exit(ExitReason::Hlt);
        }
        if self.halted {
            if self.interrupt_pending() {
                return LoopStatus::TakeIrq;
            }
            return LoopStatus::Exit(ExitReason::Hlt);
        }
        if self.intr_inhibit {
            // STI shadow: skip sampling for exactly one boundary.
            self.intr_inhibit = false;
            return LoopStatus::Continue;
        }
        if self.interrupt_pending() {
            return LoopStatus::TakeIrq;
        }
        LoopStatus::Continue
    }

    fn take_line_interrupt(&mut self, intc: &mut dyn InterruptController) -> bool {
        let Some(vector) = intc.acknowledge() else {
            return false;
        };
        self.halted = false;
        if self.deliver_event(vector).is_err() {
            let _ = self.raise_fault(Fault::DoubleFault);
        }
        true
    }

    fn step(&mut self) -> StepOutcome {
        let inst = match self.fetch_decode(self.regs.eip()) {
            Ok(inst) => inst,
            Err(fault) => return self.raise_fault(fault),
        };
        self.execute(inst)
    }

    fn fetch_decode(&mut self, eip: u32) -> Result<DecodedInst, Fault> {
        let phys = self.mem.mask_addr(eip);
        if let Some(inst) = self.code_cache.lookup(phys) {
            return Ok(*inst);
        }

        let mut window = [0_u8; MAX_INST_LEN];
        for (offset, slot) in window.iter_mut().enumerate() {
            *slot = self.mem.read_u8(eip.wrapping_add(offset as u32));
        }

        let inst = decode(&window)?;
        self.code_cache.insert(phys, u32::from(inst.len), inst);
        Ok(inst)
    }

    fn execute(&mut self, inst: DecodedInst) -> StepOutcome {
        let next_eip = self.regs.eip().wrapping_add(u32::from(inst.len));
        let mut outcome = StepOutcome::Retired;

        match inst.op {
            Op::Nop => self.regs.set_eip(next_eip),
            Op::Hlt => {
                self.regs.set_eip(next_eip);
                self.halted = true;
                outcome = StepOutcome::Halted;
            }
            Op::Cli => {
                self.regs.set_flag(EFLAGS_IF, false);
                self.regs.set_eip(next_eip);
            }
            Op::Sti => {
                if !self.regs.interrupts_enabled() {
                    self.regs.set_flag(EFLAGS_IF, true);
                    // Interrupts are not sampled until after the next
                    // instruction retires.
                    self.intr_inhibit = true;
                }
                self.regs.set_eip(next_eip);
            }
            Op::MovRegImm { reg, imm } => {
                self.regs.set_gpr(reg, imm);
                self.regs.set_eip(next_eip);
            }
            Op::LoadEax { addr } => {
                let value = self.mem.read_u32(addr);
                self.regs.set_gpr(GeneralRegister::Eax, value);
                self.regs.set_eip(next_eip);
            }
            Op::StoreEax { addr } => {
                let value = self.regs.gpr(GeneralRegister::Eax);
                self.guest_write_u32(addr, value);
                self.regs.set_eip(next_eip);
            }
            Op::AddEaxImm { imm } => {
                let value = self.regs.gpr(GeneralRegister::Eax);
                let result = self.add_with_flags(value, imm);
                self.regs.set_gpr(GeneralRegister::Eax, result);
                self.regs.set_eip(next_eip);
            }
            Op::SubEaxImm { imm } => {
                let value = self.regs.gpr(GeneralRegister::Eax);
                let result = self.sub_with_flags(value, imm);
                self.regs.set_gpr(GeneralRegister::Eax, result);
                self.regs.set_eip(next_eip);
            }
            Op::Inc { reg } => {
                let result = self.regs.gpr(reg).wrapping_add(1);
                self.set_inc_dec_flags(result, result == 0x8000_0000);
                self.regs.set_gpr(reg, result);
                self.regs.set_eip(next_eip);
            }
            Op::Dec { reg } => {
                let result = self.regs.gpr(reg).wrapping_sub(1);
                self.set_inc_dec_flags(result, result == 0x7FFF_FFFF);
                self.regs.set_gpr(reg, result);
                self.regs.set_eip(next_eip);
            }
            Op::JmpRel { rel } => {
                self.regs.set_eip(next_eip.wrapping_add(rel as u32));
            }
            Op::Jz { rel } => {
                let target = if self.regs.flag_is_set(EFLAGS_ZF) {
                    next_eip.wrapping_add(rel as u32)
                } else {
                    next_eip
                };
                self.regs.set_eip(target);
            }
            Op::Jnz { rel } => {
                let target = if self.regs.flag_is_set(EFLAGS_ZF) {
                    next_eip
                } else {
                    next_eip.wrapping_add(rel as u32)
                };
                self.regs.set_eip(target);
            }
            Op::Cpuid => {
                let selector = self.regs.gpr(GeneralRegister::Eax);
                let result = self.identity.query(selector);
                self.regs.set_gpr(GeneralRegister::Eax, result.eax);
                self.regs.set_gpr(GeneralRegister::Ebx, result.ebx);
                self.regs.set_gpr(GeneralRegister::Ecx, result.ecx);
                self.regs.set_gpr(GeneralRegister::Edx, result.edx);
                self.regs.set_eip(next_eip);
            }
            Op::Int { vector } => {
                self.regs.set_eip(next_eip);
                if self.deliver_event(vector).is_err() {
                    self.retired += 1;
                    return self.raise_fault(Fault::DoubleFault);
                }
            }
            Op::Iret => {
                let return_eip = self.pop_u32();
                let flags = self.pop_u32();
                self.regs.set_eip(return_eip);
                self.regs.set_eflags(flags);
            }
        }

        self.retired += 1;
        outcome
    }

    /// Delivers an interrupt, software interrupt or fault frame: pushes
    /// `EFLAGS` and the return address, clears `IF`, and continues at the
    /// handler named by the vector table.
    fn deliver_event(&mut self, vector: u8) -> Result<(), DeliveryFailed> {
        let handler = self.mem.read_u32(u32::from(vector) * 4);
        if handler == UNWIRED_ENTRY {
            return Err(DeliveryFailed);
        }

        self.push_u32(self.regs.eflags());
        self.push_u32(self.regs.eip());
        self.regs.set_flag(EFLAGS_IF, false);
        self.intr_inhibit = false;
        self.regs.set_eip(handler);
        Ok(())
    }

    /// Injects a fault into the guest handler path, escalating to a
    /// double fault and, past that, to the triple-fault shutdown.
    fn raise_fault(&mut self, fault: Fault) -> StepOutcome {
        if self.deliver_event(fault.vector()).is_ok() {
            return StepOutcome::Faulted;
        }
        if fault.is_terminal() {
            self.halted = true;
            self.shutdown = true;
            return StepOutcome::Shutdown;
        }
        self.raise_fault(Fault::DoubleFault)
    }

    fn push_u32(&mut self, value: u32) {
        let esp = self.regs.gpr(GeneralRegister::Esp).wrapping_sub(4);
        self.regs.set_gpr(GeneralRegister::Esp, esp);
        self.guest_write_u32(esp, value);
    }

    fn pop_u32(&mut self) -> u32 {
        let esp = self.regs.gpr(GeneralRegister::Esp);
        let value = self.mem.read_u32(esp);
        self.regs.set_gpr(GeneralRegister::Esp, esp.wrapping_add(4));
        value
    }

    fn set_arith_flags(&mut self, result: u32, carry: bool, overflow: bool) {
        self.regs.set_flag(EFLAGS_ZF, result == 0);
        self.regs.set_flag(EFLAGS_SF, (result & 0x8000_0000) != 0);
        self.regs.set_flag(EFLAGS_CF, carry);
        self.regs.set_flag(EFLAGS_OF, overflow);
    }

    fn add_with_flags(&mut self, a: u32, b: u32) -> u32 {
        let (result, carry) = a.overflowing_add(b);
        let overflow = ((a ^ result) & (b ^ result) & 0x8000_0000) != 0;
        self.set_arith_flags(result, carry, overflow);
        result
    }

    fn sub_with_flags(&mut self, a: u32, b: u32) -> u32 {
        let (result, borrow) = a.overflowing_sub(b);
        let overflow = ((a ^ b) & (a ^ result) & 0x8000_0000) != 0;
        self.set_arith_flags(result, borrow, overflow);
        result
    }

    /// `INC`/`DEC` update ZF/SF/OF but leave CF untouched.
    fn set_inc_dec_flags(&mut self, result: u32, overflow: bool) {
        self.regs.set_flag(EFLAGS_ZF, result == 0);
        self.regs.set_flag(EFLAGS_SF, (result & 0x8000_0000) != 0);
        self.regs.set_flag(EFLAGS_OF, overflow);
    }
}
