//! Host-facing run/exit contract: budget bounds, exit-reason consumption,
//! halt handling and the two cycle counters.

use cpu_core::{Cpu, CpuidConfig, ExitReason, GeneralRegister, InterruptController};
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

struct NoPic;

impl InterruptController for NoPic {
    fn acknowledge(&mut self) -> Option<u8> {
        None
    }
}

/// One mebibyte of RAM with a program staged at `entry`.
fn cpu_with_program(entry: u32, program: &[u8]) -> Cpu {
    let mut cpu = Cpu::new();
    cpu.init_mem(0x10_0000).expect("ram sizing");
    cpu.write_memory(entry, program);
    cpu.regs.set_eip(entry);
    cpu.regs.set_gpr(GeneralRegister::Esp, 0x8000);
    cpu
}

#[test]
fn halt_scenario_with_identity_installed() {
    let mut cpu = cpu_with_program(0x7C00, &[0xF4]);
    cpu.set_cpuid(&CpuidConfig {
        vendor: "TESTCPU".to_owned(),
        level: 1,
        ..CpuidConfig::default()
    })
    .expect("valid identity");

    let executed = cpu.run(1000, &mut NoPic);

    assert!(executed >= 1 && executed < 10);
    assert!(cpu.is_in_halt());
    assert_eq!(cpu.exit_reason(), ExitReason::Hlt);
    assert!(cpu.cycles() > 0);
}

#[test]
fn exit_reason_is_consumed_exactly_once_after_hlt() {
    let mut cpu = cpu_with_program(0x1000, &[0xF4]);

    cpu.run(100, &mut NoPic);

    assert_eq!(cpu.exit_reason(), ExitReason::Hlt);
    assert_eq!(cpu.exit_reason(), ExitReason::Normal);
}

#[test]
fn exit_reason_is_consumed_exactly_once_after_async() {
    let mut cpu = cpu_with_program(0x1000, &[0x90, 0xEB, 0xFD]);
    cpu.request_fast_return(true);

    let executed = cpu.run(100, &mut NoPic);

    assert_eq!(executed, 0);
    assert_eq!(cpu.exit_reason(), ExitReason::Async);
    assert_eq!(cpu.exit_reason(), ExitReason::Normal);
}

#[test]
fn fast_return_does_not_disturb_the_micro_state() {
    let mut cpu = cpu_with_program(0x1000, &[0xF4]);
    cpu.run(10, &mut NoPic);
    assert_eq!(cpu.exit_reason(), ExitReason::Hlt);

    cpu.request_fast_return(true);
    let executed = cpu.run(10, &mut NoPic);

    assert_eq!(executed, 0);
    assert_eq!(cpu.exit_reason(), ExitReason::Async);
    assert!(cpu.is_in_halt());
}

#[test]
fn zero_budget_run_executes_nothing_and_reports_normal() {
    let mut cpu = cpu_with_program(0x1000, &[0x90]);

    assert_eq!(cpu.run(0, &mut NoPic), 0);
    assert_eq!(cpu.exit_reason(), ExitReason::Normal);
    assert_eq!(cpu.cycles(), 0);
}

#[test]
fn running_while_halted_consumes_nothing() {
    let mut cpu = cpu_with_program(0x1000, &[0xF4]);
    cpu.run(10, &mut NoPic);
    let _ = cpu.exit_reason();

    let executed = cpu.run(500, &mut NoPic);

    assert_eq!(executed, 0);
    assert_eq!(cpu.exit_reason(), ExitReason::Hlt);
    assert_eq!(cpu.real_cycles(), 1);
}

#[test]
fn forced_halt_behaves_like_an_executed_hlt() {
    let mut cpu = cpu_with_program(0x1000, &[0x90, 0x90]);
    cpu.halt();

    assert!(cpu.is_in_halt());
    assert_eq!(cpu.run(100, &mut NoPic), 0);
    assert_eq!(cpu.exit_reason(), ExitReason::Hlt);
    assert_eq!(cpu.real_cycles(), 0);
}

#[test]
fn idle_time_advances_cycles_but_never_real_cycles() {
    let mut cpu = cpu_with_program(0x1000, &[0xF4]);
    cpu.run(10, &mut NoPic);

    let cycles_at_halt = cpu.cycles();
    let retired_at_halt = cpu.real_cycles();

    cpu.add_cycles(5000);
    cpu.run(100, &mut NoPic);

    assert_eq!(cpu.cycles(), cycles_at_halt + 5000);
    assert_eq!(cpu.real_cycles(), retired_at_halt);
}

proptest! {
    #[test]
    fn run_never_exceeds_its_budget(budget in 0_u64..2000) {
        // Jump-to-self: the only bound is the budget.
        let mut cpu = cpu_with_program(0x1000, &[0xEB, 0xFE]);

        let executed = cpu.run(budget, &mut NoPic);

        prop_assert!(executed <= budget);
        prop_assert_eq!(executed, budget);
        prop_assert_eq!(cpu.exit_reason(), ExitReason::Normal);
    }

    #[test]
    fn cycle_counter_is_monotonic_across_run_and_add_cycles(
        ops in prop::collection::vec((any::<bool>(), 0_u64..200), 0..24)
    ) {
        let mut cpu = cpu_with_program(0x1000, &[0xEB, 0xFE]);
        let mut pic = NoPic;
        let mut previous = cpu.cycles();

        for (is_run, amount) in ops {
            if is_run {
                cpu.run(amount, &mut pic);
            } else {
                cpu.add_cycles(amount);
            }
            prop_assert!(cpu.cycles() >= previous);
            previous = cpu.cycles();
        }
    }

    #[test]
    fn arbitrary_guest_bytes_never_panic_the_engine(
        program in prop::collection::vec(any::<u8>(), 1..64),
        budget in 1_u64..64,
    ) {
        let mut cpu = cpu_with_program(0x1000, &program);

        let executed = cpu.run(budget, &mut NoPic);

        prop_assert!(executed <= budget);
    }
}
