//! Instruction decoder for the flat-model IA-32 subset.
//!
//! Decoding works on a fixed-size fetch window and produces a compact
//! decoded form carrying the operation and its encoded length. Anything
//! the decoder does not recognise is an invalid-opcode fault for the
//! guest, never an error for the host.

#![allow(clippy::cast_possible_wrap)]

use crate::fault::Fault;
use crate::state::registers::GeneralRegister;

/// Longest encoding in the supported subset, in bytes.
pub const MAX_INST_LEN: usize = 5;

/// Operations the execution engine implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `NOP`
    Nop,
    /// `HLT`
    Hlt,
    /// `CLI`
    Cli,
    /// `STI`
    Sti,
    /// `MOV r32, imm32`
    MovRegImm {
        /// Destination register.
        reg: GeneralRegister,
        /// Immediate operand.
        imm: u32,
    },
    /// `MOV EAX, moffs32`
    LoadEax {
        /// Absolute source address.
        addr: u32,
    },
    /// `MOV moffs32, EAX`
    StoreEax {
        /// Absolute destination address.
        addr: u32,
    },
    /// `ADD EAX, imm32`
    AddEaxImm {
        /// Immediate operand.
        imm: u32,
    },
    /// `SUB EAX, imm32`
    SubEaxImm {
        /// Immediate operand.
        imm: u32,
    },
    /// `INC r32`
    Inc {
        /// Target register.
        reg: GeneralRegister,
    },
    /// `DEC r32`
    Dec {
        /// Target register.
        reg: GeneralRegister,
    },
    /// `JMP rel8` / `JMP rel32`
    JmpRel {
        /// Displacement from the end of the instruction.
        rel: i32,
    },
    /// `JZ rel8`
    Jz {
        /// Displacement from the end of the instruction.
        rel: i32,
    },
    /// `JNZ rel8`
    Jnz {
        /// Displacement from the end of the instruction.
        rel: i32,
    },
    /// `CPUID`
    Cpuid,
    /// `INT imm8`
    Int {
        /// Software-interrupt vector.
        vector: u8,
    },
    /// `IRET`
    Iret,
}

/// One decoded instruction: the operation plus its encoded length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInst {
    /// Decoded operation with extracted operands.
    pub op: Op,
    /// Encoded length in bytes.
    pub len: u8,
}

const fn imm32(window: &[u8; MAX_INST_LEN]) -> u32 {
    u32::from_le_bytes([window[1], window[2], window[3], window[4]])
}

const fn rel8(window: &[u8; MAX_INST_LEN]) -> i32 {
    window[1] as i8 as i32
}

/// Decodes the instruction at the start of a fetch window.
///
/// # Errors
///
/// Returns [`Fault::InvalidOpcode`] for any byte sequence outside the
/// supported subset; the caller injects it into the guest's fault path.
pub fn decode(window: &[u8; MAX_INST_LEN]) -> Result<DecodedInst, Fault> {
    let (op, len) = match window[0] {
        0x90 => (Op::Nop, 1),
        0xF4 => (Op::Hlt, 1),
        0xFA => (Op::Cli, 1),
        0xFB => (Op::Sti, 1),
        opcode @ 0xB8..=0xBF => {
            let Some(reg) = GeneralRegister::from_u3(opcode - 0xB8) else {
                return Err(Fault::InvalidOpcode);
            };
            (
                Op::MovRegImm {
                    reg,
                    imm: imm32(window),
                },
                5,
            )
        }
        0xA1 => (Op::LoadEax { addr: imm32(window) }, 5),
        0xA3 => (Op::StoreEax { addr: imm32(window) }, 5),
        0x05 => (Op::AddEaxImm { imm: imm32(window) }, 5),
        0x2D => (Op::SubEaxImm { imm: imm32(window) }, 5),
        opcode @ 0x40..=0x47 => {
            let Some(reg) = GeneralRegister::from_u3(opcode - 0x40) else {
                return Err(Fault::InvalidOpcode);
            };
            (Op::Inc { reg }, 1)
        }
        opcode @ 0x48..=0x4F => {
            let Some(reg) = GeneralRegister::from_u3(opcode - 0x48) else {
                return Err(Fault::InvalidOpcode);
            };
            (Op::Dec { reg }, 1)
        }
        0xEB => (Op::JmpRel { rel: rel8(window) }, 2),
        0xE9 => (
            Op::JmpRel {
                rel: imm32(window) as i32,
            },
            5,
        ),
        0x74 => (Op::Jz { rel: rel8(window) }, 2),
        0x75 => (Op::Jnz { rel: rel8(window) }, 2),
        0x0F if window[1] == 0xA2 => (Op::Cpuid, 2),
        0xCD => (Op::Int { vector: window[1] }, 2),
        0xCF => (Op::Iret, 1),
        _ => return Err(Fault::InvalidOpcode),
    };

    Ok(DecodedInst { op, len })
}
