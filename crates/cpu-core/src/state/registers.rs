//! General, segment and flag register state for the flat-model IA-32 core.

/// Number of architecturally visible general-purpose registers.
pub const GENERAL_REGISTER_COUNT: usize = 8;
/// Number of stored segment registers.
pub const SEGMENT_REGISTER_COUNT: usize = 6;

/// `EFLAGS` bit for carry/borrow.
pub const EFLAGS_CF: u32 = 1 << 0;
/// `EFLAGS` reserved bit 1, architecturally always set.
pub const EFLAGS_RESERVED1: u32 = 1 << 1;
/// `EFLAGS` bit for zero result.
pub const EFLAGS_ZF: u32 = 1 << 6;
/// `EFLAGS` bit for negative result.
pub const EFLAGS_SF: u32 = 1 << 7;
/// `EFLAGS` bit for maskable-interrupt enable.
pub const EFLAGS_IF: u32 = 1 << 9;
/// `EFLAGS` bit for signed overflow.
pub const EFLAGS_OF: u32 = 1 << 11;
/// Mask of `EFLAGS` bits this core actually stores.
pub const EFLAGS_ACTIVE_MASK: u32 = EFLAGS_CF | EFLAGS_ZF | EFLAGS_SF | EFLAGS_IF | EFLAGS_OF;

/// Instruction-pointer value after power-on or reset (top-of-1MiB reset vector).
pub const RESET_EIP: u32 = 0x000F_FFF0;

/// Architecturally visible general-purpose register identifier, in IA-32
/// encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum GeneralRegister {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
}

impl GeneralRegister {
    /// Ordered list of all general-purpose registers.
    pub const ALL: [Self; GENERAL_REGISTER_COUNT] = [
        Self::Eax,
        Self::Ecx,
        Self::Edx,
        Self::Ebx,
        Self::Esp,
        Self::Ebp,
        Self::Esi,
        Self::Edi,
    ];

    /// Returns the array index for this register (`0..=7`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a 3-bit register field into an architectural register.
    #[must_use]
    pub const fn from_u3(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Eax),
            1 => Some(Self::Ecx),
            2 => Some(Self::Edx),
            3 => Some(Self::Ebx),
            4 => Some(Self::Esp),
            5 => Some(Self::Ebp),
            6 => Some(Self::Esi),
            7 => Some(Self::Edi),
            _ => None,
        }
    }
}

/// Stored segment register identifier.
///
/// Segment registers are held and reset with the rest of the register file
/// but carry no addressing semantics in the flat memory model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum SegmentRegister {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

impl SegmentRegister {
    /// Ordered list of all stored segment registers.
    pub const ALL: [Self; SEGMENT_REGISTER_COUNT] = [
        Self::Es,
        Self::Cs,
        Self::Ss,
        Self::Ds,
        Self::Fs,
        Self::Gs,
    ];

    /// Returns the array index for this register (`0..=5`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Full architectural register state owned by a CPU context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    gpr: [u32; GENERAL_REGISTER_COUNT],
    eip: u32,
    eflags: u32,
    segs: [u16; SEGMENT_REGISTER_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            gpr: [0; GENERAL_REGISTER_COUNT],
            eip: RESET_EIP,
            eflags: EFLAGS_RESERVED1,
            segs: [0; SEGMENT_REGISTER_COUNT],
        }
    }
}

impl RegisterFile {
    /// Reads a general-purpose register.
    #[must_use]
    pub const fn gpr(&self, reg: GeneralRegister) -> u32 {
        self.gpr[reg.index()]
    }

    /// Writes a general-purpose register.
    pub const fn set_gpr(&mut self, reg: GeneralRegister, value: u32) {
        self.gpr[reg.index()] = value;
    }

    /// Reads the instruction pointer.
    #[must_use]
    pub const fn eip(&self) -> u32 {
        self.eip
    }

    /// Writes the instruction pointer.
    pub const fn set_eip(&mut self, value: u32) {
        self.eip = value;
    }

    /// Reads `EFLAGS`.
    #[must_use]
    pub const fn eflags(&self) -> u32 {
        self.eflags
    }

    /// Writes `EFLAGS`, keeping only the active bits and forcing reserved
    /// bit 1 set.
    pub const fn set_eflags(&mut self, value: u32) {
        self.eflags = (value & EFLAGS_ACTIVE_MASK) | EFLAGS_RESERVED1;
    }

    /// Returns `true` when a specific `EFLAGS` bit is set.
    #[must_use]
    pub const fn flag_is_set(&self, flag: u32) -> bool {
        (self.eflags & flag) != 0
    }

    /// Sets or clears a specific active `EFLAGS` bit.
    pub const fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.eflags |= flag & EFLAGS_ACTIVE_MASK;
        } else {
            self.eflags &= !(flag & EFLAGS_ACTIVE_MASK);
        }
    }

    /// Returns `true` when maskable interrupts are enabled.
    #[must_use]
    pub const fn interrupts_enabled(&self) -> bool {
        self.flag_is_set(EFLAGS_IF)
    }

    /// Reads a stored segment register.
    #[must_use]
    pub const fn seg(&self, reg: SegmentRegister) -> u16 {
        self.segs[reg.index()]
    }

    /// Writes a stored segment register.
    pub const fn set_seg(&mut self, reg: SegmentRegister, value: u16) {
        self.segs[reg.index()] = value;
    }

    /// Restores the power-on register state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
