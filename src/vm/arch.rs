//! Per-architecture register tables.
//!
//! The decoder is generic over an [`Architecture`]. Everything it needs to know about the target
//! (register names, which registers are volatile, how code and stack offsets are normalized)
//! comes from the constants and functions of that trait, so the enumeration algorithm itself
//! never branches on the architecture.

use std::fmt;

use strum_macros::{Display, EnumIter, EnumString};

/// A register in the architecture's own numbering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterId(pub u32);

impl RegisterId {
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Static facts about a target architecture.
pub trait Architecture: 'static + Send + Sync + Sized {
    /// A human-readable name, used by diagnostics.
    const NAME: &'static str;
    /// Registers are numbered `0..NUM_REGISTERS`.
    const NUM_REGISTERS: u32;
    /// The stack pointer. It is never a legal live slot.
    const STACK_POINTER: RegisterId;
    /// The conventional frame pointer. The stack base register is normalized relative to it so
    /// that the common case encodes as zero.
    const FRAME_POINTER: RegisterId;
    /// log2 of the instruction alignment. Code offsets are stored divided by it.
    const LOG_CODE_ALIGNMENT: u8;
    /// log2 of the stack slot alignment. Stack offsets are stored divided by it.
    const LOG_STACK_SLOT_ALIGNMENT: u8;

    fn register_name(reg: RegisterId) -> &'static str;

    /// Whether the register is volatile across calls. Only the active (leaf) frame may report a
    /// scratch register as live.
    fn is_scratch_register(reg: RegisterId) -> bool;

    /// Whether the register may serve as the base of frame-register-relative stack slots.
    fn is_frame_base(reg: RegisterId) -> bool;

    fn normalize_stack_base_register(reg: RegisterId) -> u32 {
        reg.0 ^ Self::FRAME_POINTER.0
    }

    fn denormalize_stack_base_register(norm: u32) -> RegisterId {
        RegisterId(norm ^ Self::FRAME_POINTER.0)
    }

    fn code_alignment() -> u32 {
        1 << Self::LOG_CODE_ALIGNMENT
    }

    fn stack_slot_alignment() -> i32 {
        1 << Self::LOG_STACK_SLOT_ALIGNMENT
    }

    fn normalize_code_offset(offset: u32) -> u32 {
        offset >> Self::LOG_CODE_ALIGNMENT
    }

    fn denormalize_code_offset(norm: u32) -> u32 {
        norm << Self::LOG_CODE_ALIGNMENT
    }

    fn normalize_stack_offset(offset: i32) -> i32 {
        offset >> Self::LOG_STACK_SLOT_ALIGNMENT
    }

    fn denormalize_stack_offset(norm: i32) -> i32 {
        norm << Self::LOG_STACK_SLOT_ALIGNMENT
    }
}

/// Runtime selector for the architectures this crate knows about. Only tooling (such as the text
/// dumper) dispatches on it; decoding itself is monomorphized per [`Architecture`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Arch {
    X64,
    Arm64,
}

/// AMD64 with the System V calling convention.
#[derive(Copy, Clone, Debug, Default)]
pub struct X64;

const X64_REGISTER_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

// rax, rcx, rdx, rsi, rdi, r8-r11
const X64_SCRATCH_MASK: u32 = 0b0000_1111_1100_0111;

impl Architecture for X64 {
    const NAME: &'static str = "x64";
    const NUM_REGISTERS: u32 = 16;
    const STACK_POINTER: RegisterId = RegisterId(4);
    const FRAME_POINTER: RegisterId = RegisterId(5);
    const LOG_CODE_ALIGNMENT: u8 = 0;
    const LOG_STACK_SLOT_ALIGNMENT: u8 = 3;

    fn register_name(reg: RegisterId) -> &'static str {
        X64_REGISTER_NAMES.get(reg.0 as usize).copied().unwrap_or("???")
    }

    fn is_scratch_register(reg: RegisterId) -> bool {
        reg.0 < Self::NUM_REGISTERS && X64_SCRATCH_MASK & (1 << reg.0) != 0
    }

    fn is_frame_base(reg: RegisterId) -> bool {
        reg == Self::FRAME_POINTER
    }
}

/// AArch64 with the standard procedure call standard.
#[derive(Copy, Clone, Debug, Default)]
pub struct Arm64;

const ARM64_REGISTER_NAMES: [&str; 32] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "fp", "lr", "sp",
];

impl Architecture for Arm64 {
    const NAME: &'static str = "arm64";
    const NUM_REGISTERS: u32 = 32;
    const STACK_POINTER: RegisterId = RegisterId(31);
    const FRAME_POINTER: RegisterId = RegisterId(29);
    const LOG_CODE_ALIGNMENT: u8 = 2;
    const LOG_STACK_SLOT_ALIGNMENT: u8 = 3;

    fn register_name(reg: RegisterId) -> &'static str {
        ARM64_REGISTER_NAMES.get(reg.0 as usize).copied().unwrap_or("???")
    }

    fn is_scratch_register(reg: RegisterId) -> bool {
        // x0-x17 and the link register
        reg.0 <= 17 || reg.0 == 30
    }

    fn is_frame_base(reg: RegisterId) -> bool {
        reg == Self::FRAME_POINTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn x64_tables() {
        assert_eq!(X64::register_name(RegisterId(5)), "rbp");
        assert!(X64::is_scratch_register(RegisterId(0)));
        assert!(X64::is_scratch_register(RegisterId(11)));
        assert!(!X64::is_scratch_register(RegisterId(3)));
        assert!(!X64::is_scratch_register(RegisterId(12)));
        assert!(X64::is_frame_base(RegisterId(5)));
        assert!(!X64::is_frame_base(RegisterId(0)));
    }

    #[test]
    fn arm64_tables() {
        assert_eq!(Arm64::register_name(RegisterId(29)), "fp");
        assert!(Arm64::is_scratch_register(RegisterId(17)));
        assert!(!Arm64::is_scratch_register(RegisterId(19)));
        assert_eq!(Arm64::normalize_code_offset(16), 4);
        assert_eq!(Arm64::denormalize_code_offset(4), 16);
    }

    #[test]
    fn frame_pointer_normalizes_to_zero() {
        assert_eq!(X64::normalize_stack_base_register(X64::FRAME_POINTER), 0);
        assert_eq!(Arm64::normalize_stack_base_register(Arm64::FRAME_POINTER), 0);
        for reg in 0..X64::NUM_REGISTERS {
            let norm = X64::normalize_stack_base_register(RegisterId(reg));
            assert_eq!(X64::denormalize_stack_base_register(norm), RegisterId(reg));
        }
    }

    #[test]
    fn arch_selector_parses() {
        assert_eq!("X64".parse::<Arch>().unwrap(), Arch::X64);
        assert_eq!(Arch::iter().count(), 2);
        assert_eq!(Arch::Arm64.to_string(), "Arm64");
    }
}
