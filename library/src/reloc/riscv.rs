//! RISC-V dynamic relocations
//!
//! Notation as in the psABI: `S` symbol value, `A` addend, `B` load bias.

use super::error::{RelocError, RelocResult};
use crate::config::Endianness;

pub const R_RISCV_NONE: u32 = 0;
pub const R_RISCV_32: u32 = 1;
pub const R_RISCV_64: u32 = 2;
pub const R_RISCV_RELATIVE: u32 = 3;
pub const R_RISCV_COPY: u32 = 4;
pub const R_RISCV_JUMP_SLOT: u32 = 5;
pub const R_RISCV_TLS_DTPMOD32: u32 = 6;
pub const R_RISCV_TLS_TPREL64: u32 = 11;
pub const R_RISCV_IRELATIVE: u32 = 58;

/// Relocation kinds the engine can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiscvReloc {
    /// 32-bit `S + A`
    Abs32,
    /// 64-bit `S + A`
    Abs64,
    /// Word-sized `B + A`
    Relative,
    /// Word-sized `S`
    JumpSlot,
}

impl RiscvReloc {
    pub fn from_raw(kind: u32) -> Option<Self> {
        match kind {
            R_RISCV_32 => Some(RiscvReloc::Abs32),
            R_RISCV_64 => Some(RiscvReloc::Abs64),
            R_RISCV_RELATIVE => Some(RiscvReloc::Relative),
            R_RISCV_JUMP_SLOT => Some(RiscvReloc::JumpSlot),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RiscvReloc::Abs32 => "R_RISCV_32",
            RiscvReloc::Abs64 => "R_RISCV_64",
            RiscvReloc::Relative => "R_RISCV_RELATIVE",
            RiscvReloc::JumpSlot => "R_RISCV_JUMP_SLOT",
        }
    }

    pub fn raw(&self) -> u32 {
        match self {
            RiscvReloc::Abs32 => R_RISCV_32,
            RiscvReloc::Abs64 => R_RISCV_64,
            RiscvReloc::Relative => R_RISCV_RELATIVE,
            RiscvReloc::JumpSlot => R_RISCV_JUMP_SLOT,
        }
    }
}

/// A value ready to be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixup {
    Word32(u32),
    Word64(u64),
}

impl Fixup {
    pub fn value(&self) -> u64 {
        match *self {
            Fixup::Word32(v) => u64::from(v),
            Fixup::Word64(v) => v,
        }
    }

    /// Encoded bytes and how many of them to store
    pub fn to_bytes(&self, endianness: Endianness) -> ([u8; 8], usize) {
        let mut out = [0u8; 8];
        match (*self, endianness) {
            (Fixup::Word32(v), Endianness::Little) => out[..4].copy_from_slice(&v.to_le_bytes()),
            (Fixup::Word32(v), Endianness::Big) => out[..4].copy_from_slice(&v.to_be_bytes()),
            (Fixup::Word64(v), Endianness::Little) => out.copy_from_slice(&v.to_le_bytes()),
            (Fixup::Word64(v), Endianness::Big) => out.copy_from_slice(&v.to_be_bytes()),
        }
        let len = match self {
            Fixup::Word32(_) => 4,
            Fixup::Word64(_) => 8,
        };
        (out, len)
    }
}

fn fits_32(v: i128) -> bool {
    v >= i128::from(i32::MIN) && v <= i128::from(u32::MAX)
}

fn fits_64(v: i128) -> bool {
    v >= i128::from(i64::MIN) && v <= i128::from(u64::MAX)
}

fn sized(kind: RiscvReloc, value: i128, width: usize) -> RelocResult<Fixup> {
    match width {
        4 if fits_32(value) => Ok(Fixup::Word32(value as u32)),
        8 if fits_64(value) => Ok(Fixup::Word64(value as u64)),
        _ => {
            log::error!("{} value 0x{:x} does not fit {} bytes", kind.name(), value, width);
            Err(RelocError::ValueOverflow(kind.raw()))
        }
    }
}

/// Compute the value a relocation stores
///
/// `word` is the address size of the module's ELF class.
pub fn compute(kind: RiscvReloc, symbol: u64, addend: i64, load_bias: i128, word: usize) -> RelocResult<Fixup> {
    let s = i128::from(symbol);
    let a = i128::from(addend);
    match kind {
        RiscvReloc::Abs32 => sized(kind, s + a, 4),
        RiscvReloc::Abs64 => sized(kind, s + a, 8),
        RiscvReloc::Relative => sized(kind, load_bias + a, word),
        RiscvReloc::JumpSlot => sized(kind, s, word),
    }
}
