//! Decoded ELF records
//!
//! Class-independent snapshots of the header and table entries. Every
//! address-sized field is widened to `u64` so ELF32 and ELF64 files share
//! one representation.

use alloc::string::String;
use alloc::vec::Vec;

use super::constants::*;
use crate::config::{ElfClass, Endianness};

/// ELF file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub class: ElfClass,
    pub endianness: Endianness,
    pub elf_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl Header {
    pub fn is_executable(&self) -> bool {
        self.elf_type == ET_EXEC
    }
}

/// Section header table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub name: String,
    pub kind: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub align: u64,
    pub entsize: u64,
}

/// Program header table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInfo {
    pub kind: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub flags: u32,
    pub align: u64,
}

impl ProgramInfo {
    pub fn is_load(&self) -> bool {
        self.kind == PT_LOAD
    }

    pub fn readable(&self) -> bool {
        self.flags & PF_R != 0
    }

    pub fn writable(&self) -> bool {
        self.flags & PF_W != 0
    }

    pub fn executable(&self) -> bool {
        self.flags & PF_X != 0
    }
}

/// Symbol table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub value: u64,
    pub size: u64,
    /// Binding in the high nibble, type in the low nibble
    pub info: u8,
    pub other: u8,
    /// Index of the defining section
    pub section: u16,
}

impl SymbolInfo {
    pub fn binding(&self) -> u8 {
        self.info >> 4
    }

    pub fn symbol_type(&self) -> u8 {
        self.info & 0xf
    }

    pub fn is_undefined(&self) -> bool {
        self.section == SHN_UNDEF
    }

    pub fn is_absolute(&self) -> bool {
        self.section == SHN_ABS
    }

    /// Section index is one of the reserved values (absolute, common, ...)
    pub fn is_reserved(&self) -> bool {
        self.section >= SHN_LORESERVE
    }
}

/// Which symbol table a relocation section refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolTableKind {
    Static,
    Dynamic,
}

/// One explicit-addend relocation, with `info` already split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationInfo {
    pub offset: u64,
    pub symbol: u32,
    pub kind: u32,
    pub addend: i64,
}

/// All entries of one RELA section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationTable {
    pub section: usize,
    pub symbols: SymbolTableKind,
    pub entries: Vec<RelocationInfo>,
}
