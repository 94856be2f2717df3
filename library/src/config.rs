//! Loader and runtime configuration
//!
//! The reader validates every file against a [`LoaderConfig`]; the runtime
//! sizes stacks, heaps and protection tables from a [`RuntimeConfig`].

use crate::elf::constants::EM_RISCV;

/// ELF word size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    /// Class of the machine this crate is compiled for
    pub const fn native() -> Self {
        if core::mem::size_of::<usize>() == 8 {
            ElfClass::Elf64
        } else {
            ElfClass::Elf32
        }
    }

    /// Size of an address in bytes
    pub const fn word_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }
}

/// Byte order of multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// What a binary must look like to be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    pub class: ElfClass,
    pub endianness: Endianness,
    pub machine: u16,
    /// Minimum alignment of a loaded image, in bytes (power of two)
    pub segment_align: usize,
    /// Upper bound for section, program header, symbol and relocation counts
    pub max_table_entries: usize,
    /// Upper bound for a string table read into memory
    pub max_table_bytes: usize,
}

impl LoaderConfig {
    pub const DEFAULT_SEGMENT_ALIGN: usize = 32;
    pub const DEFAULT_MAX_TABLE_ENTRIES: usize = 4096;
    pub const DEFAULT_MAX_TABLE_BYTES: usize = 64 * 1024;

    /// Configuration matching the machine this crate runs on
    pub const fn host() -> Self {
        Self::riscv(ElfClass::native())
    }

    pub const fn riscv32() -> Self {
        Self::riscv(ElfClass::Elf32)
    }

    pub const fn riscv64() -> Self {
        Self::riscv(ElfClass::Elf64)
    }

    const fn riscv(class: ElfClass) -> Self {
        Self {
            class,
            endianness: Endianness::Little,
            machine: EM_RISCV,
            segment_align: Self::DEFAULT_SEGMENT_ALIGN,
            max_table_entries: Self::DEFAULT_MAX_TABLE_ENTRIES,
            max_table_bytes: Self::DEFAULT_MAX_TABLE_BYTES,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::host()
    }
}

/// Per-process runtime settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// User stack size in bytes
    pub user_stack_size: usize,
    /// Size of the per-process malloc heap; zero for none
    pub user_heap_size: usize,
    /// Number of hardware protection entries available
    pub pmp_entries: usize,
    /// Minimum size of a backing allocation made by a process address space
    pub backing_granule: usize,
    /// Alignment of every user mapping, see [`RuntimeConfig::with_granularity`]
    pub map_align: usize,
    /// Refuse to start a program whose protection regions could not be applied
    pub protection_required: bool,
}

impl RuntimeConfig {
    pub const STACK_ENTRIES: usize = 2048;
    pub const PMP_ENTRIES: usize = 16;
    pub const HEAP_SIZE: usize = 16 * 1024;

    /// Align mappings and backings to the protection granularity
    ///
    /// Regions are widened to the granularity before they are programmed;
    /// with aligned backings the widened region covers only the backing.
    pub fn with_granularity(self, granularity: usize) -> Self {
        Self {
            map_align: self.map_align.max(granularity),
            backing_granule: self.backing_granule.max(granularity),
            ..self
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            user_stack_size: Self::STACK_ENTRIES * core::mem::size_of::<usize>(),
            user_heap_size: Self::HEAP_SIZE,
            pmp_entries: Self::PMP_ENTRIES,
            backing_granule: 1024,
            map_align: core::mem::size_of::<usize>(),
            protection_required: false,
        }
    }
}
