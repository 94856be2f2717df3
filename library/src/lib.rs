#![no_std]

//! badgeload
//!
//! Loads position-independent RISC-V ELF programs and shared libraries into
//! memory, links them against each other and against the runtime's exported
//! services, and runs them in user mode behind PMP protection regions.
//!
//! Everything in here is target independent; the machine-mode glue (trap
//! vector, CSR access) lives in the kernel crate.

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod elf;
pub mod linkage;
pub mod memory;
pub mod mpu;
pub mod reloc;
pub mod runtime;
pub mod symbols;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used items
pub use config::{LoaderConfig, RuntimeConfig};
pub use elf::{ElfError, ElfReader, ElfResult, ElfStream, LoadedModule, SliceStream};
pub use linkage::{Linkage, LinkageError, LinkageResult};
pub use memory::{AbiContext, AllocResult, AllocationError, RangeAllocator};
pub use mpu::{PmpBackend, Privilege, Region, RegionError, RegionManager};
pub use runtime::{Context, Pid, Runtime, RuntimeError, RuntimeResult, Scheduler, TrapOutcome, UserHeap};
pub use symbols::SymbolMap;
