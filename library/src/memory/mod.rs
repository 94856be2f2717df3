//! Per-process memory management
//!
//! Each process owns an [`AbiContext`] that carves user mappings (stack,
//! ABI thunks) out of a few backing allocations obtained from a
//! [`RangeAllocator`]. The machine-wide heap stays behind that trait.

pub mod address_space;
pub mod regions;

use core::fmt;

// Re-export commonly used types
pub use address_space::{AbiContext, Mapping, RangeAllocator};
pub use regions::MemoryRegion;

/// Memory allocation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
    OutOfMemory,
    InvalidSize,
    InvalidAlignment,
    /// No mapping starts at the given address
    UnknownAddress,
    /// Access outside every live mapping
    AccessViolation,
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocationError::OutOfMemory => write!(f, "Out of memory"),
            AllocationError::InvalidSize => write!(f, "Invalid allocation size"),
            AllocationError::InvalidAlignment => write!(f, "Invalid alignment"),
            AllocationError::UnknownAddress => write!(f, "Address is not mapped"),
            AllocationError::AccessViolation => write!(f, "Access outside mapped memory"),
        }
    }
}

/// Result type for memory operations
pub type AllocResult<T> = Result<T, AllocationError>;
