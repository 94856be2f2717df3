//! Memory protection regions
//!
//! Logical [`Region`]s are merged into non-overlapping spans and projected
//! onto RISC-V PMP entries by a [`RegionManager`].

pub mod merge;
pub mod pmp;

use core::fmt;

pub use merge::pure_merge;
pub use pmp::{probe_granularity, Encoding, PmpBackend, RegionManager, MAX_PMP_ENTRIES};

/// Privilege level a region applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Privilege {
    User,
    Machine,
}

/// A protection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: usize,
    pub len: usize,
    pub privilege: Privilege,
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub active: bool,
}

impl Region {
    /// An active region; read access is implied by write or execute
    pub fn new(base: usize, len: usize, privilege: Privilege, read: bool, write: bool, execute: bool) -> Self {
        Self {
            base,
            len,
            privilege,
            read: read || write || execute,
            write,
            execute,
            active: true,
        }
    }

    pub fn user(base: usize, len: usize, write: bool, execute: bool) -> Self {
        Self::new(base, len, Privilege::User, true, write, execute)
    }

    pub fn end(&self) -> usize {
        self.base.saturating_add(self.len)
    }

    /// Same permissions and privilege
    pub fn same_rights(&self, other: &Region) -> bool {
        self.privilege == other.privilege
            && self.read == other.read
            && self.write == other.write
            && self.execute == other.execute
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// Base or size is not a multiple of the PMP granularity
    Misaligned,
    NoFreeEntry,
    NoFreePair,
    EmptyRegion,
    /// The range does not fit the address space
    Unrepresentable,
    /// Machine-mode regions would need the lock bit
    UnsupportedPrivilege,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegionError::Misaligned => write!(f, "Region is not aligned to the PMP granularity"),
            RegionError::NoFreeEntry => write!(f, "No free PMP entry"),
            RegionError::NoFreePair => write!(f, "No free pair of adjacent PMP entries"),
            RegionError::EmptyRegion => write!(f, "Empty region"),
            RegionError::Unrepresentable => write!(f, "Region not representable"),
            RegionError::UnsupportedPrivilege => write!(f, "Unsupported region privilege"),
        }
    }
}

pub type RegionResult<T> = Result<T, RegionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_is_implied() {
        let region = Region::new(0x1000, 0x100, Privilege::User, false, true, false);
        assert!(region.read);
        let region = Region::new(0x1000, 0x100, Privilege::User, false, false, true);
        assert!(region.read);
        let region = Region::new(0x1000, 0x100, Privilege::User, false, false, false);
        assert!(!region.read);
    }
}
