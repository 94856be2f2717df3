//! Relocation error types

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocError {
    /// An implicit-addend (REL) section is present
    ImplicitAddend(u32),
    /// Undefined symbol not found in the symbol map
    Unresolved(u32),
    /// Symbol defined in a reserved section other than SHN_ABS
    UnsupportedSection(u16),
    UnsupportedType(u32),
    /// Destination offset outside the loaded image
    OutOfBounds(u64),
    /// Computed value does not fit the store width
    ValueOverflow(u32),
    AddressOverflow,
}

impl fmt::Display for RelocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RelocError::ImplicitAddend(s) => write!(f, "Implicit-addend relocations in section {} are not supported", s),
            RelocError::Unresolved(i) => write!(f, "Unresolved symbol {}", i),
            RelocError::UnsupportedSection(s) => write!(f, "Symbol in unsupported section 0x{:x}", s),
            RelocError::UnsupportedType(t) => write!(f, "Invalid dynamic relocation type 0x{:x}", t),
            RelocError::OutOfBounds(o) => write!(f, "Relocation at 0x{:x} outside image", o),
            RelocError::ValueOverflow(t) => write!(f, "Relocation type {} value out of range", t),
            RelocError::AddressOverflow => write!(f, "Relocation address overflow"),
        }
    }
}

pub type RelocResult<T> = Result<T, RelocError>;
