//! ELF error types and result definitions

use core::fmt;

/// Format errors raised while reading a binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    InvalidMagic,
    UnsupportedClass,
    UnsupportedEndian,
    UnsupportedMachine,
    UnsupportedType,
    UnsupportedVersion,
    InvalidHeader,
    /// A record size field disagrees with the class
    InvalidEntrySize,
    /// The stream ended or could not seek
    Truncated,
    /// A section or symbol index points past its table
    IndexOutOfRange(u32),
    /// A name offset points past its string table
    StringOutOfRange(u32),
    /// A table is larger than the configured limit
    TableTooLarge,
    /// The linked section has the wrong type
    InvalidLink(u32),
    /// The program header table has not been read yet
    ProgramHeadersNotRead,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElfError::InvalidMagic => write!(f, "Invalid ELF magic number"),
            ElfError::UnsupportedClass => write!(f, "Unsupported ELF class"),
            ElfError::UnsupportedEndian => write!(f, "Unsupported endianness"),
            ElfError::UnsupportedMachine => write!(f, "Unsupported machine type"),
            ElfError::UnsupportedType => write!(f, "Unsupported ELF type"),
            ElfError::UnsupportedVersion => write!(f, "Unsupported ELF version"),
            ElfError::InvalidHeader => write!(f, "Invalid ELF header"),
            ElfError::InvalidEntrySize => write!(f, "Invalid table entry size"),
            ElfError::Truncated => write!(f, "Unexpected end of file"),
            ElfError::IndexOutOfRange(i) => write!(f, "Index {} out of range", i),
            ElfError::StringOutOfRange(o) => write!(f, "String offset 0x{:x} out of range", o),
            ElfError::TableTooLarge => write!(f, "Table exceeds configured limit"),
            ElfError::InvalidLink(i) => write!(f, "Section link {} has the wrong type", i),
            ElfError::ProgramHeadersNotRead => write!(f, "Program headers not read"),
        }
    }
}

/// Result type for ELF operations
pub type ElfResult<T> = Result<T, ElfError>;
