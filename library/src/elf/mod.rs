//! ELF Loading Support
//!
//! Parsing, validation and in-memory placement of RISC-V ELF binaries.

pub mod constants;
pub mod error;
pub mod image;
pub mod loader;
pub mod parser;
pub mod stream;
pub mod structures;

// Re-export main types and functions
pub use constants::*;
pub use error::{ElfError, ElfResult};
pub use image::{HeapSegmentAllocator, ImageRegion, Placement, SegmentAllocator};
pub use loader::{load_segments, LoadError, LoadResult, LoadedModule};
pub use parser::ElfReader;
pub use stream::{ElfStream, SliceStream};
pub use structures::{
    Header, ProgramInfo, RelocationInfo, RelocationTable, SectionInfo, SymbolInfo, SymbolTableKind,
};
