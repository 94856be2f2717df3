//! Dynamic linking of one program and its libraries
//!
//! Modules are loaded and export their symbols one after another; nothing
//! is relocated until [`Linkage::link`], so every module sees the exports of
//! every other module regardless of load order.

use alloc::vec::Vec;
use core::fmt;

use crate::config::LoaderConfig;
use crate::elf::{load_segments, ElfError, ElfReader, ElfStream, LoadError, LoadedModule, SegmentAllocator};
use crate::mpu::{PmpBackend, RegionError, RegionManager};
use crate::reloc::{relocate, RelocError};
use crate::symbols::{export_symbols, SymbolError, SymbolMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkageError {
    Elf(ElfError),
    Load(LoadError),
    Reloc(RelocError),
    Symbol(SymbolError),
    Region(RegionError),
    /// Loading after `link()` was attempted
    AlreadyLinked,
    ExecutableAlreadyLoaded,
    NoExecutable,
    NotLinked,
    NoEntryPoint,
}

impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkageError::Elf(e) => write!(f, "{}", e),
            LinkageError::Load(e) => write!(f, "{}", e),
            LinkageError::Reloc(e) => write!(f, "{}", e),
            LinkageError::Symbol(e) => write!(f, "{}", e),
            LinkageError::Region(e) => write!(f, "{}", e),
            LinkageError::AlreadyLinked => write!(f, "Linkage already linked"),
            LinkageError::ExecutableAlreadyLoaded => write!(f, "An executable is already loaded"),
            LinkageError::NoExecutable => write!(f, "No executable loaded"),
            LinkageError::NotLinked => write!(f, "Linkage not linked"),
            LinkageError::NoEntryPoint => write!(f, "Executable has no entry point"),
        }
    }
}

impl From<ElfError> for LinkageError {
    fn from(e: ElfError) -> Self {
        LinkageError::Elf(e)
    }
}

impl From<LoadError> for LinkageError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Elf(e) => LinkageError::Elf(e),
            e => LinkageError::Load(e),
        }
    }
}

impl From<RelocError> for LinkageError {
    fn from(e: RelocError) -> Self {
        LinkageError::Reloc(e)
    }
}

impl From<SymbolError> for LinkageError {
    fn from(e: SymbolError) -> Self {
        LinkageError::Symbol(e)
    }
}

impl From<RegionError> for LinkageError {
    fn from(e: RegionError) -> Self {
        LinkageError::Region(e)
    }
}

pub type LinkageResult<T> = Result<T, LinkageError>;

pub struct Linkage<A: SegmentAllocator> {
    config: LoaderConfig,
    allocator: A,
    symbols: SymbolMap,
    modules: Vec<LoadedModule>,
    readers: Vec<ElfReader>,
    entry: Option<usize>,
    has_executable: bool,
    link_attempted: bool,
    link_result: LinkageResult<()>,
    relocation_passes: usize,
}

impl<A: SegmentAllocator> Linkage<A> {
    pub fn new(config: LoaderConfig, allocator: A) -> Self {
        Self::with_symbols(config, allocator, SymbolMap::new())
    }

    /// Start from a map already holding the runtime's exports
    pub fn with_symbols(config: LoaderConfig, allocator: A, symbols: SymbolMap) -> Self {
        Self {
            config,
            allocator,
            symbols,
            modules: Vec::new(),
            readers: Vec::new(),
            entry: None,
            has_executable: false,
            link_attempted: false,
            link_result: Err(LinkageError::NotLinked),
            relocation_passes: 0,
        }
    }

    /// Load a shared library; returns its module index
    pub fn load_library<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> LinkageResult<usize> {
        self.load(stream, false)
    }

    /// Load the program; at most one per linkage
    pub fn load_executable<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> LinkageResult<usize> {
        if self.has_executable {
            return Err(LinkageError::ExecutableAlreadyLoaded);
        }
        self.load(stream, true)
    }

    fn load<S: ElfStream + ?Sized>(&mut self, stream: &mut S, executable: bool) -> LinkageResult<usize> {
        if self.link_attempted {
            return Err(LinkageError::AlreadyLinked);
        }

        let mut reader = ElfReader::open(stream, &self.config)?;
        reader.read_all(stream)?;
        let module = load_segments(&reader, stream, &mut self.allocator)?;

        if executable && module.entry().is_none() {
            self.allocator.release(module.cookie());
            return Err(LinkageError::NoEntryPoint);
        }
        if let Err(e) = export_symbols(&reader, &module, &mut self.symbols) {
            self.allocator.release(module.cookie());
            return Err(e.into());
        }

        if executable {
            self.entry = module.entry();
            self.has_executable = true;
        }
        log::info!(
            "Loaded {} at 0x{:x} ({} bytes)",
            if executable { "executable" } else { "library" },
            module.actual_base(),
            module.size()
        );
        self.modules.push(module);
        self.readers.push(reader);
        Ok(self.modules.len() - 1)
    }

    /// Relocate every module against the accumulated symbol map
    ///
    /// Runs once; later calls return the first result.
    pub fn link(&mut self) -> LinkageResult<()> {
        if self.link_attempted {
            return self.link_result;
        }
        self.link_attempted = true;
        self.relocation_passes += 1;

        let mut result = Ok(());
        for (reader, module) in self.readers.iter().zip(self.modules.iter_mut()) {
            match relocate(reader, module, &self.symbols) {
                Ok(count) => log::debug!("Applied {} relocations at 0x{:x}", count, module.actual_base()),
                Err(e) => {
                    log::error!("Linking module at 0x{:x} failed: {}", module.actual_base(), e);
                    result = Err(e.into());
                    break;
                }
            }
        }
        self.link_result = result;
        result
    }

    /// An executable was loaded and linking succeeded
    pub fn is_prog_ready(&self) -> bool {
        self.has_executable && self.link_attempted && self.link_result.is_ok()
    }

    pub fn entry(&self) -> LinkageResult<usize> {
        if !self.has_executable {
            return Err(LinkageError::NoExecutable);
        }
        if !self.is_prog_ready() {
            return Err(LinkageError::NotLinked);
        }
        self.entry.ok_or(LinkageError::NoEntryPoint)
    }

    /// Protect every loaded module with its segment permissions
    pub fn apply_protection<B: PmpBackend>(&self, manager: &mut RegionManager<B>) -> LinkageResult<usize> {
        let mut count = 0;
        for (reader, module) in self.readers.iter().zip(&self.modules) {
            count += manager.apply_load_segments(reader, module)?;
        }
        Ok(count)
    }

    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut [LoadedModule] {
        &mut self.modules
    }

    pub fn readers(&self) -> &[ElfReader] {
        &self.readers
    }

    pub fn relocation_passes(&self) -> usize {
        self.relocation_passes
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

impl<A: SegmentAllocator> Drop for Linkage<A> {
    fn drop(&mut self) {
        for module in self.modules.drain(..) {
            self.allocator.release(module.cookie());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::constants::*;
    use crate::elf::SliceStream;
    use crate::reloc::riscv::*;
    use crate::testutil::{ElfBuilder, FixedBaseAllocator, MockPmp};

    fn read_u64(linkage: &Linkage<&mut FixedBaseAllocator>, module: usize, addr: usize) -> u64 {
        let bytes = linkage.modules()[module].region().slice(addr, 8).unwrap();
        u64::from_le_bytes(bytes.try_into().unwrap())
    }

    fn library() -> Vec<u8> {
        let mut builder = ElfBuilder::shared();
        builder.segment(0x0, &[0; 0x200], 0x200, PF_R | PF_W);
        builder.export("mydata", 0x100, STB_GLOBAL, STT_OBJECT);
        let callback = builder.import("app_callback");
        builder.rela(0x10, callback, R_RISCV_JUMP_SLOT, 0);
        builder.build()
    }

    fn executable() -> Vec<u8> {
        let mut builder = ElfBuilder::executable(0x40);
        builder.segment(0x0, &[0; 0x100], 0x100, PF_R | PF_W | PF_X);
        builder.export("app_callback", 0x80, STB_GLOBAL, STT_FUNC);
        let mydata = builder.import("mydata");
        builder.rela(0x8, mydata, R_RISCV_64, 0);
        builder.rela(0x10, 0, R_RISCV_RELATIVE, 0x10);
        builder.build()
    }

    #[test]
    fn test_library_and_executable_link_both_ways() {
        let mut allocator = FixedBaseAllocator::new(&[0x2000, 0x6000]);
        let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
        let (lib, exe) = (library(), executable());

        assert_eq!(linkage.load_library(&mut SliceStream::new(&lib)), Ok(0));
        assert_eq!(linkage.load_executable(&mut SliceStream::new(&exe)), Ok(1));
        assert!(!linkage.is_prog_ready());
        assert_eq!(linkage.entry(), Err(LinkageError::NotLinked));

        linkage.link().unwrap();
        assert!(linkage.is_prog_ready());
        assert_eq!(linkage.entry(), Ok(0x6040));
        // Executable sees the library's data
        assert_eq!(read_u64(&linkage, 1, 0x6008), 0x2100);
        assert_eq!(read_u64(&linkage, 1, 0x6010), 0x6010);
        // The earlier library sees the later executable's export
        assert_eq!(read_u64(&linkage, 0, 0x2010), 0x6080);
    }

    #[test]
    fn test_link_runs_once() {
        let mut allocator = FixedBaseAllocator::new(&[0x2000, 0x6000]);
        let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
        linkage.load_library(&mut SliceStream::new(&library())).unwrap();
        linkage.load_executable(&mut SliceStream::new(&executable())).unwrap();

        assert_eq!(linkage.link(), Ok(()));
        linkage.modules_mut()[1].region_mut().write(0x6008, &[0xee; 8]).unwrap();
        assert_eq!(linkage.link(), Ok(()));
        assert_eq!(read_u64(&linkage, 1, 0x6008), 0xeeee_eeee_eeee_eeee);
        assert_eq!(linkage.relocation_passes(), 1);
    }

    #[test]
    fn test_link_failure_is_sticky() {
        let mut allocator = FixedBaseAllocator::new(&[0x6000]);
        let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
        linkage.load_executable(&mut SliceStream::new(&executable())).unwrap();

        let err = linkage.link();
        assert!(matches!(err, Err(LinkageError::Reloc(RelocError::Unresolved(_)))));
        assert_eq!(linkage.link(), err);
        assert_eq!(linkage.relocation_passes(), 1);
        assert!(!linkage.is_prog_ready());
        // Still inspectable
        assert_eq!(linkage.modules().len(), 1);
        assert_eq!(
            linkage.load_library(&mut SliceStream::new(&library())),
            Err(LinkageError::AlreadyLinked)
        );
    }

    #[test]
    fn test_seeded_symbols_resolve() {
        let mut builder = ElfBuilder::executable(0);
        builder.segment(0x0, &[0; 0x40], 0x40, PF_R | PF_X);
        let puts = builder.import("puts");
        builder.rela(0x20, puts, R_RISCV_JUMP_SLOT, 0);
        let image = builder.build();

        let mut symbols = SymbolMap::new();
        symbols.insert_abi("puts", 0x4000_1000);
        let mut allocator = FixedBaseAllocator::new(&[0x2000]);
        let mut linkage = Linkage::with_symbols(LoaderConfig::riscv64(), &mut allocator, symbols);
        linkage.load_executable(&mut SliceStream::new(&image)).unwrap();
        linkage.link().unwrap();
        assert_eq!(read_u64(&linkage, 0, 0x2020), 0x4000_1000);
        assert_eq!(linkage.entry(), Ok(0x2000));
    }

    #[test]
    fn test_one_executable_only() {
        let mut allocator = FixedBaseAllocator::new(&[0x2000, 0x6000]);
        let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
        linkage.load_executable(&mut SliceStream::new(&executable())).unwrap();
        assert_eq!(
            linkage.load_executable(&mut SliceStream::new(&executable())),
            Err(LinkageError::ExecutableAlreadyLoaded)
        );
    }

    #[test]
    fn test_executable_needs_entry() {
        let mut builder = ElfBuilder::shared();
        builder.segment(0x0, &[0; 0x20], 0x20, PF_R | PF_X);
        let image = builder.build();

        let mut allocator = FixedBaseAllocator::new(&[0x2000]);
        {
            let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
            assert_eq!(
                linkage.load_executable(&mut SliceStream::new(&image)),
                Err(LinkageError::NoEntryPoint)
            );
            assert_eq!(linkage.entry(), Err(LinkageError::NoExecutable));
        }
        assert_eq!(allocator.live(), 0);
    }

    #[test]
    fn test_duplicate_export_releases_module() {
        let mut allocator = FixedBaseAllocator::new(&[0x2000, 0x6000]);
        {
            let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
            linkage.load_library(&mut SliceStream::new(&library())).unwrap();
            let result = linkage.load_library(&mut SliceStream::new(&library()));
            assert!(matches!(result, Err(LinkageError::Symbol(SymbolError::Duplicate(_)))));
            assert_eq!(linkage.modules().len(), 1);
        }
        assert_eq!(allocator.live(), 0);
        assert_eq!(allocator.releases(), 2);
    }

    #[test]
    fn test_format_errors_surface() {
        let mut image = library();
        image[0] = 0;
        let mut allocator = FixedBaseAllocator::new(&[0x2000]);
        let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
        assert_eq!(
            linkage.load_library(&mut SliceStream::new(&image)),
            Err(LinkageError::Elf(ElfError::InvalidMagic))
        );
        assert!(linkage.modules().is_empty());
    }

    #[test]
    fn test_protection_covers_every_module() {
        let mut allocator = FixedBaseAllocator::new(&[0x2000, 0x6000]);
        let mut linkage = Linkage::new(LoaderConfig::riscv64(), &mut allocator);
        linkage.load_library(&mut SliceStream::new(&library())).unwrap();
        linkage.load_executable(&mut SliceStream::new(&executable())).unwrap();
        linkage.link().unwrap();

        let mut manager = RegionManager::new(MockPmp::new(16, 1), 16);
        assert_eq!(linkage.apply_protection(&mut manager), Ok(2));
        let regions = manager.read_regions();
        assert_eq!((regions[0].base, regions[0].len), (0x2000, 0x200));
        assert!(regions[1].execute);
    }
}
