//! ELF Segment Loader
//!
//! Places the PT_LOAD segments of a parsed binary into one block obtained
//! from a [`SegmentAllocator`], copies the file contents in and zero-fills
//! everything else (the BSS tails and any gaps between segments).

use core::fmt;

use super::error::ElfError;
use super::image::{ImageRegion, SegmentAllocator};
use super::parser::ElfReader;
use super::stream::ElfStream;

/// Segment loading errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    Elf(ElfError),
    NoLoadableSegments,
    /// PT_LOAD entry whose file size exceeds its memory size
    SegmentTooLarge(usize),
    AddressOverflow,
    InvalidAlignment,
    AllocationFailed,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Elf(e) => write!(f, "{}", e),
            LoadError::NoLoadableSegments => write!(f, "No loadable segments"),
            LoadError::SegmentTooLarge(i) => write!(f, "Segment {} file size exceeds memory size", i),
            LoadError::AddressOverflow => write!(f, "Segment address overflow"),
            LoadError::InvalidAlignment => write!(f, "Invalid segment alignment"),
            LoadError::AllocationFailed => write!(f, "Memory allocation failed"),
        }
    }
}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        LoadError::Elf(e)
    }
}

pub type LoadResult<T> = Result<T, LoadError>;

/// One binary placed in memory
#[derive(Debug)]
pub struct LoadedModule {
    requested_base: usize,
    actual_base: usize,
    size: usize,
    entry: Option<usize>,
    region: ImageRegion,
    cookie: usize,
}

impl LoadedModule {
    /// Address the lowest segment was linked for (aligned down)
    pub fn requested_base(&self) -> usize {
        self.requested_base
    }

    pub fn actual_base(&self) -> usize {
        self.actual_base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn entry(&self) -> Option<usize> {
        self.entry
    }

    pub fn cookie(&self) -> usize {
        self.cookie
    }

    pub fn region(&self) -> &ImageRegion {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut ImageRegion {
        &mut self.region
    }

    /// Load bias, `actual_base - requested_base`
    pub fn vaddr_offset(&self) -> isize {
        self.actual_base.wrapping_sub(self.requested_base) as isize
    }

    /// Load bias without the risk of wrapping
    pub fn load_bias(&self) -> i128 {
        self.actual_base as i128 - self.requested_base as i128
    }

    /// Translate an address taken from the file to a runtime address
    pub fn runtime_address(&self, file_vaddr: u64) -> Option<usize> {
        let vaddr = usize::try_from(file_vaddr).ok()?;
        if vaddr >= self.requested_base {
            self.actual_base.checked_add(vaddr - self.requested_base)
        } else {
            self.actual_base.checked_sub(self.requested_base - vaddr)
        }
    }
}

fn align_up(value: u64, align: u64) -> Option<u64> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// Place the PT_LOAD segments of `reader` into memory from `allocator`
///
/// Needs the program headers to have been read. On failure nothing stays
/// allocated.
pub fn load_segments<S, A>(reader: &ElfReader, stream: &mut S, allocator: &mut A) -> LoadResult<LoadedModule>
where
    S: ElfStream + ?Sized,
    A: SegmentAllocator + ?Sized,
{
    if !reader.program_headers_read() {
        return Err(ElfError::ProgramHeadersNotRead.into());
    }
    let align = reader.config().segment_align;
    if !align.is_power_of_two() {
        return Err(LoadError::InvalidAlignment);
    }

    // Validate everything before asking for memory
    let mut lowest = u64::MAX;
    let mut highest = 0u64;
    let mut count = 0;
    for (index, ph) in reader.program_headers().iter().enumerate() {
        if !ph.is_load() {
            continue;
        }
        if ph.file_size > ph.mem_size {
            log::error!("Segment {} has filesz 0x{:x} > memsz 0x{:x}", index, ph.file_size, ph.mem_size);
            return Err(LoadError::SegmentTooLarge(index));
        }
        let end = ph.vaddr.checked_add(ph.mem_size).ok_or(LoadError::AddressOverflow)?;
        lowest = lowest.min(ph.vaddr);
        highest = highest.max(end);
        count += 1;
    }
    if count == 0 {
        return Err(LoadError::NoLoadableSegments);
    }

    let align64 = align as u64;
    let start = lowest & !(align64 - 1);
    let end = align_up(highest, align64).ok_or(LoadError::AddressOverflow)?;
    let requested_base = usize::try_from(start).map_err(|_| LoadError::AddressOverflow)?;
    let size = usize::try_from(end - start).map_err(|_| LoadError::AddressOverflow)?;
    if size == 0 {
        return Err(LoadError::NoLoadableSegments);
    }

    let placement = allocator
        .allocate(requested_base, size, align)
        .ok_or(LoadError::AllocationFailed)?;
    if placement.region.len() < size || placement.region.base() % align != 0 {
        log::error!("Allocator returned an unusable block at 0x{:x}", placement.region.base());
        allocator.release(placement.cookie);
        return Err(LoadError::AllocationFailed);
    }

    let mut module = LoadedModule {
        requested_base,
        actual_base: placement.region.base(),
        size,
        entry: None,
        region: placement.region,
        cookie: placement.cookie,
    };

    if let Err(e) = copy_segments(reader, stream, &mut module) {
        allocator.release(module.cookie);
        return Err(e);
    }

    let header = reader.header();
    if header.is_executable() || header.entry != 0 {
        match module.runtime_address(header.entry) {
            Some(entry) => module.entry = Some(entry),
            None => {
                allocator.release(module.cookie);
                return Err(LoadError::AddressOverflow);
            }
        }
    }

    log::debug!(
        "Loaded {} bytes at 0x{:x} (linked at 0x{:x})",
        module.size,
        module.actual_base,
        module.requested_base
    );
    Ok(module)
}

fn copy_segments<S>(reader: &ElfReader, stream: &mut S, module: &mut LoadedModule) -> LoadResult<()>
where
    S: ElfStream + ?Sized,
{
    module.region.fill(0);

    for ph in reader.load_segments() {
        if ph.file_size == 0 {
            continue;
        }
        let dest = module.runtime_address(ph.vaddr).ok_or(LoadError::AddressOverflow)?;
        let len = usize::try_from(ph.file_size).map_err(|_| LoadError::AddressOverflow)?;
        let target = module
            .region
            .slice_mut(dest, len)
            .ok_or(LoadError::AddressOverflow)?;
        stream.seek(ph.offset)?;
        stream.read_exact(target)?;
    }
    Ok(())
}
