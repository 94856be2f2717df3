//! Process address space
//!
//! Three lists describe the memory a process can see:
//! - `actual`: raw backing allocations, each with one permission set
//! - `mapped`: live sub-ranges handed out by [`AbiContext::map`]
//! - `available`: free sub-ranges, sorted by base and always coalesced
//!
//! Within one backing, `mapped` and `available` tile the whole range. A
//! backing that becomes entirely free is handed back to the allocator.

use alloc::vec::Vec;

use super::regions::MemoryRegion;
use super::{AllocResult, AllocationError};

const WORD: usize = core::mem::size_of::<usize>();

/// Source of raw backing memory for process address spaces
pub trait RangeAllocator {
    /// Allocate `length` bytes aligned to `align`; `None` when exhausted
    fn allocate(&mut self, length: usize, align: usize) -> Option<usize>;
    /// Return a range obtained from [`RangeAllocator::allocate`]
    fn release(&mut self, base: usize, length: usize);
}

impl<R: RangeAllocator + ?Sized> RangeAllocator for &mut R {
    fn allocate(&mut self, length: usize, align: usize) -> Option<usize> {
        (**self).allocate(length, align)
    }

    fn release(&mut self, base: usize, length: usize) {
        (**self).release(base, length)
    }
}

/// A range together with the permissions of its backing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub base: usize,
    pub len: usize,
    pub writable: bool,
    pub executable: bool,
}

#[derive(Debug, Clone, Copy)]
struct Backing {
    region: MemoryRegion,
    writable: bool,
    executable: bool,
}

/// A sub-range of `actual[backing]`
#[derive(Debug, Clone, Copy)]
struct Span {
    region: MemoryRegion,
    backing: usize,
}

fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

pub struct AbiContext<R: RangeAllocator> {
    allocator: R,
    granule: usize,
    actual: Vec<Backing>,
    mapped: Vec<Span>,
    available: Vec<Span>,
}

impl<R: RangeAllocator> AbiContext<R> {
    /// New empty address space; backings are at least `granule` bytes
    pub fn new(allocator: R, granule: usize) -> Self {
        let granule = granule.max(WORD).next_power_of_two();
        Self {
            allocator,
            granule,
            actual: Vec::new(),
            mapped: Vec::new(),
            available: Vec::new(),
        }
    }

    /// Map `length` bytes (rounded up to `align`) and return the base
    ///
    /// Reuses the first free range of a backing with the same permissions
    /// that fits; otherwise grows the address space by one backing and
    /// retries. The mapping is zeroed.
    pub fn map(&mut self, length: usize, writable: bool, executable: bool, align: usize) -> AllocResult<usize> {
        if length == 0 {
            return Err(AllocationError::InvalidSize);
        }
        let align = align.max(WORD);
        if !align.is_power_of_two() {
            return Err(AllocationError::InvalidAlignment);
        }
        let length = align_up(length, align).ok_or(AllocationError::InvalidSize)?;

        let base = match self.take(length, writable, executable, align) {
            Some(base) => base,
            None => {
                self.grow(length, writable, executable, align)?;
                self.take(length, writable, executable, align)
                    .ok_or(AllocationError::OutOfMemory)?
            }
        };

        unsafe { core::ptr::write_bytes(base as *mut u8, 0, length) };
        log::debug!("Mapped 0x{:x}..0x{:x} w={} x={}", base, base + length, writable, executable);
        Ok(base)
    }

    /// Unmap the mapping starting at `base`
    pub fn unmap(&mut self, base: usize) -> AllocResult<()> {
        let index = self
            .mapped
            .iter()
            .position(|s| s.region.start == base)
            .ok_or(AllocationError::UnknownAddress)?;
        let span = self.mapped.swap_remove(index);

        let at = self.insert_available(span);
        let at = self.merge_around(at);

        let free = self.available[at];
        if free.region == self.actual[free.backing].region {
            self.release_backing(free.backing);
        }
        Ok(())
    }

    fn take(&mut self, length: usize, writable: bool, executable: bool, align: usize) -> Option<usize> {
        let actual = &self.actual;
        let (index, start) = self.available.iter().enumerate().find_map(|(i, span)| {
            let backing = &actual[span.backing];
            if backing.writable != writable || backing.executable != executable {
                return None;
            }
            let start = align_up(span.region.start, align)?;
            let end = start.checked_add(length)?;
            (end <= span.region.end()).then_some((i, start))
        })?;

        let span = self.available.remove(index);
        let end = start + length;
        // Surplus after, then before, so the list stays sorted
        if end < span.region.end() {
            self.available.insert(
                index,
                Span { region: MemoryRegion::new(end, span.region.end() - end), backing: span.backing },
            );
        }
        if start > span.region.start {
            self.available.insert(
                index,
                Span {
                    region: MemoryRegion::new(span.region.start, start - span.region.start),
                    backing: span.backing,
                },
            );
        }
        self.mapped.push(Span { region: MemoryRegion::new(start, length), backing: span.backing });
        Some(start)
    }

    fn grow(&mut self, length: usize, writable: bool, executable: bool, align: usize) -> AllocResult<()> {
        let size = align_up(length.max(self.granule), self.granule.max(align))
            .ok_or(AllocationError::OutOfMemory)?;
        let base = self
            .allocator
            .allocate(size, align)
            .ok_or(AllocationError::OutOfMemory)?;
        if base % align != 0 || base.checked_add(size).is_none() {
            self.allocator.release(base, size);
            return Err(AllocationError::InvalidAlignment);
        }

        let region = MemoryRegion::new(base, size);
        let backing = self.actual.len();
        self.actual.push(Backing { region, writable, executable });
        self.insert_available(Span { region, backing });
        log::debug!("New backing 0x{:x}..0x{:x}", base, base + size);
        Ok(())
    }

    fn insert_available(&mut self, span: Span) -> usize {
        let at = self.available.partition_point(|s| s.region.start < span.region.start);
        self.available.insert(at, span);
        at
    }

    /// Coalesce `available[at]` with its neighbours; returns its new index
    fn merge_around(&mut self, mut at: usize) -> usize {
        if at + 1 < self.available.len() {
            let next = self.available[at + 1];
            let cur = self.available[at];
            if next.backing == cur.backing && cur.region.precedes(&next.region) {
                self.available[at].region.size += next.region.size;
                self.available.remove(at + 1);
            }
        }
        if at > 0 {
            let prev = self.available[at - 1];
            let cur = self.available[at];
            if prev.backing == cur.backing && prev.region.precedes(&cur.region) {
                self.available[at - 1].region.size += cur.region.size;
                self.available.remove(at);
                at -= 1;
            }
        }
        at
    }

    fn release_backing(&mut self, index: usize) {
        let backing = self.actual.remove(index);
        self.available.retain(|s| s.backing != index);
        for span in self.available.iter_mut().chain(self.mapped.iter_mut()) {
            if span.backing > index {
                span.backing -= 1;
            }
        }
        self.allocator.release(backing.region.start, backing.region.size);
        log::debug!("Released backing 0x{:x}", backing.region.start);
    }

    fn find_mapped(&self, addr: usize, len: usize) -> AllocResult<&Span> {
        self.mapped
            .iter()
            .find(|s| s.region.covers(addr, len))
            .ok_or(AllocationError::AccessViolation)
    }

    /// Copy `bytes` into mapped memory at `addr`
    pub fn write_bytes(&mut self, addr: usize, bytes: &[u8]) -> AllocResult<()> {
        self.find_mapped(addr, bytes.len())?;
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
        Ok(())
    }

    /// View mapped memory at `addr`
    pub fn read_bytes(&self, addr: usize, len: usize) -> AllocResult<&[u8]> {
        self.find_mapped(addr, len)?;
        Ok(unsafe { core::slice::from_raw_parts(addr as *const u8, len) })
    }

    pub fn mappings(&self) -> impl Iterator<Item = Mapping> + '_ {
        self.mapped.iter().map(|s| self.describe(s))
    }

    /// Mapping that starts at `base`
    pub fn mapping(&self, base: usize) -> Option<Mapping> {
        self.mapped.iter().find(|s| s.region.start == base).map(|s| self.describe(s))
    }

    /// The raw backings, for projecting onto protection regions
    pub fn backings(&self) -> impl Iterator<Item = Mapping> + '_ {
        self.actual.iter().map(|b| Mapping {
            base: b.region.start,
            len: b.region.size,
            writable: b.writable,
            executable: b.executable,
        })
    }

    fn describe(&self, span: &Span) -> Mapping {
        let backing = &self.actual[span.backing];
        Mapping {
            base: span.region.start,
            len: span.region.size,
            writable: backing.writable,
            executable: backing.executable,
        }
    }

    pub fn available_bytes(&self) -> usize {
        self.available.iter().map(|s| s.region.size).sum()
    }

    pub fn backing_count(&self) -> usize {
        self.actual.len()
    }

    pub fn allocator(&self) -> &R {
        &self.allocator
    }

    /// Check the list invariants: within every backing, mapped and free
    /// spans tile it exactly, and the free list is sorted and coalesced
    pub fn check_consistency(&self) -> bool {
        let spans = || self.mapped.iter().chain(self.available.iter());
        if spans().any(|s| s.backing >= self.actual.len() || s.region.size == 0) {
            return false;
        }
        let sorted = self.available.windows(2).all(|w| {
            w[0].region.end() <= w[1].region.start
                && !(w[0].backing == w[1].backing && w[0].region.precedes(&w[1].region))
        });
        if !sorted {
            return false;
        }

        for (index, backing) in self.actual.iter().enumerate() {
            let mut pieces: Vec<MemoryRegion> =
                spans().filter(|s| s.backing == index).map(|s| s.region).collect();
            pieces.sort_by_key(|r| r.start);
            let mut cursor = backing.region.start;
            for piece in pieces {
                if piece.start != cursor {
                    return false;
                }
                cursor = piece.end();
            }
            if cursor != backing.region.end() {
                return false;
            }
        }
        true
    }
}

impl<R: RangeAllocator> Drop for AbiContext<R> {
    fn drop(&mut self) {
        for backing in core::mem::take(&mut self.actual) {
            self.allocator.release(backing.region.start, backing.region.size);
        }
    }
}
