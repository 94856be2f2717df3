//! Loaded images and the allocators that place them.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::BTreeMap;
use core::ptr::NonNull;
use core::slice;

/// Writable memory backing one loaded module
///
/// `base` is the runtime address the module sees; all accessors take runtime
/// addresses and check them against the region before touching memory.
#[derive(Debug)]
pub struct ImageRegion {
    base: usize,
    ptr: NonNull<u8>,
    len: usize,
}

// The region is uniquely owned by one module
unsafe impl Send for ImageRegion {}

impl ImageRegion {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the region exists, and nothing else may access that memory meanwhile.
    pub unsafe fn new(base: usize, ptr: NonNull<u8>, len: usize) -> Self {
        Self { base, ptr, len }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.base.saturating_add(self.len)
    }

    /// Offset of `[addr, addr + len)` inside the region
    fn offset_of(&self, addr: usize, len: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base)?;
        let end = offset.checked_add(len)?;
        (end <= self.len).then_some(offset)
    }

    pub fn contains(&self, addr: usize, len: usize) -> bool {
        self.offset_of(addr, len).is_some()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn slice(&self, addr: usize, len: usize) -> Option<&[u8]> {
        let offset = self.offset_of(addr, len)?;
        self.as_slice().get(offset..offset + len)
    }

    pub fn slice_mut(&mut self, addr: usize, len: usize) -> Option<&mut [u8]> {
        let offset = self.offset_of(addr, len)?;
        self.as_mut_slice().get_mut(offset..offset + len)
    }

    /// Copy `bytes` to runtime address `addr`
    pub fn write(&mut self, addr: usize, bytes: &[u8]) -> Option<()> {
        self.slice_mut(addr, bytes.len())?.copy_from_slice(bytes);
        Some(())
    }

    pub fn fill(&mut self, value: u8) {
        self.as_mut_slice().fill(value);
    }
}

/// Memory handed out by a [`SegmentAllocator`]
#[derive(Debug)]
pub struct Placement {
    pub region: ImageRegion,
    /// Opaque value passed back to [`SegmentAllocator::release`]
    pub cookie: usize,
}

/// Where loaded images come from
pub trait SegmentAllocator {
    /// Allocate `len` bytes aligned to `align` for an image linked at
    /// `requested_vaddr`. The allocator may honour the request or pick any
    /// other suitably aligned address.
    fn allocate(&mut self, requested_vaddr: usize, len: usize, align: usize) -> Option<Placement>;

    /// Return memory previously handed out under `cookie`
    fn release(&mut self, cookie: usize);
}

impl<A: SegmentAllocator + ?Sized> SegmentAllocator for &mut A {
    fn allocate(&mut self, requested_vaddr: usize, len: usize, align: usize) -> Option<Placement> {
        (**self).allocate(requested_vaddr, len, align)
    }

    fn release(&mut self, cookie: usize) {
        (**self).release(cookie)
    }
}

/// Places images on the global heap, wherever it has room
#[derive(Debug, Default)]
pub struct HeapSegmentAllocator {
    live: BTreeMap<usize, Layout>,
}

impl HeapSegmentAllocator {
    pub fn new() -> Self {
        Self { live: BTreeMap::new() }
    }

    /// Number of images currently allocated
    pub fn live(&self) -> usize {
        self.live.len()
    }
}

impl SegmentAllocator for HeapSegmentAllocator {
    fn allocate(&mut self, _requested_vaddr: usize, len: usize, align: usize) -> Option<Placement> {
        let layout = Layout::from_size_align(len.max(1), align).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        let base = ptr.as_ptr() as usize;
        self.live.insert(base, layout);
        // Freshly allocated and owned until released
        let region = unsafe { ImageRegion::new(base, ptr, len) };
        Some(Placement { region, cookie: base })
    }

    fn release(&mut self, cookie: usize) {
        if let Some(layout) = self.live.remove(&cookie) {
            unsafe { dealloc(cookie as *mut u8, layout) };
        }
    }
}

impl Drop for HeapSegmentAllocator {
    fn drop(&mut self) {
        for (addr, layout) in core::mem::take(&mut self.live) {
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds_are_checked() {
        let mut heap = HeapSegmentAllocator::new();
        let mut placement = heap.allocate(0, 64, 32).unwrap();
        let base = placement.region.base();
        assert_eq!(base % 32, 0);

        assert!(placement.region.write(base + 60, &[1, 2, 3, 4]).is_some());
        assert!(placement.region.write(base + 61, &[1, 2, 3, 4]).is_none());
        assert!(placement.region.slice(base.wrapping_sub(1), 1).is_none());
        assert_eq!(placement.region.slice(base + 60, 4), Some(&[1u8, 2, 3, 4][..]));

        heap.release(placement.cookie);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_heap_allocation_starts_zeroed() {
        let mut heap = HeapSegmentAllocator::new();
        let placement = heap.allocate(0x1000, 128, 64).unwrap();
        assert!(placement.region.as_slice().iter().all(|&b| b == 0));
        assert_eq!(heap.live(), 1);
    }
}
