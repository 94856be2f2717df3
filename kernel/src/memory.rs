// Kernel heap and the allocators handed to the loader
// Loaded images and process address spaces both come out of one
// linked-list heap between the end of .bss and the boot stack

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::BTreeMap;
use linked_list_allocator::LockedHeap;

use badgeload::RangeAllocator;

#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

extern "C" {
    static mut _heap_start: u8;
    static mut _heap_end: u8;
}

pub fn init_heap() -> usize {
    unsafe {
        let start = core::ptr::addr_of_mut!(_heap_start);
        let end = core::ptr::addr_of_mut!(_heap_end) as usize;
        let size = end - start as usize;
        ALLOCATOR.lock().init(start, size);
        size
    }
}

pub fn heap_stats() -> (usize, usize) {
    let heap = ALLOCATOR.lock();
    (heap.used(), heap.free())
}

/// Backing memory for process address spaces
#[derive(Default)]
pub struct HeapRangeAllocator {
    live: BTreeMap<usize, Layout>,
}

impl HeapRangeAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RangeAllocator for HeapRangeAllocator {
    fn allocate(&mut self, length: usize, align: usize) -> Option<usize> {
        let layout = Layout::from_size_align(length, align).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            log::warn!("Heap exhausted allocating {} bytes", length);
            return None;
        }
        self.live.insert(ptr as usize, layout);
        Some(ptr as usize)
    }

    fn release(&mut self, base: usize, length: usize) {
        match self.live.remove(&base) {
            Some(layout) if layout.size() == length => unsafe { dealloc(base as *mut u8, layout) },
            Some(layout) => {
                log::error!("Release of 0x{:x} with length {} (allocated {})", base, length, layout.size());
                unsafe { dealloc(base as *mut u8, layout) };
            }
            None => log::error!("Release of unknown range 0x{:x}", base),
        }
    }
}

impl Drop for HeapRangeAllocator {
    fn drop(&mut self) {
        for (base, layout) in core::mem::take(&mut self.live) {
            unsafe { dealloc(base as *mut u8, layout) };
        }
    }
}
