//! Per-process malloc heap
//!
//! The heap manages a writable mapping of the process address space, so
//! every block it returns lies inside memory the process's protection
//! regions already cover. Blocks carry their requested size in a header in
//! front of the returned pointer.

use core::alloc::Layout;
use core::mem::size_of;
use core::ptr::NonNull;

use linked_list_allocator::Heap;

const HEADER: usize = 2 * size_of::<usize>();
const ALIGN: usize = HEADER;

pub struct UserHeap {
    heap: Heap,
    base: usize,
    len: usize,
}

impl UserHeap {
    /// Manage the `len` bytes at `base`
    ///
    /// # Safety
    /// The range must be writable, used for nothing else, and outlive the heap.
    pub unsafe fn new(base: usize, len: usize) -> Self {
        let mut heap = Heap::empty();
        heap.init(base as *mut u8, len);
        Self { heap, base, len }
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

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr - self.base < self.len
    }

    pub fn used(&self) -> usize {
        self.heap.used()
    }

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.checked_add(HEADER)?, ALIGN).ok()
    }

    /// Header address and recorded size of the block returned as `ptr`
    fn block(&self, ptr: usize) -> Option<(NonNull<u8>, usize)> {
        let raw = ptr.checked_sub(HEADER)?;
        if !self.contains(raw) || ptr % ALIGN != 0 {
            return None;
        }
        let size = unsafe { (raw as *const usize).read() };
        Some((NonNull::new(raw as *mut u8)?, size))
    }

    /// Zero when out of memory
    pub fn malloc(&mut self, size: usize) -> usize {
        let Some(layout) = Self::layout(size) else {
            return 0;
        };
        match self.heap.allocate_first_fit(layout) {
            Ok(raw) => unsafe {
                raw.as_ptr().cast::<usize>().write(size);
                raw.as_ptr().add(HEADER) as usize
            },
            Err(()) => 0,
        }
    }

    pub fn calloc(&mut self, count: usize, size: usize) -> usize {
        let Some(total) = count.checked_mul(size) else {
            return 0;
        };
        let ptr = self.malloc(total);
        if ptr != 0 {
            unsafe { core::ptr::write_bytes(ptr as *mut u8, 0, total) };
        }
        ptr
    }

    pub fn free(&mut self, ptr: usize) {
        if ptr == 0 {
            return;
        }
        match self.block(ptr).and_then(|(raw, size)| Some((raw, Self::layout(size)?))) {
            Some((raw, layout)) => unsafe { self.heap.deallocate(raw, layout) },
            None => log::warn!("free of 0x{:x} outside the process heap", ptr),
        }
    }

    /// Zero on failure, leaving the old block untouched
    pub fn realloc(&mut self, ptr: usize, size: usize) -> usize {
        if ptr == 0 {
            return self.malloc(size);
        }
        let Some((_, old)) = self.block(ptr) else {
            log::warn!("realloc of 0x{:x} outside the process heap", ptr);
            return 0;
        };
        let new = self.malloc(size);
        if new != 0 {
            unsafe { core::ptr::copy_nonoverlapping(ptr as *const u8, new as *mut u8, old.min(size)) };
            self.free(ptr);
        }
        new
    }
}
