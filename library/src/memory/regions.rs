// Address range type shared by the address space and the loader

/// A half-open byte range `[start, start + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: usize,
    pub size: usize,
}

impl MemoryRegion {
    /// Create a new memory region
    pub const fn new(start: usize, size: usize) -> Self {
        Self { start, size }
    }

    /// Get the end address of this region
    pub const fn end(&self) -> usize {
        self.start.saturating_add(self.size)
    }

    /// Check if an address is within this region
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }

    /// Check if `[addr, addr + len)` lies entirely inside this region
    pub fn covers(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.start && end <= self.end(),
            None => false,
        }
    }

    /// Check if this region overlaps with another region
    pub const fn overlaps_with(&self, other: &MemoryRegion) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// Check if `other` starts exactly where this region ends
    pub const fn precedes(&self, other: &MemoryRegion) -> bool {
        self.end() == other.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds() {
        let region = MemoryRegion::new(0x1000, 0x100);
        assert_eq!(region.end(), 0x1100);
        assert!(region.contains(0x10ff));
        assert!(!region.contains(0x1100));
        assert!(region.covers(0x1080, 0x80));
        assert!(!region.covers(0x1080, 0x81));
        assert!(!region.covers(usize::MAX, 2));
    }

    #[test]
    fn test_region_neighbours() {
        let a = MemoryRegion::new(0x1000, 0x100);
        let b = MemoryRegion::new(0x1100, 0x100);
        assert!(a.precedes(&b));
        assert!(!a.overlaps_with(&b));
        assert!(a.overlaps_with(&MemoryRegion::new(0x10f0, 0x20)));
    }
}
