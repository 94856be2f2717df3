//! RISC-V PMP encoding
//!
//! Entry `i` is a `pmpcfg` byte and a `pmpaddr` register holding bits
//! `[XLEN+1:2]` of an address. The A field of the cfg byte selects how the
//! address is read:
//! - TOR covers `[pmpaddr[i-1] << 2, pmpaddr[i] << 2)`
//! - NA4 covers the four bytes at `pmpaddr << 2`
//! - NAPOT encodes base and size together; the number of trailing ones
//!   gives the size

use heapless::Vec as HVec;

use super::{Privilege, Region, RegionError, RegionResult};
use crate::elf::{ElfReader, LoadedModule};

pub const PMP_R: u8 = 0x01;
pub const PMP_W: u8 = 0x02;
pub const PMP_X: u8 = 0x04;
pub const PMP_A_MASK: u8 = 0x18;
pub const PMP_A_OFF: u8 = 0x00;
pub const PMP_A_TOR: u8 = 0x08;
pub const PMP_A_NA4: u8 = 0x10;
pub const PMP_A_NAPOT: u8 = 0x18;
pub const PMP_L: u8 = 0x80;

/// Most entries any implementation provides
pub const MAX_PMP_ENTRIES: usize = 64;

/// Access to the PMP register file
pub trait PmpBackend {
    fn entry_count(&self) -> usize;
    fn read_cfg(&self, index: usize) -> u8;
    fn write_cfg(&mut self, index: usize, cfg: u8);
    fn read_addr(&self, index: usize) -> usize;
    fn write_addr(&mut self, index: usize, value: usize);
}

/// How a region ended up in the PMP table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Inactive request, nothing written
    Inactive,
    Napot { index: usize },
    Na4 { index: usize },
    /// One TOR entry reusing the previous entry as its bottom
    Tor { index: usize },
    /// An OFF entry holding the bottom followed by a TOR entry
    TorPair { index: usize },
}

fn is_off(cfg: u8) -> bool {
    cfg & PMP_A_MASK == PMP_A_OFF
}

fn is_tor(cfg: u8) -> bool {
    cfg & PMP_A_MASK == PMP_A_TOR
}

fn shifted(addr: usize) -> usize {
    addr.checked_mul(4).unwrap_or(usize::MAX)
}

/// Granularity in bytes, from the entry at `index`
///
/// Writes all ones to the address register with the entry off and counts
/// the bits that stuck at zero. The entry is restored afterwards. `None`
/// when the register reads back as zero (entry not implemented).
pub fn probe_granularity<B: PmpBackend + ?Sized>(backend: &mut B, index: usize) -> Option<usize> {
    let saved_cfg = backend.read_cfg(index);
    let saved_addr = backend.read_addr(index);

    backend.write_cfg(index, PMP_A_OFF);
    backend.write_addr(index, usize::MAX);
    let probe = backend.read_addr(index);

    backend.write_addr(index, saved_addr);
    backend.write_cfg(index, saved_cfg);

    if probe == 0 {
        return None;
    }
    1usize.checked_shl(probe.trailing_zeros() + 2)
}

pub struct RegionManager<B: PmpBackend> {
    backend: B,
    entries: usize,
    granularity: usize,
}

impl<B: PmpBackend> RegionManager<B> {
    /// Take over `backend`, using at most `max_entries` entries
    pub fn new(mut backend: B, max_entries: usize) -> Self {
        let entries = backend.entry_count().min(max_entries).min(MAX_PMP_ENTRIES);
        let spare = (0..entries).find(|&i| {
            let cfg = backend.read_cfg(i);
            is_off(cfg) && cfg & PMP_L == 0
        });
        let granularity = spare
            .and_then(|i| probe_granularity(&mut backend, i))
            .unwrap_or_else(|| {
                log::warn!("PMP granularity probe failed, assuming 4 bytes");
                4
            });
        log::info!("PMP: {} entries, granularity {} bytes", entries, granularity);
        Self { backend, entries, granularity }
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// An entry is free when it is off, unlocked and not the bottom of a
    /// following TOR entry
    fn is_free(&self, index: usize) -> bool {
        let cfg = self.backend.read_cfg(index);
        if !is_off(cfg) || cfg & PMP_L != 0 {
            return false;
        }
        index + 1 >= self.entries || !is_tor(self.backend.read_cfg(index + 1))
    }

    pub fn free_entries(&self) -> usize {
        (0..self.entries).filter(|&i| self.is_free(i)).count()
    }

    fn free_entry(&self) -> Option<usize> {
        (0..self.entries).find(|&i| self.is_free(i))
    }

    /// Slot that can extend a TOR chain ending at `base`
    fn chain_slot(&self, base: usize) -> Option<usize> {
        if base == 0 && self.is_free(0) {
            return Some(0);
        }
        (1..self.entries).find(|&i| {
            let prev = self.backend.read_cfg(i - 1);
            self.is_free(i) && is_tor(prev) && shifted(self.backend.read_addr(i - 1)) == base
        })
    }

    fn free_pair(&self) -> Option<usize> {
        (0..self.entries.saturating_sub(1)).find(|&i| self.is_free(i) && self.is_free(i + 1))
    }

    fn program(&mut self, index: usize, addr: usize, cfg: u8) {
        self.backend.write_addr(index, addr);
        self.backend.write_cfg(index, cfg);
    }

    /// Program one region, choosing the most compact encoding
    ///
    /// Base and size must be multiples of the granularity; nothing is
    /// rounded here.
    pub fn append_region(&mut self, region: &Region) -> RegionResult<Encoding> {
        if !region.active {
            return Ok(Encoding::Inactive);
        }
        if region.len == 0 {
            return Err(RegionError::EmptyRegion);
        }
        if region.privilege != Privilege::User {
            return Err(RegionError::UnsupportedPrivilege);
        }
        let end = region.base.checked_add(region.len).ok_or(RegionError::Unrepresentable)?;
        let g = self.granularity;
        if region.base % g != 0 || region.len % g != 0 {
            log::error!("PMP region 0x{:x}+0x{:x} not aligned to {}", region.base, region.len, g);
            return Err(RegionError::Misaligned);
        }

        let mut perms = 0;
        if region.read || region.write || region.execute {
            perms |= PMP_R;
        }
        if region.write {
            perms |= PMP_W;
        }
        if region.execute {
            perms |= PMP_X;
        }

        let (base, len) = (region.base, region.len);
        let encoding = if len.is_power_of_two() && len >= 8 && base % len == 0 {
            let index = self.free_entry().ok_or(RegionError::NoFreeEntry)?;
            self.program(index, (base >> 2) | ((len >> 3) - 1), perms | PMP_A_NAPOT);
            Encoding::Napot { index }
        } else if len == 4 {
            let index = self.free_entry().ok_or(RegionError::NoFreeEntry)?;
            self.program(index, base >> 2, perms | PMP_A_NA4);
            Encoding::Na4 { index }
        } else if let Some(index) = self.chain_slot(base) {
            self.program(index, end >> 2, perms | PMP_A_TOR);
            Encoding::Tor { index }
        } else {
            let index = self.free_pair().ok_or(RegionError::NoFreePair)?;
            self.program(index, base >> 2, PMP_A_OFF);
            self.program(index + 1, end >> 2, perms | PMP_A_TOR);
            Encoding::TorPair { index }
        };

        log::debug!("PMP 0x{:x}..0x{:x} perms {:#x} as {:?}", base, end, perms, encoding);
        Ok(encoding)
    }

    /// Decode the enforced regions back from the hardware
    ///
    /// Locked entries are reported as machine regions.
    pub fn read_regions(&self) -> HVec<Region, MAX_PMP_ENTRIES> {
        let mut regions = HVec::new();
        for index in 0..self.entries {
            let cfg = self.backend.read_cfg(index);
            let addr = self.backend.read_addr(index);
            let (base, len) = match cfg & PMP_A_MASK {
                PMP_A_TOR => {
                    let bottom = if index == 0 { 0 } else { shifted(self.backend.read_addr(index - 1)) };
                    let top = shifted(addr);
                    if top <= bottom {
                        continue;
                    }
                    (bottom, top - bottom)
                }
                PMP_A_NA4 => (shifted(addr), 4),
                PMP_A_NAPOT => decode_napot(addr),
                _ => continue,
            };
            let privilege = if cfg & PMP_L != 0 { Privilege::Machine } else { Privilege::User };
            let mut region = Region::new(base, len, privilege, false, cfg & PMP_W != 0, cfg & PMP_X != 0);
            region.read = cfg & PMP_R != 0;
            let _ = regions.push(region);
        }
        regions
    }

    /// Protect every PT_LOAD segment of `module` with its own permissions
    ///
    /// Returns the number of regions written.
    pub fn apply_load_segments(&mut self, reader: &ElfReader, module: &LoadedModule) -> RegionResult<usize> {
        let mut requests = alloc::vec::Vec::new();
        for ph in reader.load_segments() {
            if ph.mem_size == 0 {
                continue;
            }
            let start = module.runtime_address(ph.vaddr).ok_or(RegionError::Unrepresentable)?;
            let len = usize::try_from(ph.mem_size).map_err(|_| RegionError::Unrepresentable)?;
            requests.push(Region::new(start, len, Privilege::User, ph.readable(), ph.writable(), ph.executable()));
        }
        self.apply_regions(&requests)
    }

    /// Widen `requests` to the granularity, merge them and program the result
    pub fn apply_regions(&mut self, requests: &[Region]) -> RegionResult<usize> {
        let mask = !(self.granularity - 1);
        let mut widened = alloc::vec::Vec::with_capacity(requests.len());
        for request in requests.iter().filter(|r| r.active && r.len != 0) {
            let end = request
                .base
                .checked_add(request.len)
                .and_then(|e| e.checked_add(self.granularity - 1))
                .ok_or(RegionError::Unrepresentable)?
                & mask;
            let base = request.base & mask;
            widened.push(Region { base, len: end - base, ..*request });
        }

        let merged = super::pure_merge(&widened);
        for region in &merged {
            self.append_region(region)?;
        }
        Ok(merged.len())
    }

    /// Grant user mode read, write and execute on the whole address space
    ///
    /// An all-ones NAPOT address covers every address the hart can issue.
    pub fn allow_all(&mut self) -> RegionResult<Encoding> {
        let index = self.free_entry().ok_or(RegionError::NoFreeEntry)?;
        self.program(index, usize::MAX, PMP_R | PMP_W | PMP_X | PMP_A_NAPOT);
        log::debug!("PMP entry {} allows everything", index);
        Ok(Encoding::Napot { index })
    }

    /// Switch off every unlocked entry
    pub fn clear(&mut self) {
        for index in 0..self.entries {
            if self.backend.read_cfg(index) & PMP_L == 0 {
                self.backend.write_cfg(index, PMP_A_OFF);
                self.backend.write_addr(index, 0);
            }
        }
    }
}

/// Base and size of a NAPOT address register
fn decode_napot(addr: usize) -> (usize, usize) {
    let ones = addr.trailing_ones();
    if ones + 3 >= usize::BITS {
        return (0, usize::MAX);
    }
    let size = 1usize << (ones + 3);
    let base = shifted(addr & !((1usize << ones) - 1));
    (base, size)
}
