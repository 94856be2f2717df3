//! Test fixtures: a small ELF writer, fake allocators and a PMP register file.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::config::ElfClass;
use crate::elf::constants::*;
use crate::elf::image::{ImageRegion, Placement, SegmentAllocator};
use crate::memory::RangeAllocator;
use crate::mpu::PmpBackend;

/// Section index of the first load segment's section
pub const TEXT: u16 = 1;

struct SymbolSpec {
    name: String,
    name_override: Option<u32>,
    value: u64,
    info: u8,
    section: u16,
}

struct RelocSpec {
    offset: u64,
    symbol: u32,
    kind: u32,
    addend: i64,
}

struct Segment {
    vaddr: u64,
    data: Vec<u8>,
    mem_size: u64,
    flags: u32,
}

/// Little-endian field writer
struct Out {
    bytes: Vec<u8>,
    class: ElfClass,
}

impl Out {
    fn new(class: ElfClass) -> Self {
        Self { bytes: Vec::new(), class }
    }

    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn word(&mut self, v: u64) {
        match self.class {
            ElfClass::Elf32 => self.u32(v as u32),
            ElfClass::Elf64 => self.bytes.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn sword(&mut self, v: i64) {
        self.word(v as u64)
    }

    fn align(&mut self, to: usize) {
        while self.bytes.len() % to != 0 {
            self.bytes.push(0);
        }
    }
}

fn size(sizes: (usize, usize), class: ElfClass) -> usize {
    match class {
        ElfClass::Elf32 => sizes.0,
        ElfClass::Elf64 => sizes.1,
    }
}

/// String table with a leading empty name
fn string_table<'a>(names: impl Iterator<Item = &'a str>) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::new();
    for name in names {
        offsets.push(table.len() as u32);
        table.extend_from_slice(name.as_bytes());
        table.push(0);
    }
    (table, offsets)
}

struct SectionSpec {
    name: String,
    kind: u32,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
}

fn push_blob(
    body: &mut Out,
    sections: &mut Vec<SectionSpec>,
    name: &str,
    kind: u32,
    bytes: &[u8],
    link: u32,
    entsize: usize,
) {
    body.align(8);
    sections.push(SectionSpec {
        name: String::from(name),
        kind,
        addr: 0,
        offset: body.bytes.len() as u64,
        size: bytes.len() as u64,
        link,
        entsize: entsize as u64,
    });
    body.bytes.extend_from_slice(bytes);
}

/// Emits small little-endian RISC-V ELF images
pub struct ElfBuilder {
    class: ElfClass,
    elf_type: u16,
    entry: u64,
    segments: Vec<Segment>,
    dynsyms: Vec<SymbolSpec>,
    locals: Vec<SymbolSpec>,
    relas: Vec<RelocSpec>,
    rels: Vec<RelocSpec>,
}

impl ElfBuilder {
    pub fn new(class: ElfClass, elf_type: u16, entry: u64) -> Self {
        Self {
            class,
            elf_type,
            entry,
            segments: Vec::new(),
            dynsyms: Vec::new(),
            locals: Vec::new(),
            relas: Vec::new(),
            rels: Vec::new(),
        }
    }

    pub fn shared() -> Self {
        Self::new(ElfClass::Elf64, ET_DYN, 0)
    }

    pub fn shared_for(class: ElfClass) -> Self {
        Self::new(class, ET_DYN, 0)
    }

    pub fn executable(entry: u64) -> Self {
        Self::new(ElfClass::Elf64, ET_EXEC, entry)
    }

    pub fn segment(&mut self, vaddr: u64, data: &[u8], mem_size: u64, flags: u32) -> &mut Self {
        self.segments.push(Segment { vaddr, data: data.to_vec(), mem_size, flags });
        self
    }

    /// Add a dynamic symbol; returns its index in `.dynsym`
    pub fn dynsym(&mut self, name: &str, value: u64, section: u16, bind: u8, kind: u8) -> u32 {
        self.dynsyms.push(SymbolSpec {
            name: String::from(name),
            name_override: None,
            value,
            info: (bind << 4) | kind,
            section,
        });
        self.dynsyms.len() as u32
    }

    pub fn export(&mut self, name: &str, value: u64, bind: u8, kind: u8) -> u32 {
        self.dynsym(name, value, TEXT, bind, kind)
    }

    pub fn import(&mut self, name: &str) -> u32 {
        self.dynsym(name, 0, SHN_UNDEF, STB_GLOBAL, STT_NOTYPE)
    }

    /// Add a local `.symtab` entry; returns its index
    pub fn local(&mut self, name: &str, value: u64) -> u32 {
        self.locals.push(SymbolSpec {
            name: String::from(name),
            name_override: None,
            value,
            info: (STB_LOCAL << 4) | STT_FUNC,
            section: TEXT,
        });
        self.locals.len() as u32
    }

    /// Point the name of dynamic symbol `index` somewhere else
    pub fn corrupt_dynsym_name(&mut self, index: u32, offset: u32) -> &mut Self {
        self.dynsyms[index as usize - 1].name_override = Some(offset);
        self
    }

    pub fn rela(&mut self, offset: u64, symbol: u32, kind: u32, addend: i64) -> &mut Self {
        self.relas.push(RelocSpec { offset, symbol, kind, addend });
        self
    }

    pub fn rel(&mut self, offset: u64, symbol: u32, kind: u32) -> &mut Self {
        self.rels.push(RelocSpec { offset, symbol, kind, addend: 0 });
        self
    }

    fn write_symbols(&self, out: &mut Out, symbols: &[SymbolSpec], names: &[u32]) {
        // Null symbol first
        for _ in 0..size(SYM_SIZE, self.class) {
            out.u8(0);
        }
        for (sym, &name) in symbols.iter().zip(names) {
            let name = sym.name_override.unwrap_or(name);
            match self.class {
                ElfClass::Elf32 => {
                    out.u32(name);
                    out.word(sym.value);
                    out.word(0);
                    out.u8(sym.info);
                    out.u8(0);
                    out.u16(sym.section);
                }
                ElfClass::Elf64 => {
                    out.u32(name);
                    out.u8(sym.info);
                    out.u8(0);
                    out.u16(sym.section);
                    out.word(sym.value);
                    out.word(0);
                }
            }
        }
    }

    fn write_relocs(&self, out: &mut Out, relocs: &[RelocSpec], addend: bool) {
        for r in relocs {
            let info = match self.class {
                ElfClass::Elf32 => (u64::from(r.symbol) << 8) | u64::from(r.kind & 0xff),
                ElfClass::Elf64 => (u64::from(r.symbol) << 32) | u64::from(r.kind),
            };
            out.word(r.offset);
            out.word(info);
            if addend {
                out.sword(r.addend);
            }
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let class = self.class;
        let ehsize = size(EHDR_SIZE, class);
        let phsize = size(PHDR_SIZE, class);
        let data_start = ehsize + phsize * self.segments.len();

        // Body is everything after the program headers
        let mut body = Out::new(class);
        body.bytes.resize(data_start, 0);
        let mut sections = Vec::new();
        let mut seg_offsets = Vec::new();

        for (i, seg) in self.segments.iter().enumerate() {
            body.align(16);
            seg_offsets.push(body.bytes.len() as u64);
            sections.push(SectionSpec {
                name: format!(".load{}", i),
                kind: SHT_PROGBITS,
                addr: seg.vaddr,
                offset: body.bytes.len() as u64,
                size: seg.data.len() as u64,
                link: 0,
                entsize: 0,
            });
            body.bytes.extend_from_slice(&seg.data);
        }

        let base = self.segments.len() as u32 + 1;
        let (dynstr, dyn_names) = string_table(self.dynsyms.iter().map(|s| s.name.as_str()));
        let (strtab, local_names) = string_table(self.locals.iter().map(|s| s.name.as_str()));

        let symsize = size(SYM_SIZE, class);
        let mut dynsym = Out::new(class);
        self.write_symbols(&mut dynsym, &self.dynsyms, &dyn_names);
        let mut symtab = Out::new(class);
        self.write_symbols(&mut symtab, &self.locals, &local_names);

        push_blob(&mut body, &mut sections, ".dynstr", SHT_STRTAB, &dynstr, 0, 0);
        push_blob(&mut body, &mut sections, ".dynsym", SHT_DYNSYM, &dynsym.bytes, base, symsize);
        push_blob(&mut body, &mut sections, ".strtab", SHT_STRTAB, &strtab, 0, 0);
        push_blob(&mut body, &mut sections, ".symtab", SHT_SYMTAB, &symtab.bytes, base + 2, symsize);
        if !self.relas.is_empty() {
            let mut rela = Out::new(class);
            self.write_relocs(&mut rela, &self.relas, true);
            push_blob(&mut body, &mut sections, ".rela.dyn", SHT_RELA, &rela.bytes, base + 1, size(RELA_SIZE, class));
        }
        if !self.rels.is_empty() {
            let mut rel = Out::new(class);
            self.write_relocs(&mut rel, &self.rels, false);
            push_blob(&mut body, &mut sections, ".rel.dyn", SHT_REL, &rel.bytes, base + 1, size(REL_SIZE, class));
        }

        let mut shstr = vec![0u8];
        let mut name_offsets = Vec::new();
        for s in &sections {
            name_offsets.push(shstr.len() as u32);
            shstr.extend_from_slice(s.name.as_bytes());
            shstr.push(0);
        }
        let shstrtab_name = shstr.len() as u32;
        shstr.extend_from_slice(b".shstrtab\0");
        push_blob(&mut body, &mut sections, ".shstrtab", SHT_STRTAB, &shstr, 0, 0);
        name_offsets.push(shstrtab_name);

        // Section headers, null entry first
        body.align(8);
        let shoff = body.bytes.len() as u64;
        let shsize = size(SHDR_SIZE, class);
        for _ in 0..shsize {
            body.u8(0);
        }
        for (s, &name) in sections.iter().zip(&name_offsets) {
            body.u32(name);
            body.u32(s.kind);
            body.word(0);
            body.word(s.addr);
            body.word(s.offset);
            body.word(s.size);
            body.u32(s.link);
            body.u32(0);
            body.word(8);
            body.word(s.entsize);
        }
        let shnum = sections.len() as u16 + 1;

        // Header and program headers go in front
        let mut head = Out::new(class);
        head.bytes.extend_from_slice(&ELF_MAGIC);
        head.u8(match class {
            ElfClass::Elf32 => ELFCLASS32,
            ElfClass::Elf64 => ELFCLASS64,
        });
        head.u8(ELFDATA2LSB);
        head.u8(1);
        head.bytes.resize(EI_NIDENT, 0);
        head.u16(self.elf_type);
        head.u16(EM_RISCV);
        head.u32(EV_CURRENT);
        head.word(self.entry);
        head.word(if self.segments.is_empty() { 0 } else { ehsize as u64 });
        head.word(shoff);
        head.u32(0);
        head.u16(ehsize as u16);
        head.u16(phsize as u16);
        head.u16(self.segments.len() as u16);
        head.u16(shsize as u16);
        head.u16(shnum);
        head.u16(shnum - 1);

        for (seg, &offset) in self.segments.iter().zip(&seg_offsets) {
            head.u32(PT_LOAD);
            match class {
                ElfClass::Elf32 => {
                    head.word(offset);
                    head.word(seg.vaddr);
                    head.word(seg.vaddr);
                    head.word(seg.data.len() as u64);
                    head.word(seg.mem_size);
                    head.u32(seg.flags);
                    head.word(0x1000);
                }
                ElfClass::Elf64 => {
                    head.u32(seg.flags);
                    head.word(offset);
                    head.word(seg.vaddr);
                    head.word(seg.vaddr);
                    head.word(seg.data.len() as u64);
                    head.word(seg.mem_size);
                    head.word(0x1000);
                }
            }
        }

        let mut image = body.bytes;
        image[..head.bytes.len()].copy_from_slice(&head.bytes);
        image
    }
}

/// Hands out host buffers while reporting chosen runtime base addresses
pub struct FixedBaseAllocator {
    bases: Vec<usize>,
    next: usize,
    fail: bool,
    buffers: BTreeMap<usize, *mut [u8]>,
    next_cookie: usize,
    requests: Vec<(usize, usize, usize)>,
    releases: usize,
}

impl FixedBaseAllocator {
    pub fn new(bases: &[usize]) -> Self {
        Self {
            bases: bases.to_vec(),
            next: 0,
            fail: false,
            buffers: BTreeMap::new(),
            next_cookie: 1,
            requests: Vec::new(),
            releases: 0,
        }
    }

    pub fn failing() -> Self {
        let mut allocator = Self::new(&[]);
        allocator.fail = true;
        allocator
    }

    /// `(requested_vaddr, len, align)` of every allocation attempt
    pub fn requests(&self) -> &[(usize, usize, usize)] {
        &self.requests
    }

    pub fn live(&self) -> usize {
        self.buffers.len()
    }

    pub fn releases(&self) -> usize {
        self.releases
    }
}

impl SegmentAllocator for FixedBaseAllocator {
    fn allocate(&mut self, requested_vaddr: usize, len: usize, align: usize) -> Option<Placement> {
        self.requests.push((requested_vaddr, len, align));
        if self.fail {
            return None;
        }
        let base = *self.bases.get(self.next)?;
        self.next += 1;

        // Garbage fill so zeroing is observable
        let buffer: Box<[u8]> = vec![0xa5u8; len].into_boxed_slice();
        let raw = Box::into_raw(buffer);
        let ptr = NonNull::new(raw as *mut u8)?;
        let cookie = self.next_cookie;
        self.next_cookie += 1;
        self.buffers.insert(cookie, raw);
        let region = unsafe { ImageRegion::new(base, ptr, len) };
        Some(Placement { region, cookie })
    }

    fn release(&mut self, cookie: usize) {
        if let Some(raw) = self.buffers.remove(&cookie) {
            self.releases += 1;
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

impl Drop for FixedBaseAllocator {
    fn drop(&mut self) {
        for (_, raw) in core::mem::take(&mut self.buffers) {
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

/// Real host memory for address-space tests
#[derive(Default)]
pub struct HostRangeAllocator {
    live: BTreeMap<usize, Layout>,
    limit: Option<usize>,
    pub allocations: usize,
}

impl HostRangeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations after `count` successful ones
    pub fn with_limit(count: usize) -> Self {
        let mut allocator = Self::default();
        allocator.limit = Some(count);
        allocator
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }
}

impl RangeAllocator for HostRangeAllocator {
    fn allocate(&mut self, length: usize, align: usize) -> Option<usize> {
        if self.limit.is_some_and(|limit| self.allocations >= limit) {
            return None;
        }
        let layout = Layout::from_size_align(length, align).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        self.allocations += 1;
        self.live.insert(ptr as usize, layout);
        Some(ptr as usize)
    }

    fn release(&mut self, base: usize, length: usize) {
        let layout = self.live.remove(&base);
        assert_eq!(layout.map(|l| l.size()), Some(length), "release of unknown range");
        if let Some(layout) = layout {
            unsafe { dealloc(base as *mut u8, layout) };
        }
    }
}

impl Drop for HostRangeAllocator {
    fn drop(&mut self) {
        for (base, layout) in core::mem::take(&mut self.live) {
            unsafe { dealloc(base as *mut u8, layout) };
        }
    }
}

/// PMP register file following the privileged architecture's WARL rules for a
/// granularity of `2^(g+2)` bytes
pub struct MockPmp {
    cfg: Vec<u8>,
    addr: Vec<usize>,
    g: u32,
    /// Every write in order: `(is_cfg, index)`
    pub writes: Vec<(bool, usize)>,
}

impl MockPmp {
    pub fn new(entries: usize, g: u32) -> Self {
        Self { cfg: vec![0; entries], addr: vec![0; entries], g, writes: Vec::new() }
    }

    pub fn raw_addr(&self, index: usize) -> usize {
        self.addr[index]
    }
}

impl PmpBackend for MockPmp {
    fn entry_count(&self) -> usize {
        self.cfg.len()
    }

    fn read_cfg(&self, index: usize) -> u8 {
        self.cfg[index]
    }

    fn write_cfg(&mut self, index: usize, cfg: u8) {
        self.writes.push((true, index));
        self.cfg[index] = cfg;
    }

    fn read_addr(&self, index: usize) -> usize {
        let value = self.addr[index];
        let napot = self.cfg[index] & 0x18 == 0x18;
        if napot && self.g >= 2 {
            value | ((1 << (self.g - 1)) - 1)
        } else if !napot && self.g >= 1 {
            value & !((1 << self.g) - 1)
        } else {
            value
        }
    }

    fn write_addr(&mut self, index: usize, value: usize) {
        self.writes.push((false, index));
        self.addr[index] = value;
    }
}
