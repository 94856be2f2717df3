//! ELF Parser
//!
//! Validates the fixed header of a binary and decodes its section, program
//! header, symbol and relocation tables. Every index and string offset is
//! checked against the table it points into before it is used.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::constants::*;
use super::error::{ElfError, ElfResult};
use super::stream::ElfStream;
use super::structures::*;
use crate::config::{ElfClass, Endianness, LoaderConfig};

/// Pick the ELF32 or ELF64 record size
fn record_size(sizes: (usize, usize), class: ElfClass) -> usize {
    match class {
        ElfClass::Elf32 => sizes.0,
        ElfClass::Elf64 => sizes.1,
    }
}

/// Look up a NUL-terminated name in a string table
fn string_at(table: &[u8], offset: u32) -> ElfResult<String> {
    let tail = table
        .get(offset as usize..)
        .ok_or(ElfError::StringOutOfRange(offset))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::StringOutOfRange(offset))?;
    Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
}

/// Sequential field decoder over one record
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
    class: ElfClass,
    endianness: Endianness,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8], class: ElfClass, endianness: Endianness) -> Self {
        Self { buf, pos: 0, class, endianness }
    }

    fn take<const N: usize>(&mut self) -> ElfResult<[u8; N]> {
        let end = self.pos.checked_add(N).ok_or(ElfError::Truncated)?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .and_then(|s| <[u8; N]>::try_from(s).ok())
            .ok_or(ElfError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> ElfResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> ElfResult<u16> {
        let b = self.take()?;
        Ok(match self.endianness {
            Endianness::Little => u16::from_le_bytes(b),
            Endianness::Big => u16::from_be_bytes(b),
        })
    }

    fn u32(&mut self) -> ElfResult<u32> {
        let b = self.take()?;
        Ok(match self.endianness {
            Endianness::Little => u32::from_le_bytes(b),
            Endianness::Big => u32::from_be_bytes(b),
        })
    }

    fn u64(&mut self) -> ElfResult<u64> {
        let b = self.take()?;
        Ok(match self.endianness {
            Endianness::Little => u64::from_le_bytes(b),
            Endianness::Big => u64::from_be_bytes(b),
        })
    }

    /// Address-sized unsigned field
    fn word(&mut self) -> ElfResult<u64> {
        match self.class {
            ElfClass::Elf32 => self.u32().map(u64::from),
            ElfClass::Elf64 => self.u64(),
        }
    }

    /// Address-sized signed field
    fn sword(&mut self) -> ElfResult<i64> {
        match self.class {
            ElfClass::Elf32 => self.u32().map(|v| i64::from(v as i32)),
            ElfClass::Elf64 => self.u64().map(|v| v as i64),
        }
    }
}

/// Parsed view of one ELF binary
///
/// The reader holds decoded tables only. Each `read_*` call borrows the
/// stream, is idempotent, and pulls in whatever tables it depends on.
#[derive(Debug, Clone)]
pub struct ElfReader {
    config: LoaderConfig,
    header: Header,
    sections: Option<Vec<SectionInfo>>,
    programs: Option<Vec<ProgramInfo>>,
    symbols: Option<Vec<SymbolInfo>>,
    symtab_index: Option<usize>,
    dynamic_symbols: Option<Vec<SymbolInfo>>,
    dynsym_index: Option<usize>,
    relocations: Option<Vec<RelocationTable>>,
    implicit_addend: Vec<usize>,
}

impl ElfReader {
    /// Read and validate the file header
    pub fn open<S: ElfStream + ?Sized>(stream: &mut S, config: &LoaderConfig) -> ElfResult<Self> {
        let mut ident = [0u8; EI_NIDENT];
        stream.seek(0)?;
        stream.read_exact(&mut ident)?;

        if ident[0..4] != ELF_MAGIC {
            log::error!("Invalid ELF magic {:02x?}", &ident[0..4]);
            return Err(ElfError::InvalidMagic);
        }

        let class = match ident[EI_CLASS] {
            ELFCLASS32 => ElfClass::Elf32,
            ELFCLASS64 => ElfClass::Elf64,
            other => {
                log::error!("Invalid ELF class {}", other);
                return Err(ElfError::UnsupportedClass);
            }
        };
        if class != config.class {
            log::error!("ELF class {:?} does not match host {:?}", class, config.class);
            return Err(ElfError::UnsupportedClass);
        }

        let endianness = match ident[EI_DATA] {
            ELFDATA2LSB => Endianness::Little,
            ELFDATA2MSB => Endianness::Big,
            _ => return Err(ElfError::UnsupportedEndian),
        };
        if endianness != config.endianness {
            log::error!("ELF endianness {:?} does not match host", endianness);
            return Err(ElfError::UnsupportedEndian);
        }

        if u32::from(ident[EI_VERSION]) != EV_CURRENT {
            log::error!("Invalid ELF ident version {}", ident[EI_VERSION]);
            return Err(ElfError::UnsupportedVersion);
        }

        let size = record_size(EHDR_SIZE, class);
        let mut rest = [0u8; 64 - EI_NIDENT];
        let rest = &mut rest[..size - EI_NIDENT];
        stream.read_exact(rest)?;

        let mut f = Fields::new(rest, class, endianness);
        let header = Header {
            class,
            endianness,
            elf_type: f.u16()?,
            machine: f.u16()?,
            version: f.u32()?,
            entry: f.word()?,
            phoff: f.word()?,
            shoff: f.word()?,
            flags: f.u32()?,
            ehsize: f.u16()?,
            phentsize: f.u16()?,
            phnum: f.u16()?,
            shentsize: f.u16()?,
            shnum: f.u16()?,
            shstrndx: f.u16()?,
        };

        if header.machine != config.machine {
            log::error!("Invalid ELF machine 0x{:x}", header.machine);
            return Err(ElfError::UnsupportedMachine);
        }
        if header.ehsize as usize != size {
            log::error!("Invalid ELF header size {}", header.ehsize);
            return Err(ElfError::InvalidHeader);
        }
        if header.version != EV_CURRENT {
            log::error!("Invalid ELF version {}", header.version);
            return Err(ElfError::UnsupportedVersion);
        }
        if header.elf_type != ET_EXEC && header.elf_type != ET_DYN {
            log::error!("Unsupported ELF type {}", header.elf_type);
            return Err(ElfError::UnsupportedType);
        }
        if header.phnum > 0 && header.phentsize as usize != record_size(PHDR_SIZE, class) {
            return Err(ElfError::InvalidEntrySize);
        }
        if header.shnum > 0 && header.shentsize as usize != record_size(SHDR_SIZE, class) {
            return Err(ElfError::InvalidEntrySize);
        }
        if header.phnum as usize > config.max_table_entries
            || header.shnum as usize > config.max_table_entries
        {
            return Err(ElfError::TableTooLarge);
        }

        Ok(Self {
            config: *config,
            header,
            sections: None,
            programs: None,
            symbols: None,
            symtab_index: None,
            dynamic_symbols: None,
            dynsym_index: None,
            relocations: None,
            implicit_addend: Vec::new(),
        })
    }

    /// Read every table the loader and linker need
    pub fn read_all<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> ElfResult<()> {
        self.read_sections(stream)?;
        self.read_program_headers(stream)?;
        self.read_symbols(stream)?;
        self.read_dynamic_symbols(stream)?;
        self.read_relocations(stream)
    }

    /// Read `size` bytes at `offset`, bounded by the configured limit
    fn read_blob<S: ElfStream + ?Sized>(&self, stream: &mut S, offset: u64, size: u64) -> ElfResult<Vec<u8>> {
        let size = usize::try_from(size).map_err(|_| ElfError::TableTooLarge)?;
        if size > self.config.max_table_bytes {
            return Err(ElfError::TableTooLarge);
        }
        let mut buf = vec![0u8; size];
        stream.seek(offset)?;
        stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a table of `count` fixed-size records and decode each one
    fn read_records<S, T, F>(
        &self,
        stream: &mut S,
        offset: u64,
        count: usize,
        entsize: usize,
        mut decode: F,
    ) -> ElfResult<Vec<T>>
    where
        S: ElfStream + ?Sized,
        F: FnMut(&mut Fields) -> ElfResult<T>,
    {
        if count > self.config.max_table_entries {
            return Err(ElfError::TableTooLarge);
        }
        let total = count.checked_mul(entsize).ok_or(ElfError::TableTooLarge)?;
        let mut buf = vec![0u8; total];
        stream.seek(offset)?;
        stream.read_exact(&mut buf)?;

        let mut out = Vec::with_capacity(count);
        for record in buf.chunks_exact(entsize) {
            let mut f = Fields::new(record, self.header.class, self.header.endianness);
            out.push(decode(&mut f)?);
        }
        Ok(out)
    }

    /// Read the section header table and resolve section names
    pub fn read_sections<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> ElfResult<()> {
        if self.sections.is_some() {
            return Ok(());
        }

        let count = self.header.shnum as usize;
        if count == 0 {
            self.sections = Some(Vec::new());
            return Ok(());
        }
        let shstrndx = self.header.shstrndx as usize;
        if shstrndx >= count {
            log::error!("Section name table index {} out of range", shstrndx);
            return Err(ElfError::IndexOutOfRange(shstrndx as u32));
        }

        let entsize = record_size(SHDR_SIZE, self.header.class);
        let raw = self.read_records(stream, self.header.shoff, count, entsize, |f| {
            let name = f.u32()?;
            let section = SectionInfo {
                name: String::new(),
                kind: f.u32()?,
                flags: f.word()?,
                addr: f.word()?,
                offset: f.word()?,
                size: f.word()?,
                link: f.u32()?,
                info: f.u32()?,
                align: f.word()?,
                entsize: f.word()?,
            };
            Ok((name, section))
        })?;

        let names = &raw[shstrndx].1;
        if names.kind != SHT_STRTAB {
            return Err(ElfError::InvalidLink(shstrndx as u32));
        }
        let names = self.read_blob(stream, names.offset, names.size)?;

        let mut sections = Vec::with_capacity(count);
        for (name_offset, mut section) in raw {
            section.name = string_at(&names, name_offset)?;
            sections.push(section);
        }
        self.sections = Some(sections);
        Ok(())
    }

    /// Read the program header table
    pub fn read_program_headers<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> ElfResult<()> {
        if self.programs.is_some() {
            return Ok(());
        }

        let class = self.header.class;
        let entsize = record_size(PHDR_SIZE, class);
        let count = self.header.phnum as usize;
        let programs = self.read_records(stream, self.header.phoff, count, entsize, |f| {
            // The flags field moves between the two layouts
            Ok(match class {
                ElfClass::Elf32 => {
                    let kind = f.u32()?;
                    let offset = f.word()?;
                    let vaddr = f.word()?;
                    let paddr = f.word()?;
                    let file_size = f.word()?;
                    let mem_size = f.word()?;
                    let flags = f.u32()?;
                    let align = f.word()?;
                    ProgramInfo { kind, offset, vaddr, paddr, file_size, mem_size, flags, align }
                }
                ElfClass::Elf64 => {
                    let kind = f.u32()?;
                    let flags = f.u32()?;
                    ProgramInfo {
                        kind,
                        flags,
                        offset: f.word()?,
                        vaddr: f.word()?,
                        paddr: f.word()?,
                        file_size: f.word()?,
                        mem_size: f.word()?,
                        align: f.word()?,
                    }
                }
            })
        })?;
        self.programs = Some(programs);
        Ok(())
    }

    /// Read the symbol table stored in section `index`
    fn read_symbol_table<S: ElfStream + ?Sized>(&self, stream: &mut S, index: usize) -> ElfResult<Vec<SymbolInfo>> {
        let sections = self.sections();
        let table = &sections[index];
        let entsize = record_size(SYM_SIZE, self.header.class);
        if table.entsize as usize != entsize || table.size % entsize as u64 != 0 {
            return Err(ElfError::InvalidEntrySize);
        }

        let strings = sections
            .get(table.link as usize)
            .ok_or(ElfError::IndexOutOfRange(table.link))?;
        if strings.kind != SHT_STRTAB {
            return Err(ElfError::InvalidLink(table.link));
        }
        let strings = self.read_blob(stream, strings.offset, strings.size)?;

        let count = usize::try_from(table.size / entsize as u64).map_err(|_| ElfError::TableTooLarge)?;
        let class = self.header.class;
        let section_count = sections.len();
        self.read_records(stream, table.offset, count, entsize, |f| {
            let (name, value, size, info, other, section) = match class {
                ElfClass::Elf32 => {
                    let name = f.u32()?;
                    let value = f.word()?;
                    let size = f.word()?;
                    (name, value, size, f.u8()?, f.u8()?, f.u16()?)
                }
                ElfClass::Elf64 => {
                    let name = f.u32()?;
                    let info = f.u8()?;
                    let other = f.u8()?;
                    let section = f.u16()?;
                    (name, f.word()?, f.word()?, info, other, section)
                }
            };
            if section != SHN_UNDEF && section < SHN_LORESERVE && section as usize >= section_count {
                log::error!("Symbol section index {} out of range", section);
                return Err(ElfError::IndexOutOfRange(u32::from(section)));
            }
            Ok(SymbolInfo {
                name: string_at(&strings, name)?,
                value,
                size,
                info,
                other,
                section,
            })
        })
    }

    /// Read `.symtab`; a stripped binary yields an empty table
    pub fn read_symbols<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> ElfResult<()> {
        if self.symbols.is_some() {
            return Ok(());
        }
        self.read_sections(stream)?;

        let found = self.find_section(".symtab").map(|(i, s)| (i, s.kind));
        let Some((index, kind)) = found else {
            self.symbols = Some(Vec::new());
            return Ok(());
        };
        if kind != SHT_SYMTAB {
            return Err(ElfError::InvalidLink(index as u32));
        }
        let symbols = self.read_symbol_table(stream, index)?;
        self.symtab_index = Some(index);
        self.symbols = Some(symbols);
        Ok(())
    }

    /// Read the dynamic symbol table; absent means empty
    pub fn read_dynamic_symbols<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> ElfResult<()> {
        if self.dynamic_symbols.is_some() {
            return Ok(());
        }
        self.read_sections(stream)?;

        let Some(index) = self.sections().iter().position(|s| s.kind == SHT_DYNSYM) else {
            self.dynamic_symbols = Some(Vec::new());
            return Ok(());
        };
        let symbols = self.read_symbol_table(stream, index)?;
        self.dynsym_index = Some(index);
        self.dynamic_symbols = Some(symbols);
        Ok(())
    }

    /// Read every RELA section; REL sections are only recorded
    pub fn read_relocations<S: ElfStream + ?Sized>(&mut self, stream: &mut S) -> ElfResult<()> {
        if self.relocations.is_some() {
            return Ok(());
        }
        self.read_sections(stream)?;
        self.read_symbols(stream)?;
        self.read_dynamic_symbols(stream)?;

        let class = self.header.class;
        let entsize = record_size(RELA_SIZE, class);
        let mut tables = Vec::new();
        let mut implicit = Vec::new();

        for (index, section) in self.sections().iter().enumerate() {
            match section.kind {
                SHT_REL => {
                    log::warn!("Section {} uses implicit addends", section.name);
                    implicit.push(index);
                    continue;
                }
                SHT_RELA => {}
                _ => continue,
            }

            if section.entsize as usize != entsize || section.size % entsize as u64 != 0 {
                return Err(ElfError::InvalidEntrySize);
            }
            let link = section.link as usize;
            let symbols = if Some(link) == self.dynsym_index {
                SymbolTableKind::Dynamic
            } else if Some(link) == self.symtab_index {
                SymbolTableKind::Static
            } else if link >= self.sections().len() {
                return Err(ElfError::IndexOutOfRange(section.link));
            } else {
                return Err(ElfError::InvalidLink(section.link));
            };
            let symbol_count = self.symbol_table(symbols).len();

            let count = usize::try_from(section.size / entsize as u64).map_err(|_| ElfError::TableTooLarge)?;
            let entries = self.read_records(stream, section.offset, count, entsize, |f| {
                let offset = f.word()?;
                let info = f.word()?;
                let addend = f.sword()?;
                let (symbol, kind) = match class {
                    ElfClass::Elf32 => ((info >> 8) as u32, (info & 0xff) as u32),
                    ElfClass::Elf64 => ((info >> 32) as u32, (info & 0xffff_ffff) as u32),
                };
                if symbol as usize >= symbol_count.max(1) {
                    log::error!("Relocation symbol index {} out of range", symbol);
                    return Err(ElfError::IndexOutOfRange(symbol));
                }
                Ok(RelocationInfo { offset, symbol, kind, addend })
            })?;
            tables.push(RelocationTable { section: index, symbols, entries });
        }

        self.relocations = Some(tables);
        self.implicit_addend = implicit;
        Ok(())
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Section table, empty until [`read_sections`](Self::read_sections)
    pub fn sections(&self) -> &[SectionInfo] {
        self.sections.as_deref().unwrap_or(&[])
    }

    pub fn program_headers_read(&self) -> bool {
        self.programs.is_some()
    }

    pub fn program_headers(&self) -> &[ProgramInfo] {
        self.programs.as_deref().unwrap_or(&[])
    }

    pub fn load_segments(&self) -> impl Iterator<Item = &ProgramInfo> + '_ {
        self.program_headers().iter().filter(|p| p.is_load())
    }

    pub fn symbols(&self) -> &[SymbolInfo] {
        self.symbols.as_deref().unwrap_or(&[])
    }

    pub fn dynamic_symbols(&self) -> &[SymbolInfo] {
        self.dynamic_symbols.as_deref().unwrap_or(&[])
    }

    pub fn symbol_table(&self, kind: SymbolTableKind) -> &[SymbolInfo] {
        match kind {
            SymbolTableKind::Static => self.symbols(),
            SymbolTableKind::Dynamic => self.dynamic_symbols(),
        }
    }

    pub fn relocation_tables(&self) -> &[RelocationTable] {
        self.relocations.as_deref().unwrap_or(&[])
    }

    /// Indices of REL sections seen by [`read_relocations`](Self::read_relocations)
    pub fn implicit_addend_sections(&self) -> &[usize] {
        &self.implicit_addend
    }

    pub fn find_section(&self, name: &str) -> Option<(usize, &SectionInfo)> {
        self.sections().iter().enumerate().find(|(_, s)| s.name == name)
    }

    /// Search `.symtab`, then the dynamic symbols
    pub fn find_symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols()
            .iter()
            .chain(self.dynamic_symbols())
            .find(|s| !s.name.is_empty() && s.name == name)
    }

    pub fn find_dynamic_symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.dynamic_symbols().iter().find(|s| !s.name.is_empty() && s.name == name)
    }
}
