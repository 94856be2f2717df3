//! ELF constants used by the reader, loader and relocation engine.

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

// e_ident indices
pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const EI_VERSION: usize = 6;
pub const EI_NIDENT: usize = 16;

pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1; // Little-endian
pub const ELFDATA2MSB: u8 = 2; // Big-endian
pub const EV_CURRENT: u32 = 1;

pub const EM_RISCV: u16 = 243; // RISC-V

pub const ET_EXEC: u16 = 2; // Executable file
pub const ET_DYN: u16 = 3; // Shared object file

// Program header types
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;

// Program header flags
pub const PF_X: u32 = 1; // Execute
pub const PF_W: u32 = 2; // Write
pub const PF_R: u32 = 4; // Read

// Section header types
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;
pub const SHT_DYNSYM: u32 = 11;

// Special section indices
pub const SHN_UNDEF: u16 = 0;
pub const SHN_LORESERVE: u16 = 0xff00;
pub const SHN_ABS: u16 = 0xfff1;
pub const SHN_COMMON: u16 = 0xfff2;

// Symbol bindings
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

// Symbol types
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;

/// Fixed record sizes: (ELF32, ELF64)
pub const EHDR_SIZE: (usize, usize) = (52, 64);
pub const SHDR_SIZE: (usize, usize) = (40, 64);
pub const PHDR_SIZE: (usize, usize) = (32, 56);
pub const SYM_SIZE: (usize, usize) = (16, 24);
pub const RELA_SIZE: (usize, usize) = (12, 24);
pub const REL_SIZE: (usize, usize) = (8, 16);

/// Get segment permissions as a short string, e.g. `R-X`
pub fn segment_permissions(flags: u32) -> &'static str {
    match (flags & PF_R != 0, flags & PF_W != 0, flags & PF_X != 0) {
        (true, true, true) => "RWX",
        (true, true, false) => "RW-",
        (true, false, true) => "R-X",
        (true, false, false) => "R--",
        (false, true, true) => "-WX",
        (false, true, false) => "-W-",
        (false, false, true) => "--X",
        (false, false, false) => "---",
    }
}
