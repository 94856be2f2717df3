//! Relocation engine
//!
//! Walks the RELA tables cached by an [`ElfReader`], resolves each symbol
//! and patches the loaded image.

pub mod error;
pub mod riscv;

pub use error::{RelocError, RelocResult};
pub use riscv::{Fixup, RiscvReloc};

use crate::elf::{ElfReader, LoadedModule, SymbolInfo};
use crate::symbols::SymbolMap;

/// Runtime value of symbol `index` in `table`
///
/// Index 0 is the null symbol and resolves to 0. Defined symbols are biased
/// by the module's load offset, absolute ones are taken verbatim and
/// undefined ones are looked up in `map`.
pub fn resolve_symbol(
    table: &[SymbolInfo],
    index: u32,
    module: &LoadedModule,
    map: &SymbolMap,
) -> RelocResult<u64> {
    if index == 0 {
        return Ok(0);
    }
    let sym = table.get(index as usize).ok_or(RelocError::Unresolved(index))?;

    if sym.is_undefined() {
        match map.get(&sym.name) {
            Some(address) => Ok(address as u64),
            None => {
                log::error!("Unresolved symbol '{}'", sym.name);
                Err(RelocError::Unresolved(index))
            }
        }
    } else if sym.is_absolute() {
        Ok(sym.value)
    } else if sym.is_reserved() {
        log::error!("Symbol '{}' in reserved section 0x{:x}", sym.name, sym.section);
        Err(RelocError::UnsupportedSection(sym.section))
    } else {
        module
            .runtime_address(sym.value)
            .map(|a| a as u64)
            .ok_or(RelocError::AddressOverflow)
    }
}

/// Apply every relocation of `reader` to `module`, in table order
///
/// Returns the number of relocations applied. The first failure aborts the
/// pass; the module must then be considered unusable.
pub fn relocate(reader: &ElfReader, module: &mut LoadedModule, map: &SymbolMap) -> RelocResult<usize> {
    if let Some(&section) = reader.implicit_addend_sections().first() {
        log::error!("Implicit-addend relocations are not supported");
        return Err(RelocError::ImplicitAddend(section as u32));
    }

    let word = reader.header().class.word_size();
    let endianness = reader.header().endianness;
    let bias = module.load_bias();
    let mut applied = 0;

    for table in reader.relocation_tables() {
        let symbols = reader.symbol_table(table.symbols);
        for entry in &table.entries {
            let Some(kind) = RiscvReloc::from_raw(entry.kind) else {
                log::error!("Invalid dynamic relocation type 0x{:x}", entry.kind);
                return Err(RelocError::UnsupportedType(entry.kind));
            };
            let value = resolve_symbol(symbols, entry.symbol, module, map)?;
            let fixup = riscv::compute(kind, value, entry.addend, bias, word)?;

            let dest = module
                .runtime_address(entry.offset)
                .ok_or(RelocError::AddressOverflow)?;
            let (bytes, len) = fixup.to_bytes(endianness);
            module
                .region_mut()
                .write(dest, &bytes[..len])
                .ok_or(RelocError::OutOfBounds(entry.offset))?;

            log::debug!("Reloc {} at 0x{:x} = 0x{:x}", kind.name(), dest, fixup.value());
            applied += 1;
        }
    }
    Ok(applied)
}
