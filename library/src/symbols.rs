//! Shared symbol map and symbol export
//!
//! Every module of a linkage exports its defined dynamic functions and
//! objects into one [`SymbolMap`]. Strong definitions must be unique; weak
//! ones give way to anything already present and to later strong ones.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::elf::constants::*;
use crate::elf::{ElfReader, LoadedModule, SymbolInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Strong,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub address: usize,
    pub binding: Binding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolError {
    /// A strong definition collides with another strong one; payload is the
    /// dynamic symbol index
    Duplicate(u32),
    AddressOverflow,
}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolError::Duplicate(i) => write!(f, "Duplicate strong definition of symbol {}", i),
            SymbolError::AddressOverflow => write!(f, "Symbol address overflow"),
        }
    }
}

pub type SymbolResult<T> = Result<T, SymbolError>;

/// Name to runtime address, shared by all modules of one linkage
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    entries: BTreeMap<String, ResolvedSymbol>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Seed a runtime-provided symbol; these count as strong
    pub fn insert_abi(&mut self, name: &str, address: usize) {
        self.entries.insert(
            String::from(name),
            ResolvedSymbol { address, binding: Binding::Strong },
        );
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|s| s.address)
    }

    pub fn resolve(&self, name: &str) -> Option<&ResolvedSymbol> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedSymbol)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Whether a dynamic symbol is visible to other modules
fn exportable(sym: &SymbolInfo) -> Option<Binding> {
    if sym.is_undefined() || sym.name.is_empty() {
        return None;
    }
    if sym.symbol_type() != STT_FUNC && sym.symbol_type() != STT_OBJECT {
        return None;
    }
    match sym.binding() {
        STB_GLOBAL => Some(Binding::Strong),
        STB_WEAK => Some(Binding::Weak),
        _ => None,
    }
}

fn export_address(sym: &SymbolInfo, module: &LoadedModule) -> SymbolResult<usize> {
    if sym.is_absolute() {
        usize::try_from(sym.value).map_err(|_| SymbolError::AddressOverflow)
    } else {
        module.runtime_address(sym.value).ok_or(SymbolError::AddressOverflow)
    }
}

/// Export the defined dynamic symbols of `module` into `map`
///
/// All collisions are checked before anything is inserted, so a failed
/// export leaves the map untouched. Returns the number of entries written.
pub fn export_symbols(reader: &ElfReader, module: &LoadedModule, map: &mut SymbolMap) -> SymbolResult<usize> {
    let mut pending: Vec<(&SymbolInfo, Binding, usize)> = Vec::new();

    for (index, sym) in reader.dynamic_symbols().iter().enumerate() {
        let Some(binding) = exportable(sym) else {
            continue;
        };
        if sym.is_reserved() && !sym.is_absolute() {
            continue;
        }
        let address = export_address(sym, module)?;

        if binding == Binding::Strong {
            let in_map = map.resolve(&sym.name).map(|s| s.binding) == Some(Binding::Strong);
            let in_batch = pending
                .iter()
                .any(|(p, b, _)| *b == Binding::Strong && p.name == sym.name);
            if in_map || in_batch {
                log::error!("Duplicate symbol '{}'", sym.name);
                return Err(SymbolError::Duplicate(index as u32));
            }
        }
        pending.push((sym, binding, address));
    }

    let mut written = 0;
    for (sym, binding, address) in pending {
        let replace = match (binding, map.resolve(&sym.name).map(|s| s.binding)) {
            (_, None) => true,
            (Binding::Strong, Some(Binding::Weak)) => true,
            _ => false,
        };
        if replace {
            map.entries.insert(sym.name.clone(), ResolvedSymbol { address, binding });
            written += 1;
        }
    }
    log::debug!("Exported {} symbols", written);
    Ok(written)
}
