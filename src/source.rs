//! Source file resolution for symbols.
//!
//! The lookup order, strongest evidence first:
//!
//! 1. the DWARF definition map (`(address, name)` keyed),
//! 2. the declaration fallback when exactly one CU references the name,
//! 3. the line program row covering the address (unless disabled),
//! 4. inlined-subroutine ranges covering the address,
//! 5. compilation-unit containment (`low_pc <= addr < high_pc`).
//!
//! Anything weaker would be guesswork; when all of these fail the symbol
//! keeps `source_file = None`.

use crate::dwarf::DwarfData;
use crate::model::Symbol;

pub struct SourceResolver<'a> {
    dwarf: &'a DwarfData,
}

impl<'a> SourceResolver<'a> {
    pub fn new(dwarf: &'a DwarfData) -> Self {
        Self { dwarf }
    }

    /// Resolves the definition site for one symbol.
    pub fn resolve(&self, symbol: &Symbol) -> (Option<String>, Option<u32>) {
        if let Some(def) = self.dwarf.definition(symbol.address, &symbol.name) {
            return (Some(def.file.clone()), def.line);
        }

        if let Some(decl) = self.dwarf.unique_declaration(&symbol.name) {
            return (Some(decl.file.clone()), decl.line);
        }

        if symbol.address != 0 {
            if let Some((file, line)) = self.dwarf.line_row(symbol.address) {
                return (Some(file.to_string()), line);
            }
            // Thumb symbols carry bit 0; DWARF PC ranges do not.
            if symbol.address & 1 != 0 {
                if let Some((file, line)) = self.dwarf.line_row(symbol.address & !1) {
                    return (Some(file.to_string()), line);
                }
            }

            if let Some(file) = self.dwarf.inline_file(symbol.address) {
                return (Some(file.to_string()), None);
            }

            if let Some(unit) = self.dwarf.unit_containing(symbol.address & !1) {
                if !unit.name.is_empty() {
                    return (Some(unit.name.clone()), None);
                }
            }
        }

        (None, None)
    }

    /// Annotates a whole symbol list in place.
    pub fn annotate(&self, symbols: &mut [Symbol]) {
        for symbol in symbols.iter_mut() {
            let (file, line) = self.resolve(symbol);
            symbol.source_file = file;
            symbol.source_line = line;
        }
    }
}
