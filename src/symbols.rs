//! ELF symbol table enumeration.
//!
//! Filters the symbol table down to entities that occupy memory: compiler
//! bookkeeping (ARM mapping symbols, unnamed locals, zero-sized non-code
//! locals) is dropped. Zero-sized FUNC/OBJECT symbols with addresses are
//! kept for reference; they never contribute to usage totals.

use object::{Object, ObjectSection, ObjectSymbol};

use crate::model::{Symbol, SymbolBinding, SymbolKind};

pub fn scan(file: &object::File) -> Vec<Symbol> {
    let mut symbols = collect(file, file.symbols());
    if symbols.is_empty() {
        // Stripped binaries may still carry a dynamic symbol table.
        symbols = collect(file, file.dynamic_symbols());
    }
    symbols.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
    symbols
}

fn collect<'data, 'file>(
    file: &'file object::File<'data>,
    syms: object::read::SymbolIterator<'data, 'file>,
) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for sym in syms {
        let Ok(name) = sym.name() else { continue };
        if name.is_empty() || name.starts_with('$') {
            continue;
        }

        let (kind, binding) = decode_info(&sym);
        if matches!(kind, SymbolKind::Section | SymbolKind::File) {
            continue;
        }
        // Local labels and markers carry no size and no payload.
        if binding == SymbolBinding::Local
            && !matches!(kind, SymbolKind::Func | SymbolKind::Object)
            && sym.size() == 0
        {
            continue;
        }

        let section = match sym.section() {
            object::SymbolSection::Section(index) => file
                .section_by_index(index)
                .ok()
                .and_then(|s| s.name().ok().map(str::to_string)),
            _ => None,
        };

        symbols.push(Symbol {
            demangled: demangle(name),
            name: name.to_string(),
            address: sym.address(),
            size: sym.size(),
            kind,
            binding,
            section,
            region: None,
            source_file: None,
            source_line: None,
        });
    }
    symbols
}

fn decode_info(sym: &object::Symbol) -> (SymbolKind, SymbolBinding) {
    if let object::SymbolFlags::Elf { st_info, .. } = sym.flags() {
        let kind = match st_info & 0xf {
            object::elf::STT_FUNC | object::elf::STT_GNU_IFUNC => SymbolKind::Func,
            object::elf::STT_OBJECT | object::elf::STT_COMMON => SymbolKind::Object,
            object::elf::STT_TLS => SymbolKind::Tls,
            object::elf::STT_SECTION => SymbolKind::Section,
            object::elf::STT_FILE => SymbolKind::File,
            _ => SymbolKind::Other,
        };
        let binding = match st_info >> 4 {
            object::elf::STB_GLOBAL => SymbolBinding::Global,
            object::elf::STB_WEAK => SymbolBinding::Weak,
            _ => SymbolBinding::Local,
        };
        return (kind, binding);
    }
    // Non-ELF flag encodings do not reach this far in practice; fall back to
    // the generic classification.
    let kind = match sym.kind() {
        object::SymbolKind::Text => SymbolKind::Func,
        object::SymbolKind::Data => SymbolKind::Object,
        object::SymbolKind::Tls => SymbolKind::Tls,
        object::SymbolKind::Section => SymbolKind::Section,
        object::SymbolKind::File => SymbolKind::File,
        _ => SymbolKind::Other,
    };
    let binding = if sym.is_weak() {
        SymbolBinding::Weak
    } else if sym.is_global() {
        SymbolBinding::Global
    } else {
        SymbolBinding::Local
    };
    (kind, binding)
}

/// Demangles Rust first (both v0 and legacy manglings), then Itanium C++.
/// Returns `None` when the name demangles to itself.
fn demangle(name: &str) -> Option<String> {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        let text = format!("{demangled:#}");
        if text != name {
            return Some(text);
        }
    }
    if name.starts_with("_Z") {
        if let Ok(sym) = cpp_demangle::Symbol::new(name) {
            let text = sym.to_string();
            if text != name {
                return Some(text);
            }
        }
    }
    None
}
