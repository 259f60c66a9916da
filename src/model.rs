//! Data model types.
//!
//! This is our abstract description of the memory layout of a program: the
//! regions the linker declared, the sections the ELF carries, and the symbols
//! that occupy them. Everything here is materialized once per analysis and is
//! immutable afterwards.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

/// A named contiguous range of target memory, declared by a linker script (or
/// synthesized when no scripts are available).
#[derive(Clone, Debug)]
pub struct MemoryRegion {
    /// Region name as declared in the `MEMORY` block. Unique within a report.
    pub name: String,
    /// First address covered by the region.
    pub origin: u64,
    /// Number of bytes in the region. Always greater than zero, and
    /// `origin + length` never overflows 64 bits.
    pub length: u64,
    /// Access attributes from the declaration, e.g. `(rx)`. May be empty for
    /// ESP-style declarations without an attribute list.
    pub attrs: RegionAttrs,
    /// Coarse classification derived from the name and attributes. Drives the
    /// NOBITS accounting policy.
    pub class: RegionClass,
    /// Name of the enclosing region when this one is a hierarchical child
    /// (e.g. `FLASH_APP` inside `FLASH`). Resolution is by name, never by
    /// pointer.
    pub parent: Option<String>,
    /// Set on the synthetic `Code`/`Data` regions produced when no linker
    /// scripts were supplied.
    pub auto: bool,
}

impl MemoryRegion {
    /// One-past-the-end address of the region.
    pub fn end(&self) -> u64 {
        self.origin + self.length
    }

    /// Whether `addr` falls inside the region.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.origin && addr < self.end()
    }

    /// Whether `other` lies entirely within this region.
    pub fn contains_region(&self, other: &MemoryRegion) -> bool {
        other.origin >= self.origin && other.end() <= self.end()
    }

    /// Whether NOBITS sections occupy memory here. Regions with the write
    /// attribute count `.bss`-style sections toward `used`; ROM-class regions
    /// do not, even when a load address lands in them.
    pub fn counts_nobits(&self) -> bool {
        if self.attrs.write {
            return true;
        }
        if !self.attrs.is_empty() {
            return false;
        }
        matches!(self.class, RegionClass::Ram | RegionClass::Ccm | RegionClass::Backup)
    }
}

/// Access attribute flags of a memory region, from the parenthesized flag
/// string in the declaration (`(rx)`, `(rwx!i)`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionAttrs {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub alloc: bool,
    pub init: bool,
}

impl RegionAttrs {
    /// Parses a linker attribute string. `!` negates the following flag for
    /// section-placement purposes; negated flags are not recorded here.
    pub fn parse(s: &str) -> Self {
        let mut attrs = Self::default();
        let mut negate = false;
        for c in s.chars() {
            if c == '!' {
                negate = true;
                continue;
            }
            if !negate {
                match c.to_ascii_lowercase() {
                    'r' => attrs.read = true,
                    'w' => attrs.write = true,
                    'x' => attrs.exec = true,
                    'a' => attrs.alloc = true,
                    'i' | 'l' => attrs.init = true,
                    _ => (),
                }
            }
            negate = false;
        }
        attrs
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether every flag set here is also set in `other`.
    pub fn subset_of(&self, other: &RegionAttrs) -> bool {
        (!self.read || other.read)
            && (!self.write || other.write)
            && (!self.exec || other.exec)
            && (!self.alloc || other.alloc)
            && (!self.init || other.init)
    }
}

impl fmt::Display for RegionAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("r")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        if self.exec {
            f.write_str("x")?;
        }
        if self.alloc {
            f.write_str("a")?;
        }
        if self.init {
            f.write_str("i")?;
        }
        Ok(())
    }
}

/// Coarse region classification, derived from the region name first and the
/// attribute flags second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegionClass {
    Flash,
    Rom,
    Ram,
    Eeprom,
    Ccm,
    Backup,
    Unknown,
}

impl RegionClass {
    /// Classification table ported from the embedded naming conventions this
    /// tool grew up around: name patterns win over attribute flags.
    pub fn derive(name: &str, attrs: &RegionAttrs) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("eeprom") {
            return Self::Eeprom;
        }
        if name.contains("ccm") {
            return Self::Ccm;
        }
        if name.contains("backup") {
            return Self::Backup;
        }
        if ["flash", "rom", "code", "irom"].iter().any(|p| name.contains(p)) {
            return Self::Flash;
        }
        if ["ram", "sram", "data", "heap", "stack", "dram"].iter().any(|p| name.contains(p)) {
            return Self::Ram;
        }
        if attrs.exec && !attrs.write {
            return Self::Rom;
        }
        if attrs.write {
            return Self::Ram;
        }
        if attrs.read && !attrs.exec && !attrs.write {
            return Self::Rom;
        }
        Self::Unknown
    }
}

/// An output unit of the linker, occupying a contiguous address range.
#[derive(Clone, Debug)]
pub struct Section {
    pub name: String,
    pub address: u64,
    /// Size in the address space (`sh_size`).
    pub size: u64,
    pub flags: SectionFlags,
    pub kind: SectionKind,
    /// Name of the region the section was assigned to, if any.
    pub region: Option<String>,
}

impl Section {
    /// Bytes this section contributes to the `used` total of `region`.
    /// PROGBITS-like sections always count; NOBITS counts only in regions
    /// that actually back it with memory.
    pub fn size_on_device(&self, region: &MemoryRegion) -> u64 {
        match self.kind {
            SectionKind::Nobits => {
                if region.counts_nobits() {
                    self.size
                } else {
                    0
                }
            }
            _ => self.size,
        }
    }

    pub fn end(&self) -> u64 {
        self.address + self.size
    }
}

/// Section header flags relevant to memory accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionFlags {
    pub alloc: bool,
    pub write: bool,
    pub exec: bool,
    pub tls: bool,
    pub merge: bool,
    pub strings: bool,
}

impl SectionFlags {
    /// Wire-format names, in a fixed order for stable output.
    pub fn names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.alloc {
            out.push("ALLOC");
        }
        if self.write {
            out.push("WRITE");
        }
        if self.exec {
            out.push("EXEC");
        }
        if self.tls {
            out.push("TLS");
        }
        if self.merge {
            out.push("MERGE");
        }
        if self.strings {
            out.push("STRINGS");
        }
        out
    }
}

/// Section content type, from `sh_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionKind {
    Progbits,
    Nobits,
    Note,
    InitArray,
    FiniArray,
    Other,
}

/// A named address-bearing entity known to the linker and/or debugger.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    /// Demangled form, only when it differs from `name`.
    pub demangled: Option<String>,
    pub address: u64,
    /// Size in bytes. Zero-sized FUNC/OBJECT symbols are retained for
    /// reference but never contribute to `used` totals.
    pub size: u64,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
    /// Name of the section the symbol is defined in, if known.
    pub section: Option<String>,
    /// Region containing the symbol's address, if any.
    pub region: Option<String>,
    /// Source file of the symbol's *definition*, when debug info permits.
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolKind {
    Func,
    Object,
    Tls,
    Section,
    File,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
}

/// A DWARF compilation unit, corresponding to one translation unit.
#[derive(Clone, Debug)]
pub struct CompilationUnit {
    /// Primary source file of the unit, comp_dir-joined when relative.
    pub name: String,
    pub comp_dir: String,
    pub producer: String,
    pub language: Language,
    /// Code range covered by the unit, when the root DIE declares one.
    pub low_pc: Option<u64>,
    pub high_pc: Option<u64>,
}

impl CompilationUnit {
    pub fn contains(&self, addr: u64) -> bool {
        match (self.low_pc, self.high_pc) {
            (Some(lo), Some(hi)) => addr >= lo && addr < hi,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    #[serde(rename = "c++")]
    Cpp,
    Rust,
    Assembly,
    Other,
}

/// Target architecture classification from the ELF header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Arm,
    Xtensa,
    Riscv,
    X86,
    #[serde(rename = "x86_64")]
    X86_64,
    Other,
}

/// The fully assembled analysis result. This is the in-memory form; the wire
/// format in `report` is derived from it.
#[derive(Clone, Debug)]
pub struct MemoryReport {
    pub architecture: Architecture,
    /// Regions in linker-script declaration order.
    pub regions: IndexMap<String, MemoryRegion>,
    /// Per-region usage roll-ups, keyed like `regions` plus the synthetic
    /// `__unmapped__` bucket when needed.
    pub rollups: IndexMap<String, RegionRollup>,
    pub sections: Vec<Section>,
    pub symbols: Vec<Symbol>,
    pub compilation_units: Vec<CompilationUnit>,
    pub entry_point: u64,
    pub file_type: FileType,
    pub elf_sha256: String,
    pub warnings: Vec<String>,
}

/// Usage accounting for one region.
#[derive(Clone, Debug, Default)]
pub struct RegionRollup {
    /// Sum of `size_on_device` over member sections.
    pub used: u64,
    /// `used / length`, as a percentage clamped to `[0, 100]`.
    pub utilization: f64,
    /// Member section names in address order.
    pub sections: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileType {
    Exec,
    Dyn,
    Rel,
    Core,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrs_parse_ignores_negated_flags() {
        let attrs = RegionAttrs::parse("rwx!i");
        assert!(attrs.read && attrs.write && attrs.exec);
        assert!(!attrs.init);
        assert_eq!(attrs.to_string(), "rwx");
    }

    #[test]
    fn region_class_prefers_name_over_attrs() {
        let rx = RegionAttrs::parse("rx");
        assert_eq!(RegionClass::derive("FLASH", &RegionAttrs::default()), RegionClass::Flash);
        assert_eq!(RegionClass::derive("dram0_0_seg", &RegionAttrs::default()), RegionClass::Ram);
        assert_eq!(RegionClass::derive("MYSTERY", &rx), RegionClass::Rom);
        assert_eq!(RegionClass::derive("CCMRAM", &rx), RegionClass::Ccm);
    }

    #[test]
    fn nobits_accounting_follows_write_attr() {
        let ram = MemoryRegion {
            name: "RAM".into(),
            origin: 0x2000_0000,
            length: 0x2_0000,
            attrs: RegionAttrs::parse("rwx"),
            class: RegionClass::Ram,
            parent: None,
            auto: false,
        };
        let flash = MemoryRegion {
            name: "FLASH".into(),
            origin: 0x0800_0000,
            length: 0x8_0000,
            attrs: RegionAttrs::parse("rx"),
            class: RegionClass::Flash,
            parent: None,
            auto: false,
        };
        let bss = Section {
            name: ".bss".into(),
            address: 0x2000_0020,
            size: 1024,
            flags: SectionFlags { alloc: true, write: true, ..Default::default() },
            kind: SectionKind::Nobits,
            region: None,
        };
        assert_eq!(bss.size_on_device(&ram), 1024);
        assert_eq!(bss.size_on_device(&flash), 0);
    }
}
