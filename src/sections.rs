//! ELF section enumeration.
//!
//! Only allocated sections (`SHF_ALLOC`) participate in memory accounting;
//! debug and metadata sections never occupy target memory.

use std::collections::BTreeMap;

use object::{Object, ObjectSection};

use crate::linker::eval::SectionFacts;
use crate::model::{Section, SectionFlags, SectionKind};

pub fn scan(file: &object::File) -> Vec<Section> {
    let mut sections = Vec::new();
    for section in file.sections() {
        let Ok(name) = section.name() else { continue };
        if name.is_empty() {
            continue;
        }
        let flags = decode_flags(section.flags());
        if !flags.alloc {
            continue;
        }
        sections.push(Section {
            name: name.to_string(),
            address: section.address(),
            size: section.size(),
            flags,
            kind: decode_kind(&section),
            region: None,
        });
    }
    sections.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
    sections
}

/// Per-section facts for linker expression support (`SIZEOF`, `ADDR`, ...).
/// The load address falls back to the virtual address; the region mapper
/// works on virtual addresses throughout.
pub fn facts(file: &object::File) -> BTreeMap<String, SectionFacts> {
    let mut map = BTreeMap::new();
    for section in file.sections() {
        let Ok(name) = section.name() else { continue };
        if name.is_empty() {
            continue;
        }
        map.insert(
            name.to_string(),
            SectionFacts {
                address: section.address(),
                load_address: section.address(),
                size: section.size(),
                align: section.align(),
            },
        );
    }
    map
}

fn decode_flags(flags: object::SectionFlags) -> SectionFlags {
    let object::SectionFlags::Elf { sh_flags } = flags else {
        return SectionFlags::default();
    };
    SectionFlags {
        alloc: sh_flags & u64::from(object::elf::SHF_ALLOC) != 0,
        write: sh_flags & u64::from(object::elf::SHF_WRITE) != 0,
        exec: sh_flags & u64::from(object::elf::SHF_EXECINSTR) != 0,
        tls: sh_flags & u64::from(object::elf::SHF_TLS) != 0,
        merge: sh_flags & u64::from(object::elf::SHF_MERGE) != 0,
        strings: sh_flags & u64::from(object::elf::SHF_STRINGS) != 0,
    }
}

fn decode_kind(section: &object::Section) -> SectionKind {
    use object::SectionKind as K;
    match section.kind() {
        K::UninitializedData | K::UninitializedTls | K::Common => SectionKind::Nobits,
        K::Note => SectionKind::Note,
        K::Elf(sh_type) => match sh_type {
            object::elf::SHT_NOBITS => SectionKind::Nobits,
            object::elf::SHT_NOTE => SectionKind::Note,
            object::elf::SHT_INIT_ARRAY => SectionKind::InitArray,
            object::elf::SHT_FINI_ARRAY => SectionKind::FiniArray,
            _ => SectionKind::Other,
        },
        K::Text
        | K::Data
        | K::ReadOnlyData
        | K::ReadOnlyDataWithRel
        | K::ReadOnlyString
        | K::Tls => SectionKind::Progbits,
        _ => SectionKind::Other,
    }
}
