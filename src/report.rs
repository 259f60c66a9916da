//! Report serialization.
//!
//! The JSON layout here is a stable wire contract consumed by CI tooling;
//! field names and their order do not change casually. The wire structs are
//! kept separate from the analysis model so the model can evolve without
//! touching the contract.

use indexmap::IndexMap;
use serde::Serialize;

use crate::mapper::UNMAPPED;
use crate::model::{
    Architecture, FileType, Language, MemoryReport, SectionKind, SymbolBinding, SymbolKind,
};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Serialize)]
struct WireReport {
    schema_version: &'static str,
    architecture: Architecture,
    memory_regions: IndexMap<String, WireRegion>,
    sections: Vec<WireSection>,
    symbols: Vec<WireSymbol>,
    compilation_units: Vec<WireUnit>,
    meta: WireMeta,
}

#[derive(Serialize)]
struct WireRegion {
    address: String,
    size: u64,
    used: u64,
    utilization: f64,
    attrs: String,
    parent: Option<String>,
    sections: Vec<String>,
    auto: bool,
}

#[derive(Serialize)]
struct WireSection {
    name: String,
    address: String,
    size: u64,
    flags: Vec<&'static str>,
    #[serde(rename = "type")]
    kind: SectionKind,
    region: Option<String>,
}

#[derive(Serialize)]
struct WireSymbol {
    name: String,
    demangled: Option<String>,
    address: String,
    size: u64,
    #[serde(rename = "type")]
    kind: SymbolKind,
    binding: SymbolBinding,
    section: Option<String>,
    region: Option<String>,
    source_file: Option<String>,
    source_line: Option<u32>,
}

#[derive(Serialize)]
struct WireUnit {
    name: String,
    comp_dir: String,
    producer: String,
    language: Language,
}

#[derive(Serialize)]
struct WireMeta {
    elf_sha256: String,
    analyzed_at: String,
    entry_point: String,
    file_type: FileType,
    warnings: Vec<String>,
}

fn hex(value: u64) -> String {
    format!("{value:#x}")
}

/// Stable ordering for the `sections` and `symbols` arrays: mapped entries
/// first, grouped by region name, then by address, then by name.
fn order_key<'a>(
    region: &'a Option<String>,
    address: u64,
    name: &'a str,
) -> (bool, &'a str, u64, &'a str) {
    (
        region.is_none(),
        region.as_deref().unwrap_or(""),
        address,
        name,
    )
}

fn to_wire(report: &MemoryReport, analyzed_at: &str) -> WireReport {
    let mut memory_regions = IndexMap::new();
    for (name, region) in &report.regions {
        let rollup = report.rollups.get(name).cloned().unwrap_or_default();
        memory_regions.insert(
            name.clone(),
            WireRegion {
                address: hex(region.origin),
                size: region.length,
                used: rollup.used,
                utilization: rollup.utilization,
                attrs: region.attrs.to_string(),
                parent: region.parent.clone(),
                sections: rollup.sections,
                auto: region.auto,
            },
        );
    }
    if let Some(rollup) = report.rollups.get(UNMAPPED) {
        memory_regions.insert(
            UNMAPPED.to_string(),
            WireRegion {
                address: hex(0),
                size: 0,
                used: rollup.used,
                utilization: 0.0,
                attrs: String::new(),
                parent: None,
                sections: rollup.sections.clone(),
                auto: true,
            },
        );
    }

    let mut sections: Vec<&crate::model::Section> = report.sections.iter().collect();
    sections.sort_by(|a, b| {
        order_key(&a.region, a.address, &a.name).cmp(&order_key(&b.region, b.address, &b.name))
    });
    let sections = sections
        .into_iter()
        .map(|s| WireSection {
            name: s.name.clone(),
            address: hex(s.address),
            size: s.size,
            flags: s.flags.names(),
            kind: s.kind,
            region: s.region.clone(),
        })
        .collect();

    let mut symbols: Vec<&crate::model::Symbol> = report.symbols.iter().collect();
    symbols.sort_by(|a, b| {
        order_key(&a.region, a.address, &a.name).cmp(&order_key(&b.region, b.address, &b.name))
    });
    let symbols = symbols
        .into_iter()
        .map(|s| WireSymbol {
            name: s.name.clone(),
            demangled: s.demangled.clone(),
            address: hex(s.address),
            size: s.size,
            kind: s.kind,
            binding: s.binding,
            section: s.section.clone(),
            region: s.region.clone(),
            source_file: s.source_file.clone(),
            source_line: s.source_line,
        })
        .collect();

    // Sorted so that shuffling CU order inside the ELF cannot change the
    // report.
    let mut units: Vec<&crate::model::CompilationUnit> =
        report.compilation_units.iter().collect();
    units.sort_by(|a, b| (&a.name, &a.comp_dir).cmp(&(&b.name, &b.comp_dir)));
    let compilation_units = units
        .into_iter()
        .map(|u| WireUnit {
            name: u.name.clone(),
            comp_dir: u.comp_dir.clone(),
            producer: u.producer.clone(),
            language: u.language,
        })
        .collect();

    WireReport {
        schema_version: SCHEMA_VERSION,
        architecture: report.architecture,
        memory_regions,
        sections,
        symbols,
        compilation_units,
        meta: WireMeta {
            elf_sha256: report.elf_sha256.clone(),
            analyzed_at: analyzed_at.to_string(),
            entry_point: hex(report.entry_point),
            file_type: report.file_type,
            warnings: report.warnings.clone(),
        },
    }
}

/// Renders the report as pretty-printed JSON. With identical inputs
/// (including `analyzed_at`) the output is byte-identical.
pub fn to_json(report: &MemoryReport, analyzed_at: &str) -> String {
    let mut out = serde_json::to_string_pretty(&to_wire(report, analyzed_at))
        .expect("report serialization cannot fail");
    out.push('\n');
    out
}

/// Renders a human-readable memory layout table, regions sorted by origin.
pub fn to_human(report: &MemoryReport) -> String {
    let mut lines = vec!["Memory layout:".to_string()];

    let mut regions: Vec<_> = report.regions.values().collect();
    regions.sort_by_key(|r| r.origin);
    for region in regions {
        let rollup = report.rollups.get(&region.name).cloned().unwrap_or_default();
        let size_kib = region.length as f64 / 1024.0;
        let class = format!("{:?}", region.class).to_ascii_uppercase();
        lines.push(format!(
            "  {:<12} ({:<7}) 0x{:08x}..0x{:08x} {:>9.1} KiB [{:<4}] used {:>8} ({:>6.2}%)",
            region.name,
            class,
            region.origin,
            region.end(),
            size_kib,
            region.attrs.to_string(),
            rollup.used,
            rollup.utilization,
        ));
    }

    if let Some(rollup) = report.rollups.get(UNMAPPED) {
        lines.push(format!(
            "  {:<12} {} sections / {} bytes outside any region",
            UNMAPPED,
            rollup.sections.len(),
            rollup.used
        ));
    }

    lines.push(String::new());
    lines.push(format!(
        "{} sections, {} symbols, {} compilation units",
        report.sections.len(),
        report.symbols.len(),
        report.compilation_units.len()
    ));
    if !report.warnings.is_empty() {
        lines.push(format!("{} warning(s):", report.warnings.len()));
        for warning in &report.warnings {
            lines.push(format!("  - {warning}"));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}
