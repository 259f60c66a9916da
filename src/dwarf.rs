//! DWARF debug-info processing.
//!
//! For every symbol the scanner produced we want the source file of its
//! *definition*. The walk collects, per compilation unit: the unit's file
//! table (kept under its original indices), definition and declaration DIEs,
//! inlined-subroutine ranges, and optionally the line program rows.
//!
//! Invariant: a `DW_AT_decl_file` value is only ever interpreted in the file
//! table of the CU the DIE belongs to. File tables are never flattened into
//! a global list before lookup; flattening silently corrupts source mapping
//! on multi-object builds.
//!
//! This layer is lenient. A malformed CU is logged and skipped; bad debug
//! info must never take down an otherwise successful section-level analysis.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gimli::constants as gim_con;
use gimli::Reader;
use log::{debug, warn};
use object::{Object, ObjectSection};
use thiserror::Error;

use crate::model::{CompilationUnit, Language};
use crate::CancelToken;

// Internal type abbreviation, matching how the sections are loaded.
type RtArcReader = gimli::EndianReader<gimli::RunTimeEndian, Arc<[u8]>>;

#[derive(Clone, Debug, Error)]
pub enum DwarfError {
    #[error("DWARF data could not be read: {0}")]
    Read(#[from] gimli::Error),
    #[error("analysis cancelled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug)]
pub struct ProcessOptions {
    /// Skip the line program walk. Costs some source-mapping coverage,
    /// saves a large fraction of analysis time.
    pub skip_line_program: bool,
}

/// Where a symbol's definition was found.
#[derive(Clone, Debug)]
pub struct SourceRef {
    pub file: String,
    pub line: Option<u32>,
}

/// A declaration-only sighting of a name.
#[derive(Clone, Debug)]
pub struct DeclRecord {
    pub file: String,
    pub line: Option<u32>,
    pub unit_index: usize,
}

/// Everything the DWARF walk produces, indexed for address and name lookup.
#[derive(Clone, Debug, Default)]
pub struct DwarfData {
    pub units: Vec<CompilationUnit>,
    /// Definitions keyed by `(address, name)`. Two identically named statics
    /// in different translation units stay distinct.
    definitions: BTreeMap<(u64, String), Definition>,
    /// Declaration-only records by name.
    declarations: BTreeMap<String, Vec<DeclRecord>>,
    /// Line program rows: start address → row covering `[start, end)`.
    line_rows: BTreeMap<u64, LineRow>,
    /// Inlined subroutine ranges, weakest source hint.
    inline_ranges: Vec<(u64, u64, String)>,
    /// Canonical spelling per normalized path, first writer wins.
    interned: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
struct Definition {
    source: SourceRef,
    unit_index: usize,
}

#[derive(Clone, Debug)]
struct LineRow {
    end: u64,
    file: String,
    line: Option<u32>,
}

impl DwarfData {
    /// Looks up a definition for `(address, name)`. ARM Thumb symbols carry
    /// bit 0 in the symbol table but not in DWARF PC values, so the cleared
    /// address is tried as well.
    pub fn definition(&self, address: u64, name: &str) -> Option<&SourceRef> {
        if let Some(def) = self.definitions.get(&(address, name.to_string())) {
            return Some(&def.source);
        }
        if address & 1 != 0 {
            if let Some(def) = self.definitions.get(&(address & !1, name.to_string())) {
                return Some(&def.source);
            }
        }
        None
    }

    /// Declaration-only fallback: meaningful when exactly one CU references
    /// the name.
    pub fn unique_declaration(&self, name: &str) -> Option<&DeclRecord> {
        let records = self.declarations.get(name)?;
        let units: BTreeSet<usize> = records.iter().map(|r| r.unit_index).collect();
        if units.len() == 1 {
            records.first()
        } else {
            None
        }
    }

    /// Line-program lookup for an address.
    pub fn line_row(&self, address: u64) -> Option<(&str, Option<u32>)> {
        let (_, row) = self.line_rows.range(..=address).next_back()?;
        if address < row.end {
            Some((&row.file, row.line))
        } else {
            None
        }
    }

    /// Innermost inlined-subroutine range covering the address.
    pub fn inline_file(&self, address: u64) -> Option<&str> {
        self.inline_ranges
            .iter()
            .filter(|(lo, hi, _)| address >= *lo && address < *hi)
            .min_by_key(|(lo, hi, _)| hi - lo)
            .map(|(_, _, file)| file.as_str())
    }

    /// The CU whose `[low_pc, high_pc)` range covers the address.
    pub fn unit_containing(&self, address: u64) -> Option<&CompilationUnit> {
        self.units.iter().find(|u| u.contains(address))
    }

    /// Canonicalizes a path: duplicate spellings of one logical file (case,
    /// prefix, separators) collapse onto the first-seen original form.
    fn intern(&mut self, path: String) -> String {
        let key = normalize_path(&path);
        self.interned.entry(key).or_insert(path).clone()
    }
}

/// Normalized form used only as a deduplication key: posix separators,
/// lowercase, `.` segments dropped.
fn normalize_path(path: &str) -> String {
    let slashes = path.replace('\\', "/");
    let parts: Vec<&str> = slashes
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    parts.join("/").to_ascii_lowercase()
}

/// Joins a relative path onto the compilation directory.
fn join_comp_dir(comp_dir: &str, path: &str) -> String {
    if path.starts_with('/') || comp_dir.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", comp_dir.trim_end_matches('/'), path)
    }
}

/// A CU's file table under its original DWARF indices: 1-based through
/// DWARF 4, 0-based from DWARF 5.
struct FileTable {
    base: u64,
    files: Vec<String>,
}

impl FileTable {
    fn empty() -> Self {
        Self { base: 1, files: Vec::new() }
    }

    fn get(&self, index: u64) -> Option<&str> {
        let slot = index.checked_sub(self.base)?;
        self.files.get(slot as usize).map(String::as_str)
    }
}

/// Walks all compilation units of the file.
pub fn process(
    file: &object::File,
    opts: &ProcessOptions,
    cancel: &CancelToken,
) -> Result<DwarfData, DwarfError> {
    let endian = if file.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<RtArcReader, gimli::Error> {
        let data = file
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(Cow::Borrowed(&[][..]));
        Ok(gimli::EndianReader::new(Arc::from(&*data), endian))
    };
    let dwarf = gimli::Dwarf::load(load_section)?;

    let mut headers = Vec::new();
    let mut iter = dwarf.units();
    loop {
        match iter.next() {
            Ok(Some(header)) => headers.push(header),
            Ok(None) => break,
            Err(err) => {
                warn!("unit header iteration stopped early: {err}");
                break;
            }
        }
    }

    let mut data = DwarfData::default();
    let mut records = Vec::new();
    for header in headers {
        if cancel.is_cancelled() {
            return Err(DwarfError::Cancelled);
        }
        let offset = header.offset();
        if let Err(err) = process_unit(&dwarf, header, opts, &mut data, &mut records) {
            warn!("skipping malformed compilation unit at {offset:x?}: {err}");
        }
    }

    merge_records(&mut data, records);
    Ok(data)
}

/// One interesting DIE, resolved against its own CU's file table at
/// collection time.
struct DieRecord {
    name: String,
    address: Option<u64>,
    file: Option<String>,
    line: Option<u32>,
    declaration: bool,
    unit_index: usize,
    die_offset: u64,
}

fn process_unit(
    dwarf: &gimli::Dwarf<RtArcReader>,
    header: gimli::UnitHeader<RtArcReader>,
    opts: &ProcessOptions,
    data: &mut DwarfData,
    records: &mut Vec<DieRecord>,
) -> Result<(), gimli::Error> {
    let unit = dwarf.unit(header)?;
    let unit_index = data.units.len();

    let comp_dir = unit
        .comp_dir
        .as_ref()
        .and_then(|d| d.to_string_lossy().ok().map(Cow::into_owned))
        .unwrap_or_default();
    let raw_name = unit
        .name
        .as_ref()
        .and_then(|n| n.to_string_lossy().ok().map(Cow::into_owned))
        .unwrap_or_default();
    let primary_file = if raw_name.is_empty() {
        None
    } else {
        Some(data.intern(join_comp_dir(&comp_dir, &raw_name)))
    };

    // Root DIE: producer, language, and the unit's PC range.
    let mut producer = String::new();
    let mut language = Language::Other;
    let mut low_pc = None;
    let mut high_pc_attr = None;
    {
        let mut entries = unit.entries();
        let Some((_, root)) = entries.next_dfs()? else {
            return Ok(());
        };
        let mut attrs = root.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                gim_con::DW_AT_producer => {
                    if let Ok(s) = dwarf.attr_string(&unit, attr.value()) {
                        producer = s.to_string_lossy()?.into_owned();
                    }
                }
                gim_con::DW_AT_language => {
                    if let gimli::AttributeValue::Language(lang) = attr.value() {
                        language = map_language(lang);
                    }
                }
                gim_con::DW_AT_low_pc => {
                    low_pc = attr_address(dwarf, &unit, attr.value())?;
                }
                gim_con::DW_AT_high_pc => {
                    high_pc_attr = Some(attr.value());
                }
                _ => (),
            }
        }
    }
    let high_pc = match (low_pc, high_pc_attr) {
        (_, Some(gimli::AttributeValue::Addr(a))) => Some(a),
        (Some(lo), Some(v)) => v.udata_value().map(|off| lo + off),
        _ => None,
    };

    let file_table = build_file_table(dwarf, &unit, data);

    data.units.push(CompilationUnit {
        name: primary_file.clone().unwrap_or_default(),
        comp_dir,
        producer,
        language,
        low_pc,
        high_pc,
    });

    collect_dies(dwarf, &unit, &file_table, primary_file.as_deref(), unit_index, data, records)?;

    if !opts.skip_line_program {
        if let Err(err) = collect_line_rows(dwarf, &unit, data) {
            warn!("line program for unit #{unit_index} unreadable: {err}");
        }
    }

    Ok(())
}

fn build_file_table(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    data: &mut DwarfData,
) -> FileTable {
    let Some(lp) = &unit.line_program else {
        return FileTable::empty();
    };
    let header = lp.header();
    let base = if header.encoding().version >= 5 { 0 } else { 1 };
    let comp_dir = unit
        .comp_dir
        .as_ref()
        .and_then(|d| d.to_string_lossy().ok().map(Cow::into_owned))
        .unwrap_or_default();

    let mut files = Vec::with_capacity(header.file_names().len());
    for file in header.file_names() {
        let name = dwarf
            .attr_string(unit, file.path_name())
            .ok()
            .and_then(|s| s.to_string_lossy().ok().map(Cow::into_owned))
            .unwrap_or_default();
        let dir = file
            .directory(header)
            .and_then(|d| dwarf.attr_string(unit, d).ok())
            .and_then(|s| s.to_string_lossy().ok().map(Cow::into_owned))
            .unwrap_or_default();
        let joined = if name.starts_with('/') || dir.is_empty() {
            name
        } else {
            format!("{}/{}", dir.trim_end_matches('/'), name)
        };
        files.push(data.intern(join_comp_dir(&comp_dir, &joined)));
    }
    FileTable { base, files }
}

fn collect_dies(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    file_table: &FileTable,
    primary_file: Option<&str>,
    unit_index: usize,
    data: &mut DwarfData,
    records: &mut Vec<DieRecord>,
) -> Result<(), gimli::Error> {
    let mut entries = unit.entries();
    while let Some((_, entry)) = entries.next_dfs()? {
        match entry.tag() {
            gim_con::DW_TAG_subprogram => {
                collect_subprogram(dwarf, unit, entry, file_table, unit_index, records)?;
            }
            gim_con::DW_TAG_variable => {
                collect_variable(
                    dwarf, unit, entry, file_table, primary_file, unit_index, records,
                )?;
            }
            gim_con::DW_TAG_inlined_subroutine => {
                collect_inline(dwarf, unit, entry, file_table, data)?;
            }
            _ => (),
        }
    }
    Ok(())
}

fn collect_subprogram(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    entry: &gimli::DebuggingInformationEntry<RtArcReader>,
    file_table: &FileTable,
    unit_index: usize,
    records: &mut Vec<DieRecord>,
) -> Result<(), gimli::Error> {
    let mut name = None;
    let mut linkage_name = None;
    let mut low_pc = None;
    let mut has_ranges = false;
    let mut decl_file = None;
    let mut decl_line = None;
    let mut declaration = false;

    let mut attrs = entry.attrs();
    while let Some(attr) = attrs.next()? {
        match attr.name() {
            gim_con::DW_AT_name => {
                name = attr_str(dwarf, unit, attr.value());
            }
            gim_con::DW_AT_linkage_name => {
                linkage_name = attr_str(dwarf, unit, attr.value());
            }
            gim_con::DW_AT_low_pc => {
                low_pc = attr_address(dwarf, unit, attr.value())?;
            }
            gim_con::DW_AT_ranges => {
                has_ranges = true;
            }
            gim_con::DW_AT_decl_file => {
                if let gimli::AttributeValue::FileIndex(idx) = attr.value() {
                    decl_file = file_table.get(idx).map(str::to_string);
                }
            }
            gim_con::DW_AT_decl_line => {
                decl_line = attr.value().udata_value().map(|v| v as u32);
            }
            gim_con::DW_AT_declaration => {
                if let gimli::AttributeValue::Flag(flag) = attr.value() {
                    declaration = flag;
                }
            }
            _ => (),
        }
    }

    // DWARF 5 may describe the entry point through ranges only.
    if low_pc.is_none() && has_ranges {
        let mut ranges = dwarf.die_ranges(unit, entry)?;
        let mut min = None;
        while let Some(range) = ranges.next()? {
            if range.begin != 0 {
                min = Some(min.map_or(range.begin, |m: u64| m.min(range.begin)));
            }
        }
        low_pc = min;
    }

    // The symbol table carries linkage names; key on those when present.
    let Some(key_name) = linkage_name.or(name) else {
        return Ok(());
    };

    if declaration || low_pc.is_none() || decl_file.is_none() || decl_line.is_none() {
        if let Some(file) = decl_file {
            records.push(DieRecord {
                name: key_name,
                address: None,
                file: Some(file),
                line: decl_line,
                declaration: true,
                unit_index,
                die_offset: die_offset(unit, entry),
            });
        }
        return Ok(());
    }

    records.push(DieRecord {
        name: key_name,
        address: low_pc,
        file: decl_file,
        line: decl_line,
        declaration: false,
        unit_index,
        die_offset: die_offset(unit, entry),
    });
    Ok(())
}

fn collect_variable(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    entry: &gimli::DebuggingInformationEntry<RtArcReader>,
    file_table: &FileTable,
    primary_file: Option<&str>,
    unit_index: usize,
    records: &mut Vec<DieRecord>,
) -> Result<(), gimli::Error> {
    let mut name = None;
    let mut linkage_name = None;
    let mut decl_file = None;
    let mut decl_line = None;
    let mut declaration = false;
    let mut address = None;

    let mut attrs = entry.attrs();
    while let Some(attr) = attrs.next()? {
        match attr.name() {
            gim_con::DW_AT_name => {
                name = attr_str(dwarf, unit, attr.value());
            }
            gim_con::DW_AT_linkage_name => {
                linkage_name = attr_str(dwarf, unit, attr.value());
            }
            gim_con::DW_AT_decl_file => {
                if let gimli::AttributeValue::FileIndex(idx) = attr.value() {
                    decl_file = file_table.get(idx).map(str::to_string);
                }
            }
            gim_con::DW_AT_decl_line => {
                decl_line = attr.value().udata_value().map(|v| v as u32);
            }
            gim_con::DW_AT_declaration => {
                if let gimli::AttributeValue::Flag(flag) = attr.value() {
                    declaration = flag;
                }
            }
            gim_con::DW_AT_location => {
                if let Some(expr) = attr.exprloc_value() {
                    address = exprloc_address(dwarf, unit, expr)?;
                }
            }
            _ => (),
        }
    }

    let Some(key_name) = linkage_name.or(name) else {
        return Ok(());
    };

    if declaration || address.is_none() {
        // A declaration in a header is attributed to the including CU; the
        // definition lives where the compiler placed storage, not in the
        // header that announced it.
        let header_decl = decl_file.as_deref().is_some_and(is_header);
        let file = if header_decl {
            primary_file.map(str::to_string).or(decl_file)
        } else {
            decl_file.or_else(|| primary_file.map(str::to_string))
        };
        if let Some(file) = file {
            records.push(DieRecord {
                name: key_name,
                address: None,
                file: Some(file),
                line: decl_line,
                declaration: true,
                unit_index,
                die_offset: die_offset(unit, entry),
            });
        }
        return Ok(());
    }

    records.push(DieRecord {
        name: key_name,
        address,
        file: decl_file.or_else(|| primary_file.map(str::to_string)),
        line: decl_line,
        declaration: false,
        unit_index,
        die_offset: die_offset(unit, entry),
    });
    Ok(())
}

fn collect_inline(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    entry: &gimli::DebuggingInformationEntry<RtArcReader>,
    file_table: &FileTable,
    data: &mut DwarfData,
) -> Result<(), gimli::Error> {
    let mut call_file = None;
    let mut low_pc = None;
    let mut high_pc_attr = None;
    let mut has_ranges = false;

    let mut attrs = entry.attrs();
    while let Some(attr) = attrs.next()? {
        match attr.name() {
            gim_con::DW_AT_call_file => {
                if let gimli::AttributeValue::FileIndex(idx) = attr.value() {
                    call_file = file_table.get(idx).map(str::to_string);
                }
            }
            gim_con::DW_AT_low_pc => {
                low_pc = attr_address(dwarf, unit, attr.value())?;
            }
            gim_con::DW_AT_high_pc => {
                high_pc_attr = Some(attr.value());
            }
            gim_con::DW_AT_ranges => {
                has_ranges = true;
            }
            _ => (),
        }
    }

    let Some(file) = call_file else {
        return Ok(());
    };

    if let Some(lo) = low_pc {
        let hi = match high_pc_attr {
            Some(gimli::AttributeValue::Addr(a)) => Some(a),
            Some(v) => v.udata_value().map(|off| lo + off),
            None => None,
        };
        if let Some(hi) = hi {
            if hi > lo {
                data.inline_ranges.push((lo, hi, file));
            }
            return Ok(());
        }
    }

    if has_ranges {
        let mut ranges = dwarf.die_ranges(unit, entry)?;
        while let Some(range) = ranges.next()? {
            if range.end > range.begin {
                data.inline_ranges.push((range.begin, range.end, file.clone()));
            }
        }
    }
    Ok(())
}

fn collect_line_rows(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    data: &mut DwarfData,
) -> Result<(), gimli::Error> {
    let Some(lp) = unit.line_program.clone() else {
        return Ok(());
    };
    let comp_dir = unit
        .comp_dir
        .as_ref()
        .and_then(|d| d.to_string_lossy().ok().map(Cow::into_owned))
        .unwrap_or_default();

    let mut pending: Option<(u64, String, Option<u32>)> = None;
    let mut rows = lp.rows();
    while let Some((header, row)) = rows.next_row()? {
        if let Some((start, file, line)) = pending.take() {
            let end = row.address();
            if end > start {
                data.line_rows.insert(start, LineRow { end, file, line });
            }
        }
        if row.end_sequence() {
            continue;
        }

        let file = match row.file(header) {
            Some(entry) => {
                let name = dwarf
                    .attr_string(unit, entry.path_name())
                    .ok()
                    .and_then(|s| s.to_string_lossy().ok().map(Cow::into_owned))
                    .unwrap_or_default();
                let dir = entry
                    .directory(header)
                    .and_then(|d| dwarf.attr_string(unit, d).ok())
                    .and_then(|s| s.to_string_lossy().ok().map(Cow::into_owned))
                    .unwrap_or_default();
                let joined = if name.starts_with('/') || dir.is_empty() {
                    name
                } else {
                    format!("{}/{}", dir.trim_end_matches('/'), name)
                };
                data.intern(join_comp_dir(&comp_dir, &joined))
            }
            None => continue,
        };
        let line = row.line().map(|l| l.get() as u32);
        pending = Some((row.address(), file, line));
    }
    Ok(())
}

/// Applies the declaration-vs-definition policy. Records are sorted by
/// `(address, die_offset)` first so the result is independent of CU
/// processing order, which also keeps a parallel CU walk deterministic.
fn merge_records(data: &mut DwarfData, mut records: Vec<DieRecord>) {
    records.sort_by(|a, b| {
        a.address
            .cmp(&b.address)
            .then_with(|| a.die_offset.cmp(&b.die_offset))
    });

    for record in records {
        if record.declaration || record.address.is_none() {
            if let Some(file) = record.file {
                data.declarations
                    .entry(record.name)
                    .or_default()
                    .push(DeclRecord {
                        file,
                        line: record.line,
                        unit_index: record.unit_index,
                    });
            }
            continue;
        }

        let address = record.address.unwrap();
        let Some(file) = record.file else { continue };
        let key = (address, record.name);
        let candidate = Definition {
            source: SourceRef {
                file,
                line: record.line,
            },
            unit_index: record.unit_index,
        };
        match data.definitions.get(&key) {
            None => {
                data.definitions.insert(key, candidate);
            }
            Some(existing) => {
                // Address-bound duplicates (weak/inline copies): the CU whose
                // range covers the address wins; otherwise the first record
                // in die-offset order stays.
                let existing_covers = data
                    .units
                    .get(existing.unit_index)
                    .is_some_and(|u| u.contains(address));
                let candidate_covers = data
                    .units
                    .get(candidate.unit_index)
                    .is_some_and(|u| u.contains(address));
                if candidate_covers && !existing_covers {
                    data.definitions.insert(key, candidate);
                }
            }
        }
    }
}

fn is_header(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".h") || lower.ends_with(".hpp") || lower.ends_with(".hh")
}

fn attr_str(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    value: gimli::AttributeValue<RtArcReader>,
) -> Option<String> {
    dwarf
        .attr_string(unit, value)
        .ok()
        .and_then(|s| s.to_string_lossy().ok().map(Cow::into_owned))
}

fn attr_address(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    value: gimli::AttributeValue<RtArcReader>,
) -> Result<Option<u64>, gimli::Error> {
    match value {
        gimli::AttributeValue::Addr(addr) => Ok(Some(addr)),
        gimli::AttributeValue::DebugAddrIndex(index) => dwarf.address(unit, index).map(Some),
        _ => Ok(None),
    }
}

/// Extracts an address binding from a location expression. Only `DW_OP_addr`
/// and `DW_OP_addrx` describe globals; register, frame-based, and composite
/// locations yield nothing.
fn exprloc_address(
    dwarf: &gimli::Dwarf<RtArcReader>,
    unit: &gimli::Unit<RtArcReader>,
    expr: gimli::Expression<RtArcReader>,
) -> Result<Option<u64>, gimli::Error> {
    let mut ops = expr.operations(unit.encoding());
    let first = match ops.next() {
        Ok(op) => op,
        Err(err) => {
            debug!("unreadable location expression: {err}");
            return Ok(None);
        }
    };
    let address = match first {
        Some(gimli::read::Operation::Address { address }) => Some(address),
        Some(gimli::read::Operation::AddressIndex { index }) => {
            Some(dwarf.address(unit, index)?)
        }
        _ => None,
    };
    if address.is_some() {
        // A trailing operation means a composite location, not a plain
        // address binding.
        if let Ok(Some(_)) = ops.next() {
            return Ok(None);
        }
    }
    Ok(address)
}

fn die_offset(
    unit: &gimli::Unit<RtArcReader>,
    entry: &gimli::DebuggingInformationEntry<RtArcReader>,
) -> u64 {
    match entry.offset().to_unit_section_offset(unit) {
        gimli::UnitSectionOffset::DebugInfoOffset(gimli::DebugInfoOffset(x)) => x as u64,
        gimli::UnitSectionOffset::DebugTypesOffset(gimli::DebugTypesOffset(x)) => x as u64,
    }
}

fn map_language(lang: gimli::DwLang) -> Language {
    match lang {
        gim_con::DW_LANG_C | gim_con::DW_LANG_C89 | gim_con::DW_LANG_C99
        | gim_con::DW_LANG_C11 => Language::C,
        gim_con::DW_LANG_C_plus_plus
        | gim_con::DW_LANG_C_plus_plus_03
        | gim_con::DW_LANG_C_plus_plus_11
        | gim_con::DW_LANG_C_plus_plus_14 => Language::Cpp,
        gim_con::DW_LANG_Rust => Language::Rust,
        gim_con::DW_LANG_Mips_Assembler => Language::Assembly,
        _ => Language::Other,
    }
}
