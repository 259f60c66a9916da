//! Region resolution: turns parsed scripts into the canonical region table.
//!
//! Pass 1 processes assignments and `MEMORY` blocks; the region list is
//! frozen when it completes. Pass 2 processes `SECTIONS` for expression
//! support only. Assignments that reference link-time symbols we cannot know
//! are retried a few times (scripts freely use forward references) and then
//! dropped; an unresolvable `ORIGIN`/`LENGTH` is fatal.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use log::debug;

use super::ast::{AssignOp, MemoryEntry, OutputSection, Script, Stmt};
use super::eval::{Evaluator, SectionFacts};
use super::LinkerEvalError;
use crate::model::{MemoryRegion, RegionAttrs, RegionClass, Section, SectionFlags};

/// How many fixpoint passes forward-referencing assignments get before they
/// are abandoned.
const MAX_ASSIGN_PASSES: usize = 10;
/// How many passes `MEMORY` entries get to resolve `ORIGIN()`/`LENGTH()`
/// references to regions declared later.
const MAX_REGION_PASSES: usize = 3;

/// The outcome of linker-script resolution.
#[derive(Clone, Debug, Default)]
pub struct ResolvedRegions {
    /// Regions in declaration order.
    pub regions: IndexMap<String, MemoryRegion>,
    /// Final symbol environment, after both passes.
    pub env: IndexMap<String, i64>,
    /// Output sections seen in `SECTIONS` blocks.
    pub output_sections: Vec<OutputSection>,
    pub warnings: Vec<String>,
}

/// Resolves the region table from parsed scripts.
pub fn resolve_regions(
    scripts: &[Script],
    arch_defaults: &BTreeMap<String, i64>,
    overrides: &BTreeMap<String, i64>,
    sections: Option<&BTreeMap<String, SectionFacts>>,
) -> Result<ResolvedRegions, LinkerEvalError> {
    let mut out = ResolvedRegions::default();

    // Pass 1: top-level assignments, iterated to a fixpoint so forward
    // references across scripts resolve regardless of file order.
    let mut pending: Vec<(&str, &Stmt)> = Vec::new();
    for script in scripts {
        for stmt in &script.stmts {
            if matches!(stmt, Stmt::Assign { .. }) {
                pending.push((&script.path, stmt));
            }
        }
    }
    let deferred =
        run_assignment_fixpoint(&mut out, pending, arch_defaults, overrides, sections);

    // Pass 1 continued: MEMORY entries in declaration order. Entries whose
    // expressions reference regions declared later are retried.
    let mut entries: Vec<(&str, &MemoryEntry)> = Vec::new();
    for script in scripts {
        for stmt in &script.stmts {
            if let Stmt::Memory { entries: list } = stmt {
                for entry in list {
                    entries.push((&script.path, entry));
                }
            }
        }
    }
    for pass in 0..MAX_REGION_PASSES {
        let mut unresolved = Vec::new();
        let final_pass = pass == MAX_REGION_PASSES - 1;
        for (path, entry) in entries {
            match resolve_entry(&mut out, path, entry, arch_defaults, overrides, sections) {
                Ok(()) => (),
                Err(err @ LinkerEvalError::UnknownRegion { .. }) if !final_pass => {
                    debug!("deferring region `{}`: {err}", entry.name);
                    unresolved.push((path, entry));
                }
                Err(err) => return Err(err),
            }
        }
        entries = unresolved;
        if entries.is_empty() {
            break;
        }
    }

    // Assignments that needed `ORIGIN()`/`LENGTH()` of the regions above
    // (`_estack = ORIGIN(RAM) + LENGTH(RAM);`) get another chance now.
    if !deferred.is_empty() {
        run_assignment_fixpoint(&mut out, deferred, arch_defaults, overrides, sections);
    }

    detect_hierarchy(&mut out);

    // Pass 2: SECTIONS blocks, for expression support and the output-section
    // records only. The region table is already frozen.
    for script in scripts {
        for stmt in &script.stmts {
            if let Stmt::Sections {
                sections: outputs,
                stmts,
            } = stmt
            {
                out.output_sections.extend(outputs.iter().cloned());
                let pending: Vec<(&str, &Stmt)> =
                    stmts.iter().map(|s| (script.path.as_str(), s)).collect();
                run_assignment_fixpoint(&mut out, pending, arch_defaults, overrides, sections);
            }
        }
    }

    Ok(out)
}

fn run_assignment_fixpoint<'s>(
    out: &mut ResolvedRegions,
    mut pending: Vec<(&'s str, &'s Stmt)>,
    arch_defaults: &BTreeMap<String, i64>,
    overrides: &BTreeMap<String, i64>,
    sections: Option<&BTreeMap<String, SectionFacts>>,
) -> Vec<(&'s str, &'s Stmt)> {
    for _ in 0..MAX_ASSIGN_PASSES {
        let mut unresolved = Vec::new();
        let mut progressed = false;
        for (path, stmt) in pending {
            let Stmt::Assign {
                name,
                op,
                value,
                provide,
                ..
            } = stmt
            else {
                continue;
            };
            if *provide && out.env.contains_key(name.as_str()) {
                continue;
            }
            let mut evaluator = Evaluator {
                file: path,
                values: &out.env,
                arch_defaults,
                overrides,
                regions: &out.regions,
                sections,
                warnings: &mut out.warnings,
            };
            match evaluator.eval(value) {
                Ok(result) => {
                    let combined = match op {
                        AssignOp::Set => result,
                        AssignOp::Add => {
                            out.env.get(name.as_str()).copied().unwrap_or(0).wrapping_add(result)
                        }
                        AssignOp::Sub => {
                            out.env.get(name.as_str()).copied().unwrap_or(0).wrapping_sub(result)
                        }
                        AssignOp::Mul => {
                            out.env.get(name.as_str()).copied().unwrap_or(0).wrapping_mul(result)
                        }
                        AssignOp::Div => {
                            let prev = out.env.get(name.as_str()).copied().unwrap_or(0);
                            if result == 0 {
                                0
                            } else {
                                prev.wrapping_div(result)
                            }
                        }
                    };
                    out.env.insert(name.clone(), combined);
                    progressed = true;
                }
                Err(err) => {
                    debug!("deferring assignment `{name}`: {err}");
                    unresolved.push((path, stmt));
                }
            }
        }
        pending = unresolved;
        if pending.is_empty() || !progressed {
            break;
        }
    }
    for (_, stmt) in &pending {
        if let Stmt::Assign { name, .. } = stmt {
            debug!("assignment `{name}` left unresolved (link-time symbol)");
        }
    }
    pending
}

fn resolve_entry(
    out: &mut ResolvedRegions,
    path: &str,
    entry: &MemoryEntry,
    arch_defaults: &BTreeMap<String, i64>,
    overrides: &BTreeMap<String, i64>,
    sections: Option<&BTreeMap<String, SectionFacts>>,
) -> Result<(), LinkerEvalError> {
    let mut evaluator = Evaluator {
        file: path,
        values: &out.env,
        arch_defaults,
        overrides,
        regions: &out.regions,
        sections,
        warnings: &mut out.warnings,
    };
    let origin = evaluator.eval(&entry.origin)? as u64;
    let length = evaluator.eval(&entry.length)? as u64;

    if length == 0 {
        out.warnings.push(format!(
            "{path}: memory region `{}` has zero length, skipped",
            entry.name
        ));
        return Ok(());
    }
    if origin.checked_add(length).is_none() {
        return Err(LinkerEvalError::InvalidRegion {
            name: entry.name.clone(),
            reason: format!("origin 0x{origin:x} + length 0x{length:x} overflows"),
        });
    }

    let attrs = entry
        .attrs
        .as_deref()
        .map(RegionAttrs::parse)
        .unwrap_or_default();
    let region = MemoryRegion {
        name: entry.name.clone(),
        origin,
        length,
        attrs,
        class: RegionClass::derive(&entry.name, &attrs),
        parent: None,
        auto: false,
    };

    if out.regions.contains_key(&entry.name) {
        out.warnings.push(format!(
            "{path}: memory region `{}` redeclared, last definition wins",
            entry.name
        ));
    }
    // IndexMap keeps the first declaration's position on reinsert, so
    // redeclaration does not reorder the report.
    out.regions.insert(entry.name.clone(), region);
    Ok(())
}

/// Marks parent/child relationships between overlapping regions and warns
/// about overlaps that do not look hierarchical.
fn detect_hierarchy(out: &mut ResolvedRegions) {
    let names: Vec<String> = out.regions.keys().cloned().collect();
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            let a = out.regions[&names[i]].clone();
            let b = out.regions[&names[j]].clone();
            if a.origin >= b.end() || b.origin >= a.end() {
                continue;
            }

            // The larger region is the parent candidate.
            let (parent, child) = if a.length >= b.length { (&a, &b) } else { (&b, &a) };
            if parent.contains_region(child) && names_related(&parent.name, &child.name) {
                if !child.attrs.is_empty()
                    && !parent.attrs.is_empty()
                    && !child.attrs.subset_of(&parent.attrs)
                {
                    out.warnings.push(format!(
                        "region `{}` is nested in `{}` but widens its attributes ({} vs {})",
                        child.name, parent.name, child.attrs, parent.attrs
                    ));
                }
                let parent_name = parent.name.clone();
                let child_name = child.name.clone();
                out.regions[&child_name].parent = Some(parent_name);
            } else {
                out.warnings.push(format!(
                    "memory regions `{}` and `{}` overlap",
                    a.name, b.name
                ));
            }
        }
    }
}

/// Whether two region names look like a declared hierarchy: the child name
/// extends the parent name (`FLASH` / `FLASH_APP`), or both share the same
/// leading underscore-delimited component.
fn names_related(parent: &str, child: &str) -> bool {
    let parent = parent.to_ascii_lowercase();
    let child = child.to_ascii_lowercase();
    if child.starts_with(&parent) || parent.starts_with(&child) {
        return true;
    }
    let parent_head = parent.split('_').next().unwrap_or(&parent);
    let child_head = child.split('_').next().unwrap_or(&child);
    parent_head == child_head
}

/// Fallback for ELFs analyzed without linker scripts: one `Code` region over
/// the executable sections and one `Data` region over the writable ones.
/// Informational only, flagged `auto`.
pub fn synthesize_default_regions(sections: &[Section]) -> IndexMap<String, MemoryRegion> {
    let mut regions = IndexMap::new();
    let code = span_of(sections, |f| f.alloc && f.exec);
    if let Some((origin, end)) = code {
        regions.insert(
            "Code".to_string(),
            MemoryRegion {
                name: "Code".to_string(),
                origin,
                length: end - origin,
                attrs: RegionAttrs::parse("rx"),
                class: RegionClass::Flash,
                parent: None,
                auto: true,
            },
        );
    }
    let data = span_of(sections, |f| f.alloc && f.write);
    if let Some((origin, end)) = data {
        regions.insert(
            "Data".to_string(),
            MemoryRegion {
                name: "Data".to_string(),
                origin,
                length: end - origin,
                attrs: RegionAttrs::parse("rw"),
                class: RegionClass::Ram,
                parent: None,
                auto: true,
            },
        );
    }
    regions
}

fn span_of(sections: &[Section], pick: impl Fn(&SectionFlags) -> bool) -> Option<(u64, u64)> {
    let mut span: Option<(u64, u64)> = None;
    for section in sections {
        if !pick(&section.flags) {
            continue;
        }
        let (lo, hi) = span.get_or_insert((section.address, section.end()));
        *lo = (*lo).min(section.address);
        *hi = (*hi).max(section.end());
    }
    span.filter(|(lo, hi)| hi > lo)
}
