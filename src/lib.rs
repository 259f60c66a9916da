//! Ingests a compiled ELF and optional GNU linker scripts, and produces a
//! structured memory report attributing every byte to a memory region, an
//! ELF section, and -- where debug info permits -- a symbol and its source
//! file of definition.
//!
//! The pipeline runs leaves-first: architecture detection seeds the linker
//! evaluator, the scripts become a region table, the ELF's sections and
//! symbols are scanned, DWARF supplies source attribution, and the region
//! mapper joins the two streams. One `analyze` call produces one immutable
//! report; there is no shared state between calls, so history-replay drivers
//! can invoke it hundreds of times in one process.
//!
//! Error philosophy: the linker/ELF layer is strict (a bad script or a
//! truncated ELF fails the call), the DWARF layer is lenient (a malformed CU
//! is logged and skipped).

pub mod arch;
pub mod dwarf;
pub mod linker;
pub mod mapper;
pub mod model;
pub mod report;
pub mod sections;
pub mod source;
pub mod symbols;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use object::Object;
use sha2::{Digest, Sha256};
use thiserror::Error;

use linker::eval::Evaluator;
use linker::{LinkerEvalError, LinkerParseError};
use model::MemoryReport;

pub use dwarf::DwarfError;
pub use model::Architecture;

/// Cooperative cancellation flag, checked between pipeline stages and at
/// compilation-unit boundaries. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for one analysis run.
#[derive(Clone, Debug, Default)]
pub struct AnalyzeOptions {
    /// `--def VAR=VALUE` bindings. Values are linker expressions over
    /// literals (`4096K`, `0x100000`, `512 * 1024`).
    pub var_overrides: BTreeMap<String, String>,
    /// Skip the DWARF line program; faster, slightly lower source-mapping
    /// coverage.
    pub skip_line_program: bool,
    pub cancel: CancelToken,
}

/// The ELF could not be read or is not an ELF.
#[derive(Debug, Error)]
pub enum ElfFormatError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("`{name}` could not be parsed as an object file: {source}")]
    Parse {
        name: String,
        source: object::Error,
    },
    #[error("`{name}` is a {format:?} binary, not ELF")]
    NotElf {
        name: String,
        format: object::BinaryFormat,
    },
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Elf(#[from] ElfFormatError),
    #[error("failed to read linker script `{path}`: {source}")]
    ScriptIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    LinkerParse(#[from] LinkerParseError),
    #[error(transparent)]
    LinkerEval(#[from] LinkerEvalError),
    #[error("invalid --def value `{name}={value}`: {reason}")]
    InvalidOverride {
        name: String,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Dwarf(DwarfError),
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidOverride { .. } => 2,
            Self::Elf(_) => 3,
            Self::ScriptIo { .. } | Self::LinkerParse(_) | Self::LinkerEval(_) => 4,
            Self::Dwarf(_) => 5,
            Self::Cancelled => 130,
        }
    }
}

/// Analyzes an ELF on disk. The file is memory-mapped when the platform
/// permits; the mapping is released before this returns.
pub fn analyze(
    elf_path: &Path,
    linker_script_paths: &[PathBuf],
    opts: &AnalyzeOptions,
) -> Result<MemoryReport, AnalysisError> {
    let mut scripts = Vec::with_capacity(linker_script_paths.len());
    for path in linker_script_paths {
        let source = fs::read_to_string(path).map_err(|source| AnalysisError::ScriptIo {
            path: path.clone(),
            source,
        })?;
        scripts.push((path.display().to_string(), source));
    }

    let file = fs::File::open(elf_path).map_err(|source| ElfFormatError::Io {
        path: elf_path.to_path_buf(),
        source,
    })?;
    let name = elf_path.display().to_string();
    match unsafe { memmap2::Mmap::map(&file) } {
        Ok(map) => analyze_bytes(&map, &name, &scripts, opts),
        Err(err) => {
            debug!("mmap of {name} failed ({err}), falling back to read");
            let data = fs::read(elf_path).map_err(|source| ElfFormatError::Io {
                path: elf_path.to_path_buf(),
                source,
            })?;
            analyze_bytes(&data, &name, &scripts, opts)
        }
    }
}

/// The pure pipeline: bytes and script sources in, report out.
pub fn analyze_bytes(
    elf: &[u8],
    elf_name: &str,
    linker_scripts: &[(String, String)],
    opts: &AnalyzeOptions,
) -> Result<MemoryReport, AnalysisError> {
    let file = object::File::parse(elf).map_err(|source| ElfFormatError::Parse {
        name: elf_name.to_string(),
        source,
    })?;
    if file.format() != object::BinaryFormat::Elf {
        return Err(ElfFormatError::NotElf {
            name: elf_name.to_string(),
            format: file.format(),
        }
        .into());
    }

    let architecture = arch::detect(&file);
    let file_type = arch::file_type(&file);
    let entry_point = file.entry();
    let elf_sha256 = sha256_hex(elf);
    let arch_defaults = arch::default_variables(architecture);
    let overrides = parse_overrides(&opts.var_overrides)?;

    check_cancel(&opts.cancel)?;

    let mut sections = sections::scan(&file);
    let section_facts = sections::facts(&file);

    // Linker scripts, or the synthetic fallback regions when none are given.
    let mut warnings = Vec::new();
    let regions: IndexMap<String, model::MemoryRegion> = if linker_scripts.is_empty() {
        linker::synthesize_default_regions(&sections)
    } else {
        let mut parsed = Vec::with_capacity(linker_scripts.len());
        for (path, source) in linker_scripts {
            let (script, mut parse_warnings) = linker::parser::parse(path, source)?;
            warnings.append(&mut parse_warnings);
            parsed.push(script);
        }
        let resolved =
            linker::resolve_regions(&parsed, &arch_defaults, &overrides, Some(&section_facts))?;
        warnings.extend(resolved.warnings);
        resolved.regions
    };

    check_cancel(&opts.cancel)?;

    let mut symbols = symbols::scan(&file);

    let dwarf_data = dwarf::process(
        &file,
        &dwarf::ProcessOptions {
            skip_line_program: opts.skip_line_program,
        },
        &opts.cancel,
    )
    .map_err(|err| match err {
        DwarfError::Cancelled => AnalysisError::Cancelled,
        other => AnalysisError::Dwarf(other),
    })?;

    check_cancel(&opts.cancel)?;

    source::SourceResolver::new(&dwarf_data).annotate(&mut symbols);

    let rollups = mapper::RegionMapper::new(&regions).assign(&mut sections, &mut symbols);

    Ok(MemoryReport {
        architecture,
        regions,
        rollups,
        sections,
        symbols,
        compilation_units: dwarf_data.units,
        entry_point,
        file_type,
        elf_sha256,
        warnings,
    })
}

fn check_cancel(cancel: &CancelToken) -> Result<(), AnalysisError> {
    if cancel.is_cancelled() {
        Err(AnalysisError::Cancelled)
    } else {
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Parses `--def` values as literal linker expressions (`4096K`,
/// `0x100000`, `512 * 1024`).
fn parse_overrides(
    raw: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, i64>, AnalysisError> {
    let mut out = BTreeMap::new();
    for (name, value) in raw {
        let invalid = |reason: String| AnalysisError::InvalidOverride {
            name: name.clone(),
            value: value.clone(),
            reason,
        };
        let expr = linker::parser::parse_expression("<--def>", value)
            .map_err(|e| invalid(e.message))?;
        let values = IndexMap::new();
        let defaults = BTreeMap::new();
        let overrides = BTreeMap::new();
        let regions = IndexMap::new();
        let mut eval_warnings = Vec::new();
        let mut evaluator = Evaluator {
            file: "<--def>",
            values: &values,
            arch_defaults: &defaults,
            overrides: &overrides,
            regions: &regions,
            sections: None,
            warnings: &mut eval_warnings,
        };
        let resolved = evaluator.eval(&expr).map_err(|e| invalid(e.to_string()))?;
        out.insert(name.clone(), resolved);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_values_accept_linker_literals() {
        let mut raw = BTreeMap::new();
        raw.insert("__flash_size__".to_string(), "4096K".to_string());
        raw.insert("BASE".to_string(), "0x0800_0000".to_string());
        // Underscore grouping is not linker syntax; that one must fail.
        assert!(parse_overrides(&raw).is_err());

        raw.remove("BASE");
        let parsed = parse_overrides(&raw).expect("parse");
        assert_eq!(parsed["__flash_size__"], 4096 * 1024);
    }

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn exit_codes_match_the_contract() {
        assert_eq!(AnalysisError::Cancelled.exit_code(), 130);
        let parse = LinkerParseError {
            file: "x.ld".into(),
            line: 1,
            col: 1,
            message: "boom".into(),
            excerpt: String::new(),
        };
        assert_eq!(AnalysisError::LinkerParse(parse).exit_code(), 4);
    }
}
