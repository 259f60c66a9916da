//! End-to-end pipeline tests over a hand-assembled ARM ELF32 firmware image.
//!
//! The fixture mirrors a minimal STM32-style layout: `.text` and `.rodata`
//! in flash, `.data` and `.bss` in RAM, and a small symbol table. It carries
//! no DWARF, so source attribution stays `null` throughout.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use membrowse::{analyze, AnalysisError, AnalyzeOptions};

mod common;
use common::build_firmware_elf;

const STM32_MEMORY: &str = "MEMORY\n{\n  FLASH (rx) : ORIGIN = 0x08000000, LENGTH = 512K\n  RAM (rwx) : ORIGIN = 0x20000000, LENGTH = 128K\n}\n";

struct Fixture {
    _dir: tempfile::TempDir,
    elf: PathBuf,
    scripts: Vec<PathBuf>,
}

fn fixture(scripts: &[(&str, &str)]) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let elf = dir.path().join("firmware.elf");
    fs::write(&elf, build_firmware_elf()).expect("write elf");
    let scripts = scripts
        .iter()
        .map(|(name, content)| {
            let path = dir.path().join(name);
            fs::write(&path, content).expect("write script");
            path
        })
        .collect();
    Fixture { _dir: dir, elf, scripts }
}

#[test]
fn stm32_reference_accounting() {
    let fx = fixture(&[("stm32.ld", STM32_MEMORY)]);
    let report = analyze(&fx.elf, &fx.scripts, &AnalyzeOptions::default()).expect("analyze");

    assert_eq!(report.rollups["FLASH"].used, 364);
    assert_eq!(report.rollups["RAM"].used, 1056);
    assert_eq!(report.rollups["FLASH"].utilization, 0.07);
    assert_eq!(report.rollups["RAM"].utilization, 0.81);

    let text = report.sections.iter().find(|s| s.name == ".text").unwrap();
    assert_eq!(text.region.as_deref(), Some("FLASH"));
    let bss = report.sections.iter().find(|s| s.name == ".bss").unwrap();
    assert_eq!(bss.region.as_deref(), Some("RAM"));

    let main = report.symbols.iter().find(|s| s.name == "main").unwrap();
    assert_eq!(main.region.as_deref(), Some("FLASH"));
    assert_eq!(main.section.as_deref(), Some(".text"));
    assert_eq!(main.source_file, None);
    let uart = report.symbols.iter().find(|s| s.name == "uart_buf").unwrap();
    assert_eq!(uart.region.as_deref(), Some("RAM"));

    // Local data symbols survive the scan.
    assert!(report.symbols.iter().any(|s| s.name == "lookup_table"));
}

#[test]
fn json_contract_end_to_end() {
    let fx = fixture(&[("stm32.ld", STM32_MEMORY)]);
    let report = analyze(&fx.elf, &fx.scripts, &AnalyzeOptions::default()).expect("analyze");
    let json = membrowse::report::to_json(&report, "2024-06-01T12:00:00Z");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");

    assert_eq!(value["schema_version"], "1.0");
    assert_eq!(value["architecture"], "arm");

    // Declaration order of the MEMORY block is preserved.
    let regions = value["memory_regions"].as_object().unwrap();
    let keys: Vec<&String> = regions.keys().collect();
    assert_eq!(keys, ["FLASH", "RAM"]);

    let flash = &value["memory_regions"]["FLASH"];
    assert_eq!(flash["address"], "0x8000000");
    assert_eq!(flash["size"], 524288);
    assert_eq!(flash["used"], 364);
    assert_eq!(flash["utilization"], 0.07);
    assert_eq!(flash["attrs"], "rx");
    assert_eq!(flash["auto"], false);
    assert_eq!(value["memory_regions"]["RAM"]["utilization"], 0.81);

    let sections = value["sections"].as_array().unwrap();
    assert_eq!(sections.len(), 4);
    assert_eq!(sections[0]["name"], ".text");
    assert_eq!(sections[0]["region"], "FLASH");
    assert_eq!(sections[0]["type"], "PROGBITS");

    let symbols = value["symbols"].as_array().unwrap();
    let main = symbols.iter().find(|s| s["name"] == "main").unwrap();
    assert_eq!(main["type"], "FUNC");
    assert_eq!(main["binding"], "GLOBAL");
    assert_eq!(main["address"], "0x8000100");
    assert_eq!(main["source_file"], serde_json::Value::Null);

    assert_eq!(value["meta"]["analyzed_at"], "2024-06-01T12:00:00Z");
    assert_eq!(value["meta"]["file_type"], "EXEC");
    assert_eq!(value["meta"]["entry_point"], "0x8000100");
    assert_eq!(value["meta"]["elf_sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn repeated_analysis_is_byte_identical() {
    let fx = fixture(&[("stm32.ld", STM32_MEMORY)]);
    let opts = AnalyzeOptions::default();
    let a = analyze(&fx.elf, &fx.scripts, &opts).expect("analyze");
    let b = analyze(&fx.elf, &fx.scripts, &opts).expect("analyze");
    assert_eq!(
        membrowse::report::to_json(&a, "2024-06-01T12:00:00Z"),
        membrowse::report::to_json(&b, "2024-06-01T12:00:00Z"),
    );
}

#[test]
fn no_scripts_synthesizes_code_and_data_regions() {
    let fx = fixture(&[]);
    let report = analyze(&fx.elf, &[], &AnalyzeOptions::default()).expect("analyze");

    let code = &report.regions["Code"];
    assert!(code.auto);
    assert_eq!(code.origin, 0x0800_0100);
    assert_eq!(code.length, 300);

    let data = &report.regions["Data"];
    assert!(data.auto);
    assert_eq!(data.origin, 0x2000_0000);
    assert_eq!(data.length, 0x420);

    // .rodata is neither executable nor writable, so it lands in the
    // synthetic unmapped bucket.
    let rodata = report.sections.iter().find(|s| s.name == ".rodata").unwrap();
    assert_eq!(rodata.region, None);
    assert!(report.rollups["__unmapped__"]
        .sections
        .contains(&".rodata".to_string()));

    // No DWARF: every symbol stays unattributed.
    assert!(report.symbols.iter().all(|s| s.source_file.is_none()));
}

#[test]
fn missing_flash_size_fails_without_override() {
    let script = "MEMORY { FLASH (rx) : ORIGIN = 0x08000000, LENGTH = __flash_size__ }";
    let fx = fixture(&[("param.ld", script)]);

    let err = analyze(&fx.elf, &fx.scripts, &AnalyzeOptions::default()).unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("__flash_size__"), "{err}");

    let mut var_overrides = BTreeMap::new();
    var_overrides.insert("__flash_size__".to_string(), "4096K".to_string());
    let opts = AnalyzeOptions { var_overrides, ..Default::default() };
    let report = analyze(&fx.elf, &fx.scripts, &opts).expect("analyze");
    assert_eq!(report.regions["FLASH"].length, 4_194_304);
}

#[test]
fn bad_override_value_is_an_argument_error() {
    let fx = fixture(&[("stm32.ld", STM32_MEMORY)]);
    let mut var_overrides = BTreeMap::new();
    var_overrides.insert("X".to_string(), "garbage(".to_string());
    let opts = AnalyzeOptions { var_overrides, ..Default::default() };
    let err = analyze(&fx.elf, &fx.scripts, &opts).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn cancelled_before_start_reports_cancellation() {
    let fx = fixture(&[("stm32.ld", STM32_MEMORY)]);
    let opts = AnalyzeOptions::default();
    opts.cancel.cancel();
    let err = analyze(&fx.elf, &fx.scripts, &opts).unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled));
    assert_eq!(err.exit_code(), 130);
}

#[test]
fn not_an_elf_is_a_format_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("not.elf");
    fs::write(&path, b"MZ\x90\x00 definitely not elf").expect("write");
    let err = analyze(&path, &[], &AnalyzeOptions::default()).unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn missing_linker_script_is_a_script_error() {
    let fx = fixture(&[]);
    let missing = vec![PathBuf::from("/definitely/not/here.ld")];
    let err = analyze(&fx.elf, &missing, &AnalyzeOptions::default()).unwrap_err();
    assert_eq!(err.exit_code(), 4);
}
