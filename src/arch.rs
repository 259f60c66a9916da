//! Architecture detection from the ELF header.
//!
//! The detected architecture selects a table of default linker variables that
//! vendor scripts commonly leave to the build system (partition offsets, QEMU
//! memory geometry, and so on). The defaults sit between script assignments
//! and CLI overrides in the evaluator's lookup chain.

use std::collections::BTreeMap;

use object::{Object, ObjectKind};

use crate::model::{Architecture, FileType};

/// Classifies the target architecture of a parsed object file.
pub fn detect(file: &object::File) -> Architecture {
    match file.architecture() {
        object::Architecture::Arm | object::Architecture::Aarch64 => Architecture::Arm,
        object::Architecture::Xtensa => Architecture::Xtensa,
        object::Architecture::Riscv32 | object::Architecture::Riscv64 => Architecture::Riscv,
        object::Architecture::I386 => Architecture::X86,
        object::Architecture::X86_64 => Architecture::X86_64,
        _ => Architecture::Other,
    }
}

/// Maps the ELF file kind to the reported file type.
pub fn file_type(file: &object::File) -> FileType {
    match file.kind() {
        ObjectKind::Executable => FileType::Exec,
        ObjectKind::Dynamic => FileType::Dyn,
        ObjectKind::Relocatable => FileType::Rel,
        ObjectKind::Core => FileType::Core,
        _ => FileType::Other,
    }
}

/// Default linker variable bindings for the architecture.
///
/// These are consulted only when a symbol is not defined by the scripts
/// themselves; they keep common vendor scripts evaluable without a full build
/// environment.
pub fn default_variables(arch: Architecture) -> BTreeMap<String, i64> {
    let mut vars = BTreeMap::new();
    match arch {
        Architecture::Arm => {
            // STM32-style flash/RAM geometry, the fallback for ARM embedded.
            vars.insert("_flash_size".to_string(), 0x10_0000);
            vars.insert("_ram_size".to_string(), 0x2_0000);
        }
        Architecture::Xtensa => {
            // ESP-IDF scripts reference sdkconfig-provided values.
            vars.insert("CONFIG_ESP32_SPIRAM_SIZE".to_string(), 0);
            vars.insert("CONFIG_PARTITION_TABLE_OFFSET".to_string(), 0x8000);
        }
        Architecture::Riscv => {
            // QEMU virt machine geometry, used by the MicroPython qemu port.
            vars.insert("ROM_BASE".to_string(), 0x8000_0000);
            vars.insert("ROM_SIZE".to_string(), 4 * 1024 * 1024);
            vars.insert("RAM_BASE".to_string(), 0x8040_0000);
            vars.insert("RAM_SIZE".to_string(), 2 * 1024 * 1024);
        }
        _ => (),
    }
    vars
}
