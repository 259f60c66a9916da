//! Shared test fixture: a hand-assembled ARM ELF32 firmware image.
//!
//! Mirrors a minimal STM32-style layout: `.text` and `.rodata` in flash,
//! `.data` and `.bss` in RAM, and a small symbol table. It carries no DWARF,
//! so source attribution stays `null` throughout.

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_NOBITS: u32 = 8;
const SHF_WRITE: u32 = 0x1;
const SHF_ALLOC: u32 = 0x2;
const SHF_EXECINSTR: u32 = 0x4;

struct Shdr {
    name: u32,
    sh_type: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    align: u32,
    entsize: u32,
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn add_name(tab: &mut Vec<u8>, name: &str) -> u32 {
    let off = tab.len() as u32;
    tab.extend_from_slice(name.as_bytes());
    tab.push(0);
    off
}

fn push_sym(out: &mut Vec<u8>, name: u32, value: u32, size: u32, info: u8, shndx: u16) {
    push_u32(out, name);
    push_u32(out, value);
    push_u32(out, size);
    out.push(info);
    out.push(0);
    push_u16(out, shndx);
}

/// Assembles a little-endian ARM ELF32 executable:
///
/// | section  | address    | size | flags       |
/// |----------|------------|------|-------------|
/// | .text    | 0x08000100 |  300 | ALLOC+EXEC  |
/// | .rodata  | 0x08010000 |   64 | ALLOC       |
/// | .data    | 0x20000000 |   32 | ALLOC+WRITE |
/// | .bss     | 0x20000020 | 1024 | ALLOC+WRITE |
///
/// Symbols: `main` (FUNC GLOBAL, 120 B in .text), `uart_buf` (OBJECT
/// GLOBAL, 512 B in .bss), `lookup_table` (OBJECT LOCAL, 64 B in .rodata).
pub fn build_firmware_elf() -> Vec<u8> {
    let mut shstr = vec![0u8];
    let n_text = add_name(&mut shstr, ".text");
    let n_rodata = add_name(&mut shstr, ".rodata");
    let n_data = add_name(&mut shstr, ".data");
    let n_bss = add_name(&mut shstr, ".bss");
    let n_symtab = add_name(&mut shstr, ".symtab");
    let n_strtab = add_name(&mut shstr, ".strtab");
    let n_shstrtab = add_name(&mut shstr, ".shstrtab");

    let mut strtab = vec![0u8];
    let s_lookup = add_name(&mut strtab, "lookup_table");
    let s_main = add_name(&mut strtab, "main");
    let s_uart = add_name(&mut strtab, "uart_buf");

    let mut symtab = Vec::new();
    push_sym(&mut symtab, 0, 0, 0, 0, 0);
    // Locals first; sh_info is the index of the first global.
    push_sym(&mut symtab, s_lookup, 0x0801_0000, 64, 0x01, 2); // LOCAL OBJECT
    push_sym(&mut symtab, s_main, 0x0800_0100, 120, 0x12, 1); // GLOBAL FUNC
    push_sym(&mut symtab, s_uart, 0x2000_0020, 512, 0x11, 4); // GLOBAL OBJECT

    let mut image = vec![0u8; 52];
    let mut shdrs = vec![Shdr {
        name: 0,
        sh_type: 0,
        flags: 0,
        addr: 0,
        offset: 0,
        size: 0,
        link: 0,
        info: 0,
        align: 0,
        entsize: 0,
    }];

    let mut blob = |image: &mut Vec<u8>, data: &[u8]| -> (u32, u32) {
        let offset = image.len() as u32;
        image.extend_from_slice(data);
        while image.len() % 4 != 0 {
            image.push(0);
        }
        (offset, data.len() as u32)
    };

    let (text_off, text_len) = blob(&mut image, &[0u8; 300]);
    shdrs.push(Shdr {
        name: n_text,
        sh_type: SHT_PROGBITS,
        flags: SHF_ALLOC | SHF_EXECINSTR,
        addr: 0x0800_0100,
        offset: text_off,
        size: text_len,
        link: 0,
        info: 0,
        align: 4,
        entsize: 0,
    });

    let (rodata_off, rodata_len) = blob(&mut image, &[0xAAu8; 64]);
    shdrs.push(Shdr {
        name: n_rodata,
        sh_type: SHT_PROGBITS,
        flags: SHF_ALLOC,
        addr: 0x0801_0000,
        offset: rodata_off,
        size: rodata_len,
        link: 0,
        info: 0,
        align: 4,
        entsize: 0,
    });

    let (data_off, data_len) = blob(&mut image, &[0x55u8; 32]);
    shdrs.push(Shdr {
        name: n_data,
        sh_type: SHT_PROGBITS,
        flags: SHF_ALLOC | SHF_WRITE,
        addr: 0x2000_0000,
        offset: data_off,
        size: data_len,
        link: 0,
        info: 0,
        align: 4,
        entsize: 0,
    });

    // NOBITS occupies no file bytes.
    shdrs.push(Shdr {
        name: n_bss,
        sh_type: SHT_NOBITS,
        flags: SHF_ALLOC | SHF_WRITE,
        addr: 0x2000_0020,
        offset: image.len() as u32,
        size: 1024,
        link: 0,
        info: 0,
        align: 4,
        entsize: 0,
    });

    let (symtab_off, symtab_len) = blob(&mut image, &symtab);
    shdrs.push(Shdr {
        name: n_symtab,
        sh_type: SHT_SYMTAB,
        flags: 0,
        addr: 0,
        offset: symtab_off,
        size: symtab_len,
        link: 6,
        info: 2,
        align: 4,
        entsize: 16,
    });

    let (strtab_off, strtab_len) = blob(&mut image, &strtab);
    shdrs.push(Shdr {
        name: n_strtab,
        sh_type: SHT_STRTAB,
        flags: 0,
        addr: 0,
        offset: strtab_off,
        size: strtab_len,
        link: 0,
        info: 0,
        align: 1,
        entsize: 0,
    });

    let (shstr_off, shstr_len) = blob(&mut image, &shstr);
    shdrs.push(Shdr {
        name: n_shstrtab,
        sh_type: SHT_STRTAB,
        flags: 0,
        addr: 0,
        offset: shstr_off,
        size: shstr_len,
        link: 0,
        info: 0,
        align: 1,
        entsize: 0,
    });

    let e_shoff = image.len() as u32;
    for s in &shdrs {
        push_u32(&mut image, s.name);
        push_u32(&mut image, s.sh_type);
        push_u32(&mut image, s.flags);
        push_u32(&mut image, s.addr);
        push_u32(&mut image, s.offset);
        push_u32(&mut image, s.size);
        push_u32(&mut image, s.link);
        push_u32(&mut image, s.info);
        push_u32(&mut image, s.align);
        push_u32(&mut image, s.entsize);
    }

    // ELF header.
    let ident = [0x7f, b'E', b'L', b'F', 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    image[..16].copy_from_slice(&ident);
    let mut ehdr = Vec::new();
    push_u16(&mut ehdr, 2); // ET_EXEC
    push_u16(&mut ehdr, 40); // EM_ARM
    push_u32(&mut ehdr, 1);
    push_u32(&mut ehdr, 0x0800_0100); // e_entry
    push_u32(&mut ehdr, 0); // e_phoff
    push_u32(&mut ehdr, e_shoff);
    push_u32(&mut ehdr, 0x0500_0000); // e_flags: EABI v5
    push_u16(&mut ehdr, 52);
    push_u16(&mut ehdr, 32);
    push_u16(&mut ehdr, 0);
    push_u16(&mut ehdr, 40);
    push_u16(&mut ehdr, shdrs.len() as u16);
    push_u16(&mut ehdr, (shdrs.len() - 1) as u16); // .shstrtab is last
    image[16..52].copy_from_slice(&ehdr);

    image
}

