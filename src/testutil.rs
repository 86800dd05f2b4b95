//! Builders for synthetic Mach-O and fat images used by the unit tests.

use crate::macho::constants::*;
use crate::util::{to_fixed_name, ByteOrder};

fn words(order: ByteOrder, values: &[u32]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 4];
    for (i, &value) in values.iter().enumerate() {
        order.write_u32_at(&mut out, i * 4, value);
    }
    out
}

/// A command of type `cmd` and length `size` with a zeroed body.
pub fn prefix_command(order: ByteOrder, cmd: u32, size: u32) -> Vec<u8> {
    let mut out = words(order, &[cmd, size]);
    out.resize(size.max(8) as usize, 0);
    out
}

/// A 68-byte section record without relocations.
pub fn section_record(
    order: ByteOrder,
    sectname: &str,
    segname: &str,
    addr: u32,
    size: u32,
    offset: u32,
    flags: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(SECTION_SIZE);
    out.extend_from_slice(&to_fixed_name(sectname));
    out.extend_from_slice(&to_fixed_name(segname));
    out.extend(words(order, &[addr, size, offset, 0, 0, 0, flags, 0, 0]));
    out
}

/// An LC_SEGMENT command with read/write/execute protections.
pub fn segment_command(
    order: ByteOrder,
    name: &str,
    vmaddr: u32,
    vmsize: u32,
    fileoff: u32,
    filesize: u32,
    sections: &[Vec<u8>],
) -> Vec<u8> {
    let size = (SEGMENT_COMMAND_SIZE + sections.len() * SECTION_SIZE) as u32;
    let mut out = words(order, &[LC_SEGMENT, size]);
    out.extend_from_slice(&to_fixed_name(name));
    out.extend(words(
        order,
        &[vmaddr, vmsize, fileoff, filesize, 7, 7, sections.len() as u32, 0],
    ));
    for section in sections {
        out.extend_from_slice(section);
    }
    out
}

/// An LC_SYMTAB command.
pub fn symtab_command(order: ByteOrder, symoff: u32, nsyms: u32, stroff: u32, strsize: u32) -> Vec<u8> {
    words(order, &[LC_SYMTAB, SYMTAB_COMMAND_SIZE as u32, symoff, nsyms, stroff, strsize])
}

/// An LC_DYSYMTAB command with the given eighteen fields.
pub fn dysymtab_command(order: ByteOrder, fields: &[u32; 18]) -> Vec<u8> {
    let mut out = words(order, &[LC_DYSYMTAB, DYSYMTAB_COMMAND_SIZE as u32]);
    out.extend(words(order, fields));
    out
}

/// A thread command holding `(flavor, state)` pairs. State lengths must be
/// multiples of four.
pub fn thread_command(order: ByteOrder, cmd: u32, flavors: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let size: usize = 8 + flavors.iter().map(|(_, state)| 8 + state.len()).sum::<usize>();
    let mut out = words(order, &[cmd, size as u32]);
    for (flavor, state) in flavors {
        out.extend(words(order, &[*flavor, (state.len() / 4) as u32]));
        out.extend_from_slice(state);
    }
    out
}

/// Appends `name` plus a terminator, padded to a multiple of four.
fn push_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// A dylib command with its name stored right after the fixed fields.
pub fn dylib_command(
    order: ByteOrder,
    cmd: u32,
    name: &str,
    timestamp: u32,
    current_version: u32,
    compatibility_version: u32,
) -> Vec<u8> {
    let mut out = words(
        order,
        &[cmd, 0, 24, timestamp, current_version, compatibility_version],
    );
    push_name(&mut out, name);
    let size = out.len() as u32;
    order.write_u32_at(&mut out, 4, size);
    out
}

/// A dylinker command with its name stored right after the fixed field.
pub fn dylinker_command(order: ByteOrder, cmd: u32, name: &str) -> Vec<u8> {
    let mut out = words(order, &[cmd, 0, 12]);
    push_name(&mut out, name);
    let size = out.len() as u32;
    order.write_u32_at(&mut out, 4, size);
    out
}

/// A 12-byte symbol record.
pub fn nlist(order: ByteOrder, strx: u32, n_type: u8, n_sect: u8, n_desc: u16, value: u32) -> [u8; NLIST_SIZE] {
    let mut raw = [0u8; NLIST_SIZE];
    order.write_u32_at(&mut raw, 0, strx);
    raw[4] = n_type;
    raw[5] = n_sect;
    order.write_u16(&mut raw[6..], n_desc);
    order.write_u32_at(&mut raw, 8, value);
    raw
}

// =============================================================================
// Whole Files
// =============================================================================

/// Assembles a header and a command table.
pub struct MachOBuilder {
    order: ByteOrder,
    cputype: u32,
    filetype: u32,
    commands: Vec<Vec<u8>>,
}

impl MachOBuilder {
    /// An i386 object file with no commands.
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            cputype: CPU_TYPE_I386,
            filetype: MH_OBJECT,
            commands: Vec::new(),
        }
    }

    pub fn cputype(mut self, cputype: u32) -> Self {
        self.cputype = cputype;
        self
    }

    pub fn filetype(mut self, filetype: u32) -> Self {
        self.filetype = filetype;
        self
    }

    pub fn commands(mut self, commands: Vec<Vec<u8>>) -> Self {
        self.commands = commands;
        self
    }

    /// Returns the header followed by the commands.
    pub fn build(self) -> Vec<u8> {
        let sizeofcmds: usize = self.commands.iter().map(Vec::len).sum();
        let mut out = words(
            self.order,
            &[
                MH_MAGIC,
                self.cputype,
                3,
                self.filetype,
                self.commands.len() as u32,
                sizeofcmds as u32,
                0,
            ],
        );
        for command in self.commands {
            out.extend(command);
        }
        out
    }
}

pub const SAMPLE_TEXT: &[u8] = &[0x55, 0x89, 0xE5, 0x83, 0xEC, 0x08, 0xC9, 0xC3];
pub const SAMPLE_DYLIB: &str = "/usr/lib/libSystem.B.dylib";
pub const SAMPLE_ENTRY: u32 = 0x1F04;

/// An i386 object exercising every decoded command kind.
///
/// Commands: an unnamed segment with `__TEXT.__text` (one relocation) and
/// `__DATA.__data`, LC_SYMTAB (`_main`, `_counter`, `_printf`), LC_DYSYMTAB
/// (two indirect entries, the second stripped), LC_UNIXTHREAD and
/// LC_LOAD_DYLIB. Every byte after the commands is described by one of them.
pub fn sample_object(order: ByteOrder) -> Vec<u8> {
    let strings: &[u8] = b"\0_main\0_counter\0_printf\0";
    let data: &[u8] = &[0x2A, 0, 0, 0, 0, 0, 0, 0];

    let dylib = dylib_command(order, LC_LOAD_DYLIB, SAMPLE_DYLIB, 2, 0x0058_0100, 0x0001_0000);
    let sizeofcmds = SEGMENT_COMMAND_SIZE + 2 * SECTION_SIZE + SYMTAB_COMMAND_SIZE + DYSYMTAB_COMMAND_SIZE + 80 + dylib.len();

    let text_off = (HEADER_SIZE + sizeofcmds) as u32;
    let data_off = text_off + SAMPLE_TEXT.len() as u32;
    let reloc_off = data_off + data.len() as u32;
    let sym_off = reloc_off + 8;
    let indirect_off = sym_off + 3 * NLIST_SIZE as u32;
    let str_off = indirect_off + 8;

    let mut text = section_record(
        order,
        "__text",
        "__TEXT",
        0,
        SAMPLE_TEXT.len() as u32,
        text_off,
        S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS,
    );
    order.write_u32_at(&mut text, 48, reloc_off);
    order.write_u32_at(&mut text, 52, 1);
    let data_sect = section_record(order, "__data", "__DATA", 8, data.len() as u32, data_off, S_REGULAR);
    let segment = segment_command(order, "", 0, 16, text_off, 16, &[text, data_sect]);

    let mut dysym = [0u32; 18];
    dysym[3] = 2; // nextdefsym
    dysym[4] = 2; // iundefsym
    dysym[5] = 1; // nundefsym
    dysym[12] = indirect_off;
    dysym[13] = 2;

    let mut state = vec![0u8; 64];
    order.write_u32_at(&mut state, 40, SAMPLE_ENTRY);

    let mut out = MachOBuilder::new(order)
        .commands(vec![
            segment,
            symtab_command(order, sym_off, 3, str_off, strings.len() as u32),
            dysymtab_command(order, &dysym),
            thread_command(order, LC_UNIXTHREAD, &[(I386_THREAD_STATE, state)]),
            dylib,
        ])
        .build();
    assert_eq!(out.len(), text_off as usize);

    out.extend_from_slice(SAMPLE_TEXT);
    out.extend_from_slice(data);
    out.extend(words(order, &[4, 0x0D00_0002]));
    out.extend_from_slice(&nlist(order, 1, N_SECT | N_EXT, 1, 0, 4));
    out.extend_from_slice(&nlist(order, 7, N_SECT | N_EXT, 2, 0, 8));
    out.extend_from_slice(&nlist(order, 16, N_UNDF | N_EXT, NO_SECT, 0x0100, 0));
    out.extend(words(order, &[2, INDIRECT_SYMBOL_LOCAL]));
    out.extend_from_slice(strings);
    out
}

/// A fat archive wrapping `members` as `(cputype, image)` pairs, each aligned
/// to 16 bytes.
pub fn fat_archive(members: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let order = ByteOrder::Big;
    let mut out = words(order, &[FAT_MAGIC, members.len() as u32]);

    let align = 4u32;
    let mut offset = (FAT_HEADER_SIZE + members.len() * FAT_ARCH_SIZE) as u32;
    let mut placed = Vec::new();
    for (cputype, image) in members {
        offset = (offset + (1 << align) - 1) & !((1 << align) - 1);
        out.extend(words(order, &[*cputype, 3, offset, image.len() as u32, align]));
        placed.push(offset);
        offset += image.len() as u32;
    }
    for ((_, image), offset) in members.iter().zip(placed) {
        out.resize(offset as usize, 0);
        out.extend_from_slice(image);
    }
    out
}
