//! LC_SYMTAB: the symbol table and its string table.
//!
//! The command itself is decoded eagerly, but the symbol records and the
//! string table are only read when a consumer asks for them. Materializing is
//! all-or-nothing: either every symbol decodes and the array becomes visible,
//! or nothing is stored.
//!
//! Section numbers in symbol records are untrusted. They are resolved against
//! the file's flattened section list and an out-of-range number downgrades the
//! symbol to undefined instead of failing the whole table.

use std::borrow::Cow;
use std::fmt;

use bitflags::bitflags;
use tracing::warn;

use super::constants::*;
use crate::error::{Error, Result};
use crate::source::{check_range, ByteSource};
use crate::util::{memchr_null, ByteOrder};

// =============================================================================
// Flattened Sections
// =============================================================================

/// One entry of the cross-segment section list that symbol section numbers
/// index into (1-based in the file, 0-based here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatSection {
    /// Index of the owning segment among the file's segments
    pub segment: usize,
    /// Index of the section within its segment
    pub section: usize,
    /// Section address, the base of section-relative symbol values
    pub addr: u32,
}

// =============================================================================
// Symbols
// =============================================================================

/// Storage class of a decoded symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    /// Undefined, or defined somewhere this codec could not resolve
    Undefined,
    /// Absolute value, not relative to any section
    Absolute,
    /// Defined in a section; `index` is 0-based into the flattened section list
    Section {
        /// Flattened section index
        index: usize,
    },
    /// Undefined but prebound to an address
    PreboundUndefined,
    /// Symbolic debugging (stab) entry
    Debugging,
}

bitflags! {
    /// Generic symbol flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u32 {
        /// Visible outside the object (`N_EXT`)
        const GLOBAL = 0x1;
        /// Visible only within the linked image (`N_PEXT`)
        const PRIVATE_EXTERN = 0x2;
        /// Local to the object
        const LOCAL = 0x4;
        /// Debugging entry (`N_STAB`)
        const DEBUGGING = 0x8;
    }
}

/// Location of a symbol name inside the string table.
///
/// Validated once when the symbol is decoded; `strx + len <= strsize` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolName {
    /// Byte offset into the string table
    pub strx: u32,
    /// Name length, excluding the terminator
    pub len: u32,
}

/// A decoded `nlist` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Name location in the string table
    pub name: SymbolName,
    /// Value; relative to the section address for section symbols
    pub value: u32,
    /// Storage classification
    pub class: SymbolClass,
    /// Generic flags
    pub flags: SymbolFlags,
    /// Raw `n_type` byte, kept for lossless encoding
    pub n_type: u8,
    /// Raw `n_sect` byte, kept for lossless encoding
    pub n_sect: u8,
    /// Raw `n_desc` word, kept for lossless encoding
    pub n_desc: u16,
}

impl Symbol {
    /// Size of a symbol record.
    pub const SIZE: usize = NLIST_SIZE;

    /// Returns true if this is a debugging entry.
    #[inline]
    pub fn is_stab(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    /// Returns true if this is an external symbol.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.n_type & N_EXT != 0
    }

    /// Returns true if the raw type is `N_INDR`.
    #[inline]
    pub fn is_indirect(&self) -> bool {
        !self.is_stab() && self.n_type & N_TYPE == N_INDR
    }

    /// Returns the flattened section index for section symbols.
    pub fn section_index(&self) -> Option<usize> {
        match self.class {
            SymbolClass::Section { index } => Some(index),
            _ => None,
        }
    }
}

/// Resolves a 1-based section number against `count` flattened sections.
///
/// `NO_SECT` is not an error and yields `None`.
fn section_reference(index: u32, n_sect: u8, count: usize) -> Result<Option<usize>> {
    match n_sect {
        NO_SECT => Ok(None),
        n if (n as usize) <= count => Ok(Some(n as usize - 1)),
        n => Err(Error::InvalidSectionReference {
            index,
            section: n,
            count,
        }),
    }
}

/// Classifies a raw symbol against the flattened section list.
///
/// Never fails: invalid section numbers and unsupported types are reported
/// and classified as undefined.
pub fn classify(
    index: u32,
    n_type: u8,
    n_sect: u8,
    sections: &[FlatSection],
) -> (SymbolClass, SymbolFlags) {
    if n_type & N_STAB != 0 {
        return (SymbolClass::Debugging, SymbolFlags::DEBUGGING);
    }

    let mut flags = SymbolFlags::empty();
    if n_type & N_PEXT != 0 {
        flags |= SymbolFlags::PRIVATE_EXTERN;
    }
    if n_type & N_EXT != 0 {
        flags |= SymbolFlags::GLOBAL;
    } else {
        flags |= SymbolFlags::LOCAL;
    }

    let class = match n_type & N_TYPE {
        N_UNDF => SymbolClass::Undefined,
        N_PBUD => SymbolClass::PreboundUndefined,
        N_ABS => SymbolClass::Absolute,
        N_SECT => match section_reference(index, n_sect, sections.len()) {
            Ok(Some(index)) => SymbolClass::Section { index },
            Ok(None) => SymbolClass::Undefined,
            Err(err) => {
                warn!("{}; treating as undefined", err);
                SymbolClass::Undefined
            }
        },
        N_INDR => {
            warn!("symbol {} is an unsupported indirect symbol; treating as undefined", index);
            SymbolClass::Undefined
        }
        other => {
            warn!("symbol {} has unknown type {:#x}; treating as undefined", index, other);
            SymbolClass::Undefined
        }
    };

    (class, flags)
}

// =============================================================================
// String Table
// =============================================================================

/// The string table, borrowed from a memory-resident source or read into an
/// owned buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringTable {
    /// `[offset, offset + size)` of the session's memory-resident source
    Borrowed {
        /// File offset of the table
        offset: u64,
        /// Size in bytes
        size: u32,
    },
    /// Bytes read from a non-resident source
    Owned(Vec<u8>),
}

impl StringTable {
    /// Returns the table's bytes.
    pub fn bytes<'a, S: ByteSource + ?Sized>(&'a self, source: &'a S) -> Result<&'a [u8]> {
        match self {
            StringTable::Owned(bytes) => Ok(bytes),
            StringTable::Borrowed { offset, size } => {
                let start = *offset as usize;
                source
                    .as_bytes()
                    .and_then(|bytes| bytes.get(start..start + *size as usize))
                    .ok_or(Error::truncated("string table", *offset, *size as u64))
            }
        }
    }

    /// Returns the name stored at `name`.
    pub fn name<'a, S: ByteSource + ?Sized>(
        &'a self,
        source: &'a S,
        name: SymbolName,
    ) -> Result<Cow<'a, str>> {
        let bytes = self.bytes(source)?;
        let start = name.strx as usize;
        bytes
            .get(start..start + name.len as usize)
            .map(String::from_utf8_lossy)
            .ok_or(Error::truncated("symbol name", name.strx as u64, name.len as u64))
    }
}

// =============================================================================
// Symtab Command
// =============================================================================

/// A decoded LC_SYMTAB command plus its lazily decoded contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symtab {
    /// File offset of the symbol records
    pub symoff: u32,
    /// Number of symbol records
    pub nsyms: u32,
    /// File offset of the string table
    pub stroff: u32,
    /// String table size in bytes
    pub strsize: u32,
    symbols: Option<Vec<Symbol>>,
    strtab: Option<StringTable>,
}

impl Symtab {
    /// Size of this command.
    pub const SIZE: usize = SYMTAB_COMMAND_SIZE;

    /// Creates an unmaterialized symtab.
    pub fn new(symoff: u32, nsyms: u32, stroff: u32, strsize: u32) -> Self {
        Self {
            symoff,
            nsyms,
            stroff,
            strsize,
            symbols: None,
            strtab: None,
        }
    }

    /// Decodes the command. `data` holds the whole command, prefix included.
    pub fn parse(data: &[u8], offset: u64, order: ByteOrder) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "symtab command shorter than 24 bytes",
            });
        }
        Ok(Self::new(
            order.read_u32_at(data, 8),
            order.read_u32_at(data, 12),
            order.read_u32_at(data, 16),
            order.read_u32_at(data, 20),
        ))
    }

    /// Encodes the command body (everything after the 8-byte prefix).
    pub fn encode_body(&self, order: ByteOrder) -> Vec<u8> {
        let mut raw = vec![0u8; Self::SIZE - 8];
        order.write_u32_at(&mut raw, 0, self.symoff);
        order.write_u32_at(&mut raw, 4, self.nsyms);
        order.write_u32_at(&mut raw, 8, self.stroff);
        order.write_u32_at(&mut raw, 12, self.strsize);
        raw
    }

    /// Decoded symbols, if materialized.
    pub fn symbols(&self) -> Option<&[Symbol]> {
        self.symbols.as_deref()
    }

    /// Loaded string table, if any.
    pub fn string_table(&self) -> Option<&StringTable> {
        self.strtab.as_ref()
    }

    /// Returns true once the symbol array has been decoded.
    pub fn is_materialized(&self) -> bool {
        self.symbols.is_some()
    }

    /// File range of the symbol records.
    pub fn symbol_range(&self) -> (u64, u64) {
        (self.symoff as u64, self.nsyms as u64 * NLIST_SIZE as u64)
    }

    /// File range of the string table.
    pub fn string_range(&self) -> (u64, u64) {
        (self.stroff as u64, self.strsize as u64)
    }

    /// Reads the string table without storing it.
    pub fn read_string_table<S: ByteSource + ?Sized>(&self, source: &S) -> Result<StringTable> {
        let (offset, size) = self.string_range();
        check_range("string table", offset, size, source.len())?;
        if source.as_bytes().is_some() {
            Ok(StringTable::Borrowed {
                offset,
                size: self.strsize,
            })
        } else {
            let mut bytes = vec![0u8; size as usize];
            source.read_at(offset, &mut bytes)?;
            Ok(StringTable::Owned(bytes))
        }
    }

    /// Loads the string table if it has not been loaded yet.
    pub fn load_string_table<S: ByteSource + ?Sized>(&mut self, source: &S) -> Result<()> {
        if self.strtab.is_none() {
            self.strtab = Some(self.read_string_table(source)?);
        }
        Ok(())
    }

    /// Decodes the symbol at `index` using an already loaded string table.
    pub fn read_symbol<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        strtab: &StringTable,
        order: ByteOrder,
        index: u32,
        sections: &[FlatSection],
    ) -> Result<Symbol> {
        if index >= self.nsyms {
            return Err(Error::SymbolIndexOutOfBounds {
                index,
                count: self.nsyms,
            });
        }

        let offset = self.symoff as u64 + index as u64 * NLIST_SIZE as u64;
        let mut raw = [0u8; NLIST_SIZE];
        source.read_at(offset, &mut raw)?;

        let strx = order.read_u32_at(&raw, 0);
        let n_type = raw[4];
        let n_sect = raw[5];
        let n_desc = order.read_u16(&raw[6..]);
        let n_value = order.read_u32_at(&raw, 8);

        if strx >= self.strsize {
            return Err(Error::MalformedSymbolName {
                index,
                strx,
                strsize: self.strsize,
            });
        }
        let strings = strtab.bytes(source)?;
        let len = memchr_null(&strings[strx as usize..]) as u32;

        let (class, flags) = classify(index, n_type, n_sect, sections);
        let value = match class {
            SymbolClass::Section { index } => n_value.wrapping_sub(sections[index].addr),
            _ => n_value,
        };

        Ok(Symbol {
            name: SymbolName { strx, len },
            value,
            class,
            flags,
            n_type,
            n_sect,
            n_desc,
        })
    }

    /// Decodes every symbol into a new array without storing it.
    pub fn read_symbols<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        strtab: &StringTable,
        order: ByteOrder,
        sections: &[FlatSection],
    ) -> Result<Vec<Symbol>> {
        check_range(
            "symbol table",
            self.symoff as u64,
            self.nsyms as u64 * NLIST_SIZE as u64,
            source.len(),
        )?;
        (0..self.nsyms)
            .map(|i| self.read_symbol(source, strtab, order, i, sections))
            .collect()
    }

    /// Decodes the string table and every symbol, storing them on success.
    ///
    /// On failure nothing is stored, so no partially populated array is ever
    /// visible.
    pub fn materialize<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        order: ByteOrder,
        sections: &[FlatSection],
    ) -> Result<()> {
        if self.symbols.is_some() {
            return Ok(());
        }

        let strtab = match self.strtab.take() {
            Some(strtab) => strtab,
            None => self.read_string_table(source)?,
        };
        let result = self.read_symbols(source, &strtab, order, sections);
        self.strtab = Some(strtab);
        self.symbols = Some(result?);
        Ok(())
    }

    /// Encodes one symbol record.
    ///
    /// The type, section and descriptor bytes come from the retained raw
    /// values; section-relative values are rebased onto their section address.
    pub fn encode_symbol(symbol: &Symbol, order: ByteOrder, sections: &[FlatSection]) -> [u8; NLIST_SIZE] {
        let base = symbol
            .section_index()
            .and_then(|i| sections.get(i))
            .map_or(0, |s| s.addr);

        let mut raw = [0u8; NLIST_SIZE];
        order.write_u32_at(&mut raw, 0, symbol.name.strx);
        raw[4] = symbol.n_type;
        raw[5] = symbol.n_sect;
        order.write_u16(&mut raw[6..], symbol.n_desc);
        order.write_u32_at(&mut raw, 8, base.wrapping_add(symbol.value));
        raw
    }
}

impl fmt::Display for SymbolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolClass::Undefined => f.write_str("undefined"),
            SymbolClass::Absolute => f.write_str("absolute"),
            SymbolClass::Section { index } => write!(f, "section {}", index + 1),
            SymbolClass::PreboundUndefined => f.write_str("prebound"),
            SymbolClass::Debugging => f.write_str("stab"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::nlist;

    fn sections() -> Vec<FlatSection> {
        vec![
            FlatSection {
                segment: 0,
                section: 0,
                addr: 0x1000,
            },
            FlatSection {
                segment: 0,
                section: 1,
                addr: 0x2000,
            },
        ]
    }

    /// A file image with `records` at offset 0 and `strings` right after them.
    fn image(order: ByteOrder, records: &[(u32, u8, u8, u16, u32)], strings: &[u8]) -> (Vec<u8>, Symtab) {
        let mut data = Vec::new();
        for &(strx, n_type, n_sect, n_desc, value) in records {
            data.extend_from_slice(&nlist(order, strx, n_type, n_sect, n_desc, value));
        }
        let stroff = data.len() as u32;
        data.extend_from_slice(strings);
        let symtab = Symtab::new(0, records.len() as u32, stroff, strings.len() as u32);
        (data, symtab)
    }

    #[test]
    fn test_classify_every_section_number() {
        let sections = sections();
        for n_sect in 0..=255u8 {
            let (class, _) = classify(0, N_SECT | N_EXT, n_sect, &sections);
            match n_sect {
                1 => assert_eq!(class, SymbolClass::Section { index: 0 }),
                2 => assert_eq!(class, SymbolClass::Section { index: 1 }),
                _ => assert_eq!(class, SymbolClass::Undefined),
            }
        }
    }

    #[test]
    fn test_section_reference_diagnostics() {
        assert!(matches!(section_reference(0, NO_SECT, 2), Ok(None)));
        assert!(matches!(section_reference(0, 1, 2), Ok(Some(0))));
        assert!(matches!(section_reference(0, 2, 2), Ok(Some(1))));
        assert!(matches!(
            section_reference(5, 3, 2),
            Err(Error::InvalidSectionReference { index: 5, section: 3, count: 2 })
        ));
        assert!(matches!(section_reference(0, 1, 0), Err(_)));
    }

    #[test]
    fn test_classify_types() {
        let sections = sections();
        assert_eq!(classify(0, N_UNDF | N_EXT, 0, &sections).0, SymbolClass::Undefined);
        assert_eq!(classify(0, N_ABS, 0, &sections).0, SymbolClass::Absolute);
        assert_eq!(classify(0, N_PBUD, 0, &sections).0, SymbolClass::PreboundUndefined);
        assert_eq!(classify(0, N_INDR, 0, &sections).0, SymbolClass::Undefined);
        assert_eq!(classify(0, 0x24, 1, &sections).0, SymbolClass::Debugging);

        let (_, flags) = classify(0, N_SECT | N_EXT | N_PEXT, 1, &sections);
        assert_eq!(flags, SymbolFlags::GLOBAL | SymbolFlags::PRIVATE_EXTERN);
        let (_, flags) = classify(0, N_SECT, 1, &sections);
        assert_eq!(flags, SymbolFlags::LOCAL);
    }

    #[test]
    fn test_materialize_and_names() {
        let (data, mut symtab) = image(
            ByteOrder::Little,
            &[
                (1, N_SECT | N_EXT, 2, 0, 0x2010),
                (7, N_UNDF | N_EXT, 0, 0x0100, 0),
            ],
            b"\0_main\0_puts\0",
        );

        symtab.materialize(&data, ByteOrder::Little, &sections()).unwrap();
        let symbols = symtab.symbols().unwrap();
        assert_eq!(symbols.len(), 2);

        let main = &symbols[0];
        assert_eq!(main.class, SymbolClass::Section { index: 1 });
        assert_eq!(main.value, 0x10);
        let strtab = symtab.string_table().unwrap();
        assert!(matches!(strtab, StringTable::Borrowed { .. }));
        assert_eq!(strtab.name(&data, main.name).unwrap(), "_main");

        let puts = &symbols[1];
        assert_eq!(puts.class, SymbolClass::Undefined);
        assert_eq!(puts.n_desc, 0x0100);
        assert_eq!(strtab.name(&data, puts.name).unwrap(), "_puts");
    }

    #[test]
    fn test_malformed_name_leaves_nothing_visible() {
        let (data, mut symtab) = image(
            ByteOrder::Big,
            &[(1, N_ABS, 0, 0, 0), (20, N_ABS, 0, 0, 0)],
            b"\0_ok\0\0\0\0\0\0",
        );

        let err = symtab.materialize(&data, ByteOrder::Big, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedSymbolName {
                index: 1,
                strx: 20,
                strsize: 10
            }
        ));
        assert!(symtab.symbols().is_none());
        assert!(!symtab.is_materialized());
    }

    #[test]
    fn test_string_table_bounds() {
        let (data, _) = image(ByteOrder::Big, &[(0, N_ABS, 0, 0, 0)], b"\0");
        let mut symtab = Symtab::new(0, 1, 100, 10);
        let err = symtab.materialize(&data, ByteOrder::Big, &[]).unwrap_err();
        assert!(matches!(err, Error::Truncated { what: "string table", .. }));
        assert!(symtab.symbols().is_none());
    }

    #[test]
    fn test_encode_symbol_is_lossless() {
        let sections = sections();
        let records = [
            (1, N_SECT | N_EXT, 1, 0x0008, 0x1004),
            (1, N_SECT, 200, 0xFFFF, 0x1234), // bad section number
            (1, 0x64, 3, 0, 0xDEAD),          // stab
        ];
        let (data, mut symtab) = image(ByteOrder::Big, &records, b"\0x\0");
        symtab.materialize(&data, ByteOrder::Big, &sections).unwrap();

        for (i, symbol) in symtab.symbols().unwrap().iter().enumerate() {
            let encoded = Symtab::encode_symbol(symbol, ByteOrder::Big, &sections);
            assert_eq!(&encoded[..], &data[i * NLIST_SIZE..(i + 1) * NLIST_SIZE]);
        }
    }

    #[test]
    fn test_owned_string_table_for_file_sources() {
        use crate::source::FileSource;

        let (data, mut symtab) = image(ByteOrder::Little, &[(1, N_ABS, 0, 0, 7)], b"\0abs\0");
        let path = std::env::temp_dir().join(format!("machox-symtab-{}.bin", std::process::id()));
        std::fs::write(&path, &data).unwrap();

        let source = FileSource::open(&path).unwrap();
        symtab.materialize(&source, ByteOrder::Little, &[]).unwrap();
        let strtab = symtab.string_table().unwrap();
        assert!(matches!(strtab, StringTable::Owned(_)));
        let symbol = &symtab.symbols().unwrap()[0];
        assert_eq!(strtab.name(&source, symbol.name).unwrap(), "abs");
        assert_eq!(symbol.value, 7);

        std::fs::remove_file(&path).ok();
    }
}
