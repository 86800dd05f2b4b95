//! LC_DYSYMTAB: symbol table partitioning and the indirect symbol table.

use super::constants::*;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::util::ByteOrder;

/// A decoded LC_DYSYMTAB command.
///
/// Fields are kept verbatim; nothing is cross-checked against the symbol
/// table's real size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dysymtab {
    /// Index of local symbols
    pub ilocalsym: u32,
    /// Number of local symbols
    pub nlocalsym: u32,
    /// Index of externally defined symbols
    pub iextdefsym: u32,
    /// Number of externally defined symbols
    pub nextdefsym: u32,
    /// Index of undefined symbols
    pub iundefsym: u32,
    /// Number of undefined symbols
    pub nundefsym: u32,
    /// File offset to table of contents
    pub tocoff: u32,
    /// Number of entries in table of contents
    pub ntoc: u32,
    /// File offset to module table
    pub modtaboff: u32,
    /// Number of module table entries
    pub nmodtab: u32,
    /// Offset to referenced symbol table
    pub extrefsymoff: u32,
    /// Number of referenced symbol table entries
    pub nextrefsyms: u32,
    /// File offset to the indirect symbol table
    pub indirectsymoff: u32,
    /// Number of indirect symbol table entries
    pub nindirectsyms: u32,
    /// Offset to external relocation entries
    pub extreloff: u32,
    /// Number of external relocation entries
    pub nextrel: u32,
    /// Offset to local relocation entries
    pub locreloff: u32,
    /// Number of local relocation entries
    pub nlocrel: u32,
}

/// One entry of the indirect symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectEntry {
    /// Index into the symbol table
    Symbol(u32),
    /// A local symbol that was stripped
    Local,
    /// An absolute symbol that was stripped
    Absolute,
    /// A local absolute symbol that was stripped
    LocalAbsolute,
}

impl IndirectEntry {
    /// Decodes a raw indirect table word.
    pub fn from_raw(raw: u32) -> Self {
        let local = raw & INDIRECT_SYMBOL_LOCAL != 0;
        let abs = raw & INDIRECT_SYMBOL_ABS != 0;
        match (local, abs) {
            (true, true) => IndirectEntry::LocalAbsolute,
            (true, false) => IndirectEntry::Local,
            (false, true) => IndirectEntry::Absolute,
            (false, false) => IndirectEntry::Symbol(raw),
        }
    }
}

impl Dysymtab {
    /// Size of this command.
    pub const SIZE: usize = DYSYMTAB_COMMAND_SIZE;

    /// Decodes the command. `data` holds the whole command, prefix included.
    pub fn parse(data: &[u8], offset: u64, order: ByteOrder) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "dysymtab command shorter than 80 bytes",
            });
        }

        let field = |i: usize| order.read_u32_at(data, 8 + i * 4);
        Ok(Self {
            ilocalsym: field(0),
            nlocalsym: field(1),
            iextdefsym: field(2),
            nextdefsym: field(3),
            iundefsym: field(4),
            nundefsym: field(5),
            tocoff: field(6),
            ntoc: field(7),
            modtaboff: field(8),
            nmodtab: field(9),
            extrefsymoff: field(10),
            nextrefsyms: field(11),
            indirectsymoff: field(12),
            nindirectsyms: field(13),
            extreloff: field(14),
            nextrel: field(15),
            locreloff: field(16),
            nlocrel: field(17),
        })
    }

    fn fields(&self) -> [u32; 18] {
        [
            self.ilocalsym,
            self.nlocalsym,
            self.iextdefsym,
            self.nextdefsym,
            self.iundefsym,
            self.nundefsym,
            self.tocoff,
            self.ntoc,
            self.modtaboff,
            self.nmodtab,
            self.extrefsymoff,
            self.nextrefsyms,
            self.indirectsymoff,
            self.nindirectsyms,
            self.extreloff,
            self.nextrel,
            self.locreloff,
            self.nlocrel,
        ]
    }

    /// Encodes the command body (everything after the 8-byte prefix).
    pub fn encode_body(&self, order: ByteOrder) -> Vec<u8> {
        let mut raw = vec![0u8; Self::SIZE - 8];
        for (i, value) in self.fields().into_iter().enumerate() {
            order.write_u32_at(&mut raw, i * 4, value);
        }
        raw
    }

    /// Reads indirect table entry `index`.
    pub fn indirect_entry<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        order: ByteOrder,
        index: u32,
    ) -> Result<IndirectEntry> {
        if index >= self.nindirectsyms {
            return Err(Error::IndirectSymbolOutOfBounds {
                index,
                count: self.nindirectsyms,
            });
        }
        let mut raw = [0u8; 4];
        source.read_at(self.indirectsymoff as u64 + index as u64 * 4, &mut raw)?;
        Ok(IndirectEntry::from_raw(order.read_u32(&raw)))
    }

    /// File ranges of every table this command points at, as `(name, offset, size)`.
    ///
    /// Empty tables are omitted.
    pub fn table_ranges(&self) -> Vec<(&'static str, u64, u64)> {
        let tables = [
            ("table of contents", self.tocoff, self.ntoc as u64 * TOC_ENTRY_SIZE),
            ("module table", self.modtaboff, self.nmodtab as u64 * MODULE_TABLE_ENTRY_SIZE),
            ("referenced symbols", self.extrefsymoff, self.nextrefsyms as u64 * 4),
            ("indirect symbols", self.indirectsymoff, self.nindirectsyms as u64 * 4),
            ("external relocations", self.extreloff, self.nextrel as u64 * RELOCATION_INFO_SIZE),
            ("local relocations", self.locreloff, self.nlocrel as u64 * RELOCATION_INFO_SIZE),
        ];
        tables
            .into_iter()
            .filter(|&(_, _, size)| size > 0)
            .map(|(name, offset, size)| (name, offset as u64, size))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::dysymtab_command;

    #[test]
    fn test_parse_encode() {
        let fields: [u32; 18] = std::array::from_fn(|i| i as u32 * 3 + 1);
        let data = dysymtab_command(ByteOrder::Big, &fields);
        let dysymtab = Dysymtab::parse(&data, 100, ByteOrder::Big).unwrap();

        assert_eq!(dysymtab.ilocalsym, 1);
        assert_eq!(dysymtab.nlocrel, 52);
        assert_eq!(dysymtab.indirectsymoff, 37);
        assert_eq!(dysymtab.encode_body(ByteOrder::Big), data[8..].to_vec());
    }

    #[test]
    fn test_short_command() {
        let data = vec![0u8; 40];
        assert!(matches!(
            Dysymtab::parse(&data, 100, ByteOrder::Little),
            Err(Error::LoadCommandOverflow { offset: 100, .. })
        ));
    }

    #[test]
    fn test_indirect_entries() {
        let order = ByteOrder::Little;
        let mut data = vec![0u8; 16];
        order.write_u32_at(&mut data, 4, 3);
        order.write_u32_at(&mut data, 8, INDIRECT_SYMBOL_LOCAL);
        order.write_u32_at(&mut data, 12, INDIRECT_SYMBOL_LOCAL | INDIRECT_SYMBOL_ABS);

        let dysymtab = Dysymtab {
            indirectsymoff: 4,
            nindirectsyms: 3,
            ..Default::default()
        };

        assert_eq!(dysymtab.indirect_entry(&data, order, 0).unwrap(), IndirectEntry::Symbol(3));
        assert_eq!(dysymtab.indirect_entry(&data, order, 1).unwrap(), IndirectEntry::Local);
        assert_eq!(
            dysymtab.indirect_entry(&data, order, 2).unwrap(),
            IndirectEntry::LocalAbsolute
        );
        assert!(matches!(
            dysymtab.indirect_entry(&data, order, 3),
            Err(Error::IndirectSymbolOutOfBounds { index: 3, count: 3 })
        ));
    }

    #[test]
    fn test_table_ranges_skip_empty() {
        let dysymtab = Dysymtab {
            indirectsymoff: 0x400,
            nindirectsyms: 4,
            locreloff: 0x500,
            nlocrel: 2,
            ..Default::default()
        };
        assert_eq!(
            dysymtab.table_ranges(),
            vec![
                ("indirect symbols", 0x400, 16),
                ("local relocations", 0x500, 16)
            ]
        );
    }
}
