//! LC_SEGMENT commands and their section records.

use std::fmt;

use super::constants::*;
use super::handle::{SectionFlags, SectionHandle};
use crate::error::{Error, Result};
use crate::util::{fixed_name, to_fixed_name, ByteOrder};

// =============================================================================
// Section
// =============================================================================

/// A decoded `section` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Owning segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u32,
    /// Size in bytes
    pub size: u32,
    /// File offset of the contents
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Type (low byte) and attributes
    pub flags: u32,
    /// Indirect symbol table index for pointer and stub sections
    pub reserved1: u32,
    /// Stub size for stub sections
    pub reserved2: u32,
    /// Generic handle over this section's contents
    pub handle: SectionHandle,
}

impl Section {
    /// Size of a section record.
    pub const SIZE: usize = SECTION_SIZE;

    /// Decodes one 68-byte section record.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 68`.
    pub fn parse(data: &[u8], order: ByteOrder) -> Self {
        let mut sectname = [0u8; 16];
        let mut segname = [0u8; 16];
        sectname.copy_from_slice(&data[0..16]);
        segname.copy_from_slice(&data[16..32]);

        let mut section = Self {
            sectname,
            segname,
            addr: order.read_u32_at(data, 32),
            size: order.read_u32_at(data, 36),
            offset: order.read_u32_at(data, 40),
            align: order.read_u32_at(data, 44),
            reloff: order.read_u32_at(data, 48),
            nreloc: order.read_u32_at(data, 52),
            flags: order.read_u32_at(data, 56),
            reserved1: order.read_u32_at(data, 60),
            reserved2: order.read_u32_at(data, 64),
            handle: SectionHandle::file_range(String::new(), 0, 0),
        };
        section.handle = section.make_handle();
        section
    }

    /// Encodes the section record.
    pub fn encode(&self, order: ByteOrder, out: &mut Vec<u8>) {
        let mut raw = [0u8; SECTION_SIZE];
        raw[0..16].copy_from_slice(&self.sectname);
        raw[16..32].copy_from_slice(&self.segname);
        order.write_u32_at(&mut raw, 32, self.addr);
        order.write_u32_at(&mut raw, 36, self.size);
        order.write_u32_at(&mut raw, 40, self.offset);
        order.write_u32_at(&mut raw, 44, self.align);
        order.write_u32_at(&mut raw, 48, self.reloff);
        order.write_u32_at(&mut raw, 52, self.nreloc);
        order.write_u32_at(&mut raw, 56, self.flags);
        order.write_u32_at(&mut raw, 60, self.reserved1);
        order.write_u32_at(&mut raw, 64, self.reserved2);
        out.extend_from_slice(&raw);
    }

    fn make_handle(&self) -> SectionHandle {
        let mut flags = SectionFlags::ALLOC;
        if !self.is_zerofill() {
            flags |= SectionFlags::LOAD | SectionFlags::HAS_CONTENTS;
            if self.flags & (S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS) != 0 {
                flags |= SectionFlags::CODE;
            } else {
                flags |= SectionFlags::DATA;
            }
        }
        if self.flags & S_ATTR_DEBUG != 0 {
            flags |= SectionFlags::DEBUGGING;
        }

        SectionHandle {
            name: self.full_name(),
            addr: self.addr as u64,
            size: self.size as u64,
            filepos: self.offset as u64,
            align: self.align,
            flags,
        }
    }

    /// Returns the section name as a string.
    pub fn name(&self) -> &str {
        fixed_name(&self.sectname)
    }

    /// Returns the segment name as a string.
    pub fn segment_name(&self) -> &str {
        fixed_name(&self.segname)
    }

    /// Returns the full name (`segment.section`).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.segment_name(), self.name())
    }

    /// Sets the section name.
    pub fn set_name(&mut self, name: &str) {
        self.sectname = to_fixed_name(name);
        self.handle.name = self.full_name();
    }

    /// Returns the section type.
    #[inline]
    pub fn section_type(&self) -> u32 {
        self.flags & SECTION_TYPE
    }

    /// Returns the attribute bits.
    #[inline]
    pub fn attributes(&self) -> u32 {
        self.flags & SECTION_ATTRIBUTES
    }

    /// Returns true if the section has no file backing.
    #[inline]
    pub fn is_zerofill(&self) -> bool {
        self.section_type() == S_ZEROFILL
    }

    /// Returns true if this section is indexed by the indirect symbol table.
    #[inline]
    pub fn has_indirect_symbols(&self) -> bool {
        matches!(
            self.section_type(),
            S_NON_LAZY_SYMBOL_POINTERS | S_LAZY_SYMBOL_POINTERS | S_SYMBOL_STUBS
        )
    }

    /// Returns the file range of this section's relocation entries.
    pub fn relocation_range(&self) -> (u64, u64) {
        (
            self.reloff as u64,
            self.nreloc as u64 * RELOCATION_INFO_SIZE,
        )
    }
}

// =============================================================================
// Segment
// =============================================================================

/// A decoded LC_SEGMENT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u32,
    /// Virtual memory size
    pub vmsize: u32,
    /// File offset
    pub fileoff: u32,
    /// Amount of file to map
    pub filesize: u32,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Flags
    pub flags: u32,
    /// Sections, in file order
    pub sections: Vec<Section>,
    /// Generic handle over the segment's raw bytes
    pub handle: SectionHandle,
}

impl Segment {
    /// Size of the segment command without its sections.
    pub const SIZE: usize = SEGMENT_COMMAND_SIZE;

    /// Decodes a segment command. `data` holds the whole command, prefix included.
    pub fn parse(data: &[u8], offset: u64, order: ByteOrder) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "segment command shorter than 56 bytes",
            });
        }

        let mut segname = [0u8; 16];
        segname.copy_from_slice(&data[8..24]);
        let nsects = order.read_u32_at(data, 48) as usize;

        let sections_end = nsects
            .checked_mul(SECTION_SIZE)
            .and_then(|n| n.checked_add(Self::SIZE));
        if !matches!(sections_end, Some(end) if end <= data.len()) {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "section records exceed segment command size",
            });
        }

        let mut sections = Vec::with_capacity(nsects);
        for i in 0..nsects {
            let start = Self::SIZE + i * SECTION_SIZE;
            sections.push(Section::parse(&data[start..start + SECTION_SIZE], order));
        }

        let mut segment = Self {
            segname,
            vmaddr: order.read_u32_at(data, 24),
            vmsize: order.read_u32_at(data, 28),
            fileoff: order.read_u32_at(data, 32),
            filesize: order.read_u32_at(data, 36),
            maxprot: order.read_u32_at(data, 40),
            initprot: order.read_u32_at(data, 44),
            flags: order.read_u32_at(data, 52),
            sections,
            handle: SectionHandle::file_range(String::new(), 0, 0),
        };
        segment.handle = segment.make_handle();
        Ok(segment)
    }

    /// Encodes the command body (everything after the 8-byte prefix).
    pub fn encode_body(&self, order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE - 8 + self.sections.len() * SECTION_SIZE);
        let mut raw = [0u8; SEGMENT_COMMAND_SIZE - 8];
        raw[0..16].copy_from_slice(&self.segname);
        order.write_u32_at(&mut raw, 16, self.vmaddr);
        order.write_u32_at(&mut raw, 20, self.vmsize);
        order.write_u32_at(&mut raw, 24, self.fileoff);
        order.write_u32_at(&mut raw, 28, self.filesize);
        order.write_u32_at(&mut raw, 32, self.maxprot);
        order.write_u32_at(&mut raw, 36, self.initprot);
        order.write_u32_at(&mut raw, 40, self.sections.len() as u32);
        order.write_u32_at(&mut raw, 44, self.flags);
        out.extend_from_slice(&raw);

        for section in &self.sections {
            section.encode(order, &mut out);
        }
        out
    }

    fn make_handle(&self) -> SectionHandle {
        let name = format!("LC_SEGMENT.{}", self.name());
        let mut flags = SectionFlags::ALLOC;
        if self.initprot & VM_PROT_WRITE == 0 {
            flags |= SectionFlags::READONLY;
        }
        if self.initprot & VM_PROT_EXECUTE != 0 {
            flags |= SectionFlags::CODE;
        }

        if self.is_zerofill() {
            SectionHandle {
                name,
                addr: self.vmaddr as u64,
                size: self.vmsize as u64,
                filepos: 0,
                align: 0,
                flags,
            }
        } else {
            SectionHandle {
                name,
                addr: self.vmaddr as u64,
                size: self.filesize as u64,
                filepos: self.fileoff as u64,
                align: 0,
                flags: flags | SectionFlags::LOAD | SectionFlags::HAS_CONTENTS,
            }
        }
    }

    /// Returns the segment name as a string.
    pub fn name(&self) -> &str {
        fixed_name(&self.segname)
    }

    /// Returns true if the segment has no file backing.
    #[inline]
    pub fn is_zerofill(&self) -> bool {
        self.filesize == 0
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name() == name)
    }

    /// Encoded size of this command.
    pub fn command_size(&self) -> u32 {
        (Self::SIZE + self.sections.len() * SECTION_SIZE) as u32
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment {{ name: \"{}\", vm: {:#x}+{:#x}, file: {:#x}+{:#x}, sects: {} }}",
            self.name(),
            self.vmaddr,
            self.vmsize,
            self.fileoff,
            self.filesize,
            self.sections.len()
        )
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Section {{ name: \"{},{}\", addr: {:#x}+{:#x}, offset: {:#x} }}",
            self.segment_name(),
            self.name(),
            self.addr,
            self.size,
            self.offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{section_record, segment_command};

    #[test]
    fn test_parse_segment_without_sections() {
        let data = segment_command(ByteOrder::Big, "__TEXT", 0x1000, 0x100, 84, 0x10, &[]);
        let seg = Segment::parse(&data, 28, ByteOrder::Big).unwrap();

        assert_eq!(seg.name(), "__TEXT");
        assert_eq!(seg.vmaddr, 0x1000);
        assert_eq!(seg.filesize, 0x10);
        assert!(seg.sections.is_empty());
        assert_eq!(seg.handle.name, "LC_SEGMENT.__TEXT");
        assert!(seg.handle.has_contents());
        assert_eq!(seg.encode_body(ByteOrder::Big), data[8..].to_vec());
    }

    #[test]
    fn test_parse_sections_and_handles() {
        let text = section_record(ByteOrder::Little, "__text", "__TEXT", 0, 8, 200, S_ATTR_PURE_INSTRUCTIONS);
        let bss = section_record(ByteOrder::Little, "__bss", "__DATA", 8, 16, 0, S_ZEROFILL);
        let data = segment_command(ByteOrder::Little, "", 0, 24, 200, 8, &[text, bss]);

        let seg = Segment::parse(&data, 28, ByteOrder::Little).unwrap();
        assert_eq!(seg.sections.len(), 2);

        let text = &seg.sections[0];
        assert_eq!(text.full_name(), "__TEXT.__text");
        assert_eq!(text.handle.filepos, 200);
        assert!(text.handle.flags.contains(SectionFlags::CODE | SectionFlags::LOAD));

        let bss = &seg.sections[1];
        assert!(bss.is_zerofill());
        assert_eq!(bss.handle.flags, SectionFlags::ALLOC);
        assert!(!bss.handle.has_contents());

        assert_eq!(seg.encode_body(ByteOrder::Little), data[8..].to_vec());
    }

    #[test]
    fn test_section_count_overflow() {
        let mut data = segment_command(ByteOrder::Big, "__DATA", 0, 0, 0, 0, &[]);
        // Claim three sections in a command that has room for none.
        ByteOrder::Big.write_u32_at(&mut data, 48, 3);
        let err = Segment::parse(&data, 28, ByteOrder::Big).unwrap_err();
        assert!(matches!(err, Error::LoadCommandOverflow { offset: 28, .. }));

        ByteOrder::Big.write_u32_at(&mut data, 48, u32::MAX);
        assert!(Segment::parse(&data, 28, ByteOrder::Big).is_err());
    }

    #[test]
    fn test_zerofill_segment_handle() {
        let data = segment_command(ByteOrder::Big, "__PAGEZERO", 0, 0x1000, 0, 0, &[]);
        let seg = Segment::parse(&data, 28, ByteOrder::Big).unwrap();
        assert!(seg.is_zerofill());
        assert_eq!(seg.handle.size, 0x1000);
        assert!(!seg.handle.has_contents());
    }
}
