//! Fat (universal) archives.
//!
//! A fat archive is a big-endian table of `(cputype, cpusubtype, offset, size,
//! align)` entries followed by one complete Mach-O file per entry. Members are
//! decoded on first access and cached for the lifetime of the archive.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use zerocopy::byteorder::big_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::macho::constants::*;
use crate::macho::{Architecture, MachOFile};
use crate::source::{check_range, ByteSource, Region};
use crate::DecodeOptions;

/// Entry counts above this are taken to be something else sharing the magic
/// (Java class files start with the same four bytes).
const MAX_FAT_ARCH: u32 = 30;

/// The byte source of an archive member.
pub type MemberSource<S> = Region<Arc<S>>;

// =============================================================================
// On-disk Structures
// =============================================================================

/// Fat archive header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatHeader {
    /// Magic number (FAT_MAGIC)
    pub magic: U32,
    /// Number of entries
    pub nfat_arch: U32,
}

/// One fat archive entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch {
    /// CPU type
    pub cputype: U32,
    /// CPU subtype
    pub cpusubtype: U32,
    /// File offset of the member
    pub offset: U32,
    /// Size of the member
    pub size: U32,
    /// Alignment as a power of two
    pub align: U32,
}

/// Decoded fat archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatMember {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the member
    pub offset: u32,
    /// Size of the member
    pub size: u32,
    /// Alignment as a power of two
    pub align: u32,
}

impl FatMember {
    /// Returns the member's architecture, if known.
    pub fn architecture(&self) -> Option<Architecture> {
        Architecture::from_cputype(self.cputype)
    }
}

impl From<&FatArch> for FatMember {
    fn from(arch: &FatArch) -> Self {
        Self {
            cputype: arch.cputype.get(),
            cpusubtype: arch.cpusubtype.get(),
            offset: arch.offset.get(),
            size: arch.size.get(),
            align: arch.align.get(),
        }
    }
}

impl fmt::Display for FatMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} offset {:#010x} size {:#010x} align 2^{}",
            self.architecture().map_or("unknown", Architecture::name),
            self.offset,
            self.size,
            self.align
        )
    }
}

// =============================================================================
// Fat Archive
// =============================================================================

struct Entry<S> {
    member: FatMember,
    file: Option<MachOFile<MemberSource<S>>>,
}

/// A decoded fat archive with lazily decoded members.
pub struct FatArchive<S> {
    source: Arc<S>,
    options: DecodeOptions,
    entries: Vec<Entry<S>>,
}

impl<S: ByteSource> FatArchive<S> {
    /// Decodes `source` as a fat archive, decoding members with default options.
    pub fn open(source: S) -> Result<Self> {
        Self::probe(Arc::new(source), DecodeOptions::default())
    }

    /// Decodes the archive table. Members are decoded with `options` when
    /// first accessed.
    pub fn probe(source: Arc<S>, options: DecodeOptions) -> Result<Self> {
        if source.len() < FAT_HEADER_SIZE as u64 {
            return Err(Error::NotThisFormat);
        }
        let mut raw = [0u8; FAT_HEADER_SIZE];
        source.read_at(0, &mut raw)?;
        let (header, _) = FatHeader::read_from_prefix(&raw).map_err(|_| Error::NotThisFormat)?;

        if header.magic.get() != FAT_MAGIC {
            return Err(Error::NotThisFormat);
        }
        let count = header.nfat_arch.get();
        if count > MAX_FAT_ARCH {
            debug!("fat magic with {} entries, not a fat archive", count);
            return Err(Error::NotThisFormat);
        }

        let table_len = count as u64 * FAT_ARCH_SIZE as u64;
        check_range("fat entries", FAT_HEADER_SIZE as u64, table_len, source.len())?;
        let table = source.read_vec(FAT_HEADER_SIZE as u64, table_len as usize)?;

        let entries = table
            .chunks_exact(FAT_ARCH_SIZE)
            .map(|chunk| {
                FatArch::read_from_bytes(chunk)
                    .map(|arch| Entry {
                        member: FatMember::from(&arch),
                        file: None,
                    })
                    .map_err(|_| Error::truncated("fat entries", FAT_HEADER_SIZE as u64, table_len))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("fat archive with {} members", entries.len());
        Ok(Self {
            source,
            options,
            entries,
        })
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the archive has no members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entry table.
    pub fn members(&self) -> impl Iterator<Item = &FatMember> {
        self.entries.iter().map(|e| &e.member)
    }

    /// Returns the index of the first member for `arch`.
    pub fn find_arch(&self, arch: Architecture) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.member.cputype == arch.cputype())
    }

    /// Returns member `index`, decoding it on first access.
    ///
    /// The member is decoded from `[offset, offset + size)` of the archive,
    /// so every offset inside it is relative to its own start.
    pub fn member(&mut self, index: usize) -> Result<&mut MachOFile<MemberSource<S>>> {
        let count = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(Error::MemberOutOfBounds { index, count })?;

        let file = match &mut entry.file {
            Some(file) => file,
            slot => {
                let member = &entry.member;
                debug!("decoding fat member {} ({})", index, member);
                let region = Region::new(
                    Arc::clone(&self.source),
                    member.offset as u64,
                    member.size as u64,
                )?;
                slot.insert(MachOFile::probe(region, &self.options)?)
            }
        };
        Ok(file)
    }

    /// Returns the member after `prev`, or the first member when `prev` is
    /// `None`. Past the last member this yields `Ok(None)`.
    pub fn next_member(
        &mut self,
        prev: Option<usize>,
    ) -> Result<Option<(usize, &mut MachOFile<MemberSource<S>>)>> {
        let index = prev.map_or(0, |i| i + 1);
        if index >= self.entries.len() {
            return Ok(None);
        }
        let file = self.member(index)?;
        Ok(Some((index, file)))
    }
}

impl<S> fmt::Debug for FatArchive<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.member))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fat_archive, sample_object, MachOBuilder};
    use crate::util::ByteOrder;

    fn two_member_archive() -> Vec<u8> {
        let ppc = MachOBuilder::new(ByteOrder::Big)
            .cputype(CPU_TYPE_POWERPC)
            .filetype(MH_EXECUTE)
            .build();
        let i386 = sample_object(ByteOrder::Little);
        fat_archive(&[(CPU_TYPE_POWERPC, ppc), (CPU_TYPE_I386, i386)])
    }

    #[test]
    fn test_parse_entries() {
        let data = two_member_archive();
        let fat = FatArchive::open(data).unwrap();

        assert_eq!(fat.len(), 2);
        let members: Vec<&FatMember> = fat.members().collect();
        assert_eq!(members[0].architecture(), Some(Architecture::PowerPc));
        assert_eq!(members[0].offset, 48);
        assert_eq!(members[0].size, 28);
        assert_eq!(members[1].offset, 80);
        assert_eq!(members[1].align, 4);
        assert_eq!(fat.find_arch(Architecture::I386), Some(1));
        assert_eq!(fat.find_arch(Architecture::Arm), None);
    }

    #[test]
    fn test_enumerate_members() {
        let data = two_member_archive();
        let mut fat = FatArchive::open(data).unwrap();
        let expected: Vec<FatMember> = fat.members().copied().collect();

        let mut prev = None;
        let mut seen = Vec::new();
        while let Some((index, file)) = fat.next_member(prev).unwrap() {
            assert_eq!(file.source().offset(), expected[index].offset as u64);
            assert_eq!(file.source().len(), expected[index].size as u64);
            seen.push(file.architecture());
            prev = Some(index);
        }

        assert_eq!(seen, [Architecture::PowerPc, Architecture::I386]);
        assert!(fat.next_member(Some(1)).unwrap().is_none());
        assert!(fat.next_member(Some(7)).unwrap().is_none());
    }

    #[test]
    fn test_member_is_cached() {
        let data = two_member_archive();
        let mut fat = FatArchive::open(data).unwrap();

        let first = fat.member(1).unwrap() as *const _;
        let second = fat.member(1).unwrap() as *const _;
        assert_eq!(first, second);

        let file = fat.member(1).unwrap();
        assert_eq!(file.materialize_symbols().unwrap().len(), 3);
        assert_eq!(fat.member(1).unwrap().symbols().map(<[_]>::len), Some(3));
        assert!(matches!(
            fat.member(2),
            Err(Error::MemberOutOfBounds { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_member_round_trip() {
        let data = two_member_archive();
        let mut fat = FatArchive::open(data).unwrap();
        assert_eq!(fat.member(1).unwrap().to_vec().unwrap(), sample_object(ByteOrder::Little));
    }

    #[test]
    fn test_not_a_fat_archive() {
        assert!(FatArchive::open(vec![0xCA, 0xFE]).unwrap_err().is_not_this_format());

        let thin = sample_object(ByteOrder::Big);
        assert!(FatArchive::open(thin).unwrap_err().is_not_this_format());

        // A class file: same magic, version numbers in place of the count.
        let class = vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
        assert!(FatArchive::open(class).unwrap_err().is_not_this_format());
    }

    #[test]
    fn test_truncated_table_and_member() {
        let mut data = two_member_archive();
        data.truncate(30);
        assert!(matches!(
            FatArchive::open(data),
            Err(Error::Truncated { what: "fat entries", .. })
        ));

        let mut data = two_member_archive();
        // Point the second member past the end of the archive.
        ByteOrder::Big.write_u32_at(&mut data, 8 + FAT_ARCH_SIZE + 8, 0x10000);
        let mut fat = FatArchive::open(data).unwrap();
        assert!(fat.member(0).is_ok());
        assert!(matches!(fat.member(1), Err(Error::Truncated { .. })));
    }
}
