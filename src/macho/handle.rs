//! Format-neutral section handles.
//!
//! Consumers that handle several object formats see every addressable range
//! of a Mach-O file (segments, sections, thread states, embedded library
//! names) as a [`SectionHandle`]: a name, an address range, a file range and
//! a set of content flags.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Content flags of a [`SectionHandle`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionFlags: u32 {
        /// Occupies memory at run time
        const ALLOC = 0x1;
        /// Loaded from the file
        const LOAD = 0x2;
        /// Has bytes in the file
        const HAS_CONTENTS = 0x4;
        /// Contains machine instructions
        const CODE = 0x8;
        /// Contains data
        const DATA = 0x10;
        /// Not writable at run time
        const READONLY = 0x20;
        /// Debugging information only
        const DEBUGGING = 0x40;
    }
}

/// A generic, format-neutral view of one addressable range of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHandle {
    /// Display name (`__TEXT.__text`, `LC_SEGMENT.__DATA`, ...)
    pub name: String,
    /// Virtual address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset of the contents
    pub filepos: u64,
    /// Alignment as a power of two
    pub align: u32,
    /// Content flags
    pub flags: SectionFlags,
}

impl SectionHandle {
    /// Creates a handle over file-backed bytes that are not mapped.
    pub fn file_range(name: String, filepos: u64, size: u64) -> Self {
        Self {
            name,
            addr: 0,
            size,
            filepos,
            align: 0,
            flags: SectionFlags::HAS_CONTENTS,
        }
    }

    /// Returns true if the handle's bytes live in the file.
    #[inline]
    pub fn has_contents(&self) -> bool {
        self.flags.contains(SectionFlags::HAS_CONTENTS)
    }

    /// Returns true if `filepos` falls inside this handle's file range.
    #[inline]
    pub fn contains_filepos(&self, filepos: u64) -> bool {
        self.has_contents() && filepos >= self.filepos && filepos - self.filepos < self.size
    }
}

impl fmt::Display for SectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<28} addr {:#010x} size {:#010x} file {:#010x} align 2^{} {:?}",
            self.name, self.addr, self.size, self.filepos, self.align, self.flags
        )
    }
}
