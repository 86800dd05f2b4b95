//! The fixed 28-byte Mach-O file header.

use std::fmt;

use super::constants::*;
use crate::error::{Error, Result};
use crate::util::ByteOrder;

// =============================================================================
// Architecture
// =============================================================================

/// CPU architecture named by a header's `cputype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Architecture {
    Vax,
    Mc680x0,
    I386,
    X86_64,
    Mips,
    Mc98000,
    Hppa,
    Arm,
    Arm64,
    Mc88000,
    Sparc,
    I860,
    Alpha,
    PowerPc,
    PowerPc64,
}

impl Architecture {
    /// Maps a `cputype` to an architecture.
    pub fn from_cputype(cputype: u32) -> Option<Self> {
        let arch = match cputype {
            CPU_TYPE_VAX => Architecture::Vax,
            CPU_TYPE_MC680X0 => Architecture::Mc680x0,
            CPU_TYPE_I386 => Architecture::I386,
            CPU_TYPE_X86_64 => Architecture::X86_64,
            CPU_TYPE_MIPS => Architecture::Mips,
            CPU_TYPE_MC98000 => Architecture::Mc98000,
            CPU_TYPE_HPPA => Architecture::Hppa,
            CPU_TYPE_ARM => Architecture::Arm,
            CPU_TYPE_ARM64 => Architecture::Arm64,
            CPU_TYPE_MC88000 => Architecture::Mc88000,
            CPU_TYPE_SPARC => Architecture::Sparc,
            CPU_TYPE_I860 => Architecture::I860,
            CPU_TYPE_ALPHA => Architecture::Alpha,
            CPU_TYPE_POWERPC => Architecture::PowerPc,
            CPU_TYPE_POWERPC64 => Architecture::PowerPc64,
            _ => return None,
        };
        Some(arch)
    }

    /// Returns the `cputype` for this architecture.
    pub fn cputype(self) -> u32 {
        match self {
            Architecture::Vax => CPU_TYPE_VAX,
            Architecture::Mc680x0 => CPU_TYPE_MC680X0,
            Architecture::I386 => CPU_TYPE_I386,
            Architecture::X86_64 => CPU_TYPE_X86_64,
            Architecture::Mips => CPU_TYPE_MIPS,
            Architecture::Mc98000 => CPU_TYPE_MC98000,
            Architecture::Hppa => CPU_TYPE_HPPA,
            Architecture::Arm => CPU_TYPE_ARM,
            Architecture::Arm64 => CPU_TYPE_ARM64,
            Architecture::Mc88000 => CPU_TYPE_MC88000,
            Architecture::Sparc => CPU_TYPE_SPARC,
            Architecture::I860 => CPU_TYPE_I860,
            Architecture::Alpha => CPU_TYPE_ALPHA,
            Architecture::PowerPc => CPU_TYPE_POWERPC,
            Architecture::PowerPc64 => CPU_TYPE_POWERPC64,
        }
    }

    /// Returns the conventional short name.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Vax => "vax",
            Architecture::Mc680x0 => "m68k",
            Architecture::I386 => "i386",
            Architecture::X86_64 => "x86_64",
            Architecture::Mips => "mips",
            Architecture::Mc98000 => "m98k",
            Architecture::Hppa => "hppa",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
            Architecture::Mc88000 => "m88k",
            Architecture::Sparc => "sparc",
            Architecture::I860 => "i860",
            Architecture::Alpha => "alpha",
            Architecture::PowerPc => "ppc",
            Architecture::PowerPc64 => "ppc64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// File Header
// =============================================================================

/// Decoded `mach_header`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic number, normalized to `MH_MAGIC`
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type (`MH_OBJECT`, `MH_EXECUTE`, ...)
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Total size of the load commands in bytes
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
    /// Byte order the file was written in
    pub byte_order: ByteOrder,
}

impl FileHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = HEADER_SIZE;

    /// Detects the byte order of a file from its first four bytes.
    ///
    /// Returns `None` when the bytes are not the Mach-O magic in either order.
    pub fn detect_byte_order(magic: &[u8; 4]) -> Option<ByteOrder> {
        if ByteOrder::Big.read_u32(magic) == MH_MAGIC {
            Some(ByteOrder::Big)
        } else if ByteOrder::Little.read_u32(magic) == MH_MAGIC {
            Some(ByteOrder::Little)
        } else {
            None
        }
    }

    /// Decodes a header from its 28 raw bytes.
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic: &[u8; 4] = raw[..4].try_into().map_err(|_| Error::NotThisFormat)?;
        let order = Self::detect_byte_order(magic).ok_or(Error::NotThisFormat)?;

        Ok(Self {
            magic: MH_MAGIC,
            cputype: order.read_u32_at(raw, 4),
            cpusubtype: order.read_u32_at(raw, 8),
            filetype: order.read_u32_at(raw, 12),
            ncmds: order.read_u32_at(raw, 16),
            sizeofcmds: order.read_u32_at(raw, 20),
            flags: order.read_u32_at(raw, 24),
            byte_order: order,
        })
    }

    /// Encodes the header in its recorded byte order.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let order = self.byte_order;
        let mut raw = [0u8; HEADER_SIZE];
        order.write_u32_at(&mut raw, 0, self.magic);
        order.write_u32_at(&mut raw, 4, self.cputype);
        order.write_u32_at(&mut raw, 8, self.cpusubtype);
        order.write_u32_at(&mut raw, 12, self.filetype);
        order.write_u32_at(&mut raw, 16, self.ncmds);
        order.write_u32_at(&mut raw, 20, self.sizeofcmds);
        order.write_u32_at(&mut raw, 24, self.flags);
        raw
    }

    /// Returns the architecture, if the CPU type is known.
    pub fn architecture(&self) -> Option<Architecture> {
        Architecture::from_cputype(self.cputype)
    }

    /// Returns the architecture or fails with `UnsupportedCpuType`.
    pub fn require_architecture(&self) -> Result<Architecture> {
        self.architecture().ok_or(Error::UnsupportedCpuType {
            cputype: self.cputype,
            cpusubtype: self.cpusubtype,
        })
    }

    /// Returns the header flags.
    pub fn flags(&self) -> MachOFlags {
        MachOFlags::from_bits_retain(self.flags)
    }

    /// Returns true if this is a core file.
    #[inline]
    pub fn is_core(&self) -> bool {
        self.filetype == MH_CORE
    }

    /// Returns the file type as a string.
    pub fn filetype_name(&self) -> &'static str {
        match self.filetype {
            MH_OBJECT => "object",
            MH_EXECUTE => "execute",
            MH_FVMLIB => "fvmlib",
            MH_CORE => "core",
            MH_PRELOAD => "preload",
            MH_DYLIB => "dylib",
            MH_DYLINKER => "dylinker",
            MH_BUNDLE => "bundle",
            _ => "unknown",
        }
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MachO {{ arch: {}, order: {}, type: {}, cmds: {} ({} bytes), flags: {:#x} }}",
            self.architecture().map_or("unknown", Architecture::name),
            self.byte_order,
            self.filetype_name(),
            self.ncmds,
            self.sizeofcmds,
            self.flags
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_endian_header() -> [u8; HEADER_SIZE] {
        [
            0xFE, 0xED, 0xFA, 0xCE, // magic
            0x00, 0x00, 0x00, 0x07, // cputype = i386
            0x00, 0x00, 0x00, 0x03, // cpusubtype
            0x00, 0x00, 0x00, 0x01, // MH_OBJECT
            0x00, 0x00, 0x00, 0x01, // ncmds
            0x00, 0x00, 0x00, 0x38, // sizeofcmds = 56
            0x00, 0x00, 0x20, 0x00, // flags
        ]
    }

    #[test]
    fn test_decode_big_endian() {
        let header = FileHeader::decode(&big_endian_header()).unwrap();
        assert_eq!(header.byte_order, ByteOrder::Big);
        assert_eq!(header.cputype, CPU_TYPE_I386);
        assert_eq!(header.filetype, MH_OBJECT);
        assert_eq!(header.ncmds, 1);
        assert_eq!(header.sizeofcmds, 56);
        assert_eq!(header.flags, 0x2000);
        assert_eq!(header.architecture(), Some(Architecture::I386));
    }

    #[test]
    fn test_encode_is_inverse() {
        let raw = big_endian_header();
        let header = FileHeader::decode(&raw).unwrap();
        assert_eq!(header.encode(), raw);

        let mut little = header;
        little.byte_order = ByteOrder::Little;
        let encoded = little.encode();
        assert_eq!(&encoded[..4], &[0xCE, 0xFA, 0xED, 0xFE]);
        assert_eq!(FileHeader::decode(&encoded).unwrap(), little);
    }

    #[test]
    fn test_bad_magic() {
        let mut raw = big_endian_header();
        raw[3] = 0xCF; // 64-bit magic
        assert!(FileHeader::decode(&raw).unwrap_err().is_not_this_format());

        raw[..4].copy_from_slice(&[0xCA, 0xFE, 0xBA, 0xBE]);
        assert!(FileHeader::decode(&raw).unwrap_err().is_not_this_format());
    }

    #[test]
    fn test_unsupported_cputype() {
        let mut raw = big_endian_header();
        raw[4..8].copy_from_slice(&[0, 0, 0, 0x63]);
        let header = FileHeader::decode(&raw).unwrap();
        assert!(matches!(
            header.require_architecture(),
            Err(Error::UnsupportedCpuType { cputype: 0x63, .. })
        ));
    }
}
