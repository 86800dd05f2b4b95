//! Byte-order aware integer access and small string helpers.
//!
//! Mach-O files carry their byte order in the magic number, so every integer
//! read goes through a [`ByteOrder`] chosen at probe time rather than a fixed
//! endianness. The conversions compile down to a single load plus an optional
//! byte swap via the `byteorder` crate.

use std::fmt;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

// =============================================================================
// Byte Order
// =============================================================================

/// Byte order of a Mach-O file, detected from its magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Most significant byte first (PowerPC, m68k, SPARC, fat headers).
    Big,
    /// Least significant byte first (x86, ARM).
    Little,
}

impl ByteOrder {
    /// Byte order of the host running this code.
    #[cfg(target_endian = "big")]
    pub const NATIVE: ByteOrder = ByteOrder::Big;
    /// Byte order of the host running this code.
    #[cfg(target_endian = "little")]
    pub const NATIVE: ByteOrder = ByteOrder::Little;

    /// Reads a u16 from the start of `data`.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 2`.
    #[inline(always)]
    pub fn read_u16(self, data: &[u8]) -> u16 {
        match self {
            ByteOrder::Big => BigEndian::read_u16(data),
            ByteOrder::Little => LittleEndian::read_u16(data),
        }
    }

    /// Reads a u32 from the start of `data`.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 4`.
    #[inline(always)]
    pub fn read_u32(self, data: &[u8]) -> u32 {
        match self {
            ByteOrder::Big => BigEndian::read_u32(data),
            ByteOrder::Little => LittleEndian::read_u32(data),
        }
    }

    /// Reads a u32 from `data` at the given offset.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4 > data.len()`.
    #[inline(always)]
    pub fn read_u32_at(self, data: &[u8], offset: usize) -> u32 {
        self.read_u32(&data[offset..])
    }

    /// Writes a u16 to the start of `data`.
    #[inline(always)]
    pub fn write_u16(self, data: &mut [u8], value: u16) {
        match self {
            ByteOrder::Big => BigEndian::write_u16(data, value),
            ByteOrder::Little => LittleEndian::write_u16(data, value),
        }
    }

    /// Writes a u32 to the start of `data`.
    #[inline(always)]
    pub fn write_u32(self, data: &mut [u8], value: u32) {
        match self {
            ByteOrder::Big => BigEndian::write_u32(data, value),
            ByteOrder::Little => LittleEndian::write_u32(data, value),
        }
    }

    /// Writes a u32 into `data` at the given offset.
    #[inline(always)]
    pub fn write_u32_at(self, data: &mut [u8], offset: usize, value: u32) {
        self.write_u32(&mut data[offset..], value)
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::Big => f.write_str("big-endian"),
            ByteOrder::Little => f.write_str("little-endian"),
        }
    }
}

// =============================================================================
// Strings
// =============================================================================

/// Finds the position of the first null byte in a slice, or its length.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Returns the text of a fixed-width, null-padded name field.
pub fn fixed_name(field: &[u8; 16]) -> &str {
    let end = memchr_null(field);
    std::str::from_utf8(&field[..end]).unwrap_or("")
}

/// Builds a fixed-width, null-padded name field, truncating at 16 bytes.
pub fn to_fixed_name(name: &str) -> [u8; 16] {
    let mut field = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(16);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

/// Formats a packed `X.Y.Z` version number (16.8.8 bits) as used by dylibs.
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 16,
        (version >> 8) & 0xFF,
        version & 0xFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_both_orders() {
        let data = [0xFE, 0xED, 0xFA, 0xCE];
        assert_eq!(ByteOrder::Big.read_u32(&data), 0xFEEDFACE);
        assert_eq!(ByteOrder::Little.read_u32(&data), 0xCEFAEDFE);
    }

    #[test]
    fn test_write_read_u16() {
        let mut data = [0u8; 2];
        ByteOrder::Little.write_u16(&mut data, 0x1234);
        assert_eq!(data, [0x34, 0x12]);
        ByteOrder::Big.write_u16(&mut data, 0x1234);
        assert_eq!(data, [0x12, 0x34]);
        assert_eq!(ByteOrder::Big.read_u16(&data), 0x1234);
    }

    #[test]
    fn test_fixed_name() {
        let field = to_fixed_name("__TEXT");
        assert_eq!(fixed_name(&field), "__TEXT");
        assert_eq!(&field[6..], &[0u8; 10]);

        let full = to_fixed_name("__a_very_long_section_name");
        assert_eq!(fixed_name(&full), "__a_very_long_se");
    }

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(0x0001_0203), "1.2.3");
        assert_eq!(format_version(0x04D2_0000), "1234.0.0");
    }
}
