//! Dylib, dylinker and prebound-dylib commands.
//!
//! The path strings embedded in these commands are not copied. The decoder
//! records where the name lives and exposes it through a section handle so a
//! consumer can read it when needed.

use super::handle::SectionHandle;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::util::{format_version, memchr_null, ByteOrder};

/// Location of a name embedded in a load command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameRef {
    /// Offset of the name relative to the start of the command
    pub name_offset: u32,
    /// Absolute file offset of the name
    pub offset: u64,
    /// Byte length (command length minus `name_offset`), padding included
    pub len: u32,
}

impl NameRef {
    fn parse(cmdsize: usize, offset: u64, name_offset: u32, fixed: usize) -> Result<Self> {
        if (name_offset as usize) < fixed || name_offset as usize > cmdsize {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "name offset outside the command",
            });
        }
        Ok(Self {
            name_offset,
            offset: offset + name_offset as u64,
            len: (cmdsize - name_offset as usize) as u32,
        })
    }

    /// Reads the name, stopping at the first null byte.
    pub fn read<S: ByteSource + ?Sized>(&self, source: &S) -> Result<String> {
        let mut bytes = vec![0u8; self.len as usize];
        source.read_at(self.offset, &mut bytes)?;
        bytes.truncate(memchr_null(&bytes));
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn handle(&self, name: String) -> SectionHandle {
        SectionHandle::file_range(name, self.offset, self.len as u64)
    }
}

// =============================================================================
// Dylib
// =============================================================================

/// A decoded LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB or LC_ID_DYLIB command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibCommand {
    /// Library path location
    pub name: NameRef,
    /// Build timestamp
    pub timestamp: u32,
    /// Current version (X.Y.Z packed 16.8.8)
    pub current_version: u32,
    /// Compatibility version (X.Y.Z packed 16.8.8)
    pub compatibility_version: u32,
    /// Generic handle over the path bytes
    pub handle: SectionHandle,
}

impl DylibCommand {
    /// Minimum size of this command (without the path string).
    pub const SIZE: usize = 24;

    /// Decodes the command. `data` holds the whole command, prefix included.
    pub fn parse(data: &[u8], offset: u64, order: ByteOrder, handle_name: String) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "dylib command shorter than 24 bytes",
            });
        }
        let name = NameRef::parse(data.len(), offset, order.read_u32_at(data, 8), Self::SIZE)?;
        Ok(Self {
            name,
            timestamp: order.read_u32_at(data, 12),
            current_version: order.read_u32_at(data, 16),
            compatibility_version: order.read_u32_at(data, 20),
            handle: name.handle(handle_name),
        })
    }

    /// Encodes the fixed fields after the prefix. The name bytes are not included.
    pub fn encode_body(&self, order: ByteOrder) -> Vec<u8> {
        let mut raw = vec![0u8; Self::SIZE - 8];
        order.write_u32_at(&mut raw, 0, self.name.name_offset);
        order.write_u32_at(&mut raw, 4, self.timestamp);
        order.write_u32_at(&mut raw, 8, self.current_version);
        order.write_u32_at(&mut raw, 12, self.compatibility_version);
        raw
    }

    /// Returns `(current, compatibility)` versions as display strings.
    pub fn versions(&self) -> (String, String) {
        (
            format_version(self.current_version),
            format_version(self.compatibility_version),
        )
    }
}

// =============================================================================
// Dylinker
// =============================================================================

/// A decoded LC_LOAD_DYLINKER or LC_ID_DYLINKER command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylinkerCommand {
    /// Dynamic linker path location
    pub name: NameRef,
    /// Generic handle over the path bytes
    pub handle: SectionHandle,
}

impl DylinkerCommand {
    /// Minimum size of this command (without the path string).
    pub const SIZE: usize = 12;

    /// Decodes the command. `data` holds the whole command, prefix included.
    pub fn parse(data: &[u8], offset: u64, order: ByteOrder, handle_name: String) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "dylinker command shorter than 12 bytes",
            });
        }
        let name = NameRef::parse(data.len(), offset, order.read_u32_at(data, 8), Self::SIZE)?;
        Ok(Self {
            name,
            handle: name.handle(handle_name),
        })
    }

    /// Encodes the fixed fields after the prefix. The name bytes are not included.
    pub fn encode_body(&self, order: ByteOrder) -> Vec<u8> {
        let mut raw = vec![0u8; Self::SIZE - 8];
        order.write_u32_at(&mut raw, 0, self.name.name_offset);
        raw
    }
}

// =============================================================================
// Prebound Dylib
// =============================================================================

/// A LC_PREBOUND_DYLIB command.
///
/// Only acknowledged: its fields (name, module count, linked-modules bit
/// vector) are not extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreboundDylibCommand;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::constants::*;
    use crate::testutil::{dylib_command, dylinker_command};

    #[test]
    fn test_parse_dylib() {
        let order = ByteOrder::Big;
        let data = dylib_command(order, LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib", 2, 0x0058_0100, 0x0001_0000);
        let dylib = DylibCommand::parse(&data, 200, order, "LC_LOAD_DYLIB.1".into()).unwrap();

        assert_eq!(dylib.name.name_offset, 24);
        assert_eq!(dylib.name.offset, 224);
        assert_eq!(dylib.name.len as usize, data.len() - 24);
        assert_eq!(dylib.timestamp, 2);
        assert_eq!(dylib.versions(), ("88.1.0".to_string(), "1.0.0".to_string()));
        assert_eq!(dylib.handle.name, "LC_LOAD_DYLIB.1");
        assert_eq!(dylib.handle.filepos, 224);
        assert_eq!(dylib.encode_body(order), data[8..24].to_vec());

        // Read the name through a file image that places the command at 200.
        let mut file = vec![0u8; 200];
        file.extend_from_slice(&data);
        assert_eq!(dylib.name.read(&file).unwrap(), "/usr/lib/libSystem.B.dylib");
    }

    #[test]
    fn test_parse_dylinker() {
        let order = ByteOrder::Little;
        let data = dylinker_command(order, LC_LOAD_DYLINKER, "/usr/lib/dyld");
        let dylinker = DylinkerCommand::parse(&data, 0, order, "LC_LOAD_DYLINKER.2".into()).unwrap();
        assert_eq!(dylinker.name.name_offset, 12);
        assert_eq!(dylinker.name.read(&data).unwrap(), "/usr/lib/dyld");
        assert_eq!(dylinker.encode_body(order), data[8..12].to_vec());
    }

    #[test]
    fn test_name_offset_out_of_range() {
        let order = ByteOrder::Big;
        let mut data = dylinker_command(order, LC_LOAD_DYLINKER, "/usr/lib/dyld");
        let len = data.len() as u32;
        order.write_u32_at(&mut data, 8, len + 1);
        assert!(matches!(
            DylinkerCommand::parse(&data, 0, order, String::new()),
            Err(Error::LoadCommandOverflow { .. })
        ));

        order.write_u32_at(&mut data, 8, 4);
        assert!(DylinkerCommand::parse(&data, 0, order, String::new()).is_err());
    }
}
