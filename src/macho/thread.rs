//! LC_THREAD / LC_UNIXTHREAD register state.
//!
//! A thread command is a sequence of `(flavor, count, state[count])` triples
//! that must fill the command exactly. Register state is not copied; each
//! flavor records where its data lives so it can be read on demand.

use super::constants::*;
use super::handle::{SectionFlags, SectionHandle};
use super::header::Architecture;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::util::ByteOrder;

/// Flavor names, keyed by architecture and flavor id.
static FLAVOR_NAMES: &[(Architecture, u32, &str)] = &[
    (Architecture::I386, I386_THREAD_STATE, "i386_THREAD_STATE"),
    (Architecture::I386, I386_FLOAT_STATE, "i386_FLOAT_STATE"),
    (Architecture::I386, I386_EXCEPTION_STATE, "i386_EXCEPTION_STATE"),
    (Architecture::I386, I386_NEW_THREAD_STATE, "i386_NEW_THREAD_STATE"),
    (Architecture::I386, I386_DEBUG_STATE, "i386_DEBUG_STATE"),
    (Architecture::PowerPc, PPC_THREAD_STATE, "PPC_THREAD_STATE"),
    (Architecture::PowerPc, PPC_FLOAT_STATE, "PPC_FLOAT_STATE"),
    (Architecture::PowerPc, PPC_EXCEPTION_STATE, "PPC_EXCEPTION_STATE"),
    (Architecture::PowerPc, PPC_VECTOR_STATE, "PPC_VECTOR_STATE"),
    (Architecture::PowerPc, PPC_THREAD_STATE64, "PPC_THREAD_STATE64"),
    (Architecture::PowerPc, PPC_EXCEPTION_STATE64, "PPC_EXCEPTION_STATE64"),
];

/// Returns the display name of a flavor, or `"UNKNOWN"`.
pub fn flavor_name(arch: Option<Architecture>, flavor: u32) -> &'static str {
    FLAVOR_NAMES
        .iter()
        .find(|&&(a, f, _)| Some(a) == arch && f == flavor)
        .map_or("UNKNOWN", |&(_, _, name)| name)
}

/// One register-state blob of a thread command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadFlavor {
    /// Flavor id
    pub flavor: u32,
    /// Absolute file offset of the state data
    pub offset: u64,
    /// Size of the state data in bytes
    pub size: u32,
    /// Generic handle over the state data
    pub handle: SectionHandle,
}

/// A decoded LC_THREAD or LC_UNIXTHREAD command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadCommand {
    /// Flavors, in file order
    pub flavors: Vec<ThreadFlavor>,
}

/// Walks the `(flavor, count)` pairs of a thread command, calling `visit`
/// with `(flavor, count, offset_of_pair)` for each. Returns the number visited.
fn walk_flavors(
    data: &[u8],
    offset: u64,
    order: ByteOrder,
    mut visit: impl FnMut(u32, u32, usize),
) -> Result<usize> {
    let len = data.len();
    let mut pos = LOAD_COMMAND_PREFIX_SIZE;
    let mut count = 0;

    while pos != len {
        if len - pos < 8 {
            return Err(Error::truncated("thread state", offset + pos as u64, 8));
        }
        let flavor = order.read_u32_at(data, pos);
        let words = order.read_u32_at(data, pos + 4);
        let size = words as u64 * 4;
        if size > (len - pos - 8) as u64 {
            return Err(Error::truncated("thread state", offset + pos as u64 + 8, size));
        }

        visit(flavor, words, pos);
        pos += 8 + size as usize;
        count += 1;
    }

    Ok(count)
}

impl ThreadCommand {
    /// Decodes a thread command. `data` holds the whole command, prefix included.
    ///
    /// `prefix` names the pseudo-sections (`LC_THREAD` or `LC_UNIXTHREAD`).
    pub fn parse(
        data: &[u8],
        offset: u64,
        order: ByteOrder,
        arch: Option<Architecture>,
        prefix: &str,
    ) -> Result<Self> {
        let count = walk_flavors(data, offset, order, |_, _, _| {})?;

        let mut flavors = Vec::with_capacity(count);
        walk_flavors(data, offset, order, |flavor, words, pos| {
            let data_offset = offset + pos as u64 + 8;
            let size = words * 4;
            let name = format!("{}.{}.{}", prefix, flavor_name(arch, flavor), flavors.len());
            flavors.push(ThreadFlavor {
                flavor,
                offset: data_offset,
                size,
                handle: SectionHandle {
                    name,
                    addr: 0,
                    size: size as u64,
                    filepos: data_offset,
                    align: 0,
                    flags: SectionFlags::HAS_CONTENTS,
                },
            });
        })?;

        Ok(Self { flavors })
    }

    /// Encoded `(flavor, count)` pairs as `(file offset, bytes)` writes.
    ///
    /// The state data itself is not buffered and is not part of the result.
    pub fn encode_pairs(&self, order: ByteOrder) -> Vec<(u64, [u8; 8])> {
        self.flavors
            .iter()
            .map(|f| {
                let mut raw = [0u8; 8];
                order.write_u32_at(&mut raw, 0, f.flavor);
                order.write_u32_at(&mut raw, 4, f.size / 4);
                (f.offset - 8, raw)
            })
            .collect()
    }

    /// Reads the program counter from the general-register flavor.
    ///
    /// Returns `None` when the architecture has no known register layout or
    /// no general-register flavor is present.
    pub fn entry_point<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        order: ByteOrder,
        arch: Option<Architecture>,
    ) -> Result<Option<u32>> {
        // (flavor, word index of the program counter)
        let (flavor, pc_word) = match arch {
            Some(Architecture::I386) => (I386_THREAD_STATE, 10),
            Some(Architecture::PowerPc) => (PPC_THREAD_STATE, 0),
            _ => return Ok(None),
        };

        let Some(state) = self.flavors.iter().find(|f| f.flavor == flavor) else {
            return Ok(None);
        };
        if state.size < (pc_word + 1) * 4 {
            return Ok(None);
        }

        let mut raw = [0u8; 4];
        source.read_at(state.offset + pc_word as u64 * 4, &mut raw)?;
        Ok(Some(order.read_u32(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::thread_command;

    #[test]
    fn test_flavor_names() {
        assert_eq!(flavor_name(Some(Architecture::I386), 1), "i386_THREAD_STATE");
        assert_eq!(flavor_name(Some(Architecture::PowerPc), 4), "PPC_VECTOR_STATE");
        assert_eq!(flavor_name(Some(Architecture::PowerPc), 99), "UNKNOWN");
        assert_eq!(flavor_name(Some(Architecture::Sparc), 1), "UNKNOWN");
        assert_eq!(flavor_name(None, 1), "UNKNOWN");
    }

    #[test]
    fn test_parse_two_flavors() {
        let order = ByteOrder::Big;
        let data = thread_command(order, LC_UNIXTHREAD, &[(1, vec![0xAA; 16]), (2, vec![0xBB; 8])]);
        let thread = ThreadCommand::parse(&data, 100, order, Some(Architecture::PowerPc), "LC_UNIXTHREAD")
            .unwrap();

        assert_eq!(thread.flavors.len(), 2);
        assert_eq!(thread.flavors[0].flavor, 1);
        assert_eq!(thread.flavors[0].offset, 100 + 16);
        assert_eq!(thread.flavors[0].size, 16);
        assert_eq!(thread.flavors[0].handle.name, "LC_UNIXTHREAD.PPC_THREAD_STATE.0");
        assert_eq!(thread.flavors[1].offset, 100 + 16 + 16 + 8);
        assert_eq!(thread.flavors[1].handle.name, "LC_UNIXTHREAD.PPC_FLOAT_STATE.1");

        let pairs = thread.encode_pairs(order);
        assert_eq!(pairs[0].0, 108);
        assert_eq!(&pairs[0].1[..], &data[8..16]);
        assert_eq!(pairs[1].0, 132);
        assert_eq!(&pairs[1].1[..], &data[32..40]);
    }

    #[test]
    fn test_overrun_is_truncated() {
        let order = ByteOrder::Little;
        let mut data = thread_command(order, LC_THREAD, &[(1, vec![0; 16])]);
        // Claim 5 words where only 4 exist.
        order.write_u32_at(&mut data, 12, 5);
        let err = ThreadCommand::parse(&data, 0, order, Some(Architecture::I386), "LC_THREAD").unwrap_err();
        assert!(matches!(err, Error::Truncated { what: "thread state", .. }));

        // A huge count must not be trusted either.
        order.write_u32_at(&mut data, 12, u32::MAX);
        assert!(ThreadCommand::parse(&data, 0, order, None, "LC_THREAD").is_err());
    }

    #[test]
    fn test_trailing_partial_pair() {
        let order = ByteOrder::Big;
        let mut data = thread_command(order, LC_THREAD, &[(1, vec![0; 4])]);
        data.extend_from_slice(&[0, 0, 0, 1]);
        let total = data.len() as u32;
        order.write_u32_at(&mut data, 4, total);
        let err = ThreadCommand::parse(&data, 0, order, None, "LC_THREAD").unwrap_err();
        assert!(matches!(err, Error::Truncated { what: "thread state", .. }));
    }

    #[test]
    fn test_empty_thread_command() {
        let data = thread_command(ByteOrder::Big, LC_THREAD, &[]);
        let thread = ThreadCommand::parse(&data, 0, ByteOrder::Big, None, "LC_THREAD").unwrap();
        assert!(thread.flavors.is_empty());
    }

    #[test]
    fn test_entry_point_i386() {
        let order = ByteOrder::Little;
        let mut state = vec![0u8; 64];
        order.write_u32_at(&mut state, 40, 0x1F00);
        let data = thread_command(order, LC_UNIXTHREAD, &[(I386_THREAD_STATE, state)]);
        let thread = ThreadCommand::parse(&data, 0, order, Some(Architecture::I386), "LC_UNIXTHREAD").unwrap();

        assert_eq!(
            thread.entry_point(&data, order, Some(Architecture::I386)).unwrap(),
            Some(0x1F00)
        );
        assert_eq!(thread.entry_point(&data, order, Some(Architecture::Sparc)).unwrap(), None);
    }
}
