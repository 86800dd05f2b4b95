//! The load command table.
//!
//! Commands are packed end to end after the header, each starting with a
//! `(cmd, cmdsize)` prefix. Offsets are a running sum of the sizes, so the
//! table can only be walked front to back.

use std::fmt;

use tracing::{debug, warn};

use super::constants::*;
use super::dylib::{DylibCommand, DylinkerCommand, PreboundDylibCommand};
use super::dysymtab::Dysymtab;
use super::header::{Architecture, FileHeader};
use super::segment::Segment;
use super::symtab::Symtab;
use super::thread::ThreadCommand;
use crate::error::{Error, Result};
use crate::source::{check_range, ByteSink, ByteSource};
use crate::util::ByteOrder;

/// Returns the symbolic name of a load command type (without `LC_REQ_DYLD`).
pub fn command_name(cmd: u32) -> &'static str {
    match cmd {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_SYMSEG => "LC_SYMSEG",
        LC_THREAD => "LC_THREAD",
        LC_UNIXTHREAD => "LC_UNIXTHREAD",
        LC_LOADFVMLIB => "LC_LOADFVMLIB",
        LC_IDFVMLIB => "LC_IDFVMLIB",
        LC_IDENT => "LC_IDENT",
        LC_FVMFILE => "LC_FVMFILE",
        LC_PREPAGE => "LC_PREPAGE",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        LC_ID_DYLINKER => "LC_ID_DYLINKER",
        LC_PREBOUND_DYLIB => "LC_PREBOUND_DYLIB",
        LC_ROUTINES => "LC_ROUTINES",
        LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        LC_SUB_UMBRELLA => "LC_SUB_UMBRELLA",
        LC_SUB_CLIENT => "LC_SUB_CLIENT",
        LC_SUB_LIBRARY => "LC_SUB_LIBRARY",
        LC_TWOLEVEL_HINTS => "LC_TWOLEVEL_HINTS",
        LC_PREBIND_CKSUM => "LC_PREBIND_CKSUM",
        LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
        _ => "LC_UNKNOWN",
    }
}

// =============================================================================
// Load Command
// =============================================================================

/// The decoded payload of a load command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// LC_SEGMENT
    Segment(Segment),
    /// LC_SYMTAB
    Symtab(Symtab),
    /// LC_DYSYMTAB
    Dysymtab(Dysymtab),
    /// LC_THREAD
    Thread(ThreadCommand),
    /// LC_UNIXTHREAD
    UnixThread(ThreadCommand),
    /// LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB, LC_ID_DYLIB
    Dylib(DylibCommand),
    /// LC_LOAD_DYLINKER, LC_ID_DYLINKER
    Dylinker(DylinkerCommand),
    /// LC_PREBOUND_DYLIB
    PreboundDylib(PreboundDylibCommand),
    /// A recognized command whose body is not modeled
    Opaque,
    /// An unrecognized command; only its type, offset and size are known
    Unknown,
}

/// One entry of the load command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommand {
    /// Command type with `LC_REQ_DYLD` masked off
    pub cmd: u32,
    /// Whether the `LC_REQ_DYLD` bit was set
    pub requires_dyld: bool,
    /// File offset of the command
    pub offset: u64,
    /// Encoded size, prefix included
    pub size: u32,
    /// Decoded payload
    pub payload: Payload,
}

impl LoadCommand {
    /// Returns the symbolic name of this command's type.
    pub fn name(&self) -> &'static str {
        command_name(self.cmd)
    }

    /// Returns the raw type word as stored in the file.
    pub fn raw_cmd(&self) -> u32 {
        if self.requires_dyld {
            self.cmd | LC_REQ_DYLD
        } else {
            self.cmd
        }
    }

    /// Returns true if the command was not recognized.
    pub fn is_unknown(&self) -> bool {
        matches!(self.payload, Payload::Unknown)
    }

    /// Offset just past the end of this command.
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }

    /// Number of leading bytes (prefix included) the encoder regenerates from
    /// the model; the rest of the command is carried over from the source.
    fn encoded_len(&self) -> u64 {
        let len = match &self.payload {
            Payload::Segment(seg) => seg.command_size() as usize,
            Payload::Symtab(_) => Symtab::SIZE,
            Payload::Dysymtab(_) => Dysymtab::SIZE,
            Payload::Dylib(_) => DylibCommand::SIZE,
            Payload::Dylinker(_) => DylinkerCommand::SIZE,
            Payload::Thread(_)
            | Payload::UnixThread(_)
            | Payload::PreboundDylib(_)
            | Payload::Opaque
            | Payload::Unknown => LOAD_COMMAND_PREFIX_SIZE,
        };
        (len as u64).min(self.size as u64)
    }

    /// The part of the command carried over verbatim from the source, as
    /// `(offset, len)`.
    pub fn carried_range(&self) -> (u64, u64) {
        let encoded = self.encoded_len();
        (self.offset + encoded, self.size as u64 - encoded)
    }
}

impl fmt::Display for LoadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} offset {:#06x} size {:>5}{}",
            self.name(),
            self.offset,
            self.size,
            if self.requires_dyld { " (req dyld)" } else { "" }
        )
    }
}

// =============================================================================
// Table Reader
// =============================================================================

/// Decodes the whole load command table described by `header`.
///
/// Unrecognized commands are kept as [`Payload::Unknown`] and skipped using
/// their size; every other structural problem aborts the scan.
pub fn read_load_commands<S: ByteSource + ?Sized>(
    source: &S,
    header: &FileHeader,
    arch: Option<Architecture>,
) -> Result<Vec<LoadCommand>> {
    let order = header.byte_order;
    let end_offset = FileHeader::SIZE as u64 + header.sizeofcmds as u64;

    let mut commands = Vec::with_capacity(header.ncmds.min(1024) as usize);
    let mut offset = FileHeader::SIZE as u64;

    for index in 0..header.ncmds as usize {
        if offset + LOAD_COMMAND_PREFIX_SIZE as u64 > end_offset {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "command prefix beyond sizeofcmds",
            });
        }

        let mut prefix = [0u8; LOAD_COMMAND_PREFIX_SIZE];
        source.read_at(offset, &mut prefix)?;
        let raw_cmd = order.read_u32(&prefix);
        let cmdsize = order.read_u32_at(&prefix, 4);

        if (cmdsize as usize) < LOAD_COMMAND_PREFIX_SIZE {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "command size smaller than its prefix",
            });
        }
        if offset + cmdsize as u64 > end_offset {
            return Err(Error::LoadCommandOverflow {
                offset,
                reason: "command extends beyond sizeofcmds",
            });
        }

        check_range("load command", offset, cmdsize as u64, source.len())?;
        let cmd = raw_cmd & !LC_REQ_DYLD;
        let data = source.read_vec(offset, cmdsize as usize)?;
        let payload = parse_payload(cmd, &data, offset, order, arch, index)?;

        if matches!(payload, Payload::Unknown) {
            let err = Error::UnrecognizedLoadCommand { cmd: raw_cmd, offset };
            warn!("{}; skipping {} bytes", err, cmdsize);
        } else {
            debug!("{} at {:#x} ({} bytes)", command_name(cmd), offset, cmdsize);
        }

        commands.push(LoadCommand {
            cmd,
            requires_dyld: raw_cmd & LC_REQ_DYLD != 0,
            offset,
            size: cmdsize,
            payload,
        });
        offset += cmdsize as u64;
    }

    Ok(commands)
}

/// Dispatches one command to its decoder. `data` holds the whole command.
fn parse_payload(
    cmd: u32,
    data: &[u8],
    offset: u64,
    order: ByteOrder,
    arch: Option<Architecture>,
    index: usize,
) -> Result<Payload> {
    let payload = match cmd {
        LC_SEGMENT => Payload::Segment(Segment::parse(data, offset, order)?),
        LC_SYMTAB => Payload::Symtab(Symtab::parse(data, offset, order)?),
        LC_DYSYMTAB => Payload::Dysymtab(Dysymtab::parse(data, offset, order)?),
        LC_THREAD => Payload::Thread(ThreadCommand::parse(data, offset, order, arch, "LC_THREAD")?),
        LC_UNIXTHREAD => Payload::UnixThread(ThreadCommand::parse(
            data,
            offset,
            order,
            arch,
            "LC_UNIXTHREAD",
        )?),
        LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_ID_DYLIB => Payload::Dylib(DylibCommand::parse(
            data,
            offset,
            order,
            format!("{}.{}", command_name(cmd), index),
        )?),
        LC_LOAD_DYLINKER | LC_ID_DYLINKER => Payload::Dylinker(DylinkerCommand::parse(
            data,
            offset,
            order,
            format!("{}.{}", command_name(cmd), index),
        )?),
        LC_PREBOUND_DYLIB => Payload::PreboundDylib(PreboundDylibCommand),
        LC_SYMSEG | LC_LOADFVMLIB | LC_IDFVMLIB | LC_IDENT | LC_FVMFILE | LC_PREPAGE
        | LC_ROUTINES | LC_SUB_FRAMEWORK | LC_SUB_UMBRELLA | LC_SUB_CLIENT | LC_SUB_LIBRARY
        | LC_TWOLEVEL_HINTS | LC_PREBIND_CKSUM => Payload::Opaque,
        _ => Payload::Unknown,
    };
    Ok(payload)
}

// =============================================================================
// Table Writer
// =============================================================================

/// Encodes the load command table at the commands' recorded offsets.
///
/// Bytes of each command that the model does not regenerate (embedded names,
/// register state, bodies of unmodeled commands) are re-read from `source`.
/// An unrecognized command fails with `CannotEncode`.
pub fn write_load_commands<S, W>(
    commands: &[LoadCommand],
    order: ByteOrder,
    source: &S,
    sink: &mut W,
) -> Result<()>
where
    S: ByteSource + ?Sized,
    W: ByteSink + ?Sized,
{
    for command in commands {
        if command.is_unknown() {
            return Err(Error::CannotEncode {
                cmd: command.raw_cmd(),
                offset: command.offset,
            });
        }

        let (carried_offset, carried_len) = command.carried_range();
        if carried_len > 0 {
            let bytes = source.read_vec(carried_offset, carried_len as usize)?;
            sink.write_at(carried_offset, &bytes)?;
        }

        let mut prefix = [0u8; LOAD_COMMAND_PREFIX_SIZE];
        order.write_u32(&mut prefix, command.raw_cmd());
        order.write_u32_at(&mut prefix, 4, command.size);
        sink.write_at(command.offset, &prefix)?;

        let body_offset = command.offset + LOAD_COMMAND_PREFIX_SIZE as u64;
        match &command.payload {
            Payload::Segment(seg) => sink.write_at(body_offset, &seg.encode_body(order))?,
            Payload::Symtab(symtab) => sink.write_at(body_offset, &symtab.encode_body(order))?,
            Payload::Dysymtab(dysymtab) => {
                sink.write_at(body_offset, &dysymtab.encode_body(order))?
            }
            Payload::Thread(thread) | Payload::UnixThread(thread) => {
                for (offset, pair) in thread.encode_pairs(order) {
                    sink.write_at(offset, &pair)?;
                }
            }
            Payload::Dylib(dylib) => sink.write_at(body_offset, &dylib.encode_body(order))?,
            Payload::Dylinker(dylinker) => {
                sink.write_at(body_offset, &dylinker.encode_body(order))?
            }
            Payload::PreboundDylib(_) | Payload::Opaque | Payload::Unknown => {}
        }
    }

    Ok(())
}
