//! 32-bit Mach-O file handling.
//!
//! This module decodes the header, the load command table and the tables the
//! commands point at, and re-encodes them. [`MachOFile`] ties the pieces
//! together into one decode session.

pub mod constants;

mod commands;
mod context;
mod dylib;
mod dysymtab;
mod handle;
mod header;
mod segment;
mod symtab;
mod thread;

pub use commands::{command_name, read_load_commands, write_load_commands, LoadCommand, Payload};
pub use context::MachOFile;
pub use dylib::{DylibCommand, DylinkerCommand, NameRef, PreboundDylibCommand};
pub use dysymtab::{Dysymtab, IndirectEntry};
pub use handle::{SectionFlags, SectionHandle};
pub use header::{Architecture, FileHeader};
pub use segment::{Section, Segment};
pub use symtab::{
    classify, FlatSection, StringTable, Symbol, SymbolClass, SymbolFlags, SymbolName, Symtab,
};
pub use thread::{flavor_name, ThreadCommand, ThreadFlavor};
