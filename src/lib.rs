//! machox - A reader and writer for 32-bit Mach-O object files.
//!
//! This library decodes Mach-O files and fat (universal) archives into a
//! structured model and encodes that model back to bytes. It understands the
//! file's structure only: relocations, linking and instruction bytes are left
//! to the caller.
//!
//! # Features
//!
//! - Byte order detected per file from the magic number
//! - Load command table with segments, sections, symbol tables, thread state,
//!   dylib and dylinker commands
//! - Lazy symbol table decoding with bounds-checked names
//! - Generic section handles for every addressable range
//! - Byte-for-byte round trip of fully recognized files
//! - Fat archives with lazily decoded members
//!
//! # Example
//!
//! ```no_run
//! use machox::{source::map_file, MachOFile};
//!
//! fn main() -> machox::Result<()> {
//!     let mut file = MachOFile::open(map_file("/path/to/hello.o")?)?;
//!
//!     for segment in file.segments() {
//!         println!("{}", segment);
//!     }
//!
//!     let symbols = file.materialize_symbols()?.to_vec();
//!     for symbol in &symbols {
//!         println!("{} {}", file.symbol_name(symbol)?, symbol.class);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fat;
pub mod macho;
pub mod source;
pub mod util;

#[cfg(test)]
mod testutil;

// Re-export main types
pub use error::{Error, Result};
pub use fat::{FatArchive, FatMember};
pub use macho::{Architecture, FileHeader, LoadCommand, MachOFile, SectionHandle, Symbol};
pub use source::{ByteSink, ByteSource, FileSource, Region};
pub use util::ByteOrder;

use macho::constants::MH_CORE;

/// Byte order a probe accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Target {
    /// Big-endian files only
    BigEndian,
    /// Little-endian files only
    LittleEndian,
    /// Either byte order
    #[default]
    Any,
}

impl Target {
    /// Returns true if a file in `order` matches this target.
    pub fn accepts(self, order: ByteOrder) -> bool {
        match self {
            Target::BigEndian => order == ByteOrder::Big,
            Target::LittleEndian => order == ByteOrder::Little,
            Target::Any => true,
        }
    }
}

/// File kinds a probe accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileKind {
    /// Everything except core files
    Object,
    /// Core files only
    Core,
    /// Any file type
    #[default]
    Any,
}

impl FileKind {
    /// Returns true if a file of type `filetype` matches this kind.
    pub fn accepts(self, filetype: u32) -> bool {
        match self {
            FileKind::Object => filetype != MH_CORE,
            FileKind::Core => filetype == MH_CORE,
            FileKind::Any => true,
        }
    }
}

/// Options for decoding a Mach-O file.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Accepted byte order
    pub target: Target,
    /// Accepted file kind
    pub kind: FileKind,
    /// Decode the symbol table during the probe instead of on first use
    pub eager_symbols: bool,
}

impl DecodeOptions {
    /// Sets the accepted byte order.
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Sets the accepted file kind.
    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets whether symbols are decoded during the probe.
    pub fn with_eager_symbols(mut self, eager: bool) -> Self {
        self.eager_symbols = eager;
        self
    }

    /// The candidate list of a host trying every Mach-O flavor in turn:
    /// big-endian objects, little-endian objects, then core files.
    pub fn all_targets() -> Vec<DecodeOptions> {
        [Target::BigEndian, Target::LittleEndian]
            .into_iter()
            .map(|target| DecodeOptions::default().with_target(target).with_kind(FileKind::Object))
            .chain(std::iter::once(
                DecodeOptions::default().with_kind(FileKind::Core),
            ))
            .collect()
    }
}

/// Tries each candidate in order and returns the first session that decodes.
pub fn probe_any<S: ByteSource>(source: S, candidates: &[DecodeOptions]) -> Result<MachOFile<S>> {
    MachOFile::probe_any(source, candidates)
}
