//! Error types for the Mach-O codec.
//!
//! The variants separate "this is not a Mach-O file" from "this Mach-O file is
//! corrupt" from "this file uses something the codec cannot write back", so a
//! caller probing several formats can tell the three apart.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for Mach-O decode and encode operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Format Errors ====================
    #[error("not a Mach-O file for this target")]
    NotThisFormat,

    #[error("truncated {what}: {len} bytes at offset {offset:#x} exceed the available data")]
    Truncated {
        what: &'static str,
        offset: u64,
        len: u64,
    },

    #[error("unsupported CPU type {cputype:#x}/{cpusubtype:#x}")]
    UnsupportedCpuType { cputype: u32, cpusubtype: u32 },

    #[error("load command at offset {offset:#x} overflows the command area ({reason})")]
    LoadCommandOverflow { offset: u64, reason: &'static str },

    #[error("duplicate {kind} load command at offset {offset:#x}")]
    DuplicateLoadCommand { kind: &'static str, offset: u64 },

    // ==================== Symbol Errors ====================
    #[error("symbol {index} has string table offset {strx} beyond string table size {strsize}")]
    MalformedSymbolName { index: u32, strx: u32, strsize: u32 },

    #[error("symbol {index} references section {section} but only {count} sections exist")]
    InvalidSectionReference { index: u32, section: u8, count: usize },

    #[error("symbol index {index} out of bounds (nsyms: {count})")]
    SymbolIndexOutOfBounds { index: u32, count: u32 },

    #[error("indirect symbol index {index} out of bounds (nindirectsyms: {count})")]
    IndirectSymbolOutOfBounds { index: u32, count: u32 },

    #[error("file has no symbol table")]
    NoSymbolTable,

    // ==================== Load Command Errors ====================
    #[error("unrecognized load command {cmd:#x} at offset {offset:#x}")]
    UnrecognizedLoadCommand { cmd: u32, offset: u64 },

    #[error("cannot encode load command {cmd:#x} at offset {offset:#x}: payload was never decoded")]
    CannotEncode { cmd: u32, offset: u64 },

    // ==================== Fat Archive Errors ====================
    #[error("fat member {index} out of bounds (nfat_arch: {count})")]
    MemberOutOfBounds { index: usize, count: usize },
}

/// A specialized Result type for Mach-O operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error means "try the next candidate format".
    #[inline]
    pub fn is_not_this_format(&self) -> bool {
        matches!(self, Error::NotThisFormat)
    }

    /// Returns true if this error indicates a recoverable condition.
    ///
    /// Recoverable errors are reported as diagnostics during a scan and
    /// never abort it.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotThisFormat
                | Error::InvalidSectionReference { .. }
                | Error::UnrecognizedLoadCommand { .. }
        )
    }

    /// Creates a truncation error.
    #[inline]
    pub fn truncated(what: &'static str, offset: u64, len: u64) -> Self {
        Error::Truncated { what, offset, len }
    }
}
