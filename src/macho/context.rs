//! An open Mach-O decode session.
//!
//! [`MachOFile::probe`] decodes the header and the whole load command table in
//! one pass. The pass builds into a scratch [`Scan`] that only becomes a live
//! session once every command decoded; on failure the scratch state is simply
//! dropped and the source is left untouched for the next candidate.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::commands::{command_name, read_load_commands, write_load_commands, LoadCommand, Payload};
use super::constants::*;
use super::dylib::{DylibCommand, DylinkerCommand};
use super::dysymtab::{Dysymtab, IndirectEntry};
use super::handle::SectionHandle;
use super::header::{Architecture, FileHeader};
use super::segment::{Section, Segment};
use super::symtab::{FlatSection, Symbol, Symtab};
use crate::error::{Error, Result};
use crate::source::{check_range, ByteSink, ByteSource};
use crate::util::ByteOrder;
use crate::DecodeOptions;

/// Largest chunk copied at once when a source is not memory resident.
const COPY_CHUNK: u64 = 1 << 20;

// =============================================================================
// Scan
// =============================================================================

/// Everything a probe decodes, before it is attached to its source.
#[derive(Debug)]
struct Scan {
    header: FileHeader,
    arch: Architecture,
    commands: Vec<LoadCommand>,
    segments: Vec<usize>,
    segment_indices: HashMap<String, usize>,
    sections: Vec<FlatSection>,
}

impl Scan {
    fn run<S: ByteSource + ?Sized>(source: &S, options: &DecodeOptions) -> Result<Self> {
        if source.len() < FileHeader::SIZE as u64 {
            return Err(Error::NotThisFormat);
        }
        let mut raw = [0u8; HEADER_SIZE];
        source.read_at(0, &mut raw)?;
        let header = FileHeader::decode(&raw)?;

        if !options.target.accepts(header.byte_order) {
            debug!("{} file rejected by target {:?}", header.byte_order, options.target);
            return Err(Error::NotThisFormat);
        }
        if !options.kind.accepts(header.filetype) {
            debug!("{} file rejected by kind {:?}", header.filetype_name(), options.kind);
            return Err(Error::NotThisFormat);
        }

        let arch = header.require_architecture()?;
        let mut commands = read_load_commands(source, &header, Some(arch))?;

        let mut segments = Vec::new();
        let mut segment_indices = HashMap::new();
        let mut sections = Vec::new();
        for (index, command) in commands.iter().enumerate() {
            if let Payload::Segment(seg) = &command.payload {
                let segment = segments.len();
                for (section, sect) in seg.sections.iter().enumerate() {
                    sections.push(FlatSection {
                        segment,
                        section,
                        addr: sect.addr,
                    });
                }
                segment_indices.entry(seg.name().to_string()).or_insert(index);
                segments.push(index);
            }
        }

        if options.eager_symbols {
            let order = header.byte_order;
            if let Some(symtab) = commands.iter_mut().find_map(|c| match &mut c.payload {
                Payload::Symtab(symtab) => Some(symtab),
                _ => None,
            }) {
                symtab.materialize(source, order, &sections)?;
            }
        }

        debug!(
            "decoded {} commands, {} segments, {} sections",
            commands.len(),
            segments.len(),
            sections.len()
        );

        Ok(Self {
            header,
            arch,
            commands,
            segments,
            segment_indices,
            sections,
        })
    }
}

// =============================================================================
// Mach-O File
// =============================================================================

/// A fully decoded 32-bit Mach-O file over a byte source.
pub struct MachOFile<S> {
    source: S,
    header: FileHeader,
    arch: Architecture,
    commands: Vec<LoadCommand>,
    /// Command indices of the LC_SEGMENT commands, in file order
    segments: Vec<usize>,
    /// Segment lookup by name (first segment of each name)
    segment_indices: HashMap<String, usize>,
    /// Sections across all segments, indexed by symbol section numbers
    sections: Vec<FlatSection>,
}

impl<S: ByteSource> MachOFile<S> {
    /// Decodes `source` as a Mach-O file with default options.
    pub fn open(source: S) -> Result<Self> {
        Self::probe(source, &DecodeOptions::default())
    }

    /// Decodes `source`, checking it against one candidate target.
    ///
    /// Returns `Error::NotThisFormat` when the magic, byte order or file kind
    /// does not match. Other errors mean the file claims to be this format but
    /// is damaged or unsupported.
    pub fn probe(source: S, options: &DecodeOptions) -> Result<Self> {
        let scan = Scan::run(&source, options)?;
        Ok(Self::install(source, scan))
    }

    /// Tries each candidate in order and returns the first successful session.
    ///
    /// Fails with the last candidate's error, or `NotThisFormat` if there are
    /// no candidates.
    pub fn probe_any(source: S, candidates: &[DecodeOptions]) -> Result<Self> {
        let mut last = Error::NotThisFormat;
        for options in candidates {
            match Scan::run(&source, options) {
                Ok(scan) => return Ok(Self::install(source, scan)),
                Err(e) => {
                    debug!("candidate {:?} rejected: {}", options, e);
                    last = e;
                }
            }
        }
        Err(last)
    }

    fn install(source: S, scan: Scan) -> Self {
        Self {
            source,
            header: scan.header,
            arch: scan.arch,
            commands: scan.commands,
            segments: scan.segments,
            segment_indices: scan.segment_indices,
            sections: scan.sections,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The decoded header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// The file's architecture.
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// The file's byte order.
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// The load command table, in file order.
    pub fn commands(&self) -> &[LoadCommand] {
        &self.commands
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Consumes the session and returns its source.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Iterates over the segments in file order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter_map(|&i| match &self.commands[i].payload {
            Payload::Segment(seg) => Some(seg),
            _ => None,
        })
    }

    /// The flattened cross-segment section list.
    pub fn flat_sections(&self) -> &[FlatSection] {
        &self.sections
    }

    /// Resolves a 0-based flattened section index to its section record.
    pub fn flat_section(&self, index: usize) -> Option<&Section> {
        let flat = self.sections.get(index)?;
        let command = self.segments.get(flat.segment)?;
        match &self.commands[*command].payload {
            Payload::Segment(seg) => seg.sections.get(flat.section),
            _ => None,
        }
    }

    /// The first LC_SYMTAB command, if any.
    pub fn symtab(&self) -> Option<&Symtab> {
        self.commands.iter().find_map(|c| match &c.payload {
            Payload::Symtab(symtab) => Some(symtab),
            _ => None,
        })
    }

    /// The first LC_DYSYMTAB command, if any.
    pub fn dysymtab(&self) -> Option<&Dysymtab> {
        self.commands.iter().find_map(|c| match &c.payload {
            Payload::Dysymtab(dysymtab) => Some(dysymtab),
            _ => None,
        })
    }

    /// Iterates over dylib commands with their command type.
    pub fn dylibs(&self) -> impl Iterator<Item = (u32, &DylibCommand)> {
        self.commands.iter().filter_map(|c| match &c.payload {
            Payload::Dylib(dylib) => Some((c.cmd, dylib)),
            _ => None,
        })
    }

    /// The dynamic linker command, if any.
    pub fn dylinker(&self) -> Option<&DylinkerCommand> {
        self.commands.iter().find_map(|c| match &c.payload {
            Payload::Dylinker(dylinker) => Some(dylinker),
            _ => None,
        })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Returns the command of type `cmd`.
    ///
    /// Fails with `DuplicateLoadCommand` if more than one exists. Kinds that
    /// legitimately repeat (segments, dylibs) should be read from
    /// [`commands`](Self::commands) instead.
    pub fn lookup_command(&self, cmd: u32) -> Result<Option<&LoadCommand>> {
        let mut matches = self.commands.iter().filter(|c| c.cmd == cmd);
        let first = matches.next();
        if let Some(second) = matches.next() {
            return Err(Error::DuplicateLoadCommand {
                kind: command_name(cmd),
                offset: second.offset,
            });
        }
        Ok(first)
    }

    /// Returns a segment by name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        let index = *self.segment_indices.get(name)?;
        match &self.commands[index].payload {
            Payload::Segment(seg) => Some(seg),
            _ => None,
        }
    }

    /// Returns a section by its segment and section names.
    ///
    /// The segment name is the one recorded in the section record, so this
    /// also finds sections of object files whose single segment is unnamed.
    pub fn section(&self, segname: &str, sectname: &str) -> Option<&Section> {
        self.segments()
            .flat_map(|seg| seg.sections.iter())
            .find(|s| s.segment_name() == segname && s.name() == sectname)
    }

    /// Returns the most specific handle whose file range contains `filepos`.
    ///
    /// Sections are preferred over the segments that contain them.
    pub fn lookup_section(&self, filepos: u64) -> Option<&SectionHandle> {
        self.segments()
            .flat_map(|seg| seg.sections.iter())
            .map(|s| &s.handle)
            .find(|h| h.contains_filepos(filepos))
            .or_else(|| {
                self.section_handles()
                    .into_iter()
                    .find(|h| h.contains_filepos(filepos))
            })
    }

    // =========================================================================
    // Section Handles
    // =========================================================================

    /// Every generic section handle of the file, in command order.
    pub fn section_handles(&self) -> Vec<&SectionHandle> {
        let mut handles = Vec::new();
        for command in &self.commands {
            match &command.payload {
                Payload::Segment(seg) => {
                    handles.push(&seg.handle);
                    handles.extend(seg.sections.iter().map(|s| &s.handle));
                }
                Payload::Thread(thread) | Payload::UnixThread(thread) => {
                    handles.extend(thread.flavors.iter().map(|f| &f.handle));
                }
                Payload::Dylib(dylib) => handles.push(&dylib.handle),
                Payload::Dylinker(dylinker) => handles.push(&dylinker.handle),
                _ => {}
            }
        }
        handles
    }

    /// Reads the contents of a handle. Handles without file contents read
    /// as zeroes.
    pub fn read_handle(&self, handle: &SectionHandle) -> Result<Vec<u8>> {
        if !handle.has_contents() {
            return Ok(vec![0u8; handle.size as usize]);
        }
        check_range("section contents", handle.filepos, handle.size, self.source.len())?;
        self.source.read_vec(handle.filepos, handle.size as usize)
    }

    /// Reads the name string of a dylib command.
    pub fn dylib_name(&self, dylib: &DylibCommand) -> Result<String> {
        dylib.name.read(&self.source)
    }

    /// Reads the path of a dynamic linker command.
    pub fn dylinker_name(&self, dylinker: &DylinkerCommand) -> Result<String> {
        dylinker.name.read(&self.source)
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Decodes the whole symbol table, if not done yet.
    ///
    /// Fails with `NoSymbolTable` if the file has no LC_SYMTAB. On failure no
    /// symbols are stored and a later call retries from scratch.
    pub fn materialize_symbols(&mut self) -> Result<&[Symbol]> {
        let order = self.header.byte_order;
        let Self {
            source,
            commands,
            sections,
            ..
        } = self;

        let symtab = commands
            .iter_mut()
            .find_map(|c| match &mut c.payload {
                Payload::Symtab(symtab) => Some(symtab),
                _ => None,
            })
            .ok_or(Error::NoSymbolTable)?;

        symtab.materialize(&*source, order, sections)?;
        Ok(symtab.symbols().unwrap_or_default())
    }

    /// Decoded symbols, if materialized.
    pub fn symbols(&self) -> Option<&[Symbol]> {
        self.symtab().and_then(Symtab::symbols)
    }

    /// Decodes a single symbol without materializing the table.
    pub fn read_symbol(&self, index: u32) -> Result<Symbol> {
        let symtab = self.symtab().ok_or(Error::NoSymbolTable)?;
        if let Some(symbols) = symtab.symbols() {
            return symbols
                .get(index as usize)
                .cloned()
                .ok_or(Error::SymbolIndexOutOfBounds {
                    index,
                    count: symtab.nsyms,
                });
        }

        let order = self.header.byte_order;
        match symtab.string_table() {
            Some(strtab) => symtab.read_symbol(&self.source, strtab, order, index, &self.sections),
            None => {
                let strtab = symtab.read_string_table(&self.source)?;
                symtab.read_symbol(&self.source, &strtab, order, index, &self.sections)
            }
        }
    }

    /// Returns a symbol's name.
    pub fn symbol_name(&self, symbol: &Symbol) -> Result<Cow<'_, str>> {
        let symtab = self.symtab().ok_or(Error::NoSymbolTable)?;
        match symtab.string_table() {
            Some(strtab) => strtab.name(&self.source, symbol.name),
            None => {
                let strtab = symtab.read_string_table(&self.source)?;
                let name = strtab.name(&self.source, symbol.name)?.into_owned();
                Ok(Cow::Owned(name))
            }
        }
    }

    /// Resolves indirect symbol table entry `index`.
    ///
    /// Returns `None` for entries whose symbol was stripped (local or absolute).
    pub fn indirect_symbol(&self, index: u32) -> Result<Option<Symbol>> {
        let dysymtab = self.dysymtab().ok_or(Error::NoSymbolTable)?;
        match dysymtab.indirect_entry(&self.source, self.header.byte_order, index)? {
            IndirectEntry::Symbol(symbol) => self.read_symbol(symbol).map(Some),
            IndirectEntry::Local | IndirectEntry::Absolute | IndirectEntry::LocalAbsolute => Ok(None),
        }
    }

    /// Reads the initial program counter from the first thread command.
    ///
    /// LC_UNIXTHREAD is preferred over LC_THREAD.
    pub fn entry_point(&self) -> Result<Option<u32>> {
        let unix = self.commands.iter().find_map(|c| match &c.payload {
            Payload::UnixThread(thread) => Some(thread),
            _ => None,
        });
        let thread = unix.or_else(|| {
            self.commands.iter().find_map(|c| match &c.payload {
                Payload::Thread(thread) => Some(thread),
                _ => None,
            })
        });

        match thread {
            Some(thread) => thread.entry_point(&self.source, self.header.byte_order, Some(self.arch)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Writer
    // =========================================================================

    /// File ranges the model describes but does not re-encode, as
    /// `(what, offset, len)`.
    fn carried_ranges(&self) -> Vec<(&'static str, u64, u64)> {
        let mut ranges = Vec::new();

        for seg in self.segments() {
            if !seg.is_zerofill() {
                ranges.push(("segment contents", seg.fileoff as u64, seg.filesize as u64));
            }
            for section in &seg.sections {
                if !section.is_zerofill() && section.size > 0 {
                    ranges.push(("section contents", section.offset as u64, section.size as u64));
                }
                let (reloff, relsize) = section.relocation_range();
                if relsize > 0 {
                    ranges.push(("relocations", reloff, relsize));
                }
            }
        }

        if let Some(dysymtab) = self.dysymtab() {
            ranges.extend(dysymtab.table_ranges());
        }

        if let Some(symtab) = self.symtab() {
            if !symtab.is_materialized() {
                let (offset, len) = symtab.symbol_range();
                ranges.push(("symbol table", offset, len));
            }
            if symtab.string_table().is_none() {
                let (offset, len) = symtab.string_range();
                ranges.push(("string table", offset, len));
            }
        }

        ranges.retain(|&(_, _, len)| len > 0);
        ranges
    }

    fn copy_range<W: ByteSink + ?Sized>(
        &self,
        sink: &mut W,
        what: &'static str,
        offset: u64,
        len: u64,
    ) -> Result<()> {
        check_range(what, offset, len, self.source.len())?;

        if let Some(bytes) = self.source.as_bytes() {
            let start = offset as usize;
            return sink.write_at(offset, &bytes[start..start + len as usize]);
        }

        let mut buf = vec![0u8; len.min(COPY_CHUNK) as usize];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(COPY_CHUNK) as usize;
            self.source.read_at(offset + done, &mut buf[..n])?;
            sink.write_at(offset + done, &buf[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    /// Re-encodes the file into `sink`.
    ///
    /// The source is copied verbatim first, so bytes no command describes
    /// (padding, gaps, trailing data) survive. The header, the load commands
    /// and (when decoded) the symbol and string tables are then written over
    /// it from the model. Every range the commands describe must lie within
    /// the source.
    ///
    /// Fails with `CannotEncode` before writing anything if the file has an
    /// unrecognized load command.
    pub fn write_to<W: ByteSink + ?Sized>(&self, sink: &mut W) -> Result<()> {
        if let Some(unknown) = self.commands.iter().find(|c| c.is_unknown()) {
            return Err(Error::CannotEncode {
                cmd: unknown.raw_cmd(),
                offset: unknown.offset,
            });
        }

        let order = self.header.byte_order;

        for (what, offset, len) in self.carried_ranges() {
            check_range(what, offset, len, self.source.len())?;
        }

        // Everything encoded from the model overwrites the verbatim copy.
        self.copy_range(sink, "file contents", 0, self.source.len())?;

        sink.write_at(0, &self.header.encode())?;
        write_load_commands(&self.commands, order, &self.source, sink)?;

        if let Some(symtab) = self.symtab() {
            if let Some(symbols) = symtab.symbols() {
                for (i, symbol) in symbols.iter().enumerate() {
                    let offset = symtab.symoff as u64 + (i * NLIST_SIZE) as u64;
                    sink.write_at(offset, &Symtab::encode_symbol(symbol, order, &self.sections))?;
                }
            }
            if let Some(strtab) = symtab.string_table() {
                sink.write_at(symtab.stroff as u64, strtab.bytes(&self.source)?)?;
            }
        }

        Ok(())
    }

    /// Re-encodes the file into a new buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.source.len() as usize);
        self.write_to(&mut out)?;
        Ok(out)
    }
}

impl<S> fmt::Debug for MachOFile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachOFile")
            .field("header", &self.header)
            .field("commands", &self.commands.len())
            .field("sections", &self.sections.len())
            .finish_non_exhaustive()
    }
}
