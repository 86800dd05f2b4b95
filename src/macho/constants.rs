//! Mach-O constants and flags (32-bit layout).

use bitflags::bitflags;

// =============================================================================
// Magic Numbers
// =============================================================================

/// 32-bit Mach-O magic, as read in the file's own byte order.
pub const MH_MAGIC: u32 = 0xFEEDFACE;
/// 32-bit Mach-O magic read in the opposite byte order.
pub const MH_CIGAM: u32 = 0xCEFAEDFE;
/// 64-bit Mach-O magic (recognized only to be rejected).
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;

/// Fat archive magic, always stored big-endian.
pub const FAT_MAGIC: u32 = 0xCAFEBABE;
/// Fat archive magic read in the wrong byte order.
pub const FAT_CIGAM: u32 = 0xBEBAFECA;

// =============================================================================
// Fixed Record Sizes
// =============================================================================

/// Size of the 32-bit `mach_header`.
pub const HEADER_SIZE: usize = 28;
/// Size of the universal `(cmd, cmdsize)` prefix.
pub const LOAD_COMMAND_PREFIX_SIZE: usize = 8;
/// Size of `segment_command` including its prefix.
pub const SEGMENT_COMMAND_SIZE: usize = 56;
/// Size of one `section` record.
pub const SECTION_SIZE: usize = 68;
/// Size of `symtab_command` including its prefix.
pub const SYMTAB_COMMAND_SIZE: usize = 24;
/// Size of `dysymtab_command` including its prefix.
pub const DYSYMTAB_COMMAND_SIZE: usize = 80;
/// Size of one `nlist` record.
pub const NLIST_SIZE: usize = 12;
/// Size of one relocation entry.
pub const RELOCATION_INFO_SIZE: u64 = 8;
/// Size of one table-of-contents entry.
pub const TOC_ENTRY_SIZE: u64 = 8;
/// Size of one 32-bit module table entry.
pub const MODULE_TABLE_ENTRY_SIZE: u64 = 52;
/// Size of `fat_header`.
pub const FAT_HEADER_SIZE: usize = 8;
/// Size of one `fat_arch` entry.
pub const FAT_ARCH_SIZE: usize = 20;

// =============================================================================
// File Types
// =============================================================================

/// Relocatable object file
pub const MH_OBJECT: u32 = 0x1;
/// Demand paged executable
pub const MH_EXECUTE: u32 = 0x2;
/// Fixed VM shared library
pub const MH_FVMLIB: u32 = 0x3;
/// Core file
pub const MH_CORE: u32 = 0x4;
/// Preloaded executable
pub const MH_PRELOAD: u32 = 0x5;
/// Dynamically bound shared library
pub const MH_DYLIB: u32 = 0x6;
/// Dynamic link editor
pub const MH_DYLINKER: u32 = 0x7;
/// Dynamically bound bundle
pub const MH_BUNDLE: u32 = 0x8;

// =============================================================================
// CPU Types
// =============================================================================

/// 64-bit ABI flag in `cputype`
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

/// Wildcard CPU type
pub const CPU_TYPE_ANY: u32 = 0xFFFF_FFFF;
/// VAX
pub const CPU_TYPE_VAX: u32 = 1;
/// Motorola 680x0
pub const CPU_TYPE_MC680X0: u32 = 6;
/// Intel x86
pub const CPU_TYPE_I386: u32 = 7;
/// Intel x86-64
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_I386 | CPU_ARCH_ABI64;
/// MIPS
pub const CPU_TYPE_MIPS: u32 = 8;
/// Motorola 98000
pub const CPU_TYPE_MC98000: u32 = 10;
/// HP PA-RISC
pub const CPU_TYPE_HPPA: u32 = 11;
/// ARM
pub const CPU_TYPE_ARM: u32 = 12;
/// ARM64
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
/// Motorola 88000
pub const CPU_TYPE_MC88000: u32 = 13;
/// SPARC
pub const CPU_TYPE_SPARC: u32 = 14;
/// Intel i860
pub const CPU_TYPE_I860: u32 = 15;
/// Alpha
pub const CPU_TYPE_ALPHA: u32 = 16;
/// PowerPC
pub const CPU_TYPE_POWERPC: u32 = 18;
/// PowerPC 64
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

// =============================================================================
// Load Commands
// =============================================================================

/// High bit of `cmd`: the dynamic linker must understand this command
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

/// Segment of this file
pub const LC_SEGMENT: u32 = 0x1;
/// Link-edit symbol table info
pub const LC_SYMTAB: u32 = 0x2;
/// Link-edit gdb symbol table info (obsolete)
pub const LC_SYMSEG: u32 = 0x3;
/// Thread
pub const LC_THREAD: u32 = 0x4;
/// Unix thread (includes a stack)
pub const LC_UNIXTHREAD: u32 = 0x5;
/// Load a fixed VM shared library
pub const LC_LOADFVMLIB: u32 = 0x6;
/// Fixed VM shared library identification
pub const LC_IDFVMLIB: u32 = 0x7;
/// Object identification info (obsolete)
pub const LC_IDENT: u32 = 0x8;
/// Fixed VM file inclusion
pub const LC_FVMFILE: u32 = 0x9;
/// Prepage command
pub const LC_PREPAGE: u32 = 0xA;
/// Dynamic link-edit symbol table info
pub const LC_DYSYMTAB: u32 = 0xB;
/// Load a dynamically linked shared library
pub const LC_LOAD_DYLIB: u32 = 0xC;
/// Dynamically linked shared library identification
pub const LC_ID_DYLIB: u32 = 0xD;
/// Load a dynamic linker
pub const LC_LOAD_DYLINKER: u32 = 0xE;
/// Dynamic linker identification
pub const LC_ID_DYLINKER: u32 = 0xF;
/// Modules prebound for a dynamically linked shared library
pub const LC_PREBOUND_DYLIB: u32 = 0x10;
/// Image routines
pub const LC_ROUTINES: u32 = 0x11;
/// Sub framework
pub const LC_SUB_FRAMEWORK: u32 = 0x12;
/// Sub umbrella
pub const LC_SUB_UMBRELLA: u32 = 0x13;
/// Sub client
pub const LC_SUB_CLIENT: u32 = 0x14;
/// Sub library
pub const LC_SUB_LIBRARY: u32 = 0x15;
/// Two-level namespace lookup hints
pub const LC_TWOLEVEL_HINTS: u32 = 0x16;
/// Prebind checksum
pub const LC_PREBIND_CKSUM: u32 = 0x17;
/// Load a weakly linked dylib (stored with `LC_REQ_DYLD`)
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18;

// =============================================================================
// Section Types and Attributes
// =============================================================================

/// Mask for the type byte of a section's `flags`
pub const SECTION_TYPE: u32 = 0x0000_00FF;
/// Mask for the attribute bits of a section's `flags`
pub const SECTION_ATTRIBUTES: u32 = 0xFFFF_FF00;

/// Regular section
pub const S_REGULAR: u32 = 0x0;
/// Zero fill on demand
pub const S_ZEROFILL: u32 = 0x1;
/// Literal C strings
pub const S_CSTRING_LITERALS: u32 = 0x2;
/// 4-byte literals
pub const S_4BYTE_LITERALS: u32 = 0x3;
/// 8-byte literals
pub const S_8BYTE_LITERALS: u32 = 0x4;
/// Pointers to literals
pub const S_LITERAL_POINTERS: u32 = 0x5;
/// Non-lazy symbol pointers
pub const S_NON_LAZY_SYMBOL_POINTERS: u32 = 0x6;
/// Lazy symbol pointers
pub const S_LAZY_SYMBOL_POINTERS: u32 = 0x7;
/// Symbol stubs
pub const S_SYMBOL_STUBS: u32 = 0x8;
/// Initialization function pointers
pub const S_MOD_INIT_FUNC_POINTERS: u32 = 0x9;
/// Termination function pointers
pub const S_MOD_TERM_FUNC_POINTERS: u32 = 0xA;
/// Coalesced symbols
pub const S_COALESCED: u32 = 0xB;

/// Only true machine instructions
pub const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
/// Debug section
pub const S_ATTR_DEBUG: u32 = 0x0200_0000;
/// Some machine instructions
pub const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;
/// External relocation entries
pub const S_ATTR_EXT_RELOC: u32 = 0x0000_0200;
/// Local relocation entries
pub const S_ATTR_LOC_RELOC: u32 = 0x0000_0100;

// =============================================================================
// VM Protections
// =============================================================================

/// Readable
pub const VM_PROT_READ: u32 = 0x1;
/// Writable
pub const VM_PROT_WRITE: u32 = 0x2;
/// Executable
pub const VM_PROT_EXECUTE: u32 = 0x4;

// =============================================================================
// Symbol Types
// =============================================================================

/// Any of these bits set: a symbolic debugging entry
pub const N_STAB: u8 = 0xE0;
/// Private external bit
pub const N_PEXT: u8 = 0x10;
/// Mask for the type bits
pub const N_TYPE: u8 = 0x0E;
/// External bit
pub const N_EXT: u8 = 0x01;

/// Undefined
pub const N_UNDF: u8 = 0x0;
/// Absolute
pub const N_ABS: u8 = 0x2;
/// Defined in section number `n_sect`
pub const N_SECT: u8 = 0xE;
/// Prebound undefined
pub const N_PBUD: u8 = 0xC;
/// Indirect
pub const N_INDR: u8 = 0xA;

/// Section number meaning "no section"
pub const NO_SECT: u8 = 0;
/// Highest valid section number
pub const MAX_SECT: u8 = 255;

// =============================================================================
// Indirect Symbol Table
// =============================================================================

/// Indirect entry for a local symbol that was stripped
pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x8000_0000;
/// Indirect entry for an absolute symbol that was stripped
pub const INDIRECT_SYMBOL_ABS: u32 = 0x4000_0000;

// =============================================================================
// Thread State Flavors
// =============================================================================

/// i386 general registers
pub const I386_THREAD_STATE: u32 = 1;
/// i386 floating point registers
pub const I386_FLOAT_STATE: u32 = 2;
/// i386 exception state
pub const I386_EXCEPTION_STATE: u32 = 3;
/// i386 general registers (new layout)
pub const I386_NEW_THREAD_STATE: u32 = 4;
/// i386 debug registers
pub const I386_DEBUG_STATE: u32 = 10;

/// PowerPC general registers
pub const PPC_THREAD_STATE: u32 = 1;
/// PowerPC floating point registers
pub const PPC_FLOAT_STATE: u32 = 2;
/// PowerPC exception state
pub const PPC_EXCEPTION_STATE: u32 = 3;
/// PowerPC AltiVec registers
pub const PPC_VECTOR_STATE: u32 = 4;
/// PowerPC 64-bit general registers
pub const PPC_THREAD_STATE64: u32 = 5;
/// PowerPC 64-bit exception state
pub const PPC_EXCEPTION_STATE64: u32 = 6;

// =============================================================================
// Header Flags
// =============================================================================

bitflags! {
    /// Mach-O header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MachOFlags: u32 {
        /// No undefined references
        const NOUNDEFS = 0x1;
        /// Output of an incremental link
        const INCRLINK = 0x2;
        /// Input for the dynamic linker
        const DYLDLINK = 0x4;
        /// Undefined references bound by the dynamic linker at load time
        const BINDATLOAD = 0x8;
        /// Dynamic undefined references are prebound
        const PREBOUND = 0x10;
        /// Read-only and read-write segments are split
        const SPLIT_SEGS = 0x20;
        /// Shared library init routine runs lazily
        const LAZY_INIT = 0x40;
        /// Two-level namespace bindings
        const TWOLEVEL = 0x80;
        /// Forces flat namespace bindings
        const FORCE_FLAT = 0x100;
        /// No multiple definitions of symbols in sub-images
        const NOMULTIDEFS = 0x200;
        /// Do not notify the prebinding agent
        const NOFIXPREBINDING = 0x400;
    }
}
