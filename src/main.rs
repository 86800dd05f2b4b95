//! machodump - Inspect and round-trip check 32-bit Mach-O files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use memmap2::Mmap;
use rayon::prelude::*;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use machox::fat::MemberSource;
use machox::macho::constants::{LC_ID_DYLIB, LC_LOAD_WEAK_DYLIB};
use machox::macho::{command_name, Payload};
use machox::source::map_file;
use machox::{ByteSource, DecodeOptions, Error, FatArchive, MachOFile, Region};

/// Every image is decoded through a region, so thin files and fat members
/// share one type.
type Image = MachOFile<MemberSource<Mmap>>;

/// Inspect and round-trip check 32-bit Mach-O files.
#[derive(Parser, Debug)]
#[command(name = "machodump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, global = true, default_value = "1")]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the header of each image (and the fat table, if any)
    Info {
        /// Mach-O file or fat archive
        file: PathBuf,
    },

    /// List load commands
    Commands {
        /// Only show this architecture of a fat archive (e.g., "ppc", "i386")
        #[arg(short, long)]
        arch: Option<String>,

        /// Mach-O file or fat archive
        file: PathBuf,
    },

    /// List section handles
    Sections {
        /// Only show this architecture of a fat archive
        #[arg(short, long)]
        arch: Option<String>,

        /// Mach-O file or fat archive
        file: PathBuf,
    },

    /// List symbols
    Symbols {
        /// Only show this architecture of a fat archive
        #[arg(short, long)]
        arch: Option<String>,

        /// Include debugging (stab) entries
        #[arg(short = 'a', long)]
        all: bool,

        /// Mach-O file or fat archive
        file: PathBuf,
    },

    /// Decode and re-encode files, reporting any byte that differs
    Check {
        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    match cli.command {
        Commands::Info { file } => cmd_info(&file),
        Commands::Commands { arch, file } => cmd_commands(&file, arch.as_deref()),
        Commands::Sections { arch, file } => cmd_sections(&file, arch.as_deref()),
        Commands::Symbols { arch, all, file } => cmd_symbols(&file, arch.as_deref(), all),
        Commands::Check { jobs, files } => cmd_check(&files, jobs),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Opens `path` and calls `f` for every selected image in it.
///
/// A fat archive yields each member (or only the one matching `arch`); a thin
/// file yields itself.
fn for_each_image(
    path: &Path,
    arch: Option<&str>,
    mut f: impl FnMut(&str, &mut Image) -> Result<()>,
) -> Result<()> {
    let map = Arc::new(map_file(path).with_context(|| format!("Failed to open: {}", path.display()))?);

    match FatArchive::probe(Arc::clone(&map), DecodeOptions::default()) {
        Ok(mut fat) => {
            if let Some(wanted) = arch {
                let index = fat
                    .members()
                    .position(|m| m.architecture().map(|a| a.name()) == Some(wanted))
                    .with_context(|| format!("No {} member in {}", wanted, path.display()))?;
                let file = fat.member(index)?;
                let label = format!("{} ({})", path.display(), wanted);
                return f(&label, file);
            }

            let mut prev = None;
            while let Some((index, file)) = fat
                .next_member(prev)
                .with_context(|| format!("Failed to decode member of {}", path.display()))?
            {
                let label = format!("{} ({})", path.display(), file.architecture());
                f(&label, file)?;
                prev = Some(index);
            }
            Ok(())
        }
        Err(Error::NotThisFormat) => {
            let len = ByteSource::len(&map);
            let region = Region::new(map, 0, len)?;
            let mut file = MachOFile::open(region)
                .with_context(|| format!("Failed to decode: {}", path.display()))?;
            f(&path.display().to_string(), &mut file)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to decode: {}", path.display())),
    }
}

fn cmd_info(path: &Path) -> Result<()> {
    let map = map_file(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    if let Ok(fat) = FatArchive::open(map) {
        println!("Fat archive: {} members", fat.len());
        for (i, member) in fat.members().enumerate() {
            println!("  [{:2}] {}", i, member);
        }
        println!();
    }

    for_each_image(path, None, |label, file| {
        let header = file.header();
        println!("{}", label);
        println!("  Architecture: {}", file.architecture());
        println!("  Byte order:   {}", file.byte_order());
        println!("  File type:    {}", header.filetype_name());
        println!("  Commands:     {} ({} bytes)", header.ncmds, header.sizeofcmds);
        println!("  Flags:        {:?}", header.flags());
        println!("  Segments:     {}", file.segments().count());
        println!("  Sections:     {}", file.flat_sections().len());
        if let Some(symtab) = file.symtab() {
            println!("  Symbols:      {}", symtab.nsyms);
        }
        if let Some(entry) = file.entry_point()? {
            println!("  Entry point:  {:#010x}", entry);
        }
        Ok(())
    })
}

fn cmd_commands(path: &Path, arch: Option<&str>) -> Result<()> {
    for_each_image(path, arch, |label, file| {
        println!("{}:", label);
        for (i, command) in file.commands().iter().enumerate() {
            println!("  [{:2}] {}", i, command);
            match &command.payload {
                Payload::Segment(seg) => {
                    println!("       {}", seg);
                    for section in &seg.sections {
                        println!("         {}", section);
                    }
                }
                Payload::Symtab(symtab) => println!(
                    "       symoff {:#x} nsyms {} stroff {:#x} strsize {}",
                    symtab.symoff, symtab.nsyms, symtab.stroff, symtab.strsize
                ),
                Payload::Dysymtab(dysymtab) => {
                    for (name, offset, size) in dysymtab.table_ranges() {
                        println!("       {} at {:#x} ({} bytes)", name, offset, size);
                    }
                }
                Payload::Thread(thread) | Payload::UnixThread(thread) => {
                    for flavor in &thread.flavors {
                        println!("       {} ({} bytes)", flavor.handle.name, flavor.size);
                    }
                }
                Payload::Dylib(dylib) => {
                    let (current, compat) = dylib.versions();
                    let kind = match command.cmd {
                        LC_ID_DYLIB => "id",
                        LC_LOAD_WEAK_DYLIB => "weak",
                        _ => "load",
                    };
                    println!(
                        "       {} {} (current {}, compatibility {})",
                        kind,
                        file.dylib_name(dylib)?,
                        current,
                        compat
                    );
                }
                Payload::Dylinker(dylinker) => {
                    println!("       {}", file.dylinker_name(dylinker)?);
                }
                Payload::Unknown => {
                    warn!("{} at {:#x} cannot be written back", command_name(command.cmd), command.offset);
                }
                Payload::PreboundDylib(_) | Payload::Opaque => {}
            }
        }
        Ok(())
    })
}

fn cmd_sections(path: &Path, arch: Option<&str>) -> Result<()> {
    for_each_image(path, arch, |label, file| {
        println!("{}:", label);
        for handle in file.section_handles() {
            println!("  {}", handle);
        }
        Ok(())
    })
}

fn cmd_symbols(path: &Path, arch: Option<&str>, all: bool) -> Result<()> {
    for_each_image(path, arch, |label, file| {
        println!("{}:", label);
        let symbols = match file.materialize_symbols() {
            Ok(symbols) => symbols.to_vec(),
            Err(Error::NoSymbolTable) => {
                println!("  (no symbol table)");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for symbol in symbols.iter().filter(|s| all || !s.is_stab()) {
            let section = symbol
                .section_index()
                .and_then(|i| file.flat_section(i))
                .map(|s| s.full_name())
                .unwrap_or_default();
            println!(
                "  {:08x} {:<10} {:<16} {}",
                symbol.value,
                symbol.class.to_string(),
                section,
                file.symbol_name(symbol)?
            );
        }
        Ok(())
    })
}

/// Re-encodes one image and returns the offset of the first differing byte.
fn round_trip(file: &mut Image) -> Result<Option<u64>> {
    match file.materialize_symbols() {
        Ok(_) | Err(Error::NoSymbolTable) => {}
        Err(e) => return Err(e.into()),
    }

    let source = file.source();
    let original = source.read_vec(0, source.len() as usize)?;
    let encoded = file.to_vec()?;

    let mismatch = original
        .iter()
        .zip(&encoded)
        .position(|(a, b)| a != b)
        .map(|i| i as u64)
        .or_else(|| (original.len() != encoded.len()).then(|| original.len().min(encoded.len()) as u64));
    Ok(mismatch)
}

fn cmd_check(files: &[PathBuf], jobs: Option<usize>) -> Result<()> {
    let start = Instant::now();

    // Configure thread pool
    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    let failures: Vec<_> = files
        .par_iter()
        .filter_map(|path| {
            let result = for_each_image(path, None, |label, file| {
                match round_trip(file)? {
                    None => info!("{}: ok", label),
                    Some(offset) => bail!("{}: first difference at offset {:#x}", label, offset),
                }
                Ok(())
            });
            result.err().map(|e| (path.clone(), e))
        })
        .collect();

    for (path, err) in &failures {
        error!("{}: {:#}", path.display(), err);
    }

    info!(
        "Checked {}/{} files in {:.2}s",
        files.len() - failures.len(),
        files.len(),
        start.elapsed().as_secs_f64()
    );

    if !failures.is_empty() {
        bail!("{} of {} files failed the round trip", failures.len(), files.len());
    }
    println!("{} files round-trip exactly", files.len());
    Ok(())
}
