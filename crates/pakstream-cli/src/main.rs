use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use pakstream_core::archive::catalog::manifest_path_for;
use pakstream_core::{
    ArchiveBuilder, ArchiveCatalog, BufferPool, CodecKind, ConflictPolicy, DecompressorConfig,
    FileReadStage, FullFileDecompressor, SchedulerOptions, StreamContext, StreamScheduler,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pakstream",
    version,
    about = "Pakstream archive CLI",
    long_about = "Pack directories into streamable archives and read entries back through the decompression stage."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory into an archive plus its JSON catalog.
    Pack {
        /// Source directory to pack.
        input: PathBuf,

        /// Destination archive path (defaults to <input>.pak).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Codec used for entries that shrink when compressed.
        #[arg(long, value_enum, default_value_t = CodecArg::Lz4)]
        codec: CodecArg,

        /// Store every entry uncompressed.
        #[arg(long, default_value_t = false)]
        store: bool,

        /// Conflict policy recorded for every entry.
        #[arg(long, value_enum, default_value_t = PolicyArg::PreferArchive)]
        policy: PolicyArg,
    },
    /// List the entries of an archive.
    List {
        /// Archive to inspect.
        archive: PathBuf,
    },
    /// Read an entry (or a window of it) through the streaming stack.
    Read {
        /// Archive holding the entry.
        archive: PathBuf,

        /// Logical path of the entry.
        entry: PathBuf,

        /// First byte to read.
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes to read (defaults to the rest of the entry).
        #[arg(long)]
        size: Option<u64>,

        /// Write the bytes here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory loose files are resolved against (defaults to the archive's directory).
        #[arg(long)]
        root: Option<PathBuf>,

        /// Maximum concurrent raw archive reads.
        #[arg(long, default_value_t = 2)]
        max_reads: usize,

        /// Maximum concurrent decompression jobs (defaults to CPU count).
        #[arg(long, default_value_t = num_cpus::get())]
        max_jobs: usize,

        /// Device read alignment (supports suffixes K/M, e.g. 4K).
        #[arg(long, default_value = "4K", value_parser = parse_size)]
        alignment: usize,

        /// Print stage statistics to stderr after the read.
        #[arg(long, default_value_t = false)]
        stats: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    Lz4,
    Zstd,
}

impl From<CodecArg> for CodecKind {
    fn from(value: CodecArg) -> Self {
        match value {
            CodecArg::Lz4 => CodecKind::Lz4,
            CodecArg::Zstd => CodecKind::Zstd,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    PreferArchive,
    PreferLooseFile,
    ArchiveOnly,
}

impl From<PolicyArg> for ConflictPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::PreferArchive => ConflictPolicy::PreferArchive,
            PolicyArg::PreferLooseFile => ConflictPolicy::PreferLooseFile,
            PolicyArg::ArchiveOnly => ConflictPolicy::ArchiveOnly,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            input,
            output,
            codec,
            store,
            policy,
        } => {
            let codec = if store { CodecKind::Stored } else { codec.into() };
            pack_command(input, output, codec, policy.into())?
        }
        Commands::List { archive } => list_command(&archive)?,
        Commands::Read {
            archive,
            entry,
            offset,
            size,
            output,
            root,
            max_reads,
            max_jobs,
            alignment,
            stats,
        } => read_command(
            &archive,
            entry,
            offset,
            size,
            output,
            root,
            DecompressorConfig::new(max_reads, max_jobs, alignment as u64),
            stats,
        )?,
    }

    Ok(())
}

fn pack_command(
    input: PathBuf,
    output: Option<PathBuf>,
    codec: CodecKind,
    policy: ConflictPolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = output.unwrap_or_else(|| default_output_path(&input));
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let started_at = Instant::now();
    let mut builder = ArchiveBuilder::create(&output_path, codec)?.with_conflict_policy(policy);
    let files = builder.add_directory(&input)?;
    let manifest = builder.finish()?;

    let uncompressed: u64 = manifest.entries.iter().map(|entry| entry.uncompressed_size).sum();
    let compressed: u64 = manifest.entries.iter().map(|entry| entry.compressed_size).sum();
    let stored = manifest
        .entries
        .iter()
        .filter(|entry| entry.codec == CodecKind::Stored)
        .count();
    let ratio = if uncompressed == 0 {
        1.0
    } else {
        compressed as f64 / uncompressed as f64
    };

    println!("Packed {}", input.display());
    println!("  archive:      {}", output_path.display());
    println!("  catalog:      {}", manifest_path_for(&output_path).display());
    println!("  entries:      {files} ({stored} stored)");
    println!(
        "  size:         {} -> {} ({:.1}%)",
        format_bytes(uncompressed),
        format_bytes(compressed),
        ratio * 100.0
    );
    println!("  elapsed:      {}", format_duration(started_at.elapsed()));
    Ok(())
}

fn list_command(archive: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = ArchiveCatalog::open(archive)?;
    let mut entries = catalog.entries();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    println!("{} ({} entries)", catalog.archive_path().display(), catalog.len());
    for entry in entries {
        println!(
            "  {:<6} {:>12} {:>12}  {}",
            entry.codec.as_str(),
            format_bytes(entry.compressed_size),
            format_bytes(entry.uncompressed_size),
            entry.path
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn read_command(
    archive: &Path,
    entry: PathBuf,
    offset: u64,
    size: Option<u64>,
    output: Option<PathBuf>,
    root: Option<PathBuf>,
    config: DecompressorConfig,
    print_stats: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = ArchiveCatalog::open(archive)?;
    let root = root.unwrap_or_else(|| default_root(archive));

    let context = StreamContext::new();
    let pool = Arc::new(BufferPool::new(0, config.max_reads.max(1) * 2));
    let stage = FullFileDecompressor::new(config, Arc::new(catalog), Arc::clone(&pool), context.waker())?
        .with_next(Box::new(FileReadStage::new(root)));
    let mut scheduler =
        StreamScheduler::with_options(context, Box::new(stage), SchedulerOptions::default());

    let started_at = Instant::now();
    let total = scheduler.file_size(entry.clone())?;
    let size = size.unwrap_or_else(|| total.saturating_sub(offset));
    let bytes = scheduler.read_range(entry.clone(), offset, size)?;
    let elapsed = started_at.elapsed();
    scheduler.run_until_idle(scheduler.options().request_timeout)?;

    match output {
        Some(path) => fs::write(&path, &bytes)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }

    if print_stats {
        eprintln!(
            "read {} from {} in {} ({}/s)",
            format_bytes(bytes.len() as u64),
            entry.display(),
            format_duration(elapsed),
            format_rate(bytes_per_second(bytes.len() as u64, elapsed))
        );
        for statistic in scheduler.collect_statistics() {
            eprintln!("  {}.{} = {}", statistic.owner, statistic.name, statistic.value);
        }
    }
    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    let mut out = input.as_os_str().to_os_string();
    out.push(".pak");
    PathBuf::from(out)
}

fn default_root(archive: &Path) -> PathBuf {
    match archive.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn bytes_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        0.0
    } else {
        bytes as f64 / seconds
    }
}

fn parse_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let split_at = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_part, suffix_part) = trimmed.split_at(split_at);
    if num_part.is_empty() {
        return Err(format!("invalid size: {value}"));
    }

    let base: usize = num_part
        .parse()
        .map_err(|_| format!("invalid size number: {value}"))?;

    let multiplier = match suffix_part.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1usize,
        "k" | "kb" => 1024usize,
        "m" | "mb" => 1024usize * 1024usize,
        other => {
            return Err(format!("invalid size suffix '{other}' in '{value}'"));
        }
    };

    base.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: {value}"))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return "0 B".to_string();
    }
    format_bytes(bytes_per_second as u64)
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds}.{millis:03}s")
    }
}
