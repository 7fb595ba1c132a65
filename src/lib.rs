//! # Dupescout Library
//!
//! A fast and reliable library for finding duplicate files in directories.
//! Dupescout identifies groups of byte-identical files using a staged
//! fingerprinting pipeline that minimizes I/O: files are grouped by size
//! first, then narrowed down by progressively deeper partial-content
//! hashes (front, middle, end) and finally, in full mode, by a hash of
//! the entire content.
//!
//! ## Features
//!
//! - **Staged pipeline**: size grouping plus partial xxHash64 hashing
//!   confirms small files early and proves large files identical late
//! - **Fast scanning**: async/await for I/O operations, bounded fan-out
//! - **Configurable**: size filters, extension allow-list, excluded
//!   directories, favourite directories, three pipeline depths
//! - **Cancellable**: a cheap stop flag is polled on every hot path
//! - **Multiple output formats**: text and JSON
//! - **Production ready**: comprehensive error handling and logging
//!
//! ## Example
//!
//! ```rust,no_run
//! use dupescout::{DedupCommand, DedupParams, StopFlag};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let params = DedupParams {
//!         directory: PathBuf::from("/path/to/scan"),
//!         min_size: 1024, // Skip files smaller than 1KB
//!         ..Default::default()
//!     };
//!
//!     let command = DedupCommand::new(params);
//!     let outcome = command.execute(&StopFlag::new(), None).await?;
//!
//!     println!("Found {} duplicate groups", outcome.groups.len());
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

// Public modules - available for external use
pub mod command;
pub mod dedup;
pub mod grouper;
pub mod hasher;
pub mod normalizer;
pub mod output;
pub mod scanner;
pub mod sorter;
pub mod stages;

// Re-export the main types for convenient library usage
pub use command::{DedupCommand, DedupOutcome};
pub use dedup::Deduplicator;
pub use grouper::FileGrouper;
pub use hasher::ChunkHasher;
pub use normalizer::FilenameNormalizer;
pub use output::OutputFormatter;
pub use scanner::FileScanner;
pub use sorter::sort_groups;

/// Engine configuration - also the structure for parsing command line
/// arguments.
///
/// This structure defines all parameters that affect a deduplication run.
/// It doubles as the programmatic API configuration; `Default` gives a
/// sensible baseline for embedding and tests.
#[derive(Parser, Debug, Clone)]
#[command(name = "dupescout")]
#[command(about = "A staged duplicate file finder")]
#[command(version = "0.1.0")]
#[command(author = "Ilia Denisov <iodenisof@gmail.com>")]
#[command(long_about = "
Dupescout recursively scans a directory and identifies groups of
byte-identical files using a staged xxHash64 pipeline. Size grouping and
partial-content hashing keep the amount of file I/O proportional to the
number of plausible duplicates rather than the total data volume.

Examples:
  dupescout -d /home/user/Documents
  dupescout -d /data -m full -x jpg -x png --output-format json
  dupescout -d /data -f /data/originals -o results.json
")]
pub struct DedupParams {
    /// Directory to scan for duplicates (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    #[arg(help = "Path to the directory to scan")]
    pub directory: PathBuf,

    /// Minimum file size in bytes (files smaller than this will be ignored)
    #[arg(short = 's', long, default_value = "1")]
    #[arg(help = "Minimum file size in bytes")]
    pub min_size: u64,

    /// Maximum file size in bytes (0 = no limit)
    #[arg(short = 'S', long, default_value = "0")]
    #[arg(help = "Maximum file size in bytes (0 for no limit)")]
    pub max_size: u64,

    /// Allowed file extensions; empty means any extension.
    /// Matched case-insensitively, the leading dot is optional.
    #[arg(short = 'x', long = "extension")]
    #[arg(help = "Restrict the scan to these file extensions")]
    pub extensions: Vec<String>,

    /// Favourite directories: files below these paths are listed first
    /// inside every duplicate group
    #[arg(short = 'f', long = "favourite")]
    #[arg(help = "Directory whose files should be kept (repeatable)")]
    pub favourite_dirs: Vec<PathBuf>,

    /// Directories excluded from the scan together with all descendants
    #[arg(short = 'E', long = "exclude")]
    #[arg(help = "Directory to exclude from the scan (repeatable)")]
    pub excluded_dirs: Vec<PathBuf>,

    /// Pipeline depth
    #[arg(short, long, default_value = "normal", value_enum)]
    #[arg(help = "Detection mode: fast, normal or full")]
    pub mode: DedupMode,

    /// Initial grouping key applied before any hashing
    #[arg(short, long, default_value = "same-size", value_enum)]
    #[arg(help = "Candidate pre-grouping strategy")]
    pub boost: BoostMode,

    /// Ordering of files inside each confirmed group
    #[arg(long, default_value = "shortest-path", value_enum)]
    #[arg(help = "In-group sort order")]
    pub sort_order: SortOrder,

    /// Number of concurrent hashing tasks (0 = automatic)
    #[arg(short = 'j', long, default_value = "0")]
    #[arg(help = "Number of hashing tasks (0 for auto-detect)")]
    pub threads: usize,

    /// Enable verbose output with detailed progress information
    #[arg(short, long)]
    #[arg(help = "Verbose output")]
    pub verbose: bool,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    #[arg(help = "Output format")]
    pub output_format: OutputFormat,

    /// Save results to a file instead of printing to stdout
    #[arg(short = 'o', long)]
    #[arg(help = "Output file path")]
    pub output_file: Option<PathBuf>,
}

/// Default implementation for DedupParams - useful for testing and
/// programmatic usage
impl Default for DedupParams {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            min_size: 1,
            max_size: 0,
            extensions: Vec::new(),
            favourite_dirs: Vec::new(),
            excluded_dirs: Vec::new(),
            mode: DedupMode::Normal,
            boost: BoostMode::SameSize,
            sort_order: SortOrder::ShortestPath,
            threads: 0,
            verbose: false,
            output_format: OutputFormat::Text,
            output_file: None,
        }
    }
}

/// Pipeline depth.
///
/// Selects how many hash stages run after size grouping and which stage
/// is allowed to confirm the surviving groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum DedupMode {
    /// Size and front hash only; survivors are accepted as duplicates
    Fast,
    /// Size, front, middle and end hashes
    Normal,
    /// Size, front and middle hashes, then a full-content hash
    Full,
}

/// Initial grouping key used by the first pipeline stage.
///
/// A stricter key shrinks the candidate set before any file content is
/// read, at the cost of missing duplicates stored under different names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum BoostMode {
    /// Group by file size alone
    SameSize,
    /// Group by size and lowercased extension
    SameSizeAndExt,
    /// Group by size and exact filename
    SameSizeAndName,
    /// Group by size and normalized filename ("report_2" matches "report")
    SameSizeAndFuzzyName,
}

/// Ordering of files inside each confirmed group.
///
/// Favourite files always sort first; this enum picks the secondary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum SortOrder {
    /// Smaller path depth first, then shorter filename
    ShortestPath,
    /// Shorter filename first, then smaller path depth
    ShortestFilename,
}

/// Output format
///
/// Supported formats for result presentation
#[derive(Debug, Clone, clap::ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text format with Unicode characters
    Text,
    /// Machine-readable JSON format
    Json,
}

/// Cooperative cancellation flag.
///
/// A cheap, lock-free handle shared between the caller and the engine.
/// The engine polls it between directories, files, stages and groups and
/// returns partial results cleanly once it reads `true`.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Creates a flag in the "keep running" state
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; all subsequent `is_stopped` calls return true
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once cancellation has been requested
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress callback: `(stage, current, total)`.
///
/// `total` is `None` while the overall amount of work is unknown (during
/// scanning). Stage names include "scanning", "size", "front", "middle",
/// "end" and "full"; callers must tolerate unknown stage names.
pub type ProgressFn = Arc<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

/// Invokes an optional progress callback.
pub(crate) fn notify(progress: Option<&ProgressFn>, stage: &str, current: u64, total: Option<u64>) {
    if let Some(callback) = progress {
        callback(stage, current, total);
    }
}

/// An xxHash64 digest of a file region, or the marker for a region that
/// could not be read.
///
/// `Unreadable` never compares equal to a real digest, so a file whose
/// read failed can never be confirmed as a duplicate of anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkDigest {
    /// Successfully hashed region
    Hashed(u64),
    /// Open or read failure (deleted mid-run, permission revoked, ...)
    Unreadable,
}

impl ChunkDigest {
    /// Returns the digest value for successfully hashed regions
    pub fn hashed(self) -> Option<u64> {
        match self {
            ChunkDigest::Hashed(value) => Some(value),
            ChunkDigest::Unreadable => None,
        }
    }
}

/// Per-file hash cache.
///
/// Every field transitions at most once from unset to set; the cached
/// value is authoritative and is never recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashCache {
    pub(crate) front: Option<ChunkDigest>,
    pub(crate) middle: Option<ChunkDigest>,
    pub(crate) end: Option<ChunkDigest>,
    pub(crate) full: Option<ChunkDigest>,
}

/// File metadata
///
/// One record per discovered file. Identity fields are immutable after
/// the scan; the hash cache and chunk size are filled in lazily by the
/// pipeline, each at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,

    /// File size in bytes, always greater than zero
    pub size: u64,

    /// Filename including extension
    pub name: String,

    /// Lowercased extension with the leading dot, or empty
    pub extension: String,

    /// Number of path separators in the absolute path
    pub depth: usize,

    /// True if the path lies below one of the favourite directories
    pub is_favourite: bool,

    /// Bytes to read at each partial-hash position; assigned once before
    /// the first partial hash
    #[serde(skip)]
    pub(crate) chunk_size: Option<u64>,

    /// Cached digests, written at most once per field
    #[serde(skip)]
    pub(crate) hashes: HashCache,
}

impl FileEntry {
    /// Creates a record from an absolute path and a known size.
    ///
    /// The size must come from a successful stat of a regular file and
    /// must be positive; zero-byte files are never recorded.
    pub fn new(path: PathBuf, size: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = split_stem_ext(&name).1.to_lowercase();
        let depth = path.components().count().saturating_sub(1);

        Self {
            path,
            size,
            name,
            extension,
            depth,
            is_favourite: false,
            chunk_size: None,
            hashes: HashCache::default(),
        }
    }

    /// Marks the record as favourite if its path lies at or below one of
    /// the given roots
    pub fn mark_favourite(&mut self, favourite_roots: &[PathBuf]) {
        self.is_favourite = favourite_roots.iter().any(|root| self.path.starts_with(root));
    }

    /// Returns the assigned chunk size, computing it on first use.
    ///
    /// The chunk size is a function of the file size only, so assigning
    /// it lazily still yields one stable value per record.
    pub fn ensure_chunk_size(&mut self) -> u64 {
        *self
            .chunk_size
            .get_or_insert_with(|| hasher::chunk_size_for(self.size))
    }

    /// Cached front digest, if the front stage has run for this file
    pub fn front_hash(&self) -> Option<ChunkDigest> {
        self.hashes.front
    }

    /// Cached middle digest
    pub fn middle_hash(&self) -> Option<ChunkDigest> {
        self.hashes.middle
    }

    /// Cached end digest
    pub fn end_hash(&self) -> Option<ChunkDigest> {
        self.hashes.end
    }

    /// Cached full-content digest
    pub fn full_hash(&self) -> Option<ChunkDigest> {
        self.hashes.full
    }
}

/// Group of duplicate files
///
/// Represents a set of at least two files of equal size that the active
/// pipeline stage considers (candidates) or has proven (confirmed)
/// identical. Order of `files` is significant: favourites come first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Size of each file in the group (all files have the same size)
    pub size: u64,

    /// The duplicate files, favourites first
    pub files: Vec<FileEntry>,
}

impl DuplicateGroup {
    /// Builds a group from a non-empty bucket of same-size files
    pub fn new(files: Vec<FileEntry>) -> Self {
        let size = files.first().map(|f| f.size).unwrap_or(0);
        Self { size, files }
    }

    /// Space that could be reclaimed by keeping a single copy
    pub fn wasted_space(&self) -> u64 {
        self.size * (self.files.len().saturating_sub(1) as u64)
    }
}

/// Timing and volume record for a single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStats {
    /// Stage name as reported to the progress callback
    pub name: String,

    /// Number of files entering the stage
    pub files_entering: usize,

    /// Number of candidate groups entering the stage
    pub groups_entering: usize,

    /// Wall time spent inside the stage
    pub elapsed: Duration,
}

/// Aggregated statistics for a deduplication run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupStats {
    /// Per-stage records in execution order
    pub stages: Vec<StageStats>,

    /// Total wall time of the pipeline
    pub total_elapsed: Duration,

    /// Files dropped because a grouping key or hash could not be computed
    pub skipped_files: usize,

    /// True when the run was cancelled and the result is partial
    pub interrupted: bool,
}

/// Aggregated statistics for a scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    /// Every regular file the walker looked at
    pub files_seen: u64,

    /// Files that passed all filters and became records
    pub files_accepted: usize,

    /// Directories the walker descended into
    pub dirs_walked: usize,

    /// Entries dropped because of I/O or permission errors
    pub entries_skipped: usize,

    /// Wall time of the scan
    pub elapsed: Duration,
}

/// Engine custom errors
///
/// Structured errors with contextual information for better diagnostics.
/// Only unrecoverable conditions surface here; per-entry failures are
/// logged and skipped.
#[derive(thiserror::Error, Debug)]
pub enum DedupError {
    /// Standard I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Root path does not exist
    #[error("Path does not exist: {path}")]
    PathNotFound { path: PathBuf },

    /// Root path exists but is not a directory
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Invalid configuration: min_size > max_size
    #[error("Invalid size filter: min_size ({min}) > max_size ({max})")]
    InvalidSizeFilter { min: u64, max: u64 },

    /// The scan finished without a single candidate file
    #[error("No files matched the scan filters under: {path}")]
    NoFilesFound { path: PathBuf },
}

// Utility functions for the library

/// Splits a filename into stem and extension.
///
/// Follows the usual suffix convention: the extension starts at the last
/// dot, a leading dot does not count (".bashrc" has no extension).
pub(crate) fn split_stem_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && name[..idx].chars().any(|c| c != '.') => {
            (&name[..idx], &name[idx..])
        }
        _ => (name, ""),
    }
}

/// Formats byte count into human-readable string
///
/// Converts large numbers into appropriate units (B, KB, MB, GB, TB)
///
/// # Examples
///
/// ```rust
/// use dupescout::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.ln() / THRESHOLD.ln()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let value = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", value, UNITS[unit_index])
    }
}

/// Resolves a possibly relative path against the current working
/// directory without touching the filesystem
pub(crate) fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
