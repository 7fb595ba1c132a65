//! Recursive file discovery with filtering.
//!
//! Walks a directory tree depth-first and emits one record per regular
//! file that passes the configured filters. Symlinks are never followed,
//! system trash locations and excluded directories are pruned before the
//! walker descends into them, and every per-entry error is logged and
//! skipped so a single unreadable file can never abort a scan.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    DedupError, DedupParams, FileEntry, ProgressFn, ScanStats, StopFlag, absolute_path, notify,
};

/// Progress is reported every N files to keep callback overhead low
const PROGRESS_INTERVAL: u64 = 5000;

/// Main file scanner
///
/// This structure encapsulates the filter configuration resolved to
/// absolute paths, so every prefix test during the walk is a plain
/// component comparison.
pub struct FileScanner {
    /// Root directory, absolute
    root: PathBuf,

    /// Minimum accepted file size in bytes
    min_size: u64,

    /// Maximum accepted file size in bytes (0 = no limit)
    max_size: u64,

    /// Lowercased allowed extensions including the leading dot; empty
    /// matches everything
    extensions: Vec<String>,

    /// Absolute favourite roots used to mark records
    favourite_roots: Vec<PathBuf>,

    /// Absolute roots excluded from the walk
    excluded_roots: Vec<PathBuf>,
}

impl FileScanner {
    /// Creates a scanner from engine parameters, normalizing extensions
    /// and resolving directory lists to absolute paths
    pub fn new(params: &DedupParams) -> Self {
        let extensions = params
            .extensions
            .iter()
            .map(|ext| {
                let lowered = ext.to_lowercase();
                if lowered.starts_with('.') {
                    lowered
                } else {
                    format!(".{lowered}")
                }
            })
            .collect();

        Self {
            root: absolute_path(&params.directory),
            min_size: params.min_size,
            max_size: params.max_size,
            extensions,
            favourite_roots: params.favourite_dirs.iter().map(|p| absolute_path(p)).collect(),
            excluded_roots: params.excluded_dirs.iter().map(|p| absolute_path(p)).collect(),
        }
    }

    /// Walks the tree and returns the accepted records plus scan totals.
    ///
    /// Only a missing or non-directory root is fatal. Cancellation is
    /// polled between directories and between files; on cancellation the
    /// records collected so far are returned.
    pub async fn scan(
        &self,
        stop: &StopFlag,
        progress: Option<&ProgressFn>,
    ) -> Result<(Vec<FileEntry>, ScanStats), DedupError> {
        let start_time = Instant::now();

        info!("Starting scan of {}", self.root.display());
        debug!(
            "Filters: min_size={}, max_size={}, extensions={:?}",
            self.min_size, self.max_size, self.extensions
        );

        let root_metadata = fs::metadata(&self.root).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DedupError::PathNotFound {
                path: self.root.clone(),
            },
            _ => DedupError::Io(e),
        })?;
        if !root_metadata.is_dir() {
            return Err(DedupError::NotADirectory {
                path: self.root.clone(),
            });
        }

        let mut files = Vec::new();
        let mut stats = ScanStats::default();
        let mut progress_counter = 0u64;

        // Use a stack to imitate recursion; avoids async recursion and
        // keeps stack usage flat on deep trees.
        let mut dir_stack = vec![self.root.clone()];

        'walk: while let Some(current_dir) = dir_stack.pop() {
            if stop.is_stopped() {
                info!("Scan interrupted, returning {} records", files.len());
                break;
            }

            stats.dirs_walked += 1;
            debug!(
                "Scanning directory: {} (stack: {})",
                current_dir.display(),
                dir_stack.len()
            );

            // A read failure here also covers directories without read
            // or execute permission.
            let mut read_dir = match fs::read_dir(&current_dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    warn!("Cannot read directory {}: {}", current_dir.display(), e);
                    stats.entries_skipped += 1;
                    continue;
                }
            };

            // Buffer subdirectories before adding them to the stack
            let mut subdirectories = Vec::new();

            while let Some(entry_result) = read_dir.next_entry().await.transpose() {
                if stop.is_stopped() {
                    info!("Scan interrupted, returning {} records", files.len());
                    break 'walk;
                }

                let entry = match entry_result {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(
                            "Error reading directory entry in {}: {}",
                            current_dir.display(),
                            e
                        );
                        stats.entries_skipped += 1;
                        continue;
                    }
                };

                let path = entry.path();

                let file_type = match entry.file_type().await {
                    Ok(ft) => ft,
                    Err(e) => {
                        warn!("Cannot determine type of {}: {}", path.display(), e);
                        stats.entries_skipped += 1;
                        continue;
                    }
                };

                // Follow-never: a link to a file is not a duplicate of it
                if file_type.is_symlink() {
                    debug!("Skipping symlink: {}", path.display());
                    continue;
                }

                if file_type.is_dir() {
                    if self.should_descend(&path) {
                        subdirectories.push(path);
                    }
                    continue;
                }

                if !file_type.is_file() {
                    debug!("Skipping special file: {}", path.display());
                    continue;
                }

                stats.files_seen += 1;
                progress_counter += 1;
                if progress_counter >= PROGRESS_INTERVAL {
                    notify(progress, "scanning", stats.files_seen, None);
                    progress_counter = 0;
                }

                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!("Cannot read metadata for {}: {}", path.display(), e);
                        stats.entries_skipped += 1;
                        continue;
                    }
                };

                if let Some(file_entry) = self.build_entry(path, metadata.len()) {
                    files.push(file_entry);
                }
            }

            // Reverse so the walk visits subdirectories in listing order
            for dir in subdirectories.into_iter().rev() {
                dir_stack.push(dir);
            }
        }

        // Final update for small datasets
        if progress_counter > 0 {
            notify(progress, "scanning", stats.files_seen, None);
        }

        stats.files_accepted = files.len();
        stats.elapsed = start_time.elapsed();

        info!(
            "Scan completed: {} directories walked, {} of {} files accepted, {} entries skipped",
            stats.dirs_walked, stats.files_accepted, stats.files_seen, stats.entries_skipped
        );

        Ok((files, stats))
    }

    /// Directory pre-filter applied before the walker descends
    fn should_descend(&self, path: &Path) -> bool {
        if is_system_trash(path) {
            debug!("Skipping system trash directory: {}", path.display());
            return false;
        }
        if self.is_excluded(path) {
            debug!("Skipping excluded directory: {}", path.display());
            return false;
        }
        true
    }

    /// True if the path equals or descends from an excluded root
    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded_roots.iter().any(|root| path.starts_with(root))
    }

    /// Applies the per-file filters and builds the record
    fn build_entry(&self, path: PathBuf, size: u64) -> Option<FileEntry> {
        // Zero-byte files carry no content to deduplicate
        if size == 0 {
            debug!("Skipping zero-byte file: {}", path.display());
            return None;
        }

        if !self.size_passes(size) {
            debug!("Skipping {} (size {} outside range)", path.display(), size);
            return None;
        }

        let mut entry = FileEntry::new(path, size);

        if !self.extension_passes(&entry.extension) {
            debug!("Skipping {} (extension not allowed)", entry.path.display());
            return None;
        }

        entry.mark_favourite(&self.favourite_roots);
        Some(entry)
    }

    /// Checks if a file size is within configured limits
    fn size_passes(&self, size: u64) -> bool {
        if size < self.min_size {
            return false;
        }
        if self.max_size > 0 && size > self.max_size {
            return false;
        }
        true
    }

    /// Checks the extension allow-list (exact, case-insensitive match)
    fn extension_passes(&self, extension: &str) -> bool {
        self.extensions.is_empty() || self.extensions.iter().any(|allowed| allowed == extension)
    }
}

/// Checks if a path belongs to the OS trash, so deleted files are never
/// reported as duplicates of live ones
fn is_system_trash(path: &Path) -> bool {
    let path_str = path.to_string_lossy();

    if cfg!(windows) {
        path_str.contains("$Recycle.Bin") || path_str.contains("\\Recycler\\")
    } else if cfg!(target_os = "macos") {
        path_str.contains("/.Trash/") || path_str.ends_with("/.Trash")
    } else {
        // freedesktop.org standard locations
        path_str.contains(".local/share/Trash") || path_str.contains("/.trash/")
    }
}
