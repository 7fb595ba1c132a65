//! Keyed grouping of file records.
//!
//! A single generic `group_by` partitions files by any computed key,
//! drops singleton buckets (a file with a unique key has no duplicate)
//! and floats favourite files to the front of each kept bucket. The
//! strategy methods cover the boost keys and one key per cached hash.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use crate::normalizer::FilenameNormalizer;
use crate::{BoostMode, FileEntry};

/// Result of one grouping pass: buckets of 2+ files plus the number of
/// files dropped because their key could not be computed
#[derive(Debug, Default)]
pub struct Grouped {
    /// Buckets of at least two files sharing a key, favourites first
    pub buckets: Vec<Vec<FileEntry>>,

    /// Files whose key function returned nothing (failed hash reads)
    pub skipped: usize,
}

impl Grouped {
    /// Total number of files across all kept buckets
    pub fn file_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }
}

/// Grouping strategies for the pipeline stages
#[derive(Debug, Default)]
pub struct FileGrouper {
    normalizer: FilenameNormalizer,
}

impl FileGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partitions files by a key, keeping only buckets of 2+ entries.
    ///
    /// A `None` key counts as skipped and never aborts the pass. Within
    /// each kept bucket favourite files are moved to the front; the sort
    /// is stable so the incoming order is otherwise preserved.
    pub fn group_by<K, F>(files: Vec<FileEntry>, mut key_fn: F) -> Grouped
    where
        K: Eq + Hash,
        F: FnMut(&FileEntry) -> Option<K>,
    {
        let mut map: HashMap<K, Vec<FileEntry>> = HashMap::new();
        let mut skipped = 0;

        for file in files {
            match key_fn(&file) {
                Some(key) => map.entry(key).or_default().push(file),
                None => {
                    debug!("No grouping key for {}", file.path.display());
                    skipped += 1;
                }
            }
        }

        let mut buckets = Vec::new();
        for (_, mut bucket) in map {
            if bucket.len() < 2 {
                continue; // Unique key, cannot be a duplicate
            }
            bucket.sort_by_key(|file| !file.is_favourite);
            buckets.push(bucket);
        }

        Grouped { buckets, skipped }
    }

    /// Applies the boost-selected initial key
    pub fn by_boost(&self, files: Vec<FileEntry>, boost: BoostMode) -> Grouped {
        match boost {
            BoostMode::SameSize => Self::by_size(files),
            BoostMode::SameSizeAndExt => Self::by_size_and_extension(files),
            BoostMode::SameSizeAndName => Self::by_size_and_name(files),
            BoostMode::SameSizeAndFuzzyName => self.by_size_and_fuzzy_name(files),
        }
    }

    /// Groups files by their size
    pub fn by_size(files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| Some(file.size))
    }

    /// Groups files by size and lowercased extension
    pub fn by_size_and_extension(files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| Some((file.size, file.extension.clone())))
    }

    /// Groups files by size and exact filename (including extension)
    pub fn by_size_and_name(files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| Some((file.size, file.name.clone())))
    }

    /// Groups files by size and normalized filename
    pub fn by_size_and_fuzzy_name(&self, files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| {
            Some((file.size, self.normalizer.normalize(&file.name)))
        })
    }

    /// Groups files by the cached front digest; files whose read failed
    /// (or which were never hashed) are skipped
    pub fn by_front_hash(files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| file.front_hash().and_then(|d| d.hashed()))
    }

    /// Groups files by the cached middle digest
    pub fn by_middle_hash(files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| file.middle_hash().and_then(|d| d.hashed()))
    }

    /// Groups files by the cached end digest
    pub fn by_end_hash(files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| file.end_hash().and_then(|d| d.hashed()))
    }

    /// Groups files by the cached full-content digest
    pub fn by_full_hash(files: Vec<FileEntry>) -> Grouped {
        Self::group_by(files, |file| file.full_hash().and_then(|d| d.hashed()))
    }
}
