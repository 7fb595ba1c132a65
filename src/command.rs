//! Command facade: scan, deduplicate, sort, one call.
//!
//! The single code path shared by the CLI and embedding hosts. Runs the
//! scanner and the deduplicator under one parameter set, validates the
//! configuration up front and turns "nothing to do" into a recoverable
//! error instead of an empty report.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    DedupError, DedupParams, DedupStats, Deduplicator, DuplicateGroup, FileEntry, FileScanner,
    ProgressFn, ScanStats, StopFlag, sort_groups,
};

/// Everything a deduplication run produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupOutcome {
    /// All records the scan accepted, in discovery order
    pub files: Vec<FileEntry>,

    /// Confirmed duplicate groups, biggest first, favourites first
    /// inside each group
    pub groups: Vec<DuplicateGroup>,

    /// Scan totals
    pub scan_stats: ScanStats,

    /// Pipeline totals
    pub dedup_stats: DedupStats,
}

impl DedupOutcome {
    /// Number of files that could be removed while keeping one copy of
    /// everything
    pub fn duplicate_file_count(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.files.len().saturating_sub(1))
            .sum()
    }

    /// Bytes reclaimable by keeping one copy per group
    pub fn total_wasted_space(&self) -> u64 {
        self.groups.iter().map(|g| g.wasted_space()).sum()
    }
}

/// Orchestrates the entire deduplication workflow under one
/// configuration
pub struct DedupCommand {
    params: DedupParams,
}

impl DedupCommand {
    pub fn new(params: DedupParams) -> Self {
        Self { params }
    }

    /// The configuration this command runs under
    pub fn params(&self) -> &DedupParams {
        &self.params
    }

    /// Runs scanner and deduplicator, sorts the confirmed groups and
    /// returns the outcome.
    ///
    /// Fails with [`DedupError::NoFilesFound`] when the scan yields zero
    /// candidate files; this is a signal to the caller, not a crash.
    pub async fn execute(
        &self,
        stop: &StopFlag,
        progress: Option<ProgressFn>,
    ) -> Result<DedupOutcome, DedupError> {
        self.validate()?;

        let scanner = FileScanner::new(&self.params);
        let (files, scan_stats) = scanner.scan(stop, progress.as_ref()).await?;

        if files.is_empty() {
            return Err(DedupError::NoFilesFound {
                path: self.params.directory.clone(),
            });
        }

        info!("Scan accepted {} files", files.len());

        let deduplicator = Deduplicator::from_params(&self.params);
        let (mut groups, dedup_stats) = deduplicator
            .find_duplicates(files.clone(), stop, progress.as_ref())
            .await;

        // Partial results of a cancelled run are sorted all the same.
        sort_groups(&mut groups, self.params.sort_order);

        Ok(DedupOutcome {
            files,
            groups,
            scan_stats,
            dedup_stats,
        })
    }

    /// Configuration validation before starting the scan
    fn validate(&self) -> Result<(), DedupError> {
        if self.params.max_size > 0 && self.params.min_size > self.params.max_size {
            return Err(DedupError::InvalidSizeFilter {
                min: self.params.min_size,
                max: self.params.max_size,
            });
        }
        Ok(())
    }
}
