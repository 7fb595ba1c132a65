//! Pipeline stages.
//!
//! Stage 0 groups files by the boost-selected key without touching file
//! content. Every later stage re-reads one region per file, regroups
//! each candidate group by the region digest and discards everything
//! that no longer has a partner. Groups whose files are small enough
//! that the region covers (or nearly covers) the whole file are
//! confirmed on the spot instead of being re-read by deeper stages.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::grouper::{FileGrouper, Grouped};
use crate::hasher::ChunkHasher;
use crate::{BoostMode, DuplicateGroup, FileEntry, ProgressFn, StopFlag, notify};

/// Base early-confirmation threshold; the front stage confirms groups of
/// files up to this size, middle and end scale it by 2x and 3x
pub const EARLY_CONFIRM_BASE: u64 = 128 * 1024;

/// The content-reading stages of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStage {
    Front,
    Middle,
    End,
    Full,
}

impl HashStage {
    /// Stage name as reported to progress callbacks and stats
    pub fn name(self) -> &'static str {
        match self {
            HashStage::Front => "front",
            HashStage::Middle => "middle",
            HashStage::End => "end",
            HashStage::Full => "full",
        }
    }

    /// Early-confirmation threshold.
    ///
    /// A file at or below the threshold has been covered by the partial
    /// reads taken so far, so deeper stages cannot add information. The
    /// full stage has no threshold: it proves identity outright.
    pub fn confirm_threshold(self) -> Option<u64> {
        match self {
            HashStage::Front => Some(EARLY_CONFIRM_BASE),
            HashStage::Middle => Some(2 * EARLY_CONFIRM_BASE),
            HashStage::End => Some(3 * EARLY_CONFIRM_BASE),
            HashStage::Full => None,
        }
    }
}

/// Result of one hash-stage pass over the candidate groups
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Groups that still need deeper stages
    pub remaining: Vec<DuplicateGroup>,

    /// Groups confirmed by this stage's early-confirmation rule
    pub confirmed: Vec<DuplicateGroup>,

    /// Files dropped because their region could not be hashed
    pub skipped: usize,

    /// True when cancellation cut the pass short; `remaining` then only
    /// holds what was produced before the cut
    pub interrupted: bool,
}

/// Initial grouping stage: partitions the scanned files by the
/// boost-selected key before any content is read
pub struct SizeStage {
    boost: BoostMode,
}

impl SizeStage {
    pub fn new(boost: BoostMode) -> Self {
        Self { boost }
    }

    /// Builds the initial candidate groups.
    ///
    /// Reports the whole stage as one progress step; pure in-memory
    /// grouping is far too fast to meter per file.
    pub fn process(
        &self,
        files: Vec<FileEntry>,
        grouper: &FileGrouper,
        progress: Option<&ProgressFn>,
    ) -> (Vec<DuplicateGroup>, usize) {
        let total = files.len() as u64;
        let grouped = grouper.by_boost(files, self.boost);
        let skipped = grouped.skipped;

        let groups: Vec<DuplicateGroup> = grouped
            .buckets
            .into_iter()
            .map(DuplicateGroup::new)
            .collect();

        notify(progress, "size", total, Some(total));
        (groups, skipped)
    }
}

/// One partial- or full-hash refinement stage.
///
/// Candidate groups are processed serially; the files inside a group are
/// hashed concurrently with semaphore-bounded fan-out. Each spawned task
/// owns its record while hashing, so every cache field keeps a single
/// writer.
pub struct HashStageRunner {
    stage: HashStage,
    hasher: ChunkHasher,
    semaphore: Arc<Semaphore>,
}

impl HashStageRunner {
    pub fn new(stage: HashStage, hasher: ChunkHasher, semaphore: Arc<Semaphore>) -> Self {
        Self {
            stage,
            hasher,
            semaphore,
        }
    }

    /// Refines the given groups by this stage's digest.
    ///
    /// Cancellation is polled between groups (and, for full hashing,
    /// between buffer reads); an interrupted pass returns everything
    /// split so far.
    pub async fn process(
        &self,
        groups: Vec<DuplicateGroup>,
        stop: &StopFlag,
        progress: Option<&ProgressFn>,
    ) -> StageOutcome {
        let files_entering: u64 = groups.iter().map(|g| g.files.len() as u64).sum();
        let mut outcome = StageOutcome::default();
        let mut processed: u64 = 0;

        for group in groups {
            if stop.is_stopped() {
                outcome.interrupted = true;
                break;
            }

            let group_len = group.files.len() as u64;
            let hashed = self.hash_group(group.files, stop).await;
            if stop.is_stopped() {
                outcome.interrupted = true;
                break;
            }

            let grouped = self.regroup(hashed);
            outcome.skipped += grouped.skipped;

            for bucket in grouped.buckets {
                let refined = DuplicateGroup::new(bucket);
                match self.stage.confirm_threshold() {
                    Some(limit) if refined.size <= limit => {
                        debug!(
                            "Early-confirming {} files of {} bytes at stage {}",
                            refined.files.len(),
                            refined.size,
                            self.stage.name()
                        );
                        outcome.confirmed.push(refined);
                    }
                    _ => outcome.remaining.push(refined),
                }
            }

            processed += group_len;
            notify(progress, self.stage.name(), processed, Some(files_entering));
        }

        outcome
    }

    /// Hashes every file of one candidate group with bounded fan-out
    async fn hash_group(&self, files: Vec<FileEntry>, stop: &StopFlag) -> Vec<FileEntry> {
        let mut tasks = Vec::with_capacity(files.len());

        for mut file in files {
            let semaphore = Arc::clone(&self.semaphore);
            let hasher = self.hasher.clone();
            let stage = self.stage;
            let stop = stop.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("Semaphore should not be closed");

                // A record that is skipped here has no cached digest and
                // will simply not survive the regrouping.
                if !stop.is_stopped() {
                    match stage {
                        HashStage::Front => {
                            hasher.front_digest(&mut file).await;
                        }
                        HashStage::Middle => {
                            hasher.middle_digest(&mut file).await;
                        }
                        HashStage::End => {
                            hasher.end_digest(&mut file).await;
                        }
                        HashStage::Full => {
                            hasher.full_digest(&mut file, &stop).await;
                        }
                    }
                }
                file
            }));
        }

        let mut hashed = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(file) => hashed.push(file),
                Err(e) => error!("Hashing task panicked: {}", e),
            }
        }
        hashed
    }

    /// Regroups a bucket of hashed files by this stage's cached digest
    fn regroup(&self, files: Vec<FileEntry>) -> Grouped {
        match self.stage {
            HashStage::Front => FileGrouper::by_front_hash(files),
            HashStage::Middle => FileGrouper::by_middle_hash(files),
            HashStage::End => FileGrouper::by_end_hash(files),
            HashStage::Full => FileGrouper::by_full_hash(files),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;
    use tokio::fs;

    const KIB: usize = 1024;

    async fn write_file(dir: &Path, name: &str, content: &[u8]) -> FileEntry {
        let path = dir.join(name);
        fs::write(&path, content).await.expect("Failed to write test file");
        FileEntry::new(path, content.len() as u64)
    }

    fn runner(stage: HashStage) -> HashStageRunner {
        HashStageRunner::new(stage, ChunkHasher::new(), Arc::new(Semaphore::new(4)))
    }

    fn group_of(files: Vec<FileEntry>) -> Vec<DuplicateGroup> {
        vec![DuplicateGroup::new(files)]
    }

    #[test]
    fn test_stage_thresholds() {
        assert_eq!(HashStage::Front.confirm_threshold(), Some(128 * 1024));
        assert_eq!(HashStage::Middle.confirm_threshold(), Some(256 * 1024));
        assert_eq!(HashStage::End.confirm_threshold(), Some(384 * 1024));
        assert_eq!(HashStage::Full.confirm_threshold(), None);
    }

    #[test]
    fn test_size_stage_groups_by_boost_key() {
        let make = |path: &str, size: u64| FileEntry::new(PathBuf::from(path), size);
        let files = vec![
            make("/a/a.txt", 10),
            make("/a/b.txt", 10),
            make("/a/c.jpg", 10),
            make("/a/d.jpg", 10),
        ];

        let grouper = FileGrouper::new();
        let (by_size, _) = SizeStage::new(BoostMode::SameSize).process(files.clone(), &grouper, None);
        assert_eq!(by_size.len(), 1);
        assert_eq!(by_size[0].files.len(), 4);

        let (by_ext, _) =
            SizeStage::new(BoostMode::SameSizeAndExt).process(files, &grouper, None);
        assert_eq!(by_ext.len(), 2);
        assert!(by_ext.iter().all(|g| g.files.len() == 2));
    }

    #[tokio::test]
    async fn test_front_stage_confirms_small_files_early() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![5u8; 100 * KIB];
        let a = write_file(temp_dir.path(), "a.bin", &content).await;
        let b = write_file(temp_dir.path(), "b.bin", &content).await;

        let outcome = runner(HashStage::Front)
            .process(group_of(vec![a, b]), &StopFlag::new(), None)
            .await;

        assert_eq!(outcome.confirmed.len(), 1);
        assert_eq!(outcome.confirmed[0].files.len(), 2);
        assert!(outcome.remaining.is_empty());
    }

    #[tokio::test]
    async fn test_front_stage_keeps_large_files_as_candidates() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![5u8; 200 * KIB];
        let a = write_file(temp_dir.path(), "a.bin", &content).await;
        let b = write_file(temp_dir.path(), "b.bin", &content).await;

        let outcome = runner(HashStage::Front)
            .process(group_of(vec![a, b]), &StopFlag::new(), None)
            .await;

        assert!(outcome.confirmed.is_empty());
        assert_eq!(outcome.remaining.len(), 1);
        assert_eq!(outcome.remaining[0].files.len(), 2);
    }

    #[tokio::test]
    async fn test_stage_splits_mismatching_groups() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let a = write_file(temp_dir.path(), "a.bin", &vec![1u8; 4 * KIB]).await;
        let b = write_file(temp_dir.path(), "b.bin", &vec![2u8; 4 * KIB]).await;

        let outcome = runner(HashStage::Front)
            .process(group_of(vec![a, b]), &StopFlag::new(), None)
            .await;

        // Both subgroups shrank to one file and were discarded.
        assert!(outcome.confirmed.is_empty());
        assert!(outcome.remaining.is_empty());
    }

    #[tokio::test]
    async fn test_full_stage_separates_interior_difference() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let mut content_a = vec![0u8; 600 * KIB];
        let mut content_b = content_a.clone();
        content_a[300 * KIB] = 1;
        content_b[300 * KIB] = 2;
        let a = write_file(temp_dir.path(), "a.bin", &content_a).await;
        let b = write_file(temp_dir.path(), "b.bin", &content_b).await;

        let outcome = runner(HashStage::Full)
            .process(group_of(vec![a, b]), &StopFlag::new(), None)
            .await;

        assert!(outcome.confirmed.is_empty());
        assert!(outcome.remaining.is_empty());
    }

    #[tokio::test]
    async fn test_full_stage_passes_identical_files_through() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![9u8; 600 * KIB];
        let a = write_file(temp_dir.path(), "a.bin", &content).await;
        let b = write_file(temp_dir.path(), "b.bin", &content).await;

        let outcome = runner(HashStage::Full)
            .process(group_of(vec![a, b]), &StopFlag::new(), None)
            .await;

        // No early confirmation at the full stage; survivors stay in
        // `remaining` and the deduplicator promotes them.
        assert!(outcome.confirmed.is_empty());
        assert_eq!(outcome.remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_files_are_skipped_not_grouped() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![7u8; 4 * KIB];
        let a = write_file(temp_dir.path(), "a.bin", &content).await;
        let b = write_file(temp_dir.path(), "b.bin", &content).await;
        let ghost_a = FileEntry::new(PathBuf::from("/nonexistent/x.bin"), 4 * KIB as u64);
        let ghost_b = FileEntry::new(PathBuf::from("/nonexistent/y.bin"), 4 * KIB as u64);

        let outcome = runner(HashStage::Front)
            .process(group_of(vec![a, b, ghost_a, ghost_b]), &StopFlag::new(), None)
            .await;

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.confirmed.len(), 1);
        assert_eq!(outcome.confirmed[0].files.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_stage_reports_interruption() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![1u8; KIB];
        let a = write_file(temp_dir.path(), "a.bin", &content).await;
        let b = write_file(temp_dir.path(), "b.bin", &content).await;

        let stop = StopFlag::new();
        stop.stop();

        let outcome = runner(HashStage::Front)
            .process(group_of(vec![a, b]), &stop, None)
            .await;

        assert!(outcome.interrupted);
        assert!(outcome.confirmed.is_empty());
        assert!(outcome.remaining.is_empty());
    }
}
