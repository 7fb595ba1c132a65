//! Deduplication pipeline orchestration.
//!
//! Runs the stage sequence selected by the mode, collects per-stage
//! statistics and honours cancellation between stages. The last stage of
//! every mode is decisive: candidate groups that survive it are promoted
//! to confirmed duplicates.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::grouper::FileGrouper;
use crate::hasher::ChunkHasher;
use crate::stages::{HashStage, HashStageRunner, SizeStage};
use crate::{
    BoostMode, DedupMode, DedupParams, DedupStats, DuplicateGroup, FileEntry, ProgressFn,
    StageStats, StopFlag,
};

/// Staged duplicate detector.
///
/// Cheap to construct; one instance runs one or more pipelines over
/// scanned file records.
pub struct Deduplicator {
    mode: DedupMode,
    boost: BoostMode,
    grouper: FileGrouper,
    hasher: ChunkHasher,

    /// Bounds concurrent hash reads so the number of open file handles
    /// stays proportional to the permit count, never to the file count
    semaphore: Arc<Semaphore>,
}

impl Deduplicator {
    /// Creates a deduplicator; `threads` = 0 selects twice the number of
    /// CPU cores
    pub fn new(mode: DedupMode, boost: BoostMode, threads: usize) -> Self {
        let permits = if threads == 0 {
            num_cpus::get() * 2
        } else {
            threads
        };

        info!("Using {} concurrent hashing tasks", permits);

        Self {
            mode,
            boost,
            grouper: FileGrouper::new(),
            hasher: ChunkHasher::new(),
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Convenience constructor from engine parameters
    pub fn from_params(params: &DedupParams) -> Self {
        Self::new(params.mode, params.boost, params.threads)
    }

    /// Hash stages executed after size grouping, per mode
    fn stage_plan(mode: DedupMode) -> &'static [HashStage] {
        match mode {
            DedupMode::Fast => &[HashStage::Front],
            DedupMode::Normal => &[HashStage::Front, HashStage::Middle, HashStage::End],
            DedupMode::Full => &[HashStage::Front, HashStage::Middle, HashStage::Full],
        }
    }

    /// Runs the pipeline over scanned records and returns the confirmed
    /// duplicate groups plus run statistics.
    ///
    /// On cancellation the groups confirmed so far are returned with
    /// `stats.interrupted` set; unprocessed candidate groups are dropped
    /// rather than being mislabelled as confirmed.
    pub async fn find_duplicates(
        &self,
        files: Vec<FileEntry>,
        stop: &StopFlag,
        progress: Option<&ProgressFn>,
    ) -> (Vec<DuplicateGroup>, DedupStats) {
        let pipeline_timer = Instant::now();
        let mut stats = DedupStats::default();

        info!(
            "Deduplicating {} files (mode: {:?}, boost: {:?})",
            files.len(),
            self.mode,
            self.boost
        );

        // Stage 0: group by the boost key before any content is read
        let stage_timer = Instant::now();
        let files_entering = files.len();
        let (mut candidates, skipped) =
            SizeStage::new(self.boost).process(files, &self.grouper, progress);
        stats.skipped_files += skipped;
        stats.stages.push(StageStats {
            name: "size".to_string(),
            files_entering,
            groups_entering: 0,
            elapsed: stage_timer.elapsed(),
        });

        debug!("Size stage produced {} candidate groups", candidates.len());

        let mut confirmed = Vec::new();

        for stage in Self::stage_plan(self.mode) {
            if candidates.is_empty() {
                break;
            }
            if stop.is_stopped() {
                stats.interrupted = true;
                candidates.clear();
                break;
            }

            let stage_timer = Instant::now();
            let files_entering = candidates.iter().map(|g| g.files.len()).sum();
            let groups_entering = candidates.len();

            let runner = HashStageRunner::new(
                *stage,
                self.hasher.clone(),
                Arc::clone(&self.semaphore),
            );
            let outcome = runner.process(candidates, stop, progress).await;

            stats.stages.push(StageStats {
                name: stage.name().to_string(),
                files_entering,
                groups_entering,
                elapsed: stage_timer.elapsed(),
            });
            stats.skipped_files += outcome.skipped;

            debug!(
                "Stage {}: {} groups confirmed early, {} groups remain",
                stage.name(),
                outcome.confirmed.len(),
                outcome.remaining.len()
            );

            confirmed.extend(outcome.confirmed);
            candidates = outcome.remaining;

            if outcome.interrupted {
                stats.interrupted = true;
                candidates.clear();
                break;
            }
        }

        // Survivors of the final stage are duplicates under this mode's
        // rules (front for fast, end for normal, full hash for full).
        if !stats.interrupted {
            confirmed.append(&mut candidates);
        }

        stats.total_elapsed = pipeline_timer.elapsed();

        info!(
            "Deduplication finished in {:?}: {} confirmed groups{}",
            stats.total_elapsed,
            confirmed.len(),
            if stats.interrupted { " (interrupted)" } else { "" }
        );

        (confirmed, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::fs;

    const KIB: usize = 1024;

    async fn write_entry(dir: &Path, name: &str, content: &[u8]) -> FileEntry {
        let path = dir.join(name);
        fs::write(&path, content).await.expect("Failed to write test file");
        FileEntry::new(path, content.len() as u64)
    }

    fn paths_of(group: &DuplicateGroup) -> Vec<String> {
        group.files.iter().map(|f| f.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_normal_mode_finds_basic_duplicates() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let a = write_entry(temp_dir.path(), "a.txt", b"AAAA").await;
        let b = write_entry(temp_dir.path(), "b.txt", b"AAAA").await;
        let c = write_entry(temp_dir.path(), "c.txt", b"BBBB").await;

        let dedup = Deduplicator::new(DedupMode::Normal, BoostMode::SameSize, 2);
        let (groups, stats) = dedup
            .find_duplicates(vec![a, b, c], &StopFlag::new(), None)
            .await;

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].size, 4);
        let mut names = paths_of(&groups[0]);
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert!(!stats.interrupted);
    }

    #[tokio::test]
    async fn test_full_mode_rejects_partial_hash_false_positive() {
        let temp_dir = tempdir().expect("Failed to create temp dir");

        // 1 MiB files, chunk size 64 KiB: identical front, middle and
        // end regions, one differing byte in between.
        let size = 1024 * KIB;
        let mut content_a = vec![0u8; size];
        for (i, byte) in content_a.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let mut content_b = content_a.clone();
        content_b[300 * KIB] ^= 0xFF;

        let a = write_entry(temp_dir.path(), "a.bin", &content_a).await;
        let b = write_entry(temp_dir.path(), "b.bin", &content_b).await;

        let full = Deduplicator::new(DedupMode::Full, BoostMode::SameSize, 2);
        let (full_groups, _) = full
            .find_duplicates(vec![a.clone(), b.clone()], &StopFlag::new(), None)
            .await;
        assert!(full_groups.is_empty(), "full mode must prove identity");

        let normal = Deduplicator::new(DedupMode::Normal, BoostMode::SameSize, 2);
        let (normal_groups, _) = normal
            .find_duplicates(vec![a, b], &StopFlag::new(), None)
            .await;
        assert_eq!(normal_groups.len(), 1, "normal mode accepts the edge match");
        assert_eq!(normal_groups[0].files.len(), 2);
    }

    #[tokio::test]
    async fn test_fast_mode_confirms_front_survivors() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![3u8; 500 * KIB];
        let a = write_entry(temp_dir.path(), "a.bin", &content).await;
        let b = write_entry(temp_dir.path(), "b.bin", &content).await;

        let dedup = Deduplicator::new(DedupMode::Fast, BoostMode::SameSize, 2);
        let (groups, stats) = dedup
            .find_duplicates(vec![a, b], &StopFlag::new(), None)
            .await;

        assert_eq!(groups.len(), 1);
        let names: Vec<&str> = stats.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["size", "front"]);
    }

    #[tokio::test]
    async fn test_boost_by_extension_reduces_candidates() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let mut files = Vec::new();
        for i in 0..5 {
            let mut content = vec![0u8; 4 * KIB];
            content[0] = i;
            files.push(write_entry(temp_dir.path(), &format!("t{i}.txt"), &content).await);
        }
        for i in 0..5 {
            let mut content = vec![0u8; 4 * KIB];
            content[0] = 100 + i;
            files.push(write_entry(temp_dir.path(), &format!("p{i}.jpg"), &content).await);
        }

        let by_size = Deduplicator::new(DedupMode::Normal, BoostMode::SameSize, 2);
        let (_, stats) = by_size
            .find_duplicates(files.clone(), &StopFlag::new(), None)
            .await;
        let front = &stats.stages[1];
        assert_eq!(front.name, "front");
        assert_eq!(front.files_entering, 10);
        assert_eq!(front.groups_entering, 1);

        let by_ext = Deduplicator::new(DedupMode::Normal, BoostMode::SameSizeAndExt, 2);
        let (_, stats) = by_ext
            .find_duplicates(files, &StopFlag::new(), None)
            .await;
        let front = &stats.stages[1];
        assert_eq!(front.files_entering, 10);
        assert_eq!(front.groups_entering, 2);
    }

    #[tokio::test]
    async fn test_stats_record_all_stages_in_full_mode() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![8u8; 500 * KIB];
        let a = write_entry(temp_dir.path(), "a.bin", &content).await;
        let b = write_entry(temp_dir.path(), "b.bin", &content).await;

        let dedup = Deduplicator::new(DedupMode::Full, BoostMode::SameSize, 2);
        let (groups, stats) = dedup
            .find_duplicates(vec![a, b], &StopFlag::new(), None)
            .await;

        assert_eq!(groups.len(), 1);
        let names: Vec<&str> = stats.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["size", "front", "middle", "full"]);
        assert_eq!(stats.stages[1].files_entering, 2);
    }

    #[tokio::test]
    async fn test_empty_input_yields_no_groups() {
        let dedup = Deduplicator::new(DedupMode::Normal, BoostMode::SameSize, 2);
        let (groups, stats) = dedup
            .find_duplicates(Vec::new(), &StopFlag::new(), None)
            .await;

        assert!(groups.is_empty());
        assert!(!stats.interrupted);
        assert_eq!(stats.stages.len(), 1, "only the size stage runs on empty input");
    }

    #[tokio::test]
    async fn test_cancellation_mid_front_returns_partial() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let mut files = Vec::new();
        for i in 0..20 {
            let content = vec![i as u8; KIB];
            files.push(write_entry(temp_dir.path(), &format!("a{i}.bin"), &content).await);
            files.push(write_entry(temp_dir.path(), &format!("b{i}.bin"), &content).await);
        }

        // Request cancellation once the front stage has processed the
        // files of five groups.
        let stop = StopFlag::new();
        let stop_handle = stop.clone();
        let progress: ProgressFn = Arc::new(move |stage, current, _total| {
            if stage == "front" && current >= 10 {
                stop_handle.stop();
            }
        });

        let dedup = Deduplicator::new(DedupMode::Normal, BoostMode::SameSize, 2);
        let (groups, stats) = dedup
            .find_duplicates(files, &stop, Some(&progress))
            .await;

        assert!(stats.interrupted);
        assert!(!groups.is_empty(), "processed groups must be returned");
        assert!(groups.len() < 20, "unprocessed groups must not be confirmed");
        assert!(groups.iter().all(|g| g.files.len() == 2));
    }
}
