//! Chunk hashing for the deduplication pipeline.
//!
//! Computes xxHash64 digests over four regions of a file (front, middle,
//! end, full) and caches each result on the file record, so no region is
//! ever read twice. A failed open or read yields [`ChunkDigest::Unreadable`]
//! instead of an error: the file simply can never match anything.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;
use xxhash_rust::xxh64::{Xxh64, xxh64};

use crate::{ChunkDigest, FileEntry, StopFlag};

/// Buffer size for streaming full-content hashing
pub const FULL_READ_BUFFER: usize = 64 * 1024;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Adaptive chunk-size policy for partial hashing.
///
/// Small files are read whole; mid-sized files get the smallest chunk
/// (a partial mismatch is cheap to find); very large files get bigger
/// chunks so a single read carries more discriminating power.
pub fn chunk_size_for(size: u64) -> u64 {
    match size {
        s if s <= 128 * KIB => s,
        s if s <= 384 * KIB => 128 * KIB,
        s if s <= 10 * MIB => 64 * KIB,
        s if s <= 30 * MIB => 128 * KIB,
        s if s <= 75 * MIB => 256 * KIB,
        s if s <= 150 * MIB => 512 * KIB,
        s if s <= 400 * MIB => MIB,
        _ => 2 * MIB,
    }
}

/// Capability seam for the digest function used by the pipeline.
///
/// The engine is written against this trait so that the hash function is
/// swappable in one place; xxHash64 is the production implementation.
pub trait HashAlgorithm: Send + Sync + Clone {
    /// Incremental state for whole-file hashing
    type State: HashState;

    /// One-shot digest of an in-memory chunk
    fn digest(&self, data: &[u8]) -> u64;

    /// Starts a streaming digest
    fn streaming(&self) -> Self::State;
}

/// Incremental digest state fed one buffer at a time
pub trait HashState: Send {
    fn update(&mut self, data: &[u8]);
    fn finish(self) -> u64;
}

/// xxHash64 with seed 0
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh64Algorithm;

impl HashAlgorithm for Xxh64Algorithm {
    type State = Xxh64;

    fn digest(&self, data: &[u8]) -> u64 {
        xxh64(data, 0)
    }

    fn streaming(&self) -> Xxh64 {
        Xxh64::new(0)
    }
}

impl HashState for Xxh64 {
    fn update(&mut self, data: &[u8]) {
        Xxh64::update(self, data);
    }

    fn finish(self) -> u64 {
        self.digest()
    }
}

/// Computes and caches per-region digests on file records.
///
/// Partial-hash positions for a file of size S with chunk size C:
/// front = offset 0, middle = offset S/2, end = offset S-C; each reads
/// up to C bytes. Full hashing streams the entire content.
#[derive(Debug, Clone, Default)]
pub struct ChunkHasher<A: HashAlgorithm = Xxh64Algorithm> {
    algorithm: A,
}

impl ChunkHasher {
    /// Creates a hasher with the default xxHash64 algorithm
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A: HashAlgorithm> ChunkHasher<A> {
    /// Creates a hasher around a custom algorithm (used by tests)
    pub fn with_algorithm(algorithm: A) -> Self {
        Self { algorithm }
    }

    /// Digest of the first `chunk_size` bytes.
    ///
    /// The cached value is authoritative: repeated calls return it
    /// without touching the file again.
    pub async fn front_digest(&self, file: &mut FileEntry) -> ChunkDigest {
        if let Some(cached) = file.hashes.front {
            return cached;
        }
        let chunk = file.ensure_chunk_size();
        let digest = self.digest_at(&file.path, 0, chunk).await;
        file.hashes.front = Some(digest);
        digest
    }

    /// Digest of up to `chunk_size` bytes starting at the middle of the
    /// file (offset size / 2)
    pub async fn middle_digest(&self, file: &mut FileEntry) -> ChunkDigest {
        if let Some(cached) = file.hashes.middle {
            return cached;
        }
        let chunk = file.ensure_chunk_size();
        let offset = file.size / 2;
        let digest = self.digest_at(&file.path, offset, chunk).await;
        file.hashes.middle = Some(digest);
        digest
    }

    /// Digest of the last `chunk_size` bytes (offset size - chunk_size)
    pub async fn end_digest(&self, file: &mut FileEntry) -> ChunkDigest {
        if let Some(cached) = file.hashes.end {
            return cached;
        }
        let chunk = file.ensure_chunk_size();
        let offset = file.size.saturating_sub(chunk);
        let digest = self.digest_at(&file.path, offset, chunk).await;
        file.hashes.end = Some(digest);
        digest
    }

    /// Digest of the entire file content, streamed through a fixed
    /// buffer.
    ///
    /// The stop flag is polled between buffer reads so that cancelling
    /// never waits for more than one in-flight read. A cancelled hash
    /// caches nothing and returns `None`; read failures cache
    /// `Unreadable` like the partial stages do.
    pub async fn full_digest(&self, file: &mut FileEntry, stop: &StopFlag) -> Option<ChunkDigest> {
        if let Some(cached) = file.hashes.full {
            return Some(cached);
        }
        let digest = match self.stream_digest(&file.path, stop).await {
            Ok(Some(value)) => ChunkDigest::Hashed(value),
            Ok(None) => return None,
            Err(err) => {
                warn!("Failed to read {}: {}", file.path.display(), err);
                ChunkDigest::Unreadable
            }
        };
        file.hashes.full = Some(digest);
        Some(digest)
    }

    /// Reads one region and hashes it; read failures become `Unreadable`
    async fn digest_at(&self, path: &Path, offset: u64, len: u64) -> ChunkDigest {
        match read_chunk(path, offset, len).await {
            Ok(data) => ChunkDigest::Hashed(self.algorithm.digest(&data)),
            Err(err) => {
                warn!("Failed to read {} at offset {}: {}", path.display(), offset, err);
                ChunkDigest::Unreadable
            }
        }
    }

    async fn stream_digest(&self, path: &Path, stop: &StopFlag) -> std::io::Result<Option<u64>> {
        let mut file = fs::File::open(path).await?;
        let mut state = self.algorithm.streaming();
        let mut buffer = vec![0u8; FULL_READ_BUFFER];

        loop {
            if stop.is_stopped() {
                return Ok(None);
            }
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break; // End of file reached
            }
            state.update(&buffer[..bytes_read]);
        }

        Ok(Some(state.finish()))
    }
}

/// Reads up to `len` bytes at `offset`; a short read near the end of the
/// file is fine
async fn read_chunk(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut data = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut data).await?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const KIB_U: usize = 1024;

    async fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).await.expect("Failed to write test file");
        path
    }

    fn entry_for(path: PathBuf, size: usize) -> FileEntry {
        FileEntry::new(path, size as u64)
    }

    #[test]
    fn test_chunk_size_table() {
        assert_eq!(chunk_size_for(4 * KIB), 4 * KIB);
        assert_eq!(chunk_size_for(128 * KIB), 128 * KIB);
        assert_eq!(chunk_size_for(200 * KIB), 128 * KIB);
        assert_eq!(chunk_size_for(MIB), 64 * KIB);
        assert_eq!(chunk_size_for(20 * MIB), 128 * KIB);
        assert_eq!(chunk_size_for(50 * MIB), 256 * KIB);
        assert_eq!(chunk_size_for(100 * MIB), 512 * KIB);
        assert_eq!(chunk_size_for(300 * MIB), MIB);
        assert_eq!(chunk_size_for(500 * MIB), 2 * MIB);
    }

    #[tokio::test]
    async fn test_front_middle_end_digests() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        // 300 KiB file: chunk size is 128 KiB, so the three regions overlap
        // in the middle but differ at the edges.
        let mut content = vec![0u8; 300 * KIB_U];
        content[0] = 1;
        content[150 * KIB_U] = 2;
        content[300 * KIB_U - 1] = 3;
        let path = write_file(temp_dir.path(), "a.bin", &content).await;

        let hasher = ChunkHasher::new();
        let mut entry = entry_for(path, content.len());

        let front = hasher.front_digest(&mut entry).await;
        let middle = hasher.middle_digest(&mut entry).await;
        let end = hasher.end_digest(&mut entry).await;

        assert_eq!(front, ChunkDigest::Hashed(xxh64(&content[..128 * KIB_U], 0)));
        assert_eq!(
            middle,
            ChunkDigest::Hashed(xxh64(&content[150 * KIB_U..278 * KIB_U], 0))
        );
        assert_eq!(
            end,
            ChunkDigest::Hashed(xxh64(&content[172 * KIB_U..], 0))
        );
    }

    #[tokio::test]
    async fn test_small_file_front_covers_everything() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = b"tiny file content";
        let path = write_file(temp_dir.path(), "tiny.txt", content).await;

        let hasher = ChunkHasher::new();
        let mut entry = entry_for(path, content.len());

        let front = hasher.front_digest(&mut entry).await;
        assert_eq!(front, ChunkDigest::Hashed(xxh64(content, 0)));
        assert_eq!(entry.chunk_size, Some(content.len() as u64));
    }

    #[tokio::test]
    async fn test_full_digest_matches_one_shot() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![7u8; 200 * KIB_U];
        let path = write_file(temp_dir.path(), "big.bin", &content).await;

        let hasher = ChunkHasher::new();
        let mut entry = entry_for(path, content.len());

        let full = hasher
            .full_digest(&mut entry, &StopFlag::new())
            .await
            .expect("full digest should complete");
        assert_eq!(full, ChunkDigest::Hashed(xxh64(&content, 0)));
    }

    #[tokio::test]
    async fn test_digests_are_cached() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = write_file(temp_dir.path(), "cached.txt", b"cache me").await;

        let hasher = ChunkHasher::new();
        let mut entry = entry_for(path.clone(), 8);

        let first = hasher.front_digest(&mut entry).await;
        // Rewrite the file; the cached digest must win over the new content.
        fs::write(&path, b"mutated!").await.expect("Failed to rewrite");
        let second = hasher.front_digest(&mut entry).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let hasher = ChunkHasher::new();
        let mut entry = entry_for(PathBuf::from("/nonexistent/definitely/gone.bin"), 1000);

        assert_eq!(hasher.front_digest(&mut entry).await, ChunkDigest::Unreadable);
        assert_eq!(hasher.middle_digest(&mut entry).await, ChunkDigest::Unreadable);
        assert_eq!(hasher.end_digest(&mut entry).await, ChunkDigest::Unreadable);
        let full = hasher.full_digest(&mut entry, &StopFlag::new()).await;
        assert_eq!(full, Some(ChunkDigest::Unreadable));
        assert_eq!(ChunkDigest::Unreadable.hashed(), None);
    }

    #[tokio::test]
    async fn test_cancelled_full_digest_caches_nothing() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let content = vec![1u8; 256 * KIB_U];
        let path = write_file(temp_dir.path(), "cancel.bin", &content).await;

        let stop = StopFlag::new();
        stop.stop();

        let hasher = ChunkHasher::new();
        let mut entry = entry_for(path, content.len());

        assert_eq!(hasher.full_digest(&mut entry, &stop).await, None);
        assert_eq!(entry.full_hash(), None);
    }
}
