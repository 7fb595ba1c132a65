//! Fuzzy filename normalization.
//!
//! Produces a canonical key so that renamed copies of the same file
//! ("Report (1).pdf", "report_copy.pdf", "Report_2.pdf") land in one
//! candidate group. The trailing-digit rule only strips 1-3 digits:
//! camera sequence numbers like "DSC_0001" keep their four digits and
//! stay distinct, while "report_2" collapses to "report".

use std::num::NonZeroUsize;
use std::sync::{LazyLock, Mutex};

use lru::LruCache;
use regex::Regex;

use crate::split_stem_ext;

/// Bounded memoization size; filenames repeat a lot inside photo dumps
const CACHE_CAPACITY: usize = 8192;

// Patterns are compiled once per process; normalization runs per
// candidate file and must stay O(len).
static PATTERN_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)\s*").expect("bracket pattern compiles"));
static PATTERN_COPY_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[_\-]?(copy|new|final|old|backup)[_\-\s]?\d*\s*$")
        .expect("copy marker pattern compiles")
});
static PATTERN_TRAILING_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\-]\d{1,3}\s*$").expect("trailing number pattern compiles"));
static PATTERN_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\s.\-]").expect("noise pattern compiles"));

/// Normalizes filenames for fuzzy duplicate grouping.
///
/// Owns its cache so the engine stays free of process-wide state.
pub struct FilenameNormalizer {
    cache: Mutex<LruCache<String, String>>,
}

impl std::fmt::Debug for FilenameNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilenameNormalizer").finish_non_exhaustive()
    }
}

impl Default for FilenameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FilenameNormalizer {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).expect("cache capacity is non-zero");
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Computes the canonical key for a filename.
    ///
    /// Rules, applied in order to the lowercased stem (the extension is
    /// preserved verbatim after lowercasing):
    /// 1. Remove any parenthesized group: "(1)", "(copy)", "(Final Version)"
    /// 2. Remove a trailing copy marker: "_copy", "Copy2", "-new3", "backup_1"
    /// 3. Remove 1-3 trailing digits after a separator: "_1", "-12", "_123"
    ///    (4 and more digits are preserved)
    /// 4. Remove remaining underscores, spaces, dots and hyphens
    ///
    /// Examples: "DSC_0001.JPG" -> "dsc0001.jpg",
    /// "Report (1).pdf" -> "report.pdf", "Report_123.pdf" -> "report.pdf"
    pub fn normalize(&self, filename: &str) -> String {
        if filename.is_empty() {
            return String::new();
        }

        if let Some(cached) = self
            .cache
            .lock()
            .expect("normalizer cache lock poisoned")
            .get(filename)
        {
            return cached.clone();
        }

        let lowered = filename.to_lowercase();
        let (stem, ext) = split_stem_ext(&lowered);

        let cleaned = PATTERN_BRACKETS.replace_all(stem, "");
        let cleaned = PATTERN_COPY_MARKERS.replace_all(&cleaned, "");
        let cleaned = PATTERN_TRAILING_NUMBERS.replace_all(&cleaned, "");
        let cleaned = PATTERN_NOISE.replace_all(&cleaned, "");

        let normalized = format!("{}{}", cleaned, ext);

        self.cache
            .lock()
            .expect("normalizer cache lock poisoned")
            .put(filename.to_string(), normalized.clone());

        normalized
    }
}
