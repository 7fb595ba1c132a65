use std::path::Path;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use tokio::fs;

use crate::command::DedupOutcome;
use crate::{DedupParams, DuplicateGroup, OutputFormat, format_bytes};

/// Output formatter for deduplication results
///
/// This component is responsible for presenting results in various
/// formats and providing a convenient user interface
pub struct OutputFormatter<'a> {
    params: &'a DedupParams,
}

/// JSON envelope around the outcome; adds the run configuration and the
/// derived totals so a consumer does not have to recompute them
#[derive(Serialize)]
struct JsonReport<'a> {
    directory: &'a Path,
    mode: crate::DedupMode,
    boost: crate::BoostMode,
    duplicate_file_count: usize,
    total_wasted_space: u64,
    #[serde(flatten)]
    outcome: &'a DedupOutcome,
}

impl<'a> OutputFormatter<'a> {
    /// Creates a new formatter instance
    pub fn new(params: &'a DedupParams) -> Self {
        Self { params }
    }

    /// Main function for displaying results
    ///
    /// Selects an output format based on configuration and displays results
    pub fn display_results(&self, outcome: &DedupOutcome) -> Result<()> {
        match self.params.output_format {
            OutputFormat::Text => println!("{}", self.format_as_text(outcome)),
            OutputFormat::Json => println!("{}", self.format_as_json(outcome)?),
        }
        Ok(())
    }

    /// Saves results to a file
    pub async fn save_to_file(&self, outcome: &DedupOutcome, output_path: &Path) -> Result<()> {
        let content = match self.params.output_format {
            OutputFormat::Text => self.format_as_text(outcome),
            OutputFormat::Json => self.format_as_json(outcome)?,
        };

        fs::write(output_path, content).await?;
        Ok(())
    }

    fn format_as_json(&self, outcome: &DedupOutcome) -> Result<String> {
        let report = JsonReport {
            directory: &self.params.directory,
            mode: self.params.mode,
            boost: self.params.boost,
            duplicate_file_count: outcome.duplicate_file_count(),
            total_wasted_space: outcome.total_wasted_space(),
            outcome,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }

    /// Formats results as text
    fn format_as_text(&self, outcome: &DedupOutcome) -> String {
        let mut output = String::new();

        // Report header
        output.push_str("📊 DEDUPLICATION RESULTS\n");
        output.push_str(&"═".repeat(50));
        output.push('\n');

        // General statistics
        output.push_str(&format!("📁 Scanned Directory: {}\n", self.params.directory.display()));
        output.push_str(&format!("🕑 Generated: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
        output.push_str(&format!("⚙️  Mode: {:?}, boost: {:?}\n", self.params.mode, self.params.boost));
        output.push_str(&format!("📄 Files Scanned: {}\n", outcome.files.len()));
        output.push_str(&format!("🔄 Duplicate Files: {}\n", outcome.duplicate_file_count()));
        output.push_str(&format!("📦 Duplicate Groups: {}\n", outcome.groups.len()));
        output.push_str(&format!("💾 Wasted Space: {}\n", format_bytes(outcome.total_wasted_space())));

        if outcome.dedup_stats.interrupted {
            output.push_str("⚠️  Run was cancelled: results are partial\n");
        }
        if outcome.dedup_stats.skipped_files > 0 || outcome.scan_stats.entries_skipped > 0 {
            output.push_str(&format!(
                "🚫 Skipped: {} entries during scan, {} files during hashing\n",
                outcome.scan_stats.entries_skipped, outcome.dedup_stats.skipped_files
            ));
        }
        output.push('\n');

        // Per-stage pipeline statistics
        output.push_str("⏱️  PIPELINE STAGES\n");
        output.push_str(&"─".repeat(50));
        output.push('\n');
        output.push_str(&format!(
            "   scan: {} files in {:?}\n",
            outcome.scan_stats.files_seen, outcome.scan_stats.elapsed
        ));
        for stage in &outcome.dedup_stats.stages {
            output.push_str(&format!(
                "   {}: {} files in {} groups, {:?}\n",
                stage.name, stage.files_entering, stage.groups_entering, stage.elapsed
            ));
        }
        output.push('\n');

        if outcome.groups.is_empty() {
            output.push_str("🎉 No duplicates found! Your file system is clean.\n");
            return output;
        }

        // Detailed information about duplicate groups
        output.push_str("🔍 DUPLICATE GROUPS (largest first)\n");
        output.push_str(&"─".repeat(50));
        output.push('\n');

        for (index, group) in outcome.groups.iter().enumerate() {
            output.push_str(&self.format_duplicate_group(group, index + 1));
            output.push('\n');
        }

        output
    }

    /// Formats one duplicate group
    fn format_duplicate_group(&self, group: &DuplicateGroup, group_number: usize) -> String {
        let mut output = String::new();

        output.push_str(&format!("📋 Group #{} ({})\n", group_number, format_bytes(group.size)));
        output.push_str(&format!("   💰 Wasted space: {}\n", format_bytes(group.wasted_space())));
        output.push_str(&format!("   📊 {} duplicate files:\n", group.files.len()));

        for (file_index, file) in group.files.iter().enumerate() {
            // The first file is the one a user would keep
            let file_marker = if file.is_favourite {
                "⭐"
            } else if file_index == 0 {
                "📌"
            } else {
                "🔄"
            };

            output.push_str(&format!("     {} {}\n", file_marker, file.path.display()));
        }

        output
    }
}
