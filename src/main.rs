//! # Dupescout CLI Application
//!
//! Command-line interface for the dupescout library.
//! This binary provides a user-friendly interface to scan directories
//! and find duplicate files.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

// Use our library
use dupescout::{DedupCommand, DedupParams, OutputFormatter, ProgressFn, StopFlag, format_bytes};

/// Main entry point for the CLI application
///
/// This function coordinates the entire duplicate finding process:
/// 1. Initializes logging system
/// 2. Parses command line arguments
/// 3. Wires Ctrl-C to the engine's stop flag
/// 4. Runs the scan and deduplication pipeline
/// 5. Formats and displays results
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize a logging system with level based on verbose flag
    // We check for a verbose flag before parsing to set up logging correctly
    let verbose = std::env::args().any(|arg| arg == "-v" || arg == "--verbose");

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false) // Don't show module names in logs for cleaner output
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global logger");

    // Parse command line arguments using clap
    let params = DedupParams::parse();

    info!("🚀 Starting Dupescout v{}", env!("CARGO_PKG_VERSION"));
    info!("📁 Target directory: {}", params.directory.display());

    display_welcome_banner(&params);

    // Ctrl-C requests a cooperative stop; the engine returns whatever it
    // has confirmed so far.
    let stop = StopFlag::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Cancellation requested, finishing current work...");
                stop.stop();
            }
        });
    }

    // Progress spinner fed by the engine's progress callback
    let spinner = make_spinner(params.verbose);
    let progress: Option<ProgressFn> = spinner.clone().map(|bar| {
        let callback: ProgressFn = Arc::new(move |stage: &str, current: u64, total: Option<u64>| {
            match total {
                Some(total) => bar.set_message(format!("{stage}: {current}/{total} files")),
                None => bar.set_message(format!("{stage}: {current} files")),
            }
            bar.tick();
        });
        callback
    });

    let command = DedupCommand::new(params.clone());

    match command.execute(&stop, progress).await {
        Ok(outcome) => {
            if let Some(bar) = &spinner {
                bar.finish_and_clear();
            }
            info!("📊 Run completed successfully");

            let formatter = OutputFormatter::new(&params);

            if let Err(e) = formatter.display_results(&outcome) {
                error!("Failed to display results: {}", e);
                std::process::exit(1);
            }

            // Save to a file if requested
            if let Some(output_file) = &params.output_file {
                match formatter.save_to_file(&outcome, output_file).await {
                    Ok(()) => {
                        println!("💾 Results saved to: {}", output_file.display());
                        info!("Results saved to file: {}", output_file.display());
                    }
                    Err(e) => {
                        error!("Failed to save results to file: {}", e);
                        eprintln!("❌ Failed to save results: {}", e);
                        std::process::exit(1);
                    }
                }
            }

            display_completion_summary(&outcome);
        }
        Err(e) => {
            if let Some(bar) = &spinner {
                bar.finish_and_clear();
            }
            error!("Run failed: {}", e);
            eprintln!("❌ Run failed: {}", e);

            // Provide helpful error context
            display_error_help(&e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Creates the progress spinner unless verbose logging would fight with it
fn make_spinner(verbose: bool) -> Option<ProgressBar> {
    if verbose {
        return None;
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .expect("Invalid progress bar template"),
    );
    Some(bar)
}

/// Displays a welcome banner with configuration information
fn display_welcome_banner(params: &DedupParams) {
    println!("🔍 Dupescout v{}", env!("CARGO_PKG_VERSION"));
    println!("📂 Scanning directory: {}", params.directory.display());

    if params.verbose {
        println!();
        println!("🔧 Configuration:");
        println!("   🧪 Mode: {:?}", params.mode);
        println!("   🚀 Boost: {:?}", params.boost);

        if params.min_size > 1 {
            println!("   📏 Min size: {}", format_bytes(params.min_size));
        }

        if params.max_size > 0 {
            println!("   📐 Max size: {}", format_bytes(params.max_size));
        }

        if !params.extensions.is_empty() {
            println!("   🧩 Extensions: {}", params.extensions.join(", "));
        }

        for dir in &params.favourite_dirs {
            println!("   ⭐ Favourite: {}", dir.display());
        }

        for dir in &params.excluded_dirs {
            println!("   🚫 Excluded: {}", dir.display());
        }

        println!("   🧵 Threads: {}",
                 if params.threads == 0 {
                     "auto".to_string()
                 } else {
                     params.threads.to_string()
                 }
        );

        println!("   📄 Output format: {:?}", params.output_format);
    }

    println!();
}

/// Displays a completion summary with key metrics
fn display_completion_summary(outcome: &dupescout::DedupOutcome) {
    println!();
    if outcome.dedup_stats.interrupted {
        println!("⚠️  Cancelled - showing partial results");
    } else {
        println!("✅ Run completed!");
    }
    println!("⏱️  Duration: {:?}", outcome.dedup_stats.total_elapsed + outcome.scan_stats.elapsed);

    if outcome.groups.is_empty() {
        println!("🎉 No duplicates found - your files are perfectly organized!");
    } else {
        println!("📊 Summary:");
        println!("   📁 Files scanned: {}", outcome.files.len());
        println!("   🔄 Duplicate files: {}", outcome.duplicate_file_count());
        println!("   📦 Duplicate groups: {}", outcome.groups.len());
        println!("   💾 Space wasted: {}", format_bytes(outcome.total_wasted_space()));

        let largest_group = outcome.groups.iter().max_by_key(|g| g.wasted_space());
        if let Some(group) = largest_group {
            println!("   🏆 Largest group: {} files, {} wasted",
                     group.files.len(),
                     format_bytes(group.wasted_space())
            );
        }
    }
}

/// Provides helpful error context and suggestions
fn display_error_help(error: &dupescout::DedupError) {
    println!();
    println!("💡 Troubleshooting tips:");

    match error {
        dupescout::DedupError::PathNotFound { .. } | dupescout::DedupError::NotADirectory { .. } => {
            println!("   • Verify the directory path exists");
            println!("   • Use absolute paths to avoid confusion");
            println!("   • Check for typos in the path");
        }
        dupescout::DedupError::InvalidSizeFilter { .. } => {
            println!("   • Make sure min-size is less than max-size");
            println!("   • Use 0 for max-size to remove the upper limit");
        }
        dupescout::DedupError::NoFilesFound { .. } => {
            println!("   • Loosen the size or extension filters");
            println!("   • Check that the excluded directories do not cover the whole tree");
        }
        dupescout::DedupError::Io(_) => {
            println!("   • Try running with -v flag for more detailed error information");
            println!("   • Check that the target directory is accessible");
        }
    }

    println!("   • Run 'dupescout --help' for usage information");
}
