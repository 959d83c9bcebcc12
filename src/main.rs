//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `account_scout` library that handles:
//! - Command-line argument parsing
//! - Logger initialization
//! - User-facing output formatting
//!
//! All core functionality is implemented in the library crate.

use anyhow::{Context, Result};
use clap::Parser;
use std::process;

use account_scout::initialization::init_logger_with;
use account_scout::{run_search, run_site_checks, Config, SearchState};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments into Config
    let config = Config::parse();

    // Initialize logger based on config
    let log_level = config.log_level.clone();
    let log_format = config.log_format.clone();
    init_logger_with(log_level.into(), log_format).context("Failed to initialize logger")?;

    if config.check_sites {
        let checks = match run_site_checks(config).await {
            Ok(checks) => checks,
            Err(e) => {
                eprintln!("account_scout error: {:#}", e);
                process::exit(1);
            }
        };
        let failing: Vec<_> = checks.iter().filter(|check| !check.passed()).collect();
        println!(
            "✅ {} of {} site checks passed",
            checks.len() - failing.len(),
            checks.len()
        );
        for check in &failing {
            println!(
                "❌ {}: claimed_ok={:?} unclaimed_ok={:?}",
                check.site_name, check.claimed_ok, check.unclaimed_ok
            );
        }
        if !failing.is_empty() {
            process::exit(2);
        }
        return Ok(());
    }

    // Run the search using the library
    match run_search(config).await {
        Ok(report) => {
            // Print user-friendly summary
            println!(
                "✅ Checked {} site-username pair{} ({} found, {} unregistered, {} failed) in {:.1}s",
                report.results,
                if report.results == 1 { "" } else { "s" },
                report.found,
                report.unregistered,
                report.failed,
                report.elapsed_seconds
            );
            if report.state != SearchState::Completed {
                println!("Search ended {}", report.state.as_str());
            }
            println!("Results saved in {}", report.db_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("account_scout error: {:#}", e);
            process::exit(1);
        }
    }
}
