//! Region Cache - bounded tile cache for Whole Slide Image viewers.
//!
//! This binary sizes and exercises the cache with synthetic viewing sessions.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_region_cache::{
    config::{CheckConfig, Cli, Command, SimulateConfig},
    run_simulation, SimulationReport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Simulate(config) => run_simulate(config).await,
        Command::Check(config) => run_check(config),
    }
}

// =============================================================================
// Simulate Command
// =============================================================================

async fn run_simulate(config: SimulateConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Cache budget: {}", config.cache.max_bytes);
    info!(
        "  Workers: {} x {} requests over {} slide(s)",
        config.workers, config.requests, config.sources
    );
    info!("  Downsamples: {:?}", config.downsamples);

    let report = match run_simulation(&config).await {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&report);
    }

    if report.consistent {
        ExitCode::SUCCESS
    } else {
        error!("Cache counters are inconsistent with the live tiles");
        ExitCode::FAILURE
    }
}

/// Print a human-readable simulation report.
fn print_report(report: &SimulationReport) {
    let stats = &report.stats;
    let mb = |bytes: usize| bytes as f64 / (1024.0 * 1024.0);

    println!("Region Cache Simulation");
    println!("═══════════════════════");
    println!("  Requests:     {}", report.requests);
    println!(
        "  Cache hits:   {} ({:.1}%)",
        report.cache_hits,
        percent(report.cache_hits, report.requests)
    );
    println!("  Decodes:      {}", report.decodes);
    println!("  Invalidated:  {}", report.invalidated);
    println!("  Evictions:    {}", stats.evictions);
    println!("  Elapsed:      {} ms", report.elapsed_ms);
    println!();
    println!("  Entries:      {} / {}", stats.entries, stats.max_entries);
    println!(
        "  Memory:       {:.2} MB / {:.2} MB",
        mb(stats.bytes),
        mb(stats.max_bytes)
    );
    println!(
        "  Consistent:   {}",
        if report.consistent { "✓ yes" } else { "✗ no" }
    );
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_region_cache=debug"
    } else {
        "wsi_region_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Check Command
// =============================================================================

fn run_check(config: CheckConfig) -> ExitCode {
    println!("Region Cache Configuration Check");
    println!("════════════════════════════════");
    println!();

    if let Err(e) = config.cache.validate() {
        println!("✗ Cache: {}", e);
        return ExitCode::FAILURE;
    }

    // validate() has already parsed both values
    let max_bytes = config.cache.max_bytes_value().unwrap_or_default();
    let max_entries = config.cache.resolved_max_entries().unwrap_or_default();

    println!(
        "✓ Byte budget: {} ({} bytes)",
        config.cache.max_bytes, max_bytes
    );
    match config.cache.max_entries {
        Some(_) => println!("✓ Entry ceiling: {}", max_entries),
        None => println!("✓ Entry ceiling: {} (derived from byte budget)", max_entries),
    }

    println!();
    println!("════════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
