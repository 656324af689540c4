//! # Dev Server Benchmark - Main Entry Point
//!
//! 1. **Parse arguments** and **initialize logging**
//! 2. **Build the run configuration** (target discovery for hot-reload)
//! 3. **Run the harness** until a measurement, the deadline, or Ctrl-C
//! 4. **Report**: one summary line, optionally one JSON record
//!
//! Exit status is 0 for a measurement and 1 for everything else.

use clap::Parser;
use colored::*;
use devserver_bench::{
    cli::Args,
    harness::{BenchmarkHarness, RunConfig},
    results::{print_summary, ResultsManager, RunRecord},
};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match devserver_bench::logging::init_logging(
        args.verbose,
        args.quiet,
        args.log_file.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    info!("Starting Dev Server Benchmark v{}", devserver_bench::VERSION);

    // Discovery failures surface here, before anything is spawned.
    let config = RunConfig::from_args(&args)?;
    let harness = BenchmarkHarness::new(config.clone());

    // Dropping the run future on Ctrl-C lets the cleanup guard restore the
    // file and kill the server group.
    let report = tokio::select! {
        report = harness.run() => report?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", format!("{}: interrupted", config.label()).red());
            return Ok(1);
        }
    };

    print_summary(&config, &report);

    if let Some(path) = &args.output_file {
        ResultsManager::new(path).append(&RunRecord::new(&config, &report))?;
    }

    Ok(report.exit_code())
}
