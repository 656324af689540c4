//! # Dev Server Benchmark Library
//!
//! Measures two latencies of a long-running development server:
//!
//! - **Cold start**: from launching the server to its "ready" line
//! - **Hot reload**: from editing a watched source file to its "compiled" line
//!
//! The server is treated as a black box. It is spawned as a process-group
//! leader, its stdout is scanned line by line for known phrasings, and the
//! run ends with exactly one measurement or a timeout. On every exit path the
//! whole process group is terminated and any edited file is restored.
//!
//! ## Architecture Overview
//!
//! - `process`: spawns the server, streams its output, kills its process group
//! - `detector`: declarative pattern rules that turn output lines into events
//! - `trigger`: hot-reload warm-up, stabilization delay and file mutation
//! - `cleanup`: one-shot terminate-and-restore guard
//! - `harness`: run configuration and the event loop that races the deadline
//! - `results`: summary line and JSON-lines run records
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use devserver_bench::{BenchmarkHarness, LaunchMode, RunConfig, Variant};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig {
//!         variant: Variant::ColdStart,
//!         mode: LaunchMode::Turbo,
//!         run_id: "1".to_string(),
//!         command: LaunchMode::Turbo.launch_command(),
//!         workdir: "./app".into(),
//!         target_file: None,
//!         timeout: Duration::from_secs(60),
//!         stabilization_delay: Duration::from_secs(3),
//!         warmup_url: "http://localhost:3000".to_string(),
//!     };
//!
//!     let report = BenchmarkHarness::new(config).run().await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

/// Cleanup guard that terminates the server and restores the watched file
pub mod cleanup;

/// Command-line interface and launch mode selection
pub mod cli;

/// Signal detection over server output
///
/// Holds the ordered rule table (pattern, unit, event kind) and the
/// forward-only detection state of a run.
pub mod detector;

pub mod discovery;

pub mod error;

/// Run configuration and the coordinating event loop
pub mod harness;

pub mod logging;

/// Process supervision: spawn as a group leader, stream stdout, kill the group
pub mod process;

/// Summary line and result records
pub mod results;

/// Hot-reload trigger controller and file snapshots
pub mod trigger;

pub mod utils;

pub use cli::{Args, LaunchMode, Variant};
pub use detector::{DetectionEvent, DetectionState, SignalDetector, SignalRule};
pub use error::HarnessError;
pub use harness::{BenchmarkHarness, Measurement, RunConfig, RunOutcome, RunReport};
pub use results::{ResultsManager, RunRecord};

/// The current version of the dev server benchmark
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Server project root, relative to where the benchmark is run
    pub const APP_DIR: &str = "./app";

    /// Deadline for the ready signal
    pub const COLD_START_TIMEOUT: Duration = Duration::from_secs(60);

    /// Deadline for the whole hot-reload run, including startup
    pub const HOT_RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

    /// Wait after warm-up so the mutation does not race the server's own
    /// post-ready compilation
    pub const STABILIZATION_DELAY: Duration = Duration::from_millis(3000);

    pub const WARMUP_URL: &str = "http://localhost:3000";
}
