//! # Benchmark Harness
//!
//! Runs one measurement end to end and owns its outcome.
//!
//! ## Run Lifecycle
//!
//! 1. **Launch**: spawn the server as a process-group leader
//! 2. **Detect**: feed every stdout line, in order, to the signal detector
//! 3. **Trigger** (hot-reload only): warm up, wait for the server to settle,
//!    mutate the watched file
//! 4. **Resolve**: the first of measurement, deadline or trigger failure wins
//! 5. **Cleanup**: terminate the group and restore the file, exactly once
//!
//! ## Event Loop
//!
//! All inputs (output lines, trigger progress from the warm-up task and the
//! deadline) are consumed by a single `select!` loop. Breaking out of the loop
//! is the only way to reach a terminal state, which is what makes the success
//! path and the timeout path mutually exclusive.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    cleanup::{CleanupGuard, CleanupReport},
    cli::{Args, LaunchMode, Variant},
    detector::{DetectionEvent, DetectionState, Phase, SignalDetector},
    discovery,
    error::{HarnessError, HarnessResult},
    process::ServerProcess,
    trigger::{TriggerController, TriggerEvent},
};

/// How long to wait for the server to exit after termination before SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Immutable input of one run
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub variant: Variant,
    pub mode: LaunchMode,
    pub run_id: String,
    /// Shell command that starts the server
    pub command: String,
    /// Working directory of the command
    pub workdir: PathBuf,
    /// Absolute path of the watched file; hot-reload only
    pub target_file: Option<PathBuf>,
    pub timeout: Duration,
    pub stabilization_delay: Duration,
    pub warmup_url: String,
}

impl RunConfig {
    /// Build the run configuration from CLI arguments.
    ///
    /// For hot-reload this resolves the target file; a discovery failure is
    /// returned before anything is spawned.
    pub fn from_args(args: &Args) -> Result<Self> {
        let target_file = match args.variant {
            Variant::HotReload => Some(match &args.target_file {
                Some(path) => discovery::resolve_explicit(path)?,
                None => discovery::discover_target(&args.app_dir)?,
            }),
            Variant::ColdStart => None,
        };

        Ok(Self {
            variant: args.variant,
            mode: args.mode,
            run_id: args.run_id.clone(),
            command: args
                .command
                .clone()
                .unwrap_or_else(|| args.mode.launch_command()),
            workdir: args.app_dir.clone(),
            target_file,
            timeout: args.timeout.unwrap_or_else(|| args.variant.default_timeout()),
            stabilization_delay: args
                .stabilization_delay
                .unwrap_or(crate::defaults::STABILIZATION_DELAY),
            warmup_url: args.warmup_url.clone(),
        })
    }

    /// Log prefix, e.g. `[TURBO] Run 3`
    pub fn label(&self) -> String {
        format!(
            "[{}] Run {}",
            self.mode.to_string().to_uppercase(),
            self.run_id
        )
    }
}

/// A successful measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Measurement {
    /// The figure of record: server-reported when available
    pub measured_ms: u64,
    pub reported_ms: Option<u64>,
    /// Harness wall-clock, kept as a cross-check
    pub wall_clock_ms: u64,
}

impl From<DetectionEvent> for Measurement {
    fn from(event: DetectionEvent) -> Self {
        Self {
            measured_ms: event.measured_ms(),
            reported_ms: event.reported_ms(),
            wall_clock_ms: event.elapsed_ms(),
        }
    }
}

/// Terminal state of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Measured(Measurement),
    /// Deadline elapsed; `phase` is how far the run got
    TimedOut { phase: Phase },
    /// The run could not continue (e.g. the watched file could not be written)
    Failed(String),
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    pub cleanup: CleanupReport,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Measured(_))
    }

    /// 0 on a measurement, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Runs one benchmark invocation
pub struct BenchmarkHarness {
    config: RunConfig,
    detector: SignalDetector,
}

impl BenchmarkHarness {
    pub fn new(config: RunConfig) -> Self {
        let detector = SignalDetector::new(config.variant);
        Self { config, detector }
    }

    pub fn with_detector(config: RunConfig, detector: SignalDetector) -> Self {
        Self { config, detector }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run to a terminal outcome. Only a launch failure (or a hot-reload run
    /// with no target) is returned as an error; everything after the spawn is
    /// reported through [`RunOutcome`] with cleanup already done.
    pub async fn run(&self) -> HarnessResult<RunReport> {
        let config = &self.config;
        let started = Instant::now();
        let deadline = started + config.timeout;

        let mut controller = match (config.variant, &config.target_file) {
            (Variant::HotReload, Some(target)) => Some(TriggerController::new(
                target.clone(),
                config.warmup_url.clone(),
                config.stabilization_delay,
                config.run_id.clone(),
            )),
            (Variant::HotReload, None) => {
                return Err(HarnessError::Discovery {
                    searched: Vec::new(),
                })
            }
            (Variant::ColdStart, _) => None,
        };

        info!("{}: Measuring {}...", config.label(), config.variant);
        if let Some(target) = &config.target_file {
            info!(" -> Target File: {}", target.display());
        }

        let (server, mut output) = ServerProcess::launch(&config.command, &config.workdir)?;
        let mut guard = CleanupGuard::new(server);
        let mut state = DetectionState::new();

        let (trigger_tx, mut trigger_rx) = mpsc::channel::<TriggerEvent>(8);
        let mut warmup_task = None;
        let mut stdout_open = true;

        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        let outcome = loop {
            tokio::select! {
                chunk = output.next_chunk(), if stdout_open => {
                    let Some(line) = chunk else {
                        warn!("Server closed its output before a terminal signal; waiting for the deadline");
                        stdout_open = false;
                        continue;
                    };
                    let Some(event) = self.detector.on_output(&line, &mut state) else {
                        continue;
                    };
                    match (event, controller.as_mut()) {
                        (DetectionEvent::Ready { .. }, Some(controller)) => {
                            warmup_task = controller.on_ready(trigger_tx.clone());
                        }
                        (DetectionEvent::Ready { .. }, None) => {
                            state.mark_measured(event.measured_ms());
                            info!(" -> Ready detected: {} ms", event.measured_ms());
                            break RunOutcome::Measured(event.into());
                        }
                        (DetectionEvent::Compiled { .. }, controller) => {
                            if let Some(controller) = controller {
                                controller.on_measured();
                            }
                            state.mark_measured(event.measured_ms());
                            info!(
                                " -> HMR Detected: {} ms (wall clock {} ms)",
                                event.measured_ms(),
                                event.elapsed_ms()
                            );
                            break RunOutcome::Measured(event.into());
                        }
                    }
                }
                Some(trigger_event) = trigger_rx.recv() => {
                    let Some(controller) = controller.as_mut() else {
                        continue;
                    };
                    match trigger_event {
                        TriggerEvent::WarmupFinished { ok } => {
                            debug!(ok, "warm-up finished");
                            controller.on_warmup_finished();
                        }
                        TriggerEvent::StabilizationElapsed => {
                            match controller.trigger(guard.snapshot_slot()) {
                                Ok(Some(at)) => {
                                    state.mark_triggered(at);
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    error!("{}", e);
                                    break RunOutcome::Failed(e.to_string());
                                }
                            }
                        }
                    }
                }
                _ = &mut timer => {
                    break RunOutcome::TimedOut { phase: state.phase() };
                }
            }
        };

        if let Some(task) = warmup_task {
            task.abort();
        }

        let cleanup = guard.run().unwrap_or_default();
        guard.server_mut().reap(KILL_GRACE).await;

        Ok(RunReport {
            outcome,
            elapsed: started.elapsed(),
            cleanup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(variant: &str, extra: &[&str]) -> Args {
        use clap::Parser;
        let mut argv = vec!["devserver-bench", variant, "turbo", "3"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_cold_start_config_defaults() {
        let config = RunConfig::from_args(&args("cold-start", &[])).unwrap();
        assert_eq!(config.command, "npm run dev:turbo");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.target_file.is_none());
        assert_eq!(config.stabilization_delay, Duration::from_millis(3000));
        assert_eq!(config.label(), "[TURBO] Run 3");
    }

    #[test]
    fn test_hot_reload_config_discovers_target() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/app")).unwrap();
        std::fs::write(dir.path().join("src/app/page.tsx"), "x").unwrap();
        let app_dir = dir.path().to_str().unwrap();

        let config = RunConfig::from_args(&args("hot-reload", &["--app-dir", app_dir])).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.target_file.unwrap().ends_with("src/app/page.tsx"));
    }

    #[test]
    fn test_hot_reload_config_fails_without_target() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().to_str().unwrap();

        let err = RunConfig::from_args(&args("hot-reload", &["--app-dir", app_dir])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Discovery { .. })
        ));
    }

    #[test]
    fn test_exit_codes() {
        let measured = RunReport {
            outcome: RunOutcome::Measured(Measurement {
                measured_ms: 820,
                reported_ms: Some(820),
                wall_clock_ms: 900,
            }),
            elapsed: Duration::from_millis(900),
            cleanup: CleanupReport::default(),
        };
        assert_eq!(measured.exit_code(), 0);

        let timed_out = RunReport {
            outcome: RunOutcome::TimedOut {
                phase: Phase::NotReady,
            },
            elapsed: Duration::from_secs(60),
            cleanup: CleanupReport::default(),
        };
        assert_eq!(timed_out.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_hot_reload_without_target_spawns_nothing() {
        let config = RunConfig {
            variant: Variant::HotReload,
            mode: LaunchMode::Legacy,
            run_id: "x".to_string(),
            command: "exit 0".to_string(),
            workdir: PathBuf::from("/definitely/not/here"),
            target_file: None,
            timeout: Duration::from_millis(100),
            stabilization_delay: Duration::ZERO,
            warmup_url: String::new(),
        };
        let harness = BenchmarkHarness::new(config);
        assert_eq!(harness.config().variant, Variant::HotReload);
        assert!(harness.config().target_file.is_none());

        let err = harness.run().await.unwrap_err();
        assert!(matches!(err, HarnessError::Discovery { .. }));
    }
}
