//! # Trigger Controller
//!
//! Drives the hot-reload variant from `Ready` to the file edit:
//!
//! ```text
//! idle → warming-up → stabilizing → triggered → measured
//! ```
//!
//! Warm-up and stabilization run in a background task that reports back to
//! the harness loop with [`TriggerEvent::StabilizationElapsed`]; the mutation
//! itself is applied by the loop, so the watched file has a single writer.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::utils::{current_timestamp_ms, generate_test_id};

/// Warm-up requests give up after this long
const WARMUP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TriggerPhase {
    Idle,
    WarmingUp,
    Stabilizing,
    Triggered,
    Measured,
}

/// Messages from the background warm-up task to the harness loop
#[derive(Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    WarmupFinished { ok: bool },
    StabilizationElapsed,
}

/// Original bytes of the watched file plus the bookkeeping that makes
/// restoration happen at most once.
#[derive(Debug)]
pub struct FileSnapshot {
    path: PathBuf,
    original: Vec<u8>,
    mutated: bool,
    restored: bool,
}

impl FileSnapshot {
    /// Read the current content of `path`
    pub fn capture(path: &Path) -> HarnessResult<Self> {
        let original = std::fs::read(path).map_err(|source| HarnessError::Snapshot {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            original,
            mutated: false,
            restored: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original(&self) -> &[u8] {
        &self.original
    }

    pub fn is_mutated(&self) -> bool {
        self.mutated
    }

    /// Write `marker` followed by the original content.
    ///
    /// The snapshot counts as mutated as soon as the write is attempted, so a
    /// write that fails half way is still restored.
    pub fn mutate(&mut self, marker: &str) -> HarnessResult<()> {
        let mut content = Vec::with_capacity(marker.len() + 1 + self.original.len());
        content.extend_from_slice(marker.as_bytes());
        content.push(b'\n');
        content.extend_from_slice(&self.original);

        self.mutated = true;
        std::fs::write(&self.path, content).map_err(|source| HarnessError::Mutation {
            path: self.path.clone(),
            source,
        })
    }

    /// Put the original bytes back. Returns `Ok(false)` when there is nothing
    /// to do: never mutated, or already restored.
    pub fn restore(&mut self) -> HarnessResult<bool> {
        if !self.mutated || self.restored {
            return Ok(false);
        }
        self.restored = true;
        std::fs::write(&self.path, &self.original).map_err(|source| HarnessError::Restore {
            path: self.path.clone(),
            source,
        })?;
        Ok(true)
    }
}

/// Marker line prepended to the watched file. Unique per call.
pub fn mutation_marker(run_id: &str) -> String {
    format!(
        "// devserver-bench hot-reload {} {} {}",
        run_id,
        current_timestamp_ms(),
        generate_test_id()
    )
}

/// Hot-reload trigger state machine
pub struct TriggerController {
    target: PathBuf,
    warmup_url: String,
    stabilization_delay: Duration,
    run_id: String,
    phase: TriggerPhase,
}

impl TriggerController {
    pub fn new(
        target: PathBuf,
        warmup_url: String,
        stabilization_delay: Duration,
        run_id: String,
    ) -> Self {
        Self {
            target,
            warmup_url,
            stabilization_delay,
            run_id,
            phase: TriggerPhase::Idle,
        }
    }

    pub fn phase(&self) -> TriggerPhase {
        self.phase
    }

    /// `idle → warming-up`: start the warm-up request and the stabilization
    /// timer in the background. Does nothing outside `idle`.
    pub fn on_ready(&mut self, events: mpsc::Sender<TriggerEvent>) -> Option<JoinHandle<()>> {
        if self.phase != TriggerPhase::Idle {
            return None;
        }
        self.phase = TriggerPhase::WarmingUp;
        info!("Server ready. Warming up ({})...", self.warmup_url);

        let url = self.warmup_url.clone();
        let delay = self.stabilization_delay;
        Some(tokio::spawn(async move {
            let ok = warm_up(&url).await;
            if events.send(TriggerEvent::WarmupFinished { ok }).await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            let _ = events.send(TriggerEvent::StabilizationElapsed).await;
        }))
    }

    /// `warming-up → stabilizing`
    pub fn on_warmup_finished(&mut self) {
        if self.phase == TriggerPhase::WarmingUp {
            self.phase = TriggerPhase::Stabilizing;
            info!(
                "Waiting {:?} for the server to settle...",
                self.stabilization_delay
            );
        }
    }

    /// `stabilizing → triggered`: snapshot the target, then write the marked
    /// copy. The snapshot is handed to `slot` before the write so the caller
    /// can restore it whatever happens next. Returns the mutation instant.
    pub fn trigger(&mut self, slot: &mut Option<FileSnapshot>) -> HarnessResult<Option<Instant>> {
        if self.phase >= TriggerPhase::Triggered || slot.is_some() {
            return Ok(None);
        }
        self.phase = TriggerPhase::Triggered;

        info!("Triggering file change in {}", self.target.display());
        let snapshot = slot.insert(FileSnapshot::capture(&self.target)?);
        let marker = mutation_marker(&self.run_id);
        let at = Instant::now();
        snapshot.mutate(&marker)?;
        debug!("wrote marker `{}`", marker);
        Ok(Some(at))
    }

    /// `triggered → measured`
    pub fn on_measured(&mut self) {
        if self.phase == TriggerPhase::Triggered {
            self.phase = TriggerPhase::Measured;
        }
    }
}

/// Single best-effort GET. Any failure is logged and reported as `false`.
pub async fn warm_up(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(WARMUP_REQUEST_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("Warm-up client setup failed: {}", e);
            return false;
        }
    };

    match client.get(url).send().await {
        Ok(response) => {
            debug!(status = %response.status(), "warm-up response");
            // drain so the server finishes rendering the page
            let _ = response.bytes().await;
            info!("Page fetched.");
            true
        }
        Err(e) => {
            warn!("Warm-up fetch failed: {} (continuing)", e);
            false
        }
    }
}
