//! One-shot teardown for a run.
//!
//! Every terminal path (measurement, timeout, mutation failure, an early
//! return or a panic in the loop) ends in [`CleanupGuard::run`]. The guard
//! owns the server handle and the file snapshot, so nothing else can
//! terminate the server or restore the file, and a flag makes the second and
//! later calls no-ops. `Drop` runs it if the owner never did.

use tracing::{debug, error, warn};

use crate::process::ServerControl;
use crate::trigger::FileSnapshot;

/// What the cleanup actually did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Termination was requested and did not error
    pub terminated: bool,
    /// The watched file was written back
    pub restored: bool,
}

pub struct CleanupGuard<S: ServerControl> {
    server: S,
    snapshot: Option<FileSnapshot>,
    done: bool,
}

impl<S: ServerControl> CleanupGuard<S> {
    pub fn new(server: S) -> Self {
        Self {
            server,
            snapshot: None,
            done: false,
        }
    }

    /// Where the trigger controller parks the snapshot before mutating.
    pub fn snapshot_slot(&mut self) -> &mut Option<FileSnapshot> {
        &mut self.snapshot
    }

    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    /// Terminate the server group, then restore the file if it was mutated.
    /// Returns `None` if cleanup already ran.
    pub fn run(&mut self) -> Option<CleanupReport> {
        if self.done {
            return None;
        }
        self.done = true;

        let mut report = CleanupReport::default();

        match self.server.terminate() {
            Ok(()) => report.terminated = true,
            Err(e) => warn!(pid = ?self.server.pid(), "Could not terminate server: {}", e),
        }

        if let Some(snapshot) = self.snapshot.as_mut() {
            match snapshot.restore() {
                Ok(restored) => {
                    report.restored = restored;
                    if restored {
                        debug!("restored {}", snapshot.path().display());
                    }
                }
                Err(e) => error!("{}", e),
            }
        }

        Some(report)
    }
}

impl<S: ServerControl> Drop for CleanupGuard<S> {
    fn drop(&mut self) {
        if !self.done {
            warn!("run ended without cleanup, cleaning up now");
            self.run();
        }
    }
}
