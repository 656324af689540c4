//! # Process Supervisor
//!
//! Launches the server command as the leader of a new process group, streams
//! its stdout line by line, and terminates the whole group on request.
//!
//! The dev server is usually a wrapper chain (`sh` → `npm` → `node` → worker
//! processes), so signalling only the direct child would leave the actual
//! server running. Because the child is started with `process_group(0)`, its
//! pid doubles as the group id and `killpg` reaches every descendant.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{HarnessError, HarnessResult};

/// Capacity of the stdout line channel
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle operations the cleanup path needs from a server.
///
/// Implemented by [`ServerProcess`]; the cleanup guard only ever sees this
/// trait, which is also what tests substitute.
pub trait ServerControl {
    fn pid(&self) -> Option<u32>;

    /// Terminate the server and everything it spawned. Must be idempotent and
    /// must not fail when the process is already gone.
    fn terminate(&mut self) -> HarnessResult<()>;
}

/// Ordered stream of stdout lines from the server
pub struct OutputStream {
    rx: mpsc::Receiver<String>,
}

impl OutputStream {
    /// Next line, or `None` once the server closed its stdout.
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Handle to the spawned server
pub struct ServerProcess {
    child: Child,
    pid: Option<u32>,
    terminated: bool,
}

impl ServerProcess {
    /// Spawn `command` through the platform shell with `workdir` as its
    /// working directory.
    pub fn launch(command: &str, workdir: &Path) -> HarnessResult<(Self, OutputStream)> {
        let mut cmd = shell_command(command);
        cmd.current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| HarnessError::Launch {
            command: command.to_string(),
            source,
        })?;
        let pid = child.id();
        debug!(?pid, "spawned `{}` in {}", command, workdir.display());

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.start_kill();
                return Err(HarnessError::MissingStdout);
            }
        };

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::spawn(pump_lines(stdout, Some(tx), "stdout"));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, None, "stderr"));
        }

        let process = Self {
            child,
            pid,
            terminated: false,
        };
        Ok((process, OutputStream { rx }))
    }

    /// Liveness of the direct child
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait up to `grace` for the direct child to exit after termination,
    /// then SIGKILL whatever is left of the group.
    pub async fn reap(&mut self, grace: Duration) -> Option<ExitStatus> {
        let status = match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("error waiting for server process: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    "server still running {:?} after termination, killing",
                    grace
                );
                None
            }
        };

        // Sent even when the leader exited: descendants that ignore SIGTERM
        // keep the group alive, and a live group pins its id so it cannot
        // have been reused. ESRCH just means the group is already empty.
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }

        match status {
            Some(status) => Some(status),
            None => {
                let _ = self.child.start_kill();
                timeout(grace, self.child.wait()).await.ok()?.ok()
            }
        }
    }

    fn kill_direct(&mut self, pid: u32) -> HarnessResult<()> {
        match self.child.start_kill() {
            Ok(()) => {
                debug!(pid, "killed server process directly");
                Ok(())
            }
            // tokio reports an already reaped child as InvalidInput
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(source) => Err(HarnessError::Terminate { pid, source }),
        }
    }
}

impl ServerControl for ServerProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&mut self) -> HarnessResult<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        let Some(pid) = self.pid else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::Signal;

            match signal_group(pid, Signal::SIGTERM) {
                Ok(()) => {
                    debug!(pid, "sent SIGTERM to process group");
                    return Ok(());
                }
                Err(Errno::ESRCH) => {
                    debug!(pid, "process group already gone");
                    return Ok(());
                }
                Err(e) => {
                    warn!(pid, error = %e, "process group kill failed, killing process only");
                }
            }
        }

        self.kill_direct(pid)
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).map_err(|_| nix::errno::Errno::EINVAL)?;
    killpg(Pid::from_raw(pgid), signal)
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Forward lines from a child pipe in order. Stdout lines go to `tx`; with no
/// sender the lines are only logged.
async fn pump_lines<R>(reader: R, tx: Option<mpsc::Sender<String>>, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                debug!(target: "devserver_bench::server", "[{}] {}", stream, line);
                if let Some(tx) = &tx {
                    if tx.send(line.to_string()).await.is_err() {
                        trace!("output receiver dropped, stopping {} pump", stream);
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("error reading server {}: {}", stream, e);
                break;
            }
        }
    }
    trace!("server {} closed", stream);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streams_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut server, mut output) =
            ServerProcess::launch("echo one; echo two; printf 'three'", dir.path()).unwrap();

        assert_eq!(output.next_chunk().await.as_deref(), Some("one"));
        assert_eq!(output.next_chunk().await.as_deref(), Some("two"));
        assert_eq!(output.next_chunk().await.as_deref(), Some("three"));
        assert_eq!(output.next_chunk().await, None);

        server.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let (_server, mut output) = ServerProcess::launch("cat marker.txt", dir.path()).unwrap();
        assert_eq!(output.next_chunk().await.as_deref(), Some("here"));
    }

    #[tokio::test]
    async fn test_terminate_kills_whole_group() {
        let dir = tempfile::tempdir().unwrap();
        // the grandchild prints its pid, then both shells block
        let (mut server, mut output) =
            ServerProcess::launch("sh -c 'echo $$; exec sleep 30' & wait", dir.path()).unwrap();
        let grandchild: i32 = output.next_chunk().await.unwrap().trim().parse().unwrap();

        server.terminate().unwrap();
        server.reap(Duration::from_secs(2)).await;

        // the orphaned grandchild is reaped by init asynchronously
        let pid = nix::unistd::Pid::from_raw(grandchild);
        let mut alive = true;
        for _ in 0..50 {
            if nix::sys::signal::kill(pid, None).is_err() {
                alive = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "grandchild {} survived group termination", grandchild);
    }

    #[tokio::test]
    async fn test_reap_kills_descendants_that_ignore_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        // the leader dies on SIGTERM, its child shrugs it off
        let (mut server, mut output) = ServerProcess::launch(
            "sh -c 'trap \"\" TERM; echo $$; while :; do sleep 0.1; done' & wait",
            dir.path(),
        )
        .unwrap();
        let survivor: i32 = output.next_chunk().await.unwrap().trim().parse().unwrap();

        server.terminate().unwrap();
        let status = server.reap(Duration::from_secs(2)).await;
        assert!(status.is_some(), "leader should exit on SIGTERM");

        let pid = nix::unistd::Pid::from_raw(survivor);
        let mut alive = true;
        for _ in 0..50 {
            if nix::sys::signal::kill(pid, None).is_err() {
                alive = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "{} ignored SIGTERM and was not killed", survivor);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut server, mut output) = ServerProcess::launch("true", dir.path()).unwrap();
        assert_eq!(output.next_chunk().await, None);
        server.reap(Duration::from_secs(2)).await;

        assert!(!server.is_alive());
        assert!(server.terminate().is_ok());
        assert!(server.terminate().is_ok());
    }

    #[tokio::test]
    async fn test_launch_failure_in_missing_directory() {
        let err = ServerProcess::launch("true", Path::new("/definitely/not/here"))
            .err()
            .unwrap();
        assert!(matches!(err, HarnessError::Launch { .. }));
    }
}
