//! Handle to a process running inside a container.
//!
//! A [`Process`] is returned by [`Shell::run`]. It exposes the process's
//! output as streams, its lifecycle as a [`ProcessState`], and lets callers
//! wait on it or signal it.

mod state;
mod stream;
mod tasks;
mod timer;

pub use state::ProcessState;
pub use stream::{ProcessStderr, ProcessStdout};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dockhand_shared::constants::exec::{OUTPUT_CHANNEL_DEPTH, OUTPUT_DRAIN_GRACE};
use dockhand_shared::constants::signals::{SIGKILL, SIGTERM};
use dockhand_shared::errors::{DockhandError, DockhandResult};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::backend::{ExecInspection, ExecSession};
use crate::shell::{Encoding, ExecResult, Shell, TimeoutPolicy};
use state::Lifecycle;
use tasks::{OutputFault, ProcessTasks};

/// What is known about a process independent of its lifecycle.
pub(crate) struct Identity {
    pub(crate) exec_id: String,
    pub(crate) command: String,
    pub(crate) started_at: DateTime<Utc>,
    pid: Mutex<Option<u32>>,
    host_pid: Mutex<Option<u32>>,
}

impl Identity {
    fn new(exec_id: String, command: String) -> Self {
        Self {
            exec_id,
            command,
            started_at: Utc::now(),
            pid: Mutex::new(None),
            host_pid: Mutex::new(None),
        }
    }

    pub(crate) fn record(&self, inspection: &ExecInspection) {
        if let Some(pid) = inspection.pid {
            self.pid.lock().get_or_insert(pid);
        }
        if let Some(host_pid) = inspection.host_pid {
            self.host_pid.lock().get_or_insert(host_pid);
        }
    }

    /// Container-local pid, inspecting the session if it isn't cached yet.
    pub(crate) async fn resolve_pid(&self, shell: &Shell) -> DockhandResult<Option<u32>> {
        let cached = *self.pid.lock();
        if cached.is_some() {
            return Ok(cached);
        }
        let inspection = shell.backend().inspect_exec(&self.exec_id).await?;
        self.record(&inspection);
        Ok(*self.pid.lock())
    }
}

/// A process started inside a container.
///
/// Dropping the handle does not stop the process.
///
/// # Example
///
/// ```rust,no_run
/// # async fn example(shell: dockhand::Shell) -> dockhand::DockhandResult<()> {
/// use futures::StreamExt;
///
/// let mut process = shell.run("for i in 1 2 3; do echo $i; sleep 1; done").await?;
/// let mut stdout = process.stdout().expect("stdout not taken yet");
/// while let Some(chunk) = stdout.next().await {
///     print!("{}", String::from_utf8_lossy(&chunk));
/// }
/// let code = process.wait().await;
/// # Ok(())
/// # }
/// ```
pub struct Process {
    shell: Shell,
    identity: Arc<Identity>,
    lifecycle: Lifecycle,
    cwd: String,
    timeout: Option<TimeoutPolicy>,
    encoding: Option<Encoding>,
    started: Instant,
    stdout: Option<ProcessStdout>,
    stderr: Option<ProcessStderr>,
    output_fault: OutputFault,
}

impl Process {
    pub(crate) fn spawn(
        shell: Shell,
        session: ExecSession,
        command: String,
        cwd: String,
        timeout: Option<TimeoutPolicy>,
        encoding: Option<Encoding>,
    ) -> Self {
        let (stdout_tx, stdout_rx) = mpsc::channel(OUTPUT_CHANNEL_DEPTH);
        let (stderr_tx, stderr_rx) = mpsc::channel(OUTPUT_CHANNEL_DEPTH);
        let identity = Arc::new(Identity::new(session.id.clone(), command));
        let lifecycle = Lifecycle::new();
        let output_fault = OutputFault::default();

        ProcessTasks::spawn_pump(
            session.id,
            session.output,
            stdout_tx,
            stderr_tx,
            output_fault.clone(),
        );
        ProcessTasks::spawn_status(shell.clone(), identity.clone(), lifecycle.clone());
        if let Some(policy) = timeout {
            timer::arm(policy, shell.clone(), identity.clone(), lifecycle.clone());
        }

        Self {
            shell,
            identity,
            lifecycle,
            cwd,
            timeout,
            encoding,
            started: Instant::now(),
            stdout: Some(ProcessStdout {
                receiver: stdout_rx,
            }),
            stderr: Some(ProcessStderr {
                receiver: stderr_rx,
            }),
            output_fault,
        }
    }

    /// Backend exec session id.
    pub fn id(&self) -> &str {
        &self.identity.exec_id
    }

    /// The command line as handed to the interpreter.
    pub fn command(&self) -> &str {
        &self.identity.command
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.identity.started_at
    }

    pub fn timeout_policy(&self) -> Option<TimeoutPolicy> {
        self.timeout
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    pub fn state(&self) -> ProcessState {
        self.lifecycle.current()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Exit code if the process has finished, without waiting.
    pub fn poll(&self) -> Option<i32> {
        self.state().code()
    }

    /// Wait until the process finishes and return its exit code.
    ///
    /// Signal deaths caused by the handle yield the negated signal number.
    pub async fn wait(&self) -> i32 {
        self.lifecycle.wait_terminal().await.code().unwrap_or(-1)
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`.
    ///
    /// Expiry is reported as [`DockhandError::TimedOut`] and leaves the
    /// process running.
    pub async fn wait_timeout(&self, timeout: Duration) -> DockhandResult<i32> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(code) => Ok(code),
            Err(_) => Err(DockhandError::TimedOut {
                command: self.identity.command.clone(),
                elapsed: timeout,
                stdout: Vec::new(),
                stderr: Vec::new(),
            }),
        }
    }

    /// Take the stdout stream. Returns `None` once taken.
    pub fn stdout(&mut self) -> Option<ProcessStdout> {
        self.stdout.take()
    }

    /// Take the stderr stream. Returns `None` once taken.
    pub fn stderr(&mut self) -> Option<ProcessStderr> {
        self.stderr.take()
    }

    /// Wait for the process and collect whatever output was not taken.
    ///
    /// A process stopped by its timeout policy yields
    /// [`DockhandError::TimedOut`] with the partial output. Output cut off
    /// by a transport error yields [`DockhandError::Exec`].
    pub async fn output(mut self) -> DockhandResult<ExecResult> {
        let (stdout, stderr) =
            collect_output(self.stdout.take(), self.stderr.take(), &self.lifecycle).await;
        let state = self.lifecycle.wait_terminal().await;
        let duration = self.started.elapsed();

        if let Some(reason) = self.output_fault.lock().take() {
            return Err(DockhandError::Exec(format!(
                "output of '{}' was cut off: {}",
                self.identity.command, reason
            )));
        }

        match state {
            ProcessState::TimedOut { .. } => Err(DockhandError::TimedOut {
                command: self.identity.command.clone(),
                elapsed: duration,
                stdout,
                stderr,
            }),
            state => Ok(ExecResult {
                command: self.identity.command.clone(),
                exit_code: state.code().unwrap_or(-1),
                stdout,
                stderr,
                duration,
                encoding: self.encoding,
            }),
        }
    }

    /// Container-local pid of the process, if the backend reports one.
    pub async fn pid(&self) -> DockhandResult<Option<u32>> {
        self.identity.resolve_pid(&self.shell).await
    }

    /// Host pid of the process, if it can be determined.
    pub async fn host_pid(&self) -> DockhandResult<Option<u32>> {
        let Some(pid) = self.pid().await? else {
            return Ok(None);
        };
        // Inspection may have reported the host pid along with the pid.
        let cached = *self.identity.host_pid.lock();
        if cached.is_some() {
            return Ok(cached);
        }
        let host_pid = self
            .shell
            .local_to_host_pid_matching(
                pid,
                Some(self.identity.command.as_str()),
                Some(self.identity.started_at),
            )
            .await;
        if let Some(host_pid) = host_pid {
            self.identity.host_pid.lock().get_or_insert(host_pid);
        }
        Ok(host_pid)
    }

    /// Send `signal` to the process.
    ///
    /// Does nothing once the process has finished.
    pub async fn send_signal(&self, signal: i32) -> DockhandResult<()> {
        if self.is_finished() {
            tracing::debug!(exec_id = %self.identity.exec_id, signal, "Process already finished, not signalling");
            return Ok(());
        }
        let pid = self
            .identity
            .resolve_pid(&self.shell)
            .await?
            .ok_or_else(|| DockhandError::ProcessSignalFailed {
                pid: 0,
                signal,
                reason: format!("no container pid known for exec {}", self.identity.exec_id),
            })?;
        self.shell.send_signal(pid, signal).await
    }

    /// Send SIGTERM.
    pub async fn terminate(&self) -> DockhandResult<()> {
        self.send_signal(SIGTERM).await
    }

    /// Send SIGKILL and mark the process killed.
    ///
    /// The kill is recorded before delivery, so an exit observed while the
    /// signal is in flight is still reported as [`ProcessState::Killed`].
    pub async fn kill(&self) -> DockhandResult<()> {
        if !self.lifecycle.request_kill(SIGKILL) {
            return Ok(());
        }
        if let Err(e) = self.send_signal(SIGKILL).await {
            self.lifecycle.cancel_kill();
            return Err(e);
        }
        self.lifecycle.force(ProcessState::Killed { signal: SIGKILL });
        Ok(())
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("exec_id", &self.identity.exec_id)
            .field("command", &self.identity.command)
            .field("state", &self.state())
            .finish()
    }
}

/// Read both streams concurrently until they end, or until the process is
/// terminal and no chunk arrived for `OUTPUT_DRAIN_GRACE`.
async fn collect_output(
    mut stdout: Option<ProcessStdout>,
    mut stderr: Option<ProcessStderr>,
    lifecycle: &Lifecycle,
) -> (Vec<u8>, Vec<u8>) {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let terminal = lifecycle.wait_terminal();
    tokio::pin!(terminal);
    let mut drain_deadline: Option<tokio::time::Instant> = None;

    while stdout.is_some() || stderr.is_some() {
        let grace = async move {
            match drain_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            chunk = next_chunk(&mut stdout) => match chunk {
                Some(chunk) => {
                    out.extend_from_slice(&chunk);
                    drain_deadline = drain_deadline.map(|_| idle_deadline());
                }
                None => stdout = None,
            },
            chunk = next_chunk(&mut stderr) => match chunk {
                Some(chunk) => {
                    err.extend_from_slice(&chunk);
                    drain_deadline = drain_deadline.map(|_| idle_deadline());
                }
                None => stderr = None,
            },
            _ = &mut terminal, if drain_deadline.is_none() => {
                drain_deadline = Some(idle_deadline());
            }
            _ = grace => {
                tracing::debug!("Output idle after process finished, returning what arrived");
                break;
            }
        }
    }
    (out, err)
}

fn idle_deadline() -> tokio::time::Instant {
    tokio::time::Instant::now() + OUTPUT_DRAIN_GRACE
}

async fn next_chunk<S>(stream: &mut Option<S>) -> Option<Vec<u8>>
where
    S: Stream<Item = Vec<u8>> + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
