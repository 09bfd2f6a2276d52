//! Background tasks behind a [`Process`](super::Process) handle.

use std::sync::Arc;

use parking_lot::Mutex;

use dockhand_shared::constants::exec::POLL_INTERVAL;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::Identity;
use super::state::Lifecycle;
use crate::backend::{ExecOutput, OutputStream};
use crate::shell::Shell;

/// Consecutive inspection failures tolerated before giving up on a session.
const MAX_INSPECT_FAILURES: u32 = 20;

/// Why the output stream ended early, if it did.
pub(crate) type OutputFault = Arc<Mutex<Option<String>>>;

pub(crate) struct ProcessTasks;

impl ProcessTasks {
    /// Fan the session's output out to the stdout and stderr channels.
    ///
    /// A stream error is recorded in `fault` before the channels close.
    pub(crate) fn spawn_pump(
        exec_id: String,
        mut output: OutputStream,
        stdout_tx: mpsc::Sender<Vec<u8>>,
        stderr_tx: mpsc::Sender<Vec<u8>>,
        fault: OutputFault,
    ) {
        tokio::spawn(async move {
            let mut chunk_count = 0u64;
            while let Some(item) = output.next().await {
                match item {
                    Ok(chunk) => {
                        chunk_count += 1;
                        Self::route_output(chunk, &stdout_tx, &stderr_tx).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            exec_id = %exec_id,
                            error = %e,
                            chunk_count,
                            "Output stream error, breaking"
                        );
                        *fault.lock() = Some(e.to_string());
                        break;
                    }
                }
            }
            tracing::debug!(exec_id = %exec_id, chunk_count, "Output stream ended");
        });
    }

    async fn route_output(
        output: ExecOutput,
        stdout_tx: &mpsc::Sender<Vec<u8>>,
        stderr_tx: &mpsc::Sender<Vec<u8>>,
    ) {
        // A dropped receiver only means nobody reads that stream any more.
        match output {
            ExecOutput::Stdout(data) => {
                tracing::trace!(len = data.len(), "Received stdout");
                let _ = stdout_tx.send(data).await;
            }
            ExecOutput::Stderr(data) => {
                tracing::trace!(len = data.len(), "Received stderr");
                let _ = stderr_tx.send(data).await;
            }
        }
    }

    /// Poll the session until it stops, then record its exit code.
    pub(crate) fn spawn_status(shell: Shell, identity: Arc<Identity>, lifecycle: Lifecycle) {
        tokio::spawn(async move {
            let disarm = lifecycle.disarm_token();
            let mut failures = 0u32;

            while !lifecycle.current().is_terminal() {
                match shell.backend().inspect_exec(&identity.exec_id).await {
                    Ok(inspection) => {
                        failures = 0;
                        identity.record(&inspection);
                        // Not running without an exit code: not started yet.
                        if let (false, Some(code)) = (inspection.running, inspection.exit_code) {
                            if lifecycle.finish(code as i32) {
                                tracing::debug!(
                                    exec_id = %identity.exec_id,
                                    exit_code = code,
                                    state = ?lifecycle.current(),
                                    "Process finished"
                                );
                            }
                            break;
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            exec_id = %identity.exec_id,
                            error = %e,
                            failures,
                            "Exec inspection failed"
                        );
                        if failures >= MAX_INSPECT_FAILURES {
                            tracing::error!(
                                exec_id = %identity.exec_id,
                                "Giving up on exec session, marking it exited with -1"
                            );
                            lifecycle.finish(-1);
                            break;
                        }
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = disarm.cancelled() => {}
                }
            }
        });
    }
}
