//! Timeout enforcement.

use std::sync::Arc;

use dockhand_shared::constants::signals::{SIGKILL, SIGTERM};

use super::Identity;
use super::state::{Lifecycle, ProcessState};
use crate::shell::{Shell, TimeoutPolicy};

/// Arm the timeout timer for a process.
///
/// SIGTERM goes out once `time_limit` has elapsed. With a `kill_after`
/// grace, SIGKILL follows unless the process stopped in between. Any
/// terminal transition disarms the timer.
pub(crate) fn arm(policy: TimeoutPolicy, shell: Shell, identity: Arc<Identity>, lifecycle: Lifecycle) {
    tokio::spawn(async move {
        let disarm = lifecycle.disarm_token();

        tokio::select! {
            _ = disarm.cancelled() => return,
            _ = tokio::time::sleep(policy.time_limit) => {}
        }
        if !lifecycle.escalate(SIGTERM) {
            return;
        }
        tracing::debug!(
            exec_id = %identity.exec_id,
            time_limit = ?policy.time_limit,
            "Time limit reached, terminating"
        );
        deliver(&shell, &identity, SIGTERM).await;

        let Some(kill_after) = policy.kill_after else {
            return;
        };
        tokio::select! {
            _ = disarm.cancelled() => return,
            _ = tokio::time::sleep(kill_after) => {}
        }
        if !lifecycle.force(ProcessState::TimedOut { signal: SIGKILL }) {
            return;
        }
        tracing::debug!(
            exec_id = %identity.exec_id,
            kill_after = ?kill_after,
            "Process outlived its grace period, killing"
        );
        deliver(&shell, &identity, SIGKILL).await;
    });
}

async fn deliver(shell: &Shell, identity: &Identity, signal: i32) {
    let pid = match identity.resolve_pid(shell).await {
        Ok(Some(pid)) => pid,
        Ok(None) => {
            tracing::warn!(
                exec_id = %identity.exec_id,
                signal,
                "Container pid unknown, cannot signal timed out process"
            );
            return;
        }
        Err(e) => {
            tracing::warn!(exec_id = %identity.exec_id, error = %e, "Failed to resolve pid");
            return;
        }
    };
    if let Err(e) = shell.send_signal(pid, signal).await {
        tracing::warn!(exec_id = %identity.exec_id, pid, signal, error = %e, "Signal delivery failed");
    }
}
