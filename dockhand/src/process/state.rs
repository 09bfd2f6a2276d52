//! Process lifecycle.
//!
//! Every handle owns one [`Lifecycle`]. The status poller, the timeout
//! timer and explicit kills all race to move it out of `Running`; the watch
//! channel serializes those transitions and the first one wins.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Where a process is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Running,
    /// Finished on its own.
    Exited(i32),
    /// Killed through the handle.
    Killed { signal: i32 },
    /// Stopped by its timeout policy. `signal` is the last one sent.
    TimedOut { signal: i32 },
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }

    /// Exit code, or the negated signal number for signal deaths.
    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessState::Running => None,
            ProcessState::Exited(code) => Some(*code),
            ProcessState::Killed { signal } | ProcessState::TimedOut { signal } => Some(-signal),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Snapshot {
    pub(crate) state: ProcessState,
    /// Signal sent by the timeout timer, if it fired.
    pub(crate) escalation: Option<i32>,
    /// Signal of a kill requested through the handle and not yet confirmed.
    pub(crate) kill_pending: Option<i32>,
}

#[derive(Clone)]
pub(crate) struct Lifecycle {
    tx: Arc<watch::Sender<Snapshot>>,
    disarm: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot {
            state: ProcessState::Running,
            escalation: None,
            kill_pending: None,
        });
        Self {
            tx: Arc::new(tx),
            disarm: CancellationToken::new(),
        }
    }

    pub(crate) fn current(&self) -> ProcessState {
        self.tx.borrow().state
    }

    /// Cancelled on the first terminal transition.
    pub(crate) fn disarm_token(&self) -> CancellationToken {
        self.disarm.clone()
    }

    /// Record that the timer sent `signal`. False once terminal.
    pub(crate) fn escalate(&self, signal: i32) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state.is_terminal() {
                return false;
            }
            snapshot.escalation = Some(signal);
            true
        })
    }

    /// Record a kill about to be delivered. False once terminal.
    pub(crate) fn request_kill(&self, signal: i32) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state.is_terminal() {
                return false;
            }
            snapshot.kill_pending = Some(signal);
            true
        })
    }

    /// Forget a kill whose delivery failed.
    pub(crate) fn cancel_kill(&self) {
        self.tx.send_if_modified(|snapshot| snapshot.kill_pending.take().is_some());
    }

    /// The process stopped with `exit_code`. A process that dies while a
    /// kill is in flight counts as killed; one that dies after the timer
    /// signalled it counts as timed out.
    pub(crate) fn finish(&self, exit_code: i32) -> bool {
        self.transition(|snapshot| match (snapshot.kill_pending, snapshot.escalation) {
            (Some(signal), _) => ProcessState::Killed { signal },
            (None, Some(signal)) => ProcessState::TimedOut { signal },
            (None, None) => ProcessState::Exited(exit_code),
        })
    }

    /// Force a terminal state, e.g. after a kill.
    pub(crate) fn force(&self, state: ProcessState) -> bool {
        self.transition(|_| state)
    }

    fn transition(&self, next: impl FnOnce(&Snapshot) -> ProcessState) -> bool {
        let changed = self.tx.send_if_modified(|snapshot| {
            if snapshot.state.is_terminal() {
                return false;
            }
            snapshot.state = next(snapshot);
            true
        });
        if changed {
            self.disarm.cancel();
        }
        changed
    }

    /// Wait for a terminal state.
    pub(crate) async fn wait_terminal(&self) -> ProcessState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|snapshot| snapshot.state.is_terminal()).await {
            Ok(snapshot) => snapshot.state,
            Err(_) => self.current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_shared::constants::signals::{SIGKILL, SIGTERM};

    #[test]
    fn test_first_transition_wins() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.finish(3));
        assert!(!lifecycle.force(ProcessState::Killed { signal: SIGKILL }));
        assert_eq!(lifecycle.current(), ProcessState::Exited(3));
        assert!(lifecycle.disarm_token().is_cancelled());
    }

    #[test]
    fn test_escalation_turns_exit_into_timeout() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.escalate(SIGTERM));
        assert!(!lifecycle.disarm_token().is_cancelled());
        lifecycle.finish(143);
        assert_eq!(
            lifecycle.current(),
            ProcessState::TimedOut { signal: SIGTERM }
        );
        assert!(!lifecycle.escalate(SIGKILL));
    }

    #[test]
    fn test_pending_kill_wins_over_exit_code() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.request_kill(SIGKILL));
        lifecycle.finish(137);
        assert_eq!(
            lifecycle.current(),
            ProcessState::Killed { signal: SIGKILL }
        );
        assert!(!lifecycle.request_kill(SIGKILL));
    }

    #[test]
    fn test_cancelled_kill_leaves_exit_code() {
        let lifecycle = Lifecycle::new();
        lifecycle.request_kill(SIGKILL);
        lifecycle.cancel_kill();
        lifecycle.finish(0);
        assert_eq!(lifecycle.current(), ProcessState::Exited(0));
    }

    #[test]
    fn test_codes() {
        assert_eq!(ProcessState::Running.code(), None);
        assert_eq!(ProcessState::Exited(7).code(), Some(7));
        assert_eq!(ProcessState::Killed { signal: 9 }.code(), Some(-9));
        assert_eq!(ProcessState::TimedOut { signal: 15 }.code(), Some(-15));
    }

    #[tokio::test]
    async fn test_wait_terminal_wakes_waiters() {
        let lifecycle = Lifecycle::new();
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.wait_terminal().await })
        };
        tokio::task::yield_now().await;
        lifecycle.force(ProcessState::Killed { signal: SIGKILL });
        assert_eq!(
            waiter.await.unwrap(),
            ProcessState::Killed { signal: SIGKILL }
        );
    }
}
