//! Host/container PID correlation.
//!
//! On Linux every process lists its pid in each nested pid namespace on the
//! `NSpid:` line of `/proc/<pid>/status`, outermost first. A container
//! process therefore shows up on the host with its container-local pid as
//! the last entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Seconds of clock skew tolerated when comparing start times. `/proc`
/// start times have one-second resolution.
const START_TIME_SLACK_SECS: i64 = 1;

/// Filters narrowing which host process a container pid maps to.
#[derive(Clone, Debug, Default)]
pub struct PidMatcher {
    /// Substring that must appear in the host process's command line.
    pub signature: Option<String>,
    /// The host process must have started at or after this instant.
    pub started_after: Option<DateTime<Utc>>,
}

/// Parse the `NSpid:` line of a `/proc/<pid>/status` file.
pub fn parse_nspid(status: &str) -> Option<Vec<u32>> {
    let line = status.lines().find(|line| line.starts_with("NSpid:"))?;
    let pids = line["NSpid:".len()..]
        .split_whitespace()
        .map(|pid| pid.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    if pids.is_empty() { None } else { Some(pids) }
}

/// Pid chain of a host process, outermost namespace first.
#[cfg(target_os = "linux")]
pub fn read_nspid(host_pid: u32) -> Option<Vec<u32>> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", host_pid)).ok()?;
    parse_nspid(&status)
}

#[cfg(not(target_os = "linux"))]
pub fn read_nspid(_host_pid: u32) -> Option<Vec<u32>> {
    None
}

/// Container-local pid of a host process: its innermost namespace pid.
///
/// `None` unless the process lives in a nested pid namespace. A process
/// in the observer's own namespace has no container-local pid.
pub fn host_pid_to_container_pid(host_pid: u32) -> Option<u32> {
    container_pid_from_chain(&read_nspid(host_pid)?)
}

fn container_pid_from_chain(chain: &[u32]) -> Option<u32> {
    match chain {
        [_, .., innermost] => Some(*innermost),
        _ => None,
    }
}

/// A host process as seen by the correlation.
#[derive(Clone, Debug)]
pub(crate) struct HostProcess {
    pub(crate) pid: u32,
    pub(crate) parent: Option<u32>,
    pub(crate) cmd: String,
    /// Seconds since the epoch.
    pub(crate) start_time: u64,
}

/// Upper bound on the ancestor walk; guards against pid reuse cycles.
const MAX_ANCESTRY_DEPTH: usize = 4096;

/// Whether `pid` is one of `roots` or descends from one.
fn in_tree(pid: u32, roots: &[u32], parents: &HashMap<u32, Option<u32>>) -> bool {
    let mut current = Some(pid);
    for _ in 0..MAX_ANCESTRY_DEPTH {
        let Some(pid) = current else {
            return false;
        };
        if roots.contains(&pid) {
            return true;
        }
        current = parents.get(&pid).copied().flatten();
    }
    false
}

/// Host pids in the process trees under `roots` whose innermost namespace
/// pid is `local_pid` and that pass `matcher`.
pub(crate) fn matching_host_pids(
    processes: &[HostProcess],
    roots: &[u32],
    local_pid: u32,
    matcher: &PidMatcher,
    nspid: impl Fn(u32) -> Option<Vec<u32>>,
) -> Vec<u32> {
    let parents: HashMap<u32, Option<u32>> =
        processes.iter().map(|p| (p.pid, p.parent)).collect();

    processes
        .iter()
        .filter(|process| in_tree(process.pid, roots, &parents))
        .filter(|process| {
            nspid(process.pid)
                .and_then(|chain| container_pid_from_chain(&chain))
                == Some(local_pid)
        })
        .filter(|process| match &matcher.signature {
            Some(signature) => process.cmd.contains(signature.as_str()),
            None => true,
        })
        .filter(|process| match matcher.started_after {
            Some(after) => process.start_time as i64 >= after.timestamp() - START_TIME_SLACK_SECS,
            None => true,
        })
        .map(|process| process.pid)
        .collect()
}

/// Find the host pid of the container process `local_pid`.
///
/// Only processes under `roots` (the host pids of the container's init and
/// exec sessions) are considered. Returns `None` when no process matches,
/// when several do, or when the host does not expose pid namespaces.
#[cfg(target_os = "linux")]
pub fn correlate_host_pid(local_pid: u32, roots: &[u32], matcher: &PidMatcher) -> Option<u32> {
    use sysinfo::System;

    if roots.is_empty() {
        tracing::debug!(local_pid, "No container process roots to search");
        return None;
    }

    let mut sys = System::new();
    sys.refresh_processes();
    let processes: Vec<HostProcess> = sys
        .processes()
        .iter()
        .map(|(pid, process)| HostProcess {
            pid: pid.as_u32(),
            parent: process.parent().map(|parent| parent.as_u32()),
            cmd: process.cmd().join(" "),
            start_time: process.start_time(),
        })
        .collect();

    match matching_host_pids(&processes, roots, local_pid, matcher, read_nspid).as_slice() {
        [host_pid] => Some(*host_pid),
        [] => {
            tracing::debug!(local_pid, ?roots, "No host process matches container pid");
            None
        }
        many => {
            tracing::debug!(local_pid, candidates = ?many, "Container pid is ambiguous on the host");
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn correlate_host_pid(_local_pid: u32, _roots: &[u32], _matcher: &PidMatcher) -> Option<u32> {
    None
}
