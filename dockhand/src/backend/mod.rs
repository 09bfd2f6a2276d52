//! Exec capability interface.
//!
//! Everything above this module talks to a container exclusively through
//! [`ExecBackend`]. Any container engine client that can start an exec
//! session, inspect it, deliver a signal and move tar archives in and out
//! can drive a [`Shell`](crate::Shell).

#[cfg(feature = "docker")]
pub mod docker;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use dockhand_shared::errors::DockhandResult;
use futures::Stream;

/// A stream of tar bytes, in bounded chunks.
pub type ArchiveStream = Pin<Box<dyn Stream<Item = DockhandResult<Vec<u8>>> + Send>>;

/// A stream of demultiplexed exec output.
pub type OutputStream = Pin<Box<dyn Stream<Item = DockhandResult<ExecOutput>> + Send>>;

/// Reference to a running container. Read-only context, never a lock target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContainerRef {
    id: String,
}

impl ContainerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl From<&str> for ContainerRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContainerRef {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// One exec session request.
#[derive(Clone, Debug, Default)]
pub struct ExecRequest {
    /// Full argv, interpreter first.
    pub argv: Vec<String>,
    /// Complete environment of the process.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<String>,
    /// Run as this user instead of the container default.
    pub user: Option<String>,
}

/// A started exec session.
pub struct ExecSession {
    pub id: String,
    pub output: OutputStream,
}

impl fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecSession").field("id", &self.id).finish()
    }
}

/// A chunk of process output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecOutput {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Status of an exec session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecInspection {
    pub running: bool,
    /// Exit code once the session stopped. Signal deaths are reported as
    /// 128 + signal, the way shells and the Docker API do.
    pub exit_code: Option<i64>,
    /// PID of the session's root process inside the container, if known.
    pub pid: Option<u32>,
    /// PID of the same process on the host, if the backend can see it.
    pub host_pid: Option<u32>,
}

/// Capabilities a container engine client must provide.
#[async_trait]
pub trait ExecBackend: Send + Sync {
    /// Create and start an exec session, attached to stdout and stderr.
    async fn start_exec(
        &self,
        container: &ContainerRef,
        request: ExecRequest,
    ) -> DockhandResult<ExecSession>;

    /// Inspect an exec session.
    async fn inspect_exec(&self, exec_id: &str) -> DockhandResult<ExecInspection>;

    /// Host pids of the container's init process and of its exec sessions.
    ///
    /// These are the roots of the container's process tree as seen from the
    /// host. Backends that cannot see host pids return an empty list.
    async fn container_host_pids(&self, container: &ContainerRef) -> DockhandResult<Vec<u32>>;

    /// Deliver `signal` to the container-local process `pid`.
    async fn send_signal(&self, container: &ContainerRef, pid: u32, signal: i32)
    -> DockhandResult<()>;

    /// Extract a tar stream into the directory `dir` inside the container.
    async fn upload_archive(
        &self,
        container: &ContainerRef,
        dir: &str,
        archive: ArchiveStream,
    ) -> DockhandResult<()>;

    /// Download `path` as a tar stream whose root entry is its basename.
    async fn download_archive(
        &self,
        container: &ContainerRef,
        path: &str,
    ) -> DockhandResult<ArchiveStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_ref_display() {
        let container = ContainerRef::from("3f2a9c");
        assert_eq!(container.to_string(), "3f2a9c");
        assert_eq!(container.id(), "3f2a9c");
    }

    #[test]
    fn test_exec_request_default_is_empty() {
        let request = ExecRequest::default();
        assert!(request.argv.is_empty());
        assert!(request.working_dir.is_none());
        assert!(request.user.is_none());
    }
}
