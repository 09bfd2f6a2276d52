use std::collections::HashMap;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use dockhand::archive::{self, Placement};
use dockhand::backend::{
    ArchiveStream, ContainerRef, ExecBackend, ExecInspection, ExecOutput, ExecRequest,
    ExecSession, OutputStream,
};
use dockhand_shared::constants::signals::{SIGKILL, SIGNAL_EXIT_BASE};
use dockhand_shared::errors::{DockhandError, DockhandResult, TransferDirection};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

const READ_BUF_SIZE: usize = 8 * 1024;

/// Fallback `PATH` when the host has none.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

struct LocalExec {
    child: Child,
    pid: Option<u32>,
    status: Option<ExitStatus>,
}

/// Exec backend that treats the local host as the container.
///
/// Every exec runs in its own process group so signals reach the whole
/// command, the way they would inside a container's pid namespace.
pub struct LocalBackend {
    sessions: Mutex<HashMap<String, Arc<Mutex<LocalExec>>>>,
    base_env: Vec<(String, String)>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut base_env = vec![("PATH".to_string(), path)];
        if let Ok(home) = std::env::var("HOME") {
            base_env.push(("HOME".to_string(), home));
        }
        Self::with_base_env(base_env)
    }

    /// Environment every exec starts from, like a container's config env.
    pub fn with_base_env(base_env: Vec<(String, String)>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            base_env,
        }
    }

    /// Number of exec sessions started so far.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn session(&self, exec_id: &str) -> DockhandResult<Arc<Mutex<LocalExec>>> {
        self.sessions
            .lock()
            .get(exec_id)
            .cloned()
            .ok_or_else(|| DockhandError::Exec(format!("no such exec: {}", exec_id)))
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        for exec in self.sessions.lock().values() {
            let mut exec = exec.lock();
            if exec.status.is_some() {
                continue;
            }
            if let Ok(Some(status)) = exec.child.try_wait() {
                exec.status = Some(status);
                continue;
            }
            if let Some(pid) = exec.pid {
                unsafe {
                    libc::kill(-(pid as i32), SIGKILL);
                }
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i64 {
    status
        .code()
        .map(i64::from)
        .or_else(|| status.signal().map(|sig| i64::from(SIGNAL_EXIT_BASE + sig)))
        .unwrap_or(-1)
}

fn output_stream(mut stdout: ChildStdout, mut stderr: ChildStderr) -> OutputStream {
    Box::pin(async_stream::stream! {
        let mut out_buf = vec![0u8; READ_BUF_SIZE];
        let mut err_buf = vec![0u8; READ_BUF_SIZE];
        let (mut out_open, mut err_open) = (true, true);

        while out_open || err_open {
            let (is_stdout, read) = tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => (true, read),
                read = stderr.read(&mut err_buf), if err_open => (false, read),
            };
            match (is_stdout, read) {
                (true, Ok(n)) if n > 0 => {
                    yield Ok::<_, DockhandError>(ExecOutput::Stdout(out_buf[..n].to_vec()));
                }
                (false, Ok(n)) if n > 0 => {
                    yield Ok(ExecOutput::Stderr(err_buf[..n].to_vec()));
                }
                (is_stdout, result) => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, is_stdout, "Local exec pipe read failed");
                    }
                    if is_stdout {
                        out_open = false;
                    } else {
                        err_open = false;
                    }
                }
            }
        }
    })
}

#[async_trait]
impl ExecBackend for LocalBackend {
    async fn start_exec(
        &self,
        _container: &ContainerRef,
        request: ExecRequest,
    ) -> DockhandResult<ExecSession> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| DockhandError::Exec("empty argv".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(self.base_env.iter().cloned())
            .envs(request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }
        if let Some(user) = &request.user {
            tracing::debug!(user = %user, "Local backend ignores exec user");
        }

        let mut child = command
            .spawn()
            .map_err(|e| DockhandError::Exec(format!("failed to spawn {}: {}", program, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DockhandError::Exec("stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DockhandError::Exec("stderr not piped".to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let pid = child.id();
        self.sessions.lock().insert(
            id.clone(),
            Arc::new(Mutex::new(LocalExec {
                child,
                pid,
                status: None,
            })),
        );
        tracing::trace!(exec_id = %id, ?pid, "Local exec started");

        Ok(ExecSession {
            id,
            output: output_stream(stdout, stderr),
        })
    }

    async fn inspect_exec(&self, exec_id: &str) -> DockhandResult<ExecInspection> {
        let session = self.session(exec_id)?;
        let mut exec = session.lock();
        if exec.status.is_none() {
            exec.status = exec
                .child
                .try_wait()
                .map_err(|e| DockhandError::Exec(format!("wait on {}: {}", exec_id, e)))?;
        }
        Ok(ExecInspection {
            running: exec.status.is_none(),
            exit_code: exec.status.map(exit_code),
            pid: exec.pid,
            host_pid: exec.pid,
        })
    }

    async fn container_host_pids(&self, _container: &ContainerRef) -> DockhandResult<Vec<u32>> {
        Ok(self
            .sessions
            .lock()
            .values()
            .filter_map(|exec| exec.lock().pid)
            .collect())
    }

    async fn send_signal(
        &self,
        _container: &ContainerRef,
        pid: u32,
        signal: i32,
    ) -> DockhandResult<()> {
        let pid_t = i32::try_from(pid).map_err(|e| DockhandError::ProcessSignalFailed {
            pid,
            signal,
            reason: e.to_string(),
        })?;
        // Whole process group first; fall back to the single process.
        if unsafe { libc::kill(-pid_t, signal) } == 0 || unsafe { libc::kill(pid_t, signal) } == 0 {
            return Ok(());
        }
        Err(DockhandError::ProcessSignalFailed {
            pid,
            signal,
            reason: io::Error::last_os_error().to_string(),
        })
    }

    async fn upload_archive(
        &self,
        _container: &ContainerRef,
        dir: &str,
        archive: ArchiveStream,
    ) -> DockhandResult<()> {
        if !Path::new(dir).is_dir() {
            return Err(DockhandError::not_found(dir));
        }
        archive::unpack(
            archive,
            Placement::Into(PathBuf::from(dir)),
            TransferDirection::HostToContainer,
        )
        .await
        .map(|_| ())
    }

    async fn download_archive(
        &self,
        _container: &ContainerRef,
        path: &str,
    ) -> DockhandResult<ArchiveStream> {
        let source = PathBuf::from(path);
        if std::fs::symlink_metadata(&source).is_err() {
            return Err(DockhandError::not_found(path));
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        Ok(archive::pack_path(
            source,
            name,
            TransferDirection::ContainerToHost,
        ))
    }
}
