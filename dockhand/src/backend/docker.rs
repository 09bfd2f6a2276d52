//! Docker Engine API backend.

use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    DownloadFromContainerOptions, InspectContainerOptions, LogOutput, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bytes::Bytes;
use dockhand_shared::errors::{DockhandError, DockhandResult};
use dockhand_shared::transport::DaemonEndpoint;
use futures::StreamExt;
use parking_lot::Mutex;

use super::{
    ArchiveStream, ContainerRef, ExecBackend, ExecInspection, ExecOutput, ExecRequest, ExecSession,
};
use crate::util::process::host_pid_to_container_pid;

/// Seconds before an engine request times out.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// [`ExecBackend`] talking to a Docker daemon.
#[derive(Clone, Debug)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect to the daemon at `endpoint`.
    pub fn connect(endpoint: &DaemonEndpoint) -> DockhandResult<Self> {
        let docker = match endpoint {
            DaemonEndpoint::Unix { socket_path } => Docker::connect_with_socket(
                &socket_path.to_string_lossy(),
                REQUEST_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            DaemonEndpoint::Tcp { host, port } => Docker::connect_with_http(
                &format!("http://{}:{}", host, port),
                REQUEST_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| DockhandError::Exec(format!("failed to connect to {}: {}", endpoint, e)))?;

        tracing::debug!(endpoint = %endpoint, "Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Connect to the daemon named by `DOCKER_HOST`, or the default socket.
    pub fn from_env() -> DockhandResult<Self> {
        let endpoint = DaemonEndpoint::from_env().map_err(DockhandError::InvalidInput)?;
        Self::connect(&endpoint)
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn client(&self) -> &Docker {
        &self.docker
    }
}

fn is_not_found(e: &BollardError) -> bool {
    matches!(e, BollardError::DockerResponseServerError { status_code: 404, .. })
}

fn positive_pid(pid: i64) -> Option<u32> {
    u32::try_from(pid).ok().filter(|pid| *pid > 0)
}

fn exec_error(context: &str, e: BollardError) -> DockhandError {
    DockhandError::Exec(format!("{}: {}", context, e))
}

#[async_trait]
impl ExecBackend for DockerBackend {
    async fn start_exec(
        &self,
        container: &ContainerRef,
        request: ExecRequest,
    ) -> DockhandResult<ExecSession> {
        let env: Vec<String> = request
            .env
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        let options = CreateExecOptions {
            cmd: Some(request.argv),
            env: Some(env),
            working_dir: request.working_dir,
            user: request.user,
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container.id(), options)
            .await
            .map_err(|e| exec_error("create exec", e))?;

        let started = self
            .docker
            .start_exec(
                &created.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| exec_error("start exec", e))?;

        match started {
            StartExecResults::Attached { output, .. } => {
                let output = output.filter_map(|item| async move {
                    match item {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            Some(Ok(ExecOutput::Stdout(message.to_vec())))
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            Some(Ok(ExecOutput::Stderr(message.to_vec())))
                        }
                        Ok(LogOutput::StdIn { .. }) => None,
                        Err(e) => Some(Err(exec_error("exec output", e))),
                    }
                });
                tracing::trace!(exec_id = %created.id, "Exec attached");
                Ok(ExecSession {
                    id: created.id,
                    output: Box::pin(output),
                })
            }
            StartExecResults::Detached => Err(DockhandError::Exec(format!(
                "exec {} started detached",
                created.id
            ))),
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> DockhandResult<ExecInspection> {
        let inspected = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| exec_error("inspect exec", e))?;

        // The engine reports the pid as seen from the host.
        let host_pid = inspected.pid.and_then(positive_pid);
        Ok(ExecInspection {
            running: inspected.running.unwrap_or(false),
            exit_code: inspected.exit_code,
            pid: host_pid.and_then(host_pid_to_container_pid),
            host_pid,
        })
    }

    async fn container_host_pids(&self, container: &ContainerRef) -> DockhandResult<Vec<u32>> {
        let inspected = self
            .docker
            .inspect_container(container.id(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| exec_error("inspect container", e))?;

        let mut pids: Vec<u32> = inspected
            .state
            .and_then(|state| state.pid)
            .and_then(positive_pid)
            .into_iter()
            .collect();
        for exec_id in inspected.exec_ids.unwrap_or_default() {
            // Exec records vanish once they are collected; skip those.
            match self.docker.inspect_exec(&exec_id).await {
                Ok(exec) => pids.extend(exec.pid.and_then(positive_pid)),
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(exec_error("inspect exec", e)),
            }
        }
        Ok(pids)
    }

    async fn send_signal(
        &self,
        container: &ContainerRef,
        pid: u32,
        signal: i32,
    ) -> DockhandResult<()> {
        let failed = |reason: String| DockhandError::ProcessSignalFailed { pid, signal, reason };

        let options = CreateExecOptions {
            cmd: Some(vec![
                "kill".to_string(),
                format!("-{}", signal),
                pid.to_string(),
            ]),
            user: Some("root".to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container.id(), options)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut stderr = Vec::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| failed(e.to_string()))?
        {
            while let Some(item) = output.next().await {
                if let Ok(LogOutput::StdErr { message }) = item {
                    stderr.extend_from_slice(&message);
                }
            }
        }

        let inspected = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| failed(e.to_string()))?;
        match inspected.exit_code {
            Some(0) => Ok(()),
            code => Err(failed(format!(
                "kill exited with {:?}: {}",
                code,
                String::from_utf8_lossy(&stderr).trim()
            ))),
        }
    }

    async fn upload_archive(
        &self,
        container: &ContainerRef,
        dir: &str,
        archive: ArchiveStream,
    ) -> DockhandResult<()> {
        // The engine wants a plain byte stream; a packing error stops the
        // body early and is reported after the request.
        let packing_error: Arc<Mutex<Option<DockhandError>>> = Arc::new(Mutex::new(None));
        let slot = packing_error.clone();
        let body = archive
            .take_while(move |chunk| {
                let keep = match chunk {
                    Ok(_) => true,
                    Err(e) => {
                        *slot.lock() = Some(DockhandError::upload(e));
                        false
                    }
                };
                futures::future::ready(keep)
            })
            .filter_map(|chunk| futures::future::ready(chunk.ok().map(Bytes::from)));

        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };
        let result = self
            .docker
            .upload_to_container_streaming(container.id(), Some(options), body)
            .await;

        if let Some(e) = packing_error.lock().take() {
            return Err(e);
        }
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(DockhandError::not_found(dir)),
            Err(e) => Err(DockhandError::upload(e)),
        }
    }

    async fn download_archive(
        &self,
        container: &ContainerRef,
        path: &str,
    ) -> DockhandResult<ArchiveStream> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = Box::pin(
            self.docker
                .download_from_container(container.id(), Some(options))
                .map(|chunk| chunk.map(|bytes| bytes.to_vec())),
        );

        // Missing paths only surface on the first poll.
        let first = match stream.next().await {
            None => None,
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(e)) if is_not_found(&e) => return Err(DockhandError::not_found(path)),
            Some(Err(e)) => return Err(DockhandError::download(e)),
        };

        let rest = stream.map(|chunk| chunk.map_err(DockhandError::download));
        Ok(Box::pin(futures::stream::iter(first.map(Ok)).chain(rest)))
    }
}
