use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dockhand::backend::{
    ArchiveStream, ContainerRef, ExecBackend, ExecInspection, ExecRequest, ExecSession,
    OutputStream,
};
use dockhand_shared::errors::{DockhandError, DockhandResult};
use futures::StreamExt;
use parking_lot::Mutex;

/// How [`ShapedBackend`] distorts the backend it wraps.
#[derive(Clone, Copy, Debug, Default)]
pub struct Shaping {
    /// Delay before each output chunk is handed on.
    pub chunk_delay: Duration,
    /// Delay before a signal is delivered.
    pub signal_delay: Duration,
    /// Fail the output stream after this many chunks.
    pub fail_output_after: Option<usize>,
}

/// Wraps another backend to simulate a slow or flaky engine connection.
pub struct ShapedBackend {
    inner: Arc<dyn ExecBackend>,
    shaping: Mutex<Shaping>,
}

impl ShapedBackend {
    pub fn new(inner: Arc<dyn ExecBackend>) -> Self {
        Self {
            inner,
            shaping: Mutex::new(Shaping::default()),
        }
    }

    /// Applies to exec sessions started from now on, and to every signal.
    pub fn set_shaping(&self, shaping: Shaping) {
        *self.shaping.lock() = shaping;
    }

    fn shaping(&self) -> Shaping {
        *self.shaping.lock()
    }
}

fn shape_output(output: OutputStream, shaping: Shaping) -> OutputStream {
    Box::pin(async_stream::stream! {
        let mut output = output;
        let mut delivered = 0usize;
        while let Some(item) = output.next().await {
            if shaping.fail_output_after == Some(delivered) {
                yield Err(DockhandError::Exec("attach connection reset".to_string()));
                return;
            }
            if !shaping.chunk_delay.is_zero() {
                tokio::time::sleep(shaping.chunk_delay).await;
            }
            delivered += 1;
            yield item;
        }
    })
}

#[async_trait]
impl ExecBackend for ShapedBackend {
    async fn start_exec(
        &self,
        container: &ContainerRef,
        request: ExecRequest,
    ) -> DockhandResult<ExecSession> {
        let session = self.inner.start_exec(container, request).await?;
        Ok(ExecSession {
            id: session.id,
            output: shape_output(session.output, self.shaping()),
        })
    }

    async fn inspect_exec(&self, exec_id: &str) -> DockhandResult<ExecInspection> {
        self.inner.inspect_exec(exec_id).await
    }

    async fn container_host_pids(&self, container: &ContainerRef) -> DockhandResult<Vec<u32>> {
        self.inner.container_host_pids(container).await
    }

    async fn send_signal(
        &self,
        container: &ContainerRef,
        pid: u32,
        signal: i32,
    ) -> DockhandResult<()> {
        let delay = self.shaping().signal_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.send_signal(container, pid, signal).await
    }

    async fn upload_archive(
        &self,
        container: &ContainerRef,
        dir: &str,
        archive: ArchiveStream,
    ) -> DockhandResult<()> {
        self.inner.upload_archive(container, dir, archive).await
    }

    async fn download_archive(
        &self,
        container: &ContainerRef,
        path: &str,
    ) -> DockhandResult<ArchiveStream> {
        self.inner.download_archive(container, path).await
    }
}
