//! Bridges between blocking tar codecs and async archive streams.

use std::io::{self, Read, Write};

use dockhand_shared::constants::archive::{CHANNEL_DEPTH, CHUNK_SIZE};
use dockhand_shared::errors::{DockhandError, DockhandResult, TransferDirection};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};

use crate::backend::ArchiveStream;

/// `Write` sink that cuts its input into `CHUNK_SIZE` pieces and sends them
/// down a bounded channel. Blocks while the channel is full.
pub(crate) struct ChunkWriter {
    tx: mpsc::Sender<DockhandResult<Vec<u8>>>,
    buf: Vec<u8>,
}

impl ChunkWriter {
    fn new(tx: mpsc::Sender<DockhandResult<Vec<u8>>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= CHUNK_SIZE {
            let rest = self.buf.split_off(CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.buf, rest);
            self.send(chunk)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let chunk = std::mem::take(&mut self.buf);
            self.send(chunk)?;
        }
        Ok(())
    }
}

/// Run a blocking tar writer on the blocking pool and expose its output as
/// an archive stream.
///
/// The writer must flush before returning. Errors end the stream with an
/// [`DockhandError::ArchiveTransferFailed`] item.
pub(crate) fn spawn_packer<F>(direction: TransferDirection, pack: F) -> ArchiveStream
where
    F: FnOnce(ChunkWriter) -> io::Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let error_tx = tx.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = pack(ChunkWriter::new(tx)) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                tracing::debug!("Archive consumer stopped reading");
                return;
            }
            tracing::warn!(error = %e, %direction, "Failed to pack archive");
            let _ = error_tx.blocking_send(Err(DockhandError::transfer(direction, e)));
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// Blocking reader over an archive stream.
///
/// Must be created inside a tokio runtime and read from a blocking thread.
pub(crate) fn sync_reader(stream: ArchiveStream) -> impl Read + Send + 'static {
    let stream = stream.map(|chunk| {
        chunk
            .map(io::Cursor::new)
            .map_err(|e| io::Error::other(e.to_string()))
    });
    SyncIoBridge::new(StreamReader::new(stream))
}

/// Serve an in-memory archive as a stream of `CHUNK_SIZE` chunks.
pub fn stream_bytes(bytes: Vec<u8>) -> ArchiveStream {
    Box::pin(async_stream::stream! {
        for chunk in bytes.chunks(CHUNK_SIZE) {
            yield Ok::<_, DockhandError>(chunk.to_vec());
        }
    })
}
