//! Output streams of a running process.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Standard output stream.
///
/// Yields raw chunks in the order the process wrote them. The channel is
/// bounded: a stream that is neither read nor dropped eventually stalls the
/// output of both streams.
#[derive(Debug)]
pub struct ProcessStdout {
    pub(crate) receiver: mpsc::Receiver<Vec<u8>>,
}

impl Stream for ProcessStdout {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Standard error stream.
#[derive(Debug)]
pub struct ProcessStderr {
    pub(crate) receiver: mpsc::Receiver<Vec<u8>>,
}

impl Stream for ProcessStderr {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
