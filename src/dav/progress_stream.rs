use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use super::transport::ProgressFn;

/// Slice size used when streaming a request body.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

pin_project! {
    /// Reports the cumulative number of bytes pulled out of `inner`.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        progress: Option<ProgressFn>,
        bytes_sent: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, progress: Option<ProgressFn>) -> Self {
        Self {
            inner,
            progress,
            bytes_sent: 0,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    if let Some(progress) = this.progress.as_ref() {
                        progress(*this.bytes_sent);
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// Splits `body` into zero-copy slices of at most [`STREAM_CHUNK_SIZE`] bytes.
pub fn body_stream(body: Bytes) -> impl Stream<Item = std::io::Result<Bytes>> {
    let mut slices = Vec::with_capacity(body.len() / STREAM_CHUNK_SIZE + 1);
    let mut offset = 0;
    while offset < body.len() {
        let end = std::cmp::min(offset + STREAM_CHUNK_SIZE, body.len());
        slices.push(Ok(body.slice(offset..end)));
        offset = end;
    }
    futures::stream::iter(slices)
}
