//! Streaming response body that tees a capped copy for the audit log.
//!
//! [`CapturingBody`] wraps the backend's body and passes every frame to
//! the client untouched. Data frames are also copied into a buffer until
//! [`MAX_PAYLOAD`] bytes are held. When the stream ends, fails, or the
//! body is dropped early (client went away), the buffered bytes are
//! attached to the pending response record and handed to the observer.
//! The record is emitted at most once.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

use crate::audit::{ResponseObserver, TrafficRecord, MAX_PAYLOAD};

/// Pending response record plus the bytes captured so far.
pub struct Capture {
    observer: Arc<dyn ResponseObserver>,
    record: Option<TrafficRecord>,
    buf: BytesMut,
}

impl Capture {
    #[must_use]
    pub fn new(observer: Arc<dyn ResponseObserver>, record: TrafficRecord) -> Self {
        Self {
            observer,
            record: Some(record),
            buf: BytesMut::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = MAX_PAYLOAD.saturating_sub(self.buf.len());
        if room > 0 {
            self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    fn finish(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.payload = std::mem::take(&mut self.buf).freeze();
            self.observer.observe_response(record);
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.finish();
    }
}

pin_project! {
    pub struct CapturingBody<B> {
        #[pin]
        inner: B,
        capture: Capture,
    }
}

impl<B> CapturingBody<B> {
    pub fn new(inner: B, capture: Capture) -> Self {
        Self { inner, capture }
    }
}

impl<B> Body for CapturingBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.capture.push(data.chunk());
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.capture.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.capture.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
