//! Output sink adapter
//!
//! Wraps the destination byte channel for one transport connection. The
//! head is delivered exactly once over a oneshot; body chunks flow over a
//! bounded channel whose `send().await` is the drain point — a slow
//! consumer suspends writers instead of growing an unbounded buffer.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;

use tidewave_core::{Error, ResponseHead, Result};

/// Sink lifecycle flags, observable through a watch channel so tasks
/// holding buffered output can wait for a transition instead of polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStatus {
    /// Head delivered to the transport.
    pub committed: bool,
    /// At least one body chunk has been written; embedded script payloads
    /// held back until the document shell exists key off this.
    pub body_opened: bool,
    pub ended: bool,
}

struct SinkState {
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: Option<mpsc::Sender<io::Result<Bytes>>>,
}

struct SinkShared {
    state: Mutex<SinkState>,
    status_tx: watch::Sender<SinkStatus>,
}

/// Writable half of a response. Owned by exactly one render for its
/// lifetime; clones exist only so that render's internal tasks (body
/// forwarder, flight multiplexer) can share the same destination.
#[derive(Clone)]
pub struct ResponseSink {
    shared: Arc<SinkShared>,
}

/// Receiving half handed to the hosting layer: the head arrives once, the
/// body is a chunk stream that closes when the response ends.
pub struct ResponseParts {
    pub head: oneshot::Receiver<ResponseHead>,
    pub body: mpsc::Receiver<io::Result<Bytes>>,
}

impl ResponseParts {
    /// Adapt the body channel into a `Stream` for body-from-stream style
    /// host APIs.
    #[must_use]
    pub fn into_body_stream(self) -> (oneshot::Receiver<ResponseHead>, ReceiverStream<io::Result<Bytes>>) {
        (self.head, ReceiverStream::new(self.body))
    }
}

impl ResponseSink {
    /// Create a sink and its receiving half. `capacity` bounds the body
    /// channel; writers suspend when the consumer falls that far behind.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, ResponseParts) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
        let (status_tx, _) = watch::channel(SinkStatus::default());

        let sink = Self {
            shared: Arc::new(SinkShared {
                state: Mutex::new(SinkState {
                    head_tx: Some(head_tx),
                    body_tx: Some(body_tx),
                }),
                status_tx,
            }),
        };
        let parts = ResponseParts {
            head: head_rx,
            body: body_rx,
        };
        (sink, parts)
    }

    /// Commit status and headers. Idempotent: the first call delivers the
    /// head, every later call is a no-op.
    pub fn commit_head(&self, head: ResponseHead) -> Result<()> {
        let head_tx = {
            let mut state = self.shared.state.lock();
            match state.head_tx.take() {
                Some(tx) => tx,
                None => return Ok(()),
            }
        };

        self.shared.status_tx.send_modify(|s| s.committed = true);

        if head_tx.send(head).is_err() {
            // Transport went away before the head was delivered.
            self.close_channels();
            return Err(Error::SinkClosed);
        }
        Ok(())
    }

    /// Write a body chunk. Illegal before the head commit; suspends on a
    /// full channel until the consumer drains it.
    pub async fn write(&self, chunk: Bytes) -> Result<()> {
        let sender = {
            let state = self.shared.state.lock();
            let status = *self.shared.status_tx.borrow();
            if !status.committed {
                return Err(Error::BodyBeforeHead);
            }
            if status.ended {
                return Err(Error::SinkClosed);
            }
            match &state.body_tx {
                Some(tx) => tx.clone(),
                None => return Err(Error::SinkClosed),
            }
        };

        if sender.send(Ok(chunk)).await.is_err() {
            self.end();
            return Err(Error::SinkClosed);
        }
        if !self.shared.status_tx.borrow().body_opened {
            self.shared.status_tx.send_modify(|s| s.body_opened = true);
        }
        Ok(())
    }

    pub async fn write_str(&self, chunk: impl Into<String>) -> Result<()> {
        self.write(Bytes::from(chunk.into())).await
    }

    /// End the response. Idempotent; closes the body stream.
    pub fn end(&self) {
        self.close_channels();
    }

    fn close_channels(&self) {
        {
            let mut state = self.shared.state.lock();
            state.head_tx = None;
            state.body_tx = None;
        }
        self.shared.status_tx.send_modify(|s| s.ended = true);
    }

    #[must_use]
    pub fn headers_committed(&self) -> bool {
        self.shared.status_tx.borrow().committed
    }

    #[must_use]
    pub fn body_opened(&self) -> bool {
        self.shared.status_tx.borrow().body_opened
    }

    #[must_use]
    pub fn ended(&self) -> bool {
        self.shared.status_tx.borrow().ended
    }

    /// Subscribe to commit/end transitions.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<SinkStatus> {
        self.shared.status_tx.subscribe()
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = *self.shared.status_tx.borrow();
        f.debug_struct("ResponseSink")
            .field("committed", &status.committed)
            .field("ended", &status.ended)
            .finish()
    }
}
