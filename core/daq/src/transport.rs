// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Transport seam of the engine. The state machines only ever see posted
//! operations completing as `(tag, ok)` events plus the slot types below;
//! everything address- and delivery-related lives behind [`local`].
//!
//! Payloads cross the transport as already-encoded bytes; RPC-level failures
//! travel as [`tonic::Status`].

// Standard library imports
use std::sync::Arc;
use std::thread;

// Third-party crates
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tonic::Status;
use tracing::trace;

// Local crate
use crate::completion::{CompletionSender, Tag};
use crate::errors::DaqError;

pub mod local;

/// Depth of the per-subscriber stream channel. Kept minimal so that a slow
/// subscriber promptly pushes its publisher session into the queueing state.
const STREAM_DEPTH: usize = 1;

/// Buffer a unary call's response lands in, shared between the call object
/// and the in-flight reply slot.
pub type ResponseBuffer = Arc<Mutex<Option<Result<Bytes, Status>>>>;

/// Server-held handle used to answer one unary call. Dropping it without
/// fulfilling (server shutdown, session cancelled) reports a peer disconnect
/// to the client.
pub struct ReplySlot {
    buffer: ResponseBuffer,
    cq: CompletionSender,
    tag: Tag,
    fulfilled: bool,
}

impl ReplySlot {
    pub(crate) fn new(buffer: ResponseBuffer, cq: CompletionSender, tag: Tag) -> Self {
        ReplySlot {
            buffer,
            cq,
            tag,
            fulfilled: false,
        }
    }

    /// Deliver the response (or failure status) and post the client's finish
    /// event.
    pub fn fulfill(mut self, result: Result<Bytes, Status>) {
        let ok = result.is_ok();
        *self.buffer.lock() = Some(result);
        self.fulfilled = true;
        self.cq.post(self.tag, ok);
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if !self.fulfilled {
            *self.buffer.lock() = Some(Err(Status::cancelled("peer disconnected")));
            self.cq.post(self.tag, false);
        }
    }
}

/// One inbound call handed to an accepting session.
pub enum InboundCall {
    Unary { request: Bytes, reply: ReplySlot },
    Stream { request: Bytes, sink: StreamSink },
}

/// Slot for one inbound call, filled by the transport when the accept
/// operation completes.
pub type AcceptBuffer = Arc<Mutex<Option<InboundCall>>>;

pub(crate) struct AcceptSlot {
    pub(crate) buffer: AcceptBuffer,
    pub(crate) cq: CompletionSender,
    pub(crate) tag: Tag,
}

struct WriteOp {
    payload: Bytes,
    tag: Tag,
    cq: CompletionSender,
}

/// Server-side handle of one subscriber stream. Each sink owns a dedicated
/// writer worker, so a slow subscriber never stalls another session's
/// writes. Write completions come back `ok == false` once the subscriber is
/// gone.
pub struct StreamSink {
    ops: mpsc::UnboundedSender<WriteOp>,
}

impl StreamSink {
    /// Post one write. The completion event is posted to `cq` with this
    /// session's tag once the payload has been handed to the subscriber (or
    /// the subscriber turned out to be gone).
    pub fn write(&self, payload: Bytes, tag: Tag, cq: &CompletionSender) {
        let op = WriteOp {
            payload,
            tag,
            cq: cq.clone(),
        };
        if let Err(mpsc::error::SendError(op)) = self.ops.send(op) {
            op.cq.post(op.tag, false);
        }
    }
}

/// Subscriber-side reading end of a stream. `recv` returns `None` once the
/// publisher side is gone (every write path to this stream dropped).
pub struct StreamReader {
    rx: mpsc::Receiver<Bytes>,
}

impl StreamReader {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// Create a connected sink/reader pair and spawn the sink's writer worker.
pub(crate) fn stream() -> Result<(StreamSink, StreamReader), DaqError> {
    let (data_tx, data_rx) = mpsc::channel::<Bytes>(STREAM_DEPTH);
    let (ops_tx, mut ops_rx) = mpsc::unbounded_channel::<WriteOp>();

    thread::Builder::new()
        .name("daq-stream-writer".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("failed to build stream writer runtime");

            runtime.block_on(async move {
                let mut closed = false;
                while let Some(op) = ops_rx.recv().await {
                    if closed {
                        op.cq.post(op.tag, false);
                        continue;
                    }
                    let ok = data_tx.send(op.payload).await.is_ok();
                    if !ok {
                        closed = true;
                        trace!("subscriber gone, failing stream writes");
                    }
                    op.cq.post(op.tag, ok);
                }
            });
        })?;

    Ok((StreamSink { ops: ops_tx }, StreamReader { rx: data_rx }))
}
