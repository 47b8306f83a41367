// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Completion queue: the transport posts `(tag, ok)` pairs here and the
//! engine's dispatch thread consumes them. Tags are the numeric call/session
//! ids; they are resolved through the registry and never dereferenced.

// Third-party crates
use tokio::sync::mpsc;
use tracing::trace;

pub type Tag = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A previously posted asynchronous operation completed.
    Completion { tag: Tag, ok: bool },
    /// The engine is shutting down; drain what is queued and exit.
    Shutdown,
}

#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl CompletionSender {
    /// Post a completion event. Never blocks; events posted after the
    /// receiver is gone are dropped (the engine has already drained).
    pub fn post(&self, tag: Tag, ok: bool) {
        if self.tx.send(Event::Completion { tag, ok }).is_err() {
            trace!(%tag, %ok, "completion queue closed, event dropped");
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
    }
}

pub struct CompletionReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl CompletionReceiver {
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used while draining after [`Event::Shutdown`].
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

pub fn completion_queue() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, CompletionReceiver { rx })
}
