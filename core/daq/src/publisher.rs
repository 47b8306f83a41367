// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! State publisher: server-streaming engine fanning out state samples to
//! subscribers. Each subscriber gets its own session with an independent
//! outbound queue, so one slow consumer never stalls the others.
//!
//! Queue capacity semantics per session: negative keeps everything, zero
//! drops any sample that arrives while a write is in flight, a positive
//! bound keeps the newest N samples and evicts the oldest on overflow.

// Standard library imports
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// Third-party crates
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use tracing::{debug, error, trace, warn};

// Local crate
use crate::api::{SubscribeMode, SubscribeRequest, TypedState, methods, pack};
use crate::completion::{CompletionSender, completion_queue};
use crate::dispatch::DispatchLoop;
use crate::errors::DaqError;
use crate::registry::{CompletionHandler, IdAllocator, Registry};
use crate::transport::{AcceptBuffer, AcceptSlot, InboundCall, StreamSink};
use crate::transport::local::{Network, ServerBinding};

struct PublisherShared {
    topic: String,
    binding: ServerBinding,
    cq: CompletionSender,
    ids: IdAllocator,
    registry: Arc<Registry<PublisherSession>>,
    stopped: AtomicBool,
    queue_capacity: i32,
}

impl PublisherShared {
    /// Create a session and post its accept for the next subscriber.
    fn arm(self: &Arc<Self>) -> u64 {
        let id = self.ids.allocate();
        let inbound: AcceptBuffer = Arc::new(Mutex::new(None));
        let session = Arc::new(PublisherSession {
            id,
            queue_capacity: self.queue_capacity,
            inbound: inbound.clone(),
            shared: self.clone(),
            inner: Mutex::new(SessionInner {
                state: SessionState::WaitConnect,
                sink: None,
                queue: VecDeque::new(),
            }),
        });
        self.registry.insert(session);
        self.binding.request_call(
            methods::SUBSCRIBE,
            AcceptSlot {
                buffer: inbound,
                cq: self.cq.clone(),
                tag: id,
            },
        );
        trace!(%id, topic = %self.topic, "publisher session armed");
        id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    /// Accept posted, waiting for a subscriber.
    WaitConnect,
    /// Subscriber connected, no write in flight.
    ReadyToWrite,
    /// A write is in flight; new samples go to the queue.
    WaitWriteDone,
    Finished,
}

struct SessionInner {
    state: SessionState,
    sink: Option<StreamSink>,
    queue: VecDeque<Bytes>,
}

/// One subscriber's streaming session.
pub(crate) struct PublisherSession {
    id: u64,
    queue_capacity: i32,
    inbound: AcceptBuffer,
    shared: Arc<PublisherShared>,
    inner: Mutex<SessionInner>,
}

impl PublisherSession {
    /// Queue or write one sample, per this session's capacity policy.
    fn enqueue(&self, payload: Bytes) {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::ReadyToWrite => {
                inner.state = SessionState::WaitWriteDone;
                if let Some(sink) = &inner.sink {
                    sink.write(payload, self.id, &self.shared.cq);
                }
            }
            SessionState::WaitWriteDone => match self.queue_capacity {
                n if n < 0 => inner.queue.push_back(payload),
                0 => trace!(id = %self.id, "write in flight, sample dropped"),
                n => {
                    if inner.queue.len() >= n as usize {
                        inner.queue.pop_front();
                        trace!(id = %self.id, "queue full, oldest sample evicted");
                    }
                    inner.queue.push_back(payload);
                }
            },
            // not connected yet, or already gone
            SessionState::WaitConnect | SessionState::Finished => {}
        }
    }

    /// Handle the accept completion: re-arm for the next subscriber, then
    /// validate the subscribe request and either open the stream or finish.
    fn on_connected(&self) -> bool {
        if !self.shared.stopped.load(Ordering::Acquire) {
            self.shared.arm();
        }

        let call = self.inbound.lock().take();
        let (request, sink) = match call {
            Some(InboundCall::Stream { request, sink }) => (request, sink),
            Some(InboundCall::Unary { .. }) => {
                warn!(topic = %self.shared.topic, "unary call on the subscribe method");
                return false;
            }
            None => {
                warn!(id = %self.id, "accept completed without an inbound call");
                return false;
            }
        };

        let request = match SubscribeRequest::decode(request) {
            Ok(request) => request,
            Err(e) => {
                debug!(id = %self.id, error = %e, "bad subscribe request");
                return false;
            }
        };
        // dropping the sink here ends the stream on the subscriber side
        if request.topic_name != self.shared.topic || request.mode() == SubscribeMode::Off {
            debug!(
                id = %self.id,
                requested = %request.topic_name,
                topic = %self.shared.topic,
                "subscription refused"
            );
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.state != SessionState::WaitConnect {
            // cancelled while connecting
            return false;
        }
        inner.state = SessionState::ReadyToWrite;
        inner.sink = Some(sink);
        debug!(id = %self.id, topic = %self.shared.topic, "subscriber connected");
        true
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.inner.lock().state,
            SessionState::ReadyToWrite | SessionState::WaitWriteDone
        )
    }
}

impl CompletionHandler for PublisherSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn on_completion_event(&self, ok: bool) -> bool {
        let state = self.inner.lock().state;
        match state {
            SessionState::WaitConnect if ok => {
                let keep = self.on_connected();
                if !keep {
                    self.try_cancel_and_shutdown();
                }
                keep
            }
            SessionState::WaitWriteDone if ok => {
                let mut inner = self.inner.lock();
                if inner.state != SessionState::WaitWriteDone {
                    return inner.state != SessionState::Finished;
                }
                match inner.queue.pop_front() {
                    Some(payload) => {
                        if let Some(sink) = &inner.sink {
                            sink.write(payload, self.id, &self.shared.cq);
                        }
                    }
                    None => inner.state = SessionState::ReadyToWrite,
                }
                true
            }
            SessionState::WaitConnect | SessionState::WaitWriteDone => {
                // accept failed or the subscriber went away
                trace!(id = %self.id, "session closed");
                self.try_cancel_and_shutdown();
                false
            }
            SessionState::ReadyToWrite => {
                // no operation is in flight in this state
                debug_assert!(false, "completion event with no operation in flight");
                error!(id = %self.id, "completion event with no operation in flight");
                true
            }
            SessionState::Finished => false,
        }
    }

    fn try_cancel_and_shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Finished;
        inner.sink = None;
        inner.queue.clear();
    }
}

/// Publishing engine for one topic on one bound address.
pub struct StatePublisher {
    shared: Arc<PublisherShared>,
    sequence: AtomicU64,
    dispatch: Mutex<Option<DispatchLoop>>,
}

impl StatePublisher {
    /// Bind the address and arm the first subscriber session.
    /// `queue_capacity` applies per subscriber session; see the module
    /// documentation for its semantics.
    pub fn bind(topic: &str, address: &str, queue_capacity: i32) -> Result<Self, DaqError> {
        let binding = Network::global().bind(address)?;
        let (cq, rx) = completion_queue();
        let registry: Arc<Registry<PublisherSession>> = Arc::new(Registry::new());
        let dispatch = DispatchLoop::spawn("daq-publisher", rx, registry.clone())?;

        let shared = Arc::new(PublisherShared {
            topic: topic.to_string(),
            binding,
            cq,
            ids: IdAllocator::new(),
            registry,
            stopped: AtomicBool::new(false),
            queue_capacity,
        });
        shared.arm();
        debug!(%topic, %address, %queue_capacity, "state publisher started");

        Ok(StatePublisher {
            shared,
            sequence: AtomicU64::new(0),
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    /// Publish one state sample to every connected subscriber. Returns the
    /// sample's sequence number.
    pub fn publish<T: TypedState>(&self, state: &T) -> Result<u64, DaqError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(DaqError::EngineStopped);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = Bytes::from(pack(sequence, state).encode_to_vec());
        for session in self.shared.registry.snapshot() {
            session.enqueue(payload.clone());
        }
        Ok(sequence)
    }

    /// Connected subscribers (sessions past the accept stage).
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .registry
            .snapshot()
            .iter()
            .filter(|s| s.is_connected())
            .count()
    }

    /// All live sessions, including the one waiting for the next subscriber.
    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::Acquire)
    }

    /// Unbind, end all subscriber streams and join the dispatch thread.
    /// Idempotent.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.binding.shutdown();
        for session in self.shared.registry.snapshot() {
            session.try_cancel_and_shutdown();
        }
        self.shared.registry.clear();
        self.shared.cq.shutdown();
        if let Some(dispatch) = self.dispatch.lock().take() {
            dispatch.join();
        }
        debug!(topic = %self.shared.topic, "state publisher stopped");
    }
}

impl Drop for StatePublisher {
    fn drop(&mut self) {
        self.stop();
    }
}
