// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Server-side unary RPC engine. One session per method waits for a call;
//! when it connects, the session first arms a sibling session for the next
//! client and only then computes and sends its response, so the method never
//! goes unserved.

// Standard library imports
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Third-party crates
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use tonic::Status;
use tracing::{debug, trace, warn};

// Local crate
use crate::api::UnaryService;
use crate::completion::{CompletionSender, completion_queue};
use crate::dispatch::DispatchLoop;
use crate::errors::DaqError;
use crate::registry::{CompletionHandler, IdAllocator, Registry};
use crate::transport::{AcceptBuffer, AcceptSlot, InboundCall};
use crate::transport::local::{Network, ServerBinding};

struct ListenerShared {
    binding: ServerBinding,
    cq: CompletionSender,
    ids: IdAllocator,
    registry: Arc<Registry<dyn CompletionHandler>>,
    stopped: AtomicBool,
}

impl ListenerShared {
    /// Create a session for `service` and post its accept operation.
    fn arm<S: UnaryService>(self: &Arc<Self>, service: Arc<S>) -> u64 {
        let id = self.ids.allocate();
        let inbound: AcceptBuffer = Arc::new(Mutex::new(None));
        let session = Arc::new(UnarySession {
            id,
            service,
            inbound: inbound.clone(),
            shared: self.clone(),
            state: Mutex::new(SessionState::Listening),
        });
        self.registry.insert(session);
        self.binding.request_call(
            S::METHOD,
            AcceptSlot {
                buffer: inbound,
                cq: self.cq.clone(),
                tag: id,
            },
        );
        trace!(%id, method = S::METHOD, "session armed");
        id
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Accept posted, waiting for an inbound call.
    Listening,
    /// Response sent, waiting for the self-posted finish event.
    Finishing,
    Finished,
}

/// One unary server session. Lives for exactly one call: its successor is
/// armed before the response is computed.
struct UnarySession<S: UnaryService> {
    id: u64,
    service: Arc<S>,
    inbound: AcceptBuffer,
    shared: Arc<ListenerShared>,
    state: Mutex<SessionState>,
}

impl<S: UnaryService> UnarySession<S> {
    fn respond(&self) {
        let call = self.inbound.lock().take();
        match call {
            Some(InboundCall::Unary { request, reply }) => {
                let result = match S::Request::decode(request) {
                    Ok(request) => self
                        .service
                        .handle(request)
                        .map(|response| Bytes::from(response.encode_to_vec())),
                    Err(e) => Err(Status::invalid_argument(format!(
                        "request decode error: {e}"
                    ))),
                };
                if let Err(status) = &result {
                    debug!(id = %self.id, method = S::METHOD, %status, "call failed");
                }
                reply.fulfill(result);
            }
            Some(InboundCall::Stream { .. }) => {
                // dropping the sink ends the stream on the client side
                warn!(method = S::METHOD, "streaming call on a unary method");
            }
            None => warn!(id = %self.id, "accept completed without an inbound call"),
        }
    }
}

impl<S: UnaryService> CompletionHandler for UnarySession<S> {
    fn id(&self) -> u64 {
        self.id
    }

    fn on_completion_event(&self, ok: bool) -> bool {
        let mut state = self.state.lock();
        match *state {
            SessionState::Listening if ok => {
                *state = SessionState::Finishing;
                drop(state);

                // arm the successor before doing any work on this call
                if !self.shared.stopped.load(Ordering::Acquire) {
                    self.shared.arm(self.service.clone());
                }
                self.respond();
                self.shared.cq.post(self.id, true);
                true
            }
            SessionState::Listening => {
                // accept failed: binding shut down
                *state = SessionState::Finished;
                false
            }
            SessionState::Finishing => {
                *state = SessionState::Finished;
                false
            }
            SessionState::Finished => false,
        }
    }

    fn try_cancel_and_shutdown(&self) {
        *self.state.lock() = SessionState::Finished;
    }
}

/// Server engine hosting unary services on one bound address.
pub struct ServiceListener {
    shared: Arc<ListenerShared>,
    dispatch: Mutex<Option<DispatchLoop>>,
}

impl ServiceListener {
    /// Bind the address and start the dispatch thread. Fails when the
    /// address is already bound in this process.
    pub fn bind(address: &str) -> Result<Self, DaqError> {
        let binding = Network::global().bind(address)?;
        let (cq, rx) = completion_queue();
        let registry: Arc<Registry<dyn CompletionHandler>> = Arc::new(Registry::new());
        let dispatch = DispatchLoop::spawn("daq-listener", rx, registry.clone())?;
        debug!(%address, "service listener started");

        Ok(ServiceListener {
            shared: Arc::new(ListenerShared {
                binding,
                cq,
                ids: IdAllocator::new(),
                registry,
                stopped: AtomicBool::new(false),
            }),
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    /// Register a service implementation and arm its first session. Each
    /// completed call re-arms automatically; the returned id names the
    /// currently listening session.
    pub fn add_session<S: UnaryService>(&self, service: Arc<S>) -> Result<u64, DaqError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(DaqError::EngineStopped);
        }
        Ok(self.shared.arm(service))
    }

    /// Drop one session. Its pending accept stays posted with the binding
    /// but completes into a cancelled session, which ignores it.
    pub fn remove_session(&self, id: u64) -> bool {
        match self.shared.registry.remove(id) {
            Some(session) => {
                session.try_cancel_and_shutdown();
                true
            }
            None => false,
        }
    }

    /// Live sessions, listening or mid-response.
    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn address(&self) -> &str {
        self.shared.binding.address()
    }

    /// Unbind the address, fail pending accepts, cancel all sessions and
    /// join the dispatch thread. Idempotent.
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
        debug!("service listener stopped");
    }
}

impl Drop for ServiceListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Empty, QueryInfo, RobotInfo, methods};
    use crate::caller::ServiceCaller;
    use std::sync::mpsc;
    use std::time::Duration;
    use tracing_test::traced_test;

    struct InfoService;

    impl UnaryService for InfoService {
        type Request = Empty;
        type Response = RobotInfo;
        const METHOD: &'static str = methods::QUERY_INFO;

        fn handle(&self, _request: Empty) -> Result<RobotInfo, Status> {
            Ok(RobotInfo {
                name: "QuadIP".to_string(),
                dof: 12,
                ..Default::default()
            })
        }
    }

    fn query(caller: &ServiceCaller) -> Result<RobotInfo, Status> {
        let (tx, rx) = mpsc::channel();
        caller
            .start_call::<QueryInfo, _>(&Empty {}, move |result| {
                tx.send(result).unwrap();
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    #[traced_test]
    fn test_session_answers_and_rearms() {
        let listener = ServiceListener::bind("127.0.0.1:48120").unwrap();
        listener.add_session(Arc::new(InfoService)).unwrap();

        let caller = ServiceCaller::connect("127.0.0.1:48120").unwrap();
        // two sequential calls: the second only succeeds if the first
        // session armed a successor before finishing
        for _ in 0..2 {
            let info = query(&caller).unwrap();
            assert_eq!(info.name, "QuadIP");
            assert_eq!(info.dof, 12);
        }

        caller.stop();
        listener.stop();
    }

    #[test]
    fn test_stop_clears_sessions_and_unbinds() {
        let listener = ServiceListener::bind("127.0.0.1:48121").unwrap();
        listener.add_session(Arc::new(InfoService)).unwrap();
        assert_eq!(listener.session_count(), 1);

        listener.stop();
        assert_eq!(listener.session_count(), 0);
        assert!(!listener.is_running());

        // the address is free again
        let rebound = ServiceListener::bind("127.0.0.1:48121").unwrap();
        rebound.stop();
    }

    #[test]
    fn test_double_bind_is_rejected() {
        let listener = ServiceListener::bind("127.0.0.1:48122").unwrap();
        assert!(matches!(
            ServiceListener::bind("127.0.0.1:48122"),
            Err(DaqError::AddressInUse(_))
        ));
        listener.stop();
    }

    #[test]
    fn test_remove_session() {
        let listener = ServiceListener::bind("127.0.0.1:48123").unwrap();
        let id = listener.add_session(Arc::new(InfoService)).unwrap();
        assert!(listener.remove_session(id));
        assert!(!listener.remove_session(id));
        assert_eq!(listener.session_count(), 0);
        listener.stop();
    }
}
