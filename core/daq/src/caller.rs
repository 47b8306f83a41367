// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Client-side unary RPC engine. Each started call is an independent state
//! machine registered under its id; the engine's dispatch thread drives all
//! of them from a single completion queue and invokes the caller-supplied
//! result callback exactly once per call.

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
use crate::api::UnaryCall;
use crate::completion::{CompletionSender, completion_queue};
use crate::dispatch::DispatchLoop;
use crate::errors::DaqError;
use crate::registry::{CompletionHandler, IdAllocator, Registry};
use crate::transport::ResponseBuffer;
use crate::transport::local::Channel;

type ResultCallback<R> = Box<dyn FnOnce(Result<R, Status>) + Send>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallState {
    /// Connect operation posted, waiting for the connect event.
    WaitConnect,
    /// Connected, waiting for the server's finish event.
    WaitFinish,
    /// Terminal. The callback has fired (or never will); late events are
    /// ignored.
    Finished,
}

struct CallInner<C: UnaryCall> {
    state: CallState,
    on_result: Option<ResultCallback<C::Response>>,
}

/// One in-flight unary call.
struct Call<C: UnaryCall> {
    id: u64,
    response: ResponseBuffer,
    inner: Mutex<CallInner<C>>,
}

impl<C: UnaryCall> Call<C> {
    fn new(id: u64, response: ResponseBuffer, on_result: ResultCallback<C::Response>) -> Self {
        Call {
            id,
            response,
            inner: Mutex::new(CallInner {
                state: CallState::WaitConnect,
                on_result: Some(on_result),
            }),
        }
    }

    /// Move to the terminal state and hand back the callback, or `None` if
    /// the call already finished.
    fn finish(&self) -> Option<ResultCallback<C::Response>> {
        let mut inner = self.inner.lock();
        if inner.state == CallState::Finished {
            return None;
        }
        inner.state = CallState::Finished;
        inner.on_result.take()
    }

    fn take_response(&self) -> Result<C::Response, Status> {
        let result = self
            .response
            .lock()
            .take()
            .unwrap_or_else(|| Err(Status::unknown("call finished without a response")));
        match result {
            Ok(bytes) => C::Response::decode(bytes)
                .map_err(|e| Status::internal(format!("response decode error: {e}"))),
            Err(status) => Err(status),
        }
    }
}

impl<C: UnaryCall> CompletionHandler for Call<C> {
    fn id(&self) -> u64 {
        self.id
    }

    fn on_completion_event(&self, ok: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CallState::WaitConnect if ok => {
                inner.state = CallState::WaitFinish;
                true
            }
            CallState::WaitConnect => {
                // connect failed: terminal, no finish event will follow
                inner.state = CallState::Finished;
                let callback = inner.on_result.take();
                drop(inner);
                if let Some(callback) = callback {
                    trace!(id = %self.id, method = C::METHOD, "connect failed");
                    callback(Err(Status::unavailable("server unreachable")));
                }
                false
            }
            CallState::WaitFinish => {
                inner.state = CallState::Finished;
                let callback = inner.on_result.take();
                drop(inner);
                if let Some(callback) = callback {
                    callback(self.take_response());
                }
                false
            }
            CallState::Finished => false,
        }
    }

    fn try_cancel_and_shutdown(&self) {
        if let Some(callback) = self.finish() {
            debug!(id = %self.id, method = C::METHOD, "call cancelled");
            callback(Err(Status::cancelled("call cancelled")));
        }
    }
}

/// Client engine for unary calls against one service address.
pub struct ServiceCaller {
    channel: Channel,
    cq: CompletionSender,
    ids: IdAllocator,
    registry: Arc<Registry<dyn CompletionHandler>>,
    dispatch: Mutex<Option<DispatchLoop>>,
    stopped: AtomicBool,
}

impl ServiceCaller {
    /// Create the engine and start its dispatch thread. The target address
    /// is resolved per call; an unreachable server fails each call with
    /// `Unavailable` rather than failing `connect`.
    pub fn connect(target: &str) -> Result<Self, DaqError> {
        let (cq, rx) = completion_queue();
        let registry: Arc<Registry<dyn CompletionHandler>> = Arc::new(Registry::new());
        let dispatch = DispatchLoop::spawn("daq-caller", rx, registry.clone())?;
        debug!(%target, "service caller started");

        Ok(ServiceCaller {
            channel: Channel::new(target),
            cq,
            ids: IdAllocator::new(),
            registry,
            dispatch: Mutex::new(Some(dispatch)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Start one unary call. `on_result` fires exactly once on the dispatch
    /// thread (or on the cancelling thread), with the decoded response or
    /// the failure status. Returns the call id usable with [`cancel_call`].
    ///
    /// [`cancel_call`]: ServiceCaller::cancel_call
    pub fn start_call<C, F>(&self, request: &C::Request, on_result: F) -> Result<u64, DaqError>
    where
        C: UnaryCall,
        F: FnOnce(Result<C::Response, Status>) + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(DaqError::EngineStopped);
        }

        let id = self.ids.allocate();
        let response: ResponseBuffer = Arc::new(Mutex::new(None));
        let call = Arc::new(Call::<C>::new(id, response.clone(), Box::new(on_result)));
        self.registry.insert(call);

        trace!(%id, method = C::METHOD, "starting call");
        self.channel.unary(
            C::METHOD,
            Bytes::from(request.encode_to_vec()),
            id,
            &self.cq,
            response,
        );
        Ok(id)
    }

    /// Cancel an in-flight call. The callback fires with `Cancelled` unless
    /// the call already finished. Returns `false` for unknown or already
    /// finished ids.
    pub fn cancel_call(&self, id: u64) -> bool {
        match self.registry.remove(id) {
            Some(call) => {
                call.try_cancel_and_shutdown();
                true
            }
            None => false,
        }
    }

    /// Number of calls still in flight.
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Cancel all in-flight calls, drain the completion queue and join the
    /// dispatch thread. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let outstanding = self.registry.snapshot();
        if !outstanding.is_empty() {
            warn!(count = outstanding.len(), "cancelling in-flight calls");
        }
        for call in outstanding {
            call.try_cancel_and_shutdown();
        }
        self.registry.clear();
        self.cq.shutdown();
        if let Some(dispatch) = self.dispatch.lock().take() {
            dispatch.join();
        }
        debug!("service caller stopped");
    }
}

impl Drop for ServiceCaller {
    fn drop(&mut self) {
        self.stop();
    }
}
