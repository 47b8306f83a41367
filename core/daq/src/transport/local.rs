// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! In-process transport: a process-global map from `host:port` strings to
//! server bindings. It honors the same completion-queue contract a remote
//! transport would: connect failures and peer disconnects surface as
//! `ok == false` events, never as panics or hangs.

// Standard library imports
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Third-party crates
use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

// Local crate
use crate::completion::{CompletionSender, Tag};
use crate::errors::DaqError;
use crate::transport::{AcceptSlot, InboundCall, ReplySlot, ResponseBuffer, StreamReader, stream};

static NETWORK: Lazy<Network> = Lazy::new(|| Network {
    bindings: RwLock::new(HashMap::new()),
});

/// Process-global address space for in-process engines.
pub struct Network {
    bindings: RwLock<HashMap<String, Arc<BindingInner>>>,
}

impl Network {
    pub fn global() -> &'static Network {
        &NETWORK
    }

    pub(crate) fn bind(&self, address: &str) -> Result<ServerBinding, DaqError> {
        let mut bindings = self.bindings.write();
        if bindings.contains_key(address) {
            return Err(DaqError::AddressInUse(address.to_string()));
        }
        let inner = Arc::new(BindingInner {
            methods: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        });
        bindings.insert(address.to_string(), inner.clone());
        debug!(%address, "server bound");
        Ok(ServerBinding {
            address: address.to_string(),
            inner,
        })
    }

    fn lookup(&self, address: &str) -> Option<Arc<BindingInner>> {
        self.bindings.read().get(address).cloned()
    }

    /// Remove the address only if it still maps to this binding, so a
    /// late shutdown cannot evict a newer binding reusing the address.
    fn unbind(&self, address: &str, inner: &Arc<BindingInner>) {
        let mut bindings = self.bindings.write();
        if let Some(current) = bindings.get(address) {
            if Arc::ptr_eq(current, inner) {
                bindings.remove(address);
            }
        }
    }
}

#[derive(Default)]
struct MethodQueue {
    /// Accept operations posted by sessions waiting for a call.
    accepts: VecDeque<AcceptSlot>,
    /// Inbound calls that arrived before any session accepted them.
    calls: VecDeque<InboundCall>,
}

struct BindingInner {
    methods: Mutex<HashMap<String, MethodQueue>>,
    shutdown: AtomicBool,
}

impl BindingInner {
    fn request_call(&self, method: &str, slot: AcceptSlot) {
        if self.shutdown.load(Ordering::Acquire) {
            slot.cq.post(slot.tag, false);
            return;
        }
        let mut methods = self.methods.lock();
        let queue = methods.entry(method.to_string()).or_default();
        match queue.calls.pop_front() {
            Some(call) => {
                *slot.buffer.lock() = Some(call);
                slot.cq.post(slot.tag, true);
            }
            None => queue.accepts.push_back(slot),
        }
    }

    /// Hand an inbound call to the oldest pending accept, or park it.
    fn deliver(&self, method: &str, call: InboundCall) {
        if self.shutdown.load(Ordering::Acquire) {
            // dropping the call fails the client-held slot
            return;
        }
        let mut methods = self.methods.lock();
        let queue = methods.entry(method.to_string()).or_default();
        match queue.accepts.pop_front() {
            Some(slot) => {
                *slot.buffer.lock() = Some(call);
                slot.cq.post(slot.tag, true);
            }
            None => queue.calls.push_back(call),
        }
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut methods = self.methods.lock();
        for (method, queue) in methods.drain() {
            trace!(%method, "failing pending operations on shutdown");
            for slot in queue.accepts {
                slot.cq.post(slot.tag, false);
            }
            // parked calls are dropped; their reply slots report the
            // disconnect to the callers
        }
    }
}

/// Server half of the transport, owned by a listener/publisher engine.
pub struct ServerBinding {
    address: String,
    inner: Arc<BindingInner>,
}

impl ServerBinding {
    /// Post an accept operation: the next inbound call of `method` completes
    /// it with `ok == true`; shutdown completes it with `ok == false`.
    pub(crate) fn request_call(&self, method: &str, slot: AcceptSlot) {
        self.inner.request_call(method, slot);
    }

    /// Unbind the address and fail all pending accepts and parked calls.
    pub(crate) fn shutdown(&self) {
        Network::global().unbind(&self.address, &self.inner);
        self.inner.shutdown();
        debug!(address = %self.address, "server binding shut down");
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for ServerBinding {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Client half of the transport: a lazily resolved channel to one address.
#[derive(Clone)]
pub struct Channel {
    target: String,
}

impl Channel {
    pub fn new(target: &str) -> Self {
        Channel {
            target: target.to_string(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Post a unary call. Two completion events follow on `cq`: a connect
    /// event (`ok == false` when the peer is unreachable, terminal) and, on
    /// a successful connect, a finish event once the reply slot is
    /// fulfilled or dropped by the server.
    pub(crate) fn unary(
        &self,
        method: &str,
        request: Bytes,
        tag: Tag,
        cq: &CompletionSender,
        response: ResponseBuffer,
    ) {
        match Network::global().lookup(&self.target) {
            Some(binding) => {
                // post the connect event before handing the call over, so
                // the finish event can never overtake it
                cq.post(tag, true);
                let reply = ReplySlot::new(response, cq.clone(), tag);
                binding.deliver(method, InboundCall::Unary { request, reply });
            }
            None => {
                trace!(target = %self.target, %method, "peer unreachable");
                cq.post(tag, false);
            }
        }
    }

    /// Open a server-streaming call. Returns `None` when the peer is
    /// unreachable; otherwise the reader ends (`recv() == None`) once the
    /// server side finishes or disappears.
    pub(crate) fn open_stream(
        &self,
        method: &str,
        request: Bytes,
    ) -> Result<Option<StreamReader>, DaqError> {
        match Network::global().lookup(&self.target) {
            Some(binding) => {
                let (sink, reader) = stream()?;
                binding.deliver(method, InboundCall::Stream { request, sink });
                Ok(Some(reader))
            }
            None => {
                trace!(target = %self.target, %method, "peer unreachable");
                Ok(None)
            }
        }
    }
}
