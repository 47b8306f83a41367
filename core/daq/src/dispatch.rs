// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Dispatch loop: one dedicated OS thread per engine instance. It blocks on
//! the completion queue, resolves each tag through the registry and invokes
//! the owning object's completion handler. On shutdown it drains everything
//! already queued before exiting, so no handler can run after `join`.

// Standard library imports
use std::sync::Arc;
use std::thread;

// Third-party crates
use tracing::{debug, trace};

// Local crate
use crate::completion::{CompletionReceiver, Event};
use crate::errors::DaqError;
use crate::registry::{CompletionHandler, Registry};

pub struct DispatchLoop {
    handle: Option<thread::JoinHandle<()>>,
}

impl DispatchLoop {
    /// Spawn a named dispatch thread pumping `rx` into `registry` entries.
    pub fn spawn<H>(
        name: &str,
        mut rx: CompletionReceiver,
        registry: Arc<Registry<H>>,
    ) -> Result<Self, DaqError>
    where
        H: CompletionHandler + ?Sized + 'static,
    {
        let thread_name = name.to_string();
        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("failed to build dispatch runtime");

            runtime.block_on(async move {
                while let Some(event) = rx.next().await {
                    match event {
                        Event::Completion { tag, ok } => deliver(&registry, tag, ok),
                        Event::Shutdown => {
                            // drain: deliver everything already queued, then
                            // exit. Handlers in a terminal state ignore late
                            // events, so this is safe against cancel races.
                            while let Some(event) = rx.try_next() {
                                if let Event::Completion { tag, ok } = event {
                                    deliver(&registry, tag, ok);
                                }
                            }
                            break;
                        }
                    }
                }
                debug!("dispatch loop terminated");
            });
        })?;

        Ok(DispatchLoop {
            handle: Some(handle),
        })
    }

    /// Block until the dispatch thread has exited. Must not be called from
    /// the dispatch thread itself.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn deliver<H>(registry: &Registry<H>, tag: u64, ok: bool)
where
    H: CompletionHandler + ?Sized,
{
    match registry.get(tag) {
        Some(handler) => {
            if !handler.on_completion_event(ok) {
                registry.remove(tag);
                trace!(%tag, "handler finished, removed from registry");
            }
        }
        // A tag may legally outlive its object (cancelled call whose final
        // event arrives after removal). Never trust the tag beyond a lookup.
        None => trace!(%tag, %ok, "completion event for unknown tag ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::completion_queue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        id: u64,
        events: AtomicUsize,
        keep: usize,
    }

    impl CompletionHandler for Counter {
        fn id(&self) -> u64 {
            self.id
        }
        fn on_completion_event(&self, _ok: bool) -> bool {
            let seen = self.events.fetch_add(1, Ordering::SeqCst) + 1;
            seen < self.keep
        }
        fn try_cancel_and_shutdown(&self) {}
    }

    #[test]
    fn test_events_routed_and_removed_on_false() {
        let (tx, rx) = completion_queue();
        let registry: Arc<Registry<Counter>> = Arc::new(Registry::new());
        let handler = Arc::new(Counter {
            id: 1,
            events: AtomicUsize::new(0),
            keep: 2,
        });
        registry.insert(handler.clone());

        let dispatch = DispatchLoop::spawn("test-dispatch", rx, registry.clone()).unwrap();
        tx.post(1, true);
        tx.post(1, true);
        tx.shutdown();
        dispatch.join();

        assert_eq!(handler.events.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_ignored() {
        let (tx, rx) = completion_queue();
        let registry: Arc<Registry<Counter>> = Arc::new(Registry::new());

        let dispatch = DispatchLoop::spawn("test-dispatch", rx, registry.clone()).unwrap();
        tx.post(42, false);
        tx.shutdown();
        dispatch.join();
    }

    #[test]
    fn test_events_behind_shutdown_are_drained() {
        let (tx, rx) = completion_queue();
        let registry: Arc<Registry<Counter>> = Arc::new(Registry::new());
        let handler = Arc::new(Counter {
            id: 9,
            events: AtomicUsize::new(0),
            keep: 1,
        });
        registry.insert(handler.clone());

        // post the event after the shutdown marker: it is in flight at
        // shutdown time and must still be delivered
        tx.shutdown();
        tx.post(9, false);

        let dispatch = DispatchLoop::spawn("test-dispatch", rx, registry.clone()).unwrap();
        dispatch.join();

        assert_eq!(handler.events.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
