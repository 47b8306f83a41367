// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Call/session registry: the single source of truth for whether a
//! completion tag still refers to a live object. Entries are inserted when a
//! call/session is constructed and removed when its handler reports a
//! terminal state, or cleared wholesale after a stop/drain.

// Standard library imports
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// Third-party crates
use parking_lot::Mutex;

/// Handler side of a call/session state machine, driven by the dispatch
/// loop.
pub trait CompletionHandler: Send + Sync {
    /// Registry key and completion tag of this object.
    fn id(&self) -> u64;

    /// Handle one completion event. Returns `true` while more events are
    /// expected, `false` to be removed from the registry.
    fn on_completion_event(&self, ok: bool) -> bool;

    /// Request cancellation and force the terminal state. Idempotent: the
    /// first call wins, later calls and late completion events are no-ops.
    fn try_cancel_and_shutdown(&self);
}

/// Monotonic id allocator, scoped to one engine instance so that multiple
/// engines in a process do not share id spaces.
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator {
            next: AtomicU64::new(0),
        }
    }

    /// Ids start at 1 and are never reused.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator::new()
    }
}

/// Map from id to live call/session object, one per engine instance.
pub struct Registry<H: ?Sized> {
    entries: Mutex<HashMap<u64, Arc<H>>>,
}

impl<H: CompletionHandler + ?Sized> Registry<H> {
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, handler: Arc<H>) {
        self.entries.lock().insert(handler.id(), handler);
    }

    pub fn get(&self, id: u64) -> Option<Arc<H>> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: u64) -> Option<Arc<H>> {
        self.entries.lock().remove(&id)
    }

    /// Snapshot of all live entries, for fan-out and cancel-all without
    /// holding the registry lock across callbacks.
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<H: CompletionHandler + ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        id: u64,
    }

    impl CompletionHandler for Noop {
        fn id(&self) -> u64 {
            self.id
        }
        fn on_completion_event(&self, _ok: bool) -> bool {
            false
        }
        fn try_cancel_and_shutdown(&self) {}
    }

    #[test]
    fn test_ids_are_unique_and_strictly_increasing() {
        let ids = IdAllocator::new();
        let mut previous = 0;
        for _ in 0..1000 {
            let id = ids.allocate();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_id_spaces_are_per_allocator() {
        let a = IdAllocator::new();
        let b = IdAllocator::new();
        assert_eq!(a.allocate(), 1);
        assert_eq!(b.allocate(), 1);
    }

    #[test]
    fn test_insert_get_remove() {
        let registry: Registry<dyn CompletionHandler> = Registry::new();
        registry.insert(Arc::new(Noop { id: 3 }));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(3).is_some());
        assert!(registry.get(4).is_none());
        assert!(registry.remove(3).is_some());
        assert!(registry.is_empty());
        // double remove is a no-op
        assert!(registry.remove(3).is_none());
    }

    #[test]
    fn test_clear() {
        let registry: Registry<Noop> = Registry::new();
        registry.insert(Arc::new(Noop { id: 1 }));
        registry.insert(Arc::new(Noop { id: 2 }));
        registry.clear();
        assert!(registry.is_empty());
    }
}
