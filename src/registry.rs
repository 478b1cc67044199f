//! Process-wide registry of open subscriptions, keyed by identity, holding
//! weak references so a dropped subscription is garbage-collectible.
//!
//! Grounded on `esdbclient/common.py`'s `GrpcStreamers` (a dict of weak
//! references enumerated and stopped on client `close()`).

use std::sync::{Arc, Mutex, Weak};

/// Anything the registry can stop. Catch-up and persistent subscription
/// readers both implement this.
pub trait Stoppable: Send + Sync {
    fn stop(&self);
}

/// A handle returned by `register`; dropping it does not itself stop the
/// subscription (that's what `stop()` on the reader is for) but it does let
/// callers remove a specific entry eagerly if they want to.
pub struct RegistryHandle {
    id: u64,
    registry: Arc<Registry>,
}

impl RegistryHandle {
    pub fn deregister(&self) {
        self.registry.remove(self.id);
    }
}

struct State {
    next_id: u64,
    entries: Vec<(u64, Weak<dyn Stoppable>)>,
}

/// Guarded by a mutex; `close_all` takes a snapshot copy so it never holds
/// the lock while calling into a subscription's `stop`.
pub struct Registry {
    state: Mutex<State>,
}

impl Registry {
    pub fn new() -> Arc<Registry> {
        Arc::new(Registry {
            state: Mutex::new(State {
                next_id: 0,
                entries: Vec::new(),
            }),
        })
    }

    pub fn register(self: &Arc<Self>, subscription: &Arc<dyn Stoppable>) -> RegistryHandle {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push((id, Arc::downgrade(subscription)));
        RegistryHandle {
            id,
            registry: Arc::clone(self),
        }
    }

    fn remove(&self, id: u64) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        state.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    /// Iterate a snapshot of currently-live entries and stop each, tolerating
    /// entries that disappeared between enumeration and stop.
    pub fn close_all(&self) {
        let snapshot: Vec<Weak<dyn Stoppable>> = {
            let mut state = self.state.lock().expect("registry mutex poisoned");
            // Prune dead entries as we go so the registry doesn't grow
            // unboundedly across a long-lived client's lifetime.
            state.entries.retain(|(_, weak)| weak.strong_count() > 0);
            state.entries.iter().map(|(_, w)| w.clone()).collect()
        };
        for weak in snapshot {
            if let Some(subscription) = weak.upgrade() {
                subscription.stop();
            }
        }
    }

    pub fn live_count(&self) -> usize {
        let state = self.state.lock().expect("registry mutex poisoned");
        state
            .entries
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }
}
