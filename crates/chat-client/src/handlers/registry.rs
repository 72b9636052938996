//! Event handler registry
//!
//! Handlers are keyed by [`HandlerKey`]. Dispatch snapshots the matching
//! entries under the read lock and delivers each on its own task; removal
//! takes the write lock and deactivates the entry so a snapshot taken before
//! the removal skips it.

use crate::events::{Event, EventKind, HandlerKey};
use crate::session::Session;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

type Callback = Arc<dyn Fn(&Session, &Event) + Send + Sync>;

struct HandlerEntry {
    callback: Callback,
    active: AtomicBool,
}

impl HandlerEntry {
    fn invoke(&self, session: &Session, event: &Event) {
        if self.active.load(Ordering::Acquire) {
            (self.callback)(session, event);
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    handlers: RwLock<HashMap<HandlerKey, HashMap<u64, Arc<HandlerEntry>>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, key: HandlerKey, id: u64) -> bool {
        let mut handlers = self.handlers.write();

        let Some(bucket) = handlers.get_mut(&key) else {
            return false;
        };
        let Some(entry) = bucket.remove(&id) else {
            return false;
        };
        entry.active.store(false, Ordering::Release);

        if bucket.is_empty() {
            handlers.remove(&key);
        }
        true
    }
}

/// Concurrency-safe registry of event handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events of type `E`
    ///
    /// Registering the same closure twice yields two independent entries.
    pub fn add<E, F>(&self, handler: F) -> HandlerRemover
    where
        E: EventKind,
        F: Fn(&Session, &E) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let callback: Callback = Arc::new(move |session, event| {
            if let Some(typed) = E::from_event(event) {
                handler(session, typed);
            }
        });

        self.insert(E::KEY, id, callback)
    }

    /// Register a handler that runs for at most one event, then removes itself
    pub fn add_once<E, F>(&self, handler: F) -> HandlerRemover
    where
        E: EventKind,
        F: Fn(&Session, &E) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let key = E::KEY;
        let registry = Arc::downgrade(&self.inner);
        let fired = AtomicBool::new(false);

        let callback: Callback = Arc::new(move |session, event| {
            let Some(typed) = E::from_event(event) else {
                return;
            };
            if fired.swap(true, Ordering::AcqRel) {
                return;
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove(key, id);
            }
            handler(session, typed);
        });

        self.insert(key, id, callback)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, key: HandlerKey, id: u64, callback: Callback) -> HandlerRemover {
        let entry = Arc::new(HandlerEntry {
            callback,
            active: AtomicBool::new(true),
        });

        self.inner
            .handlers
            .write()
            .entry(key)
            .or_default()
            .insert(id, entry);

        tracing::trace!(key = ?key, id, "Handler registered");

        HandlerRemover {
            registry: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    /// Deliver an event to every matching handler
    ///
    /// Matching means registered under the event's own key or under
    /// [`HandlerKey::Any`]. Each delivery runs on its own tokio task when a
    /// runtime is available, inline otherwise. Returns the number of
    /// deliveries scheduled.
    pub fn dispatch(&self, session: &Session, event: Event) -> usize {
        let entries: Vec<Arc<HandlerEntry>> = {
            let handlers = self.inner.handlers.read();
            [event.handler_key(), HandlerKey::Any]
                .iter()
                .filter_map(|key| handlers.get(key))
                .flat_map(|bucket| bucket.values().cloned())
                .collect()
        };

        if entries.is_empty() {
            return 0;
        }

        let count = entries.len();
        let event = Arc::new(event);

        match Handle::try_current() {
            Ok(runtime) => {
                for entry in entries {
                    let session = session.clone();
                    let event = Arc::clone(&event);
                    runtime.spawn(async move {
                        entry.invoke(&session, &event);
                    });
                }
            }
            Err(_) => {
                for entry in entries {
                    entry.invoke(session, &event);
                }
            }
        }

        count
    }

    /// Number of registered handlers, matched or not
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().values().map(HashMap::len).sum()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// Removes one registered handler
///
/// Removal is idempotent. Deliveries that have not started when
/// [`remove`](Self::remove) returns are skipped.
#[derive(Debug, Clone)]
pub struct HandlerRemover {
    registry: Weak<RegistryInner>,
    key: HandlerKey,
    id: u64,
}

impl HandlerRemover {
    /// Unregister the handler; returns `false` if it was already gone
    pub fn remove(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.key, self.id))
    }
}
