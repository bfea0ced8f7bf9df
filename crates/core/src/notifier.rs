// crates/core/src/notifier.rs
//! Synchronous fire-and-forget pub/sub keyed by a fixed event enum.
//!
//! Used by every [`crate::Job`] for its lifecycle events and by the
//! combinator wrappers for their request-state stream.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Registry<K, P> {
    next_id: u64,
    listeners: HashMap<K, Vec<(u64, Listener<P>)>>,
}

/// Listener registry for event kinds `K` carrying payload `P`.
pub struct Notifier<K, P> {
    registry: Arc<Mutex<Registry<K, P>>>,
}

impl<K, P> Notifier<K, P>
where
    K: Copy + Eq + Hash + Send + 'static,
    P: 'static,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    /// Register `listener` under `event`.
    ///
    /// The returned [`Subscription`] removes exactly this registration.
    pub fn subscribe<F>(&self, event: K, listener: F) -> Subscription
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .listeners
                .entry(event)
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };

        let registry: Weak<Mutex<Registry<K, P>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                let mut registry = lock(&registry);
                if let Some(listeners) = registry.listeners.get_mut(&event) {
                    listeners.retain(|(existing, _)| *existing != id);
                }
            }
        })
    }

    /// Invoke every listener of each event in `events`, in registration order.
    ///
    /// Listeners run outside the lock, so they may subscribe, unsubscribe or
    /// clear re-entrantly. Panics are not caught.
    pub fn emit(&self, events: &[K], payload: &P) {
        for event in events {
            let snapshot: Vec<Listener<P>> = {
                let registry = lock(&self.registry);
                match registry.listeners.get(event) {
                    Some(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
                    None => continue,
                }
            };
            for listener in snapshot {
                listener(payload);
            }
        }
    }

    /// Drop every listener. Subscriptions issued earlier stay inert.
    pub fn clear(&self) {
        lock(&self.registry).listeners.clear();
    }

    pub fn listener_count(&self, event: K) -> usize {
        lock(&self.registry)
            .listeners
            .get(&event)
            .map_or(0, Vec::len)
    }
}

impl<K, P> Default for Notifier<K, P>
where
    K: Copy + Eq + Hash + Send + 'static,
    P: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e: PoisonError<_>| {
        tracing::error!("Mutex poisoned in notifier registry, recovering");
        e.into_inner()
    })
}

/// Handle returned by every `subscribe`/`on_*` call.
///
/// Dropping it leaves the listener registered; call
/// [`Subscription::unsubscribe`] to remove it. Repeated calls are no-ops.
pub struct Subscription {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    pub fn unsubscribe(&self) {
        let detach = lock(&self.detach).take();
        if let Some(detach) = detach {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &lock(&self.detach).is_some())
            .finish()
    }
}
