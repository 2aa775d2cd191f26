//! Type-keyed action subscriptions
//!
//! External code (UI components, bridges, tests) can subscribe to a
//! concrete action type and get a callback for every processed action of
//! that type.
//!
//! # Example
//!
//! ```ignore
//! let id = SubscriberId::new();
//! store.subscribe::<Increment, _>(id, |action| println!("{action:?}"));
//!
//! // Tie the subscription to a scope
//! let _guard = store.unsubscriber(id);
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::action::Action;

type Callback = Arc<dyn Fn(&dyn Action) + Send + Sync>;

/// Identity of a subscriber.
///
/// One identity may hold any number of subscriptions; they are removed
/// together by [`ActionSubscriptions::unsubscribe_all`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a fresh, process-unique identity.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of callbacks keyed by action type.
#[derive(Default)]
pub struct ActionSubscriptions {
    by_type: RwLock<HashMap<TypeId, Vec<(SubscriberId, Callback)>>>,
}

impl std::fmt::Debug for ActionSubscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSubscriptions")
            .field("subscriptions", &self.len())
            .finish()
    }
}

impl ActionSubscriptions {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` for every processed action of type `A`.
    pub fn subscribe<A, F>(&self, subscriber: SubscriberId, callback: F)
    where
        A: Action,
        F: Fn(&A) + Send + Sync + 'static,
    {
        let erased: Callback = Arc::new(move |action: &dyn Action| {
            if let Some(action) = action.downcast_ref::<A>() {
                callback(action);
            }
        });
        self.by_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(TypeId::of::<A>())
            .or_default()
            .push((subscriber, erased));
    }

    /// Remove every subscription held by `subscriber`.
    pub fn unsubscribe_all(&self, subscriber: SubscriberId) {
        let mut by_type = self.by_type.write().unwrap_or_else(PoisonError::into_inner);
        for callbacks in by_type.values_mut() {
            callbacks.retain(|(id, _)| *id != subscriber);
        }
        by_type.retain(|_, callbacks| !callbacks.is_empty());
    }

    /// Guard that calls [`unsubscribe_all`](Self::unsubscribe_all) for `subscriber` on drop.
    pub fn unsubscriber(self: &Arc<Self>, subscriber: SubscriberId) -> SubscriptionGuard {
        SubscriptionGuard {
            registry: Arc::downgrade(self),
            subscriber,
        }
    }

    /// Fan an action out to every callback registered for its type.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe themselves.
    pub fn notify(&self, action: &dyn Action) {
        let callbacks: Vec<Callback> = {
            let by_type = self.by_type.read().unwrap_or_else(PoisonError::into_inner);
            match by_type.get(&action.action_type()) {
                Some(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        for callback in callbacks {
            callback(action);
        }
    }

    /// Total number of registered callbacks.
    pub fn len(&self) -> usize {
        self.by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Whether there are no callbacks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ends every subscription of one subscriber when dropped.
#[must_use = "the subscriptions end as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SubscriptionGuard {
    registry: Weak<ActionSubscriptions>,
    subscriber: SubscriberId,
}

impl SubscriptionGuard {
    /// The subscriber this guard belongs to.
    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe_all(self.subscriber);
        }
    }
}
