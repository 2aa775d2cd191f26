//! Dispatcher: the producer-facing entry point for actions
//!
//! Anything holding a [`Dispatcher`] can dispatch actions from any thread.
//! The store attaches itself as a listener when it is built and detaches
//! when it is dropped. Actions dispatched while no listener is attached are
//! buffered and handed, in order, to the next listener that attaches. The
//! buffer keeps the newest [`PENDING_LIMIT`] actions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::action::{Action, ActionRef};

type Listener = Arc<dyn Fn(ActionRef) + Send + Sync>;

/// Most actions buffered while no listener is attached. Older ones are
/// dropped first.
pub const PENDING_LIMIT: usize = 1024;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
    pending: VecDeque<ActionRef>,
    /// A backlog is being delivered; new dispatches join it to keep order.
    flushing: bool,
}

#[derive(Default)]
struct DispatcherInner {
    listeners: Mutex<Listeners>,
}

impl DispatcherInner {
    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver the backlog outside the lock, batch by batch, until it stays
    /// empty. Listeners may dispatch while this runs.
    fn flush(&self) {
        loop {
            let (batch, listeners) = {
                let mut guard = self.lock();
                if guard.pending.is_empty() || guard.entries.is_empty() {
                    guard.flushing = false;
                    return;
                }
                let listeners: Vec<Listener> =
                    guard.entries.iter().map(|(_, l)| Arc::clone(l)).collect();
                (std::mem::take(&mut guard.pending), listeners)
            };

            for action in batch {
                for listener in &listeners {
                    listener(Arc::clone(&action));
                }
            }
        }
    }
}

/// Cloneable handle used to dispatch actions.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.inner.lock();
        f.debug_struct("Dispatcher")
            .field("listeners", &listeners.entries.len())
            .field("pending", &listeners.pending.len())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch an action to every attached listener.
    pub fn dispatch<A: Action>(&self, action: A) {
        self.dispatch_ref(Arc::new(action));
    }

    /// Dispatch an already shared action.
    pub fn dispatch_ref(&self, action: ActionRef) {
        let listeners: Vec<Listener> = {
            let mut guard = self.inner.lock();
            if guard.entries.is_empty() || guard.flushing {
                if guard.pending.len() >= PENDING_LIMIT {
                    if let Some(dropped) = guard.pending.pop_front() {
                        tracing::warn!(
                            action = dropped.name(),
                            limit = PENDING_LIMIT,
                            "dispatcher backlog full, dropping oldest action"
                        );
                    }
                }
                guard.pending.push_back(action);
                return;
            }
            guard.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in listeners {
            listener(Arc::clone(&action));
        }
    }

    /// Attach a listener.
    ///
    /// Buffered actions are delivered to the new listener before this
    /// returns. The listener stays attached until the returned guard drops.
    pub fn listen<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(ActionRef) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let (id, flush) = {
            let mut guard = self.inner.lock();
            let id = guard.next_id;
            guard.next_id += 1;
            guard.entries.push((id, listener));
            let flush = !guard.pending.is_empty() && !guard.flushing;
            if flush {
                guard.flushing = true;
            }
            (id, flush)
        };
        if flush {
            self.inner.flush();
        }

        ListenerGuard {
            dispatcher: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Number of actions buffered while no listener was attached.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

/// Detaches a listener from its dispatcher when dropped.
#[must_use = "the listener is detached as soon as the guard is dropped"]
pub struct ListenerGuard {
    dispatcher: Weak<DispatcherInner>,
    id: u64,
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard").field("id", &self.id).finish()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}
