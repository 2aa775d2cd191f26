//! Middleware pipeline
//!
//! Middlewares see every action the store processes. For each action the
//! store asks all of them whether it may be dispatched (any single veto
//! discards the action), then calls `before_dispatch` in registration
//! order, notifies features and subscribers, and calls `after_dispatch`
//! in registration order.
//!
//! Middlewares are shared (`Arc`) and called through `&self`; keep any
//! mutable bookkeeping behind a lock or atomics.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use crate::action::Action;
use crate::dispatcher::Dispatcher;
use crate::error::MiddlewareError;
use crate::store::Store;

/// A pipeline stage around every dispatched action
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once during store activation, in registration order, each
    /// awaited before the next starts. Middlewares added to an active store
    /// are initialized on their own in the background.
    async fn initialize(
        &self,
        _dispatcher: &Dispatcher,
        _store: &Store,
    ) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Called after every middleware has been initialized. Skipped for a
    /// middleware whose `initialize` failed.
    fn after_all_initialized(&self) {}

    /// Return `false` to veto the action.
    fn may_dispatch(&self, _action: &dyn Action) -> bool {
        true
    }

    /// Called before features see the action.
    fn before_dispatch(&self, _action: &dyn Action) {}

    /// Called after features and subscribers have seen the action.
    fn after_dispatch(&self, _action: &dyn Action) {}

    /// Enter an internal change window (e.g. a devtool overwriting state).
    ///
    /// The returned handle is released when the outermost store-level
    /// change scope ends.
    fn begin_internal_change(&self) -> InternalChange {
        InternalChange::none()
    }

    /// Called by [`Store::shutdown`], in reverse registration order.
    fn shutdown(&self) {}
}

/// Releasable handle returned by [`Middleware::begin_internal_change`]
///
/// The release callback runs exactly once, when the handle is released or dropped.
#[must_use = "dropping the handle ends the internal change immediately"]
pub struct InternalChange {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl InternalChange {
    /// A handle with nothing to release.
    pub fn none() -> Self {
        Self { release: None }
    }

    /// Run `f` on release.
    pub fn on_release<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(f)),
        }
    }

    /// Release now.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for InternalChange {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for InternalChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalChange")
            .field("pending_release", &self.release.is_some())
            .finish()
    }
}

pub(crate) struct MiddlewareEntry {
    pub(crate) middleware: Arc<dyn Middleware>,
    initialized: AtomicBool,
}

impl MiddlewareEntry {
    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MiddlewareLists {
    forward: Vec<Arc<MiddlewareEntry>>,
    reversed: Vec<Arc<MiddlewareEntry>>,
}

#[derive(Default)]
struct ChangeScopes {
    depth: usize,
    held: Vec<InternalChange>,
}

/// Ordered middleware list plus the internal-change nesting counter.
#[derive(Default)]
pub(crate) struct MiddlewarePipeline {
    lists: RwLock<MiddlewareLists>,
    scopes: Mutex<ChangeScopes>,
    depth: AtomicUsize,
}

impl MiddlewarePipeline {
    pub(crate) fn add(&self, middleware: Arc<dyn Middleware>) -> Arc<MiddlewareEntry> {
        let entry = Arc::new(MiddlewareEntry {
            middleware,
            initialized: AtomicBool::new(false),
        });
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        lists.forward.push(Arc::clone(&entry));
        lists.reversed.insert(0, Arc::clone(&entry));
        entry
    }

    /// Registration order.
    pub(crate) fn entries(&self) -> Vec<Arc<MiddlewareEntry>> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .forward
            .clone()
    }

    /// Reverse registration order.
    pub(crate) fn reversed(&self) -> Vec<Arc<MiddlewareEntry>> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reversed
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .forward
            .len()
    }

    /// Logical AND of every middleware's approval.
    pub(crate) fn may_dispatch(entries: &[Arc<MiddlewareEntry>], action: &dyn Action) -> bool {
        entries.iter().all(|e| e.middleware.may_dispatch(action))
    }

    pub(crate) fn before_dispatch(entries: &[Arc<MiddlewareEntry>], action: &dyn Action) {
        for entry in entries {
            entry.middleware.before_dispatch(action);
        }
    }

    pub(crate) fn after_dispatch(entries: &[Arc<MiddlewareEntry>], action: &dyn Action) {
        for entry in entries {
            entry.middleware.after_dispatch(action);
        }
    }

    /// Current nesting depth of internal change scopes.
    pub(crate) fn change_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_change(self: &Arc<Self>) -> MiddlewareChangeGuard {
        let entries = self.entries();
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        scopes.depth += 1;
        self.depth.store(scopes.depth, Ordering::SeqCst);
        for entry in &entries {
            scopes.held.push(entry.middleware.begin_internal_change());
        }
        tracing::trace!(depth = scopes.depth, "middleware change scope entered");

        MiddlewareChangeGuard {
            pipeline: Arc::clone(self),
        }
    }

    fn end_change(&self) {
        let released = {
            let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
            scopes.depth = scopes.depth.saturating_sub(1);
            self.depth.store(scopes.depth, Ordering::SeqCst);
            tracing::trace!(depth = scopes.depth, "middleware change scope left");
            if scopes.depth > 0 {
                return;
            }
            std::mem::take(&mut scopes.held)
        };

        // Outside the lock: a release callback may open a new scope.
        for handle in released {
            handle.release();
        }
    }
}

/// Store-level internal change scope
///
/// While any guard is alive the store silently drops newly submitted
/// actions. Dropping the last (outermost) guard releases every
/// per-middleware handle in the order they were acquired.
#[must_use = "the change scope ends as soon as the guard is dropped"]
pub struct MiddlewareChangeGuard {
    pipeline: Arc<MiddlewarePipeline>,
}

impl std::fmt::Debug for MiddlewareChangeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChangeGuard")
            .field("depth", &self.pipeline.change_depth())
            .finish()
    }
}

impl Drop for MiddlewareChangeGuard {
    fn drop(&mut self) {
        self.pipeline.end_change();
    }
}
