//! Effects: side effects triggered by processed actions
//!
//! An effect is a predicate plus a handler. For every processed action the
//! store starts each matching effect, collects failures, and reports them
//! once all of that action's effects have settled. The drain loop never
//! waits for an effect.
//!
//! A handler can fail in two places:
//! - synchronously, by returning `Err` from [`Effect::handle`] (captured
//!   immediately, siblings still start)
//! - asynchronously, by resolving its future to `Err` or panicking
//!
//! Every failure is flattened and delivered individually through the
//! store's unhandled-error channel.
//!
//! # Example
//!
//! ```ignore
//! use store_dispatch::{effect_fn, Dispatcher, EffectError};
//!
//! let load = effect_fn(|action: &LoadUser, dispatcher: Dispatcher| {
//!     let id = action.id;
//!     async move {
//!         let user = api::fetch_user(id).await.map_err(EffectError::from_error)?;
//!         dispatcher.dispatch(UserLoaded(user));
//!         Ok(())
//!     }
//! });
//! store.add_effect(load);
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::action::{Action, ActionRef};
use crate::dispatcher::Dispatcher;
use crate::error::{EffectError, UnhandledEffectError};

/// Future returned by an effect handler.
pub type EffectFuture = BoxFuture<'static, Result<(), EffectError>>;

/// A predicate-gated side effect
pub trait Effect: Send + Sync + 'static {
    /// Whether this effect reacts to `action`.
    fn should_react_to(&self, action: &dyn Action) -> bool;

    /// Start handling `action`.
    ///
    /// Runs on the draining thread, so do the slow part inside the returned
    /// future. Returning `Err` reports a synchronous failure.
    fn handle(&self, action: ActionRef, dispatcher: Dispatcher) -> Result<EffectFuture, EffectError>;
}

/// Effect that reacts to one action type with an async handler.
pub struct EffectFn<A, F> {
    handler: F,
    _marker: PhantomData<fn(&A)>,
}

/// Build an async effect for actions of type `A`.
pub fn effect_fn<A, F, Fut>(handler: F) -> EffectFn<A, F>
where
    A: Action,
    F: Fn(&A, Dispatcher) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EffectError>> + Send + 'static,
{
    EffectFn {
        handler,
        _marker: PhantomData,
    }
}

impl<A, F, Fut> Effect for EffectFn<A, F>
where
    A: Action,
    F: Fn(&A, Dispatcher) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EffectError>> + Send + 'static,
{
    fn should_react_to(&self, action: &dyn Action) -> bool {
        action.is::<A>()
    }

    fn handle(&self, action: ActionRef, dispatcher: Dispatcher) -> Result<EffectFuture, EffectError> {
        match action.downcast_ref::<A>() {
            Some(action) => Ok((self.handler)(action, dispatcher).boxed()),
            None => Ok(futures::future::ok(()).boxed()),
        }
    }
}

/// Effect that reacts to one action type and runs to completion immediately.
pub struct SyncEffectFn<A, F> {
    handler: F,
    _marker: PhantomData<fn(&A)>,
}

/// Build a synchronous effect for actions of type `A`.
///
/// Its failures are captured on the draining thread, before any sibling
/// effect's future has had a chance to run.
pub fn sync_effect_fn<A, F>(handler: F) -> SyncEffectFn<A, F>
where
    A: Action,
    F: Fn(&A, &Dispatcher) -> Result<(), EffectError> + Send + Sync + 'static,
{
    SyncEffectFn {
        handler,
        _marker: PhantomData,
    }
}

impl<A, F> Effect for SyncEffectFn<A, F>
where
    A: Action,
    F: Fn(&A, &Dispatcher) -> Result<(), EffectError> + Send + Sync + 'static,
{
    fn should_react_to(&self, action: &dyn Action) -> bool {
        action.is::<A>()
    }

    fn handle(&self, action: ActionRef, dispatcher: Dispatcher) -> Result<EffectFuture, EffectError> {
        if let Some(action) = action.downcast_ref::<A>() {
            (self.handler)(action, &dispatcher)?;
        }
        Ok(futures::future::ok(()).boxed())
    }
}

/// Delivers unhandled effect failures to observers.
#[derive(Clone, Debug)]
pub(crate) struct ErrorReporter {
    tx: broadcast::Sender<UnhandledEffectError>,
}

impl ErrorReporter {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<UnhandledEffectError> {
        self.tx.subscribe()
    }

    pub(crate) fn report(&self, action: &ActionRef, errors: Vec<EffectError>) {
        for error in errors {
            let unhandled = UnhandledEffectError {
                action: Arc::clone(action),
                error,
            };
            if self.tx.receiver_count() == 0 {
                tracing::error!(
                    action = %unhandled.action.name(),
                    label = unhandled.error.as_label(),
                    error = %unhandled.error,
                    "unhandled effect error"
                );
                continue;
            }
            // Receivers may all drop between the check and the send.
            if let Err(broadcast::error::SendError(lost)) = self.tx.send(unhandled) {
                tracing::error!(
                    action = %lost.action.name(),
                    error = %lost.error,
                    "unhandled effect error"
                );
            }
        }
    }
}

/// Ordered effect collection plus the trigger protocol.
#[derive(Default)]
pub(crate) struct EffectRegistry {
    effects: RwLock<Vec<Arc<dyn Effect>>>,
}

impl EffectRegistry {
    pub(crate) fn add(&self, effect: Arc<dyn Effect>) {
        self.effects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(effect);
    }

    pub(crate) fn len(&self) -> usize {
        self.effects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn matching(&self, action: &dyn Action) -> Vec<Arc<dyn Effect>> {
        self.effects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.should_react_to(action))
            .cloned()
            .collect()
    }

    /// Start every matching effect and report failures once they settle.
    ///
    /// Returns without waiting for any effect future.
    pub(crate) fn trigger(
        &self,
        action: &ActionRef,
        dispatcher: &Dispatcher,
        runtime: Option<&Handle>,
        reporter: &ErrorReporter,
    ) {
        let effects = self.matching(action.as_ref());
        if effects.is_empty() {
            return;
        }

        let mut failures = Vec::new();
        let mut started = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect.handle(Arc::clone(action), dispatcher.clone()) {
                Ok(future) => started.push(future),
                Err(error) => failures.extend(error.flatten()),
            }
        }

        let Some(runtime) = runtime else {
            // Without a runtime only already-completed futures can be settled.
            for future in started {
                match future.now_or_never() {
                    Some(Ok(())) => {}
                    Some(Err(error)) => failures.extend(error.flatten()),
                    None => failures.push(EffectError::NoRuntime),
                }
            }
            reporter.report(action, failures);
            return;
        };

        let mut running = JoinSet::new();
        for future in started {
            running.spawn_on(future, runtime);
        }

        let action = Arc::clone(action);
        let reporter = reporter.clone();
        runtime.spawn(async move {
            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => failures.extend(error.flatten()),
                    Err(join_error) => failures.push(EffectError::Panicked(join_error.to_string())),
                }
            }
            if !failures.is_empty() {
                reporter.report(&action, failures);
            }
        });
    }
}
