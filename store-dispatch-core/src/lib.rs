//! Core engine for store-dispatch
//!
//! An in-process, ordered action pipeline in the Redux/Flux style. Any
//! thread may dispatch; the store serializes actions into a single,
//! non-overlapping drain loop.
//!
//! # Core Concepts
//!
//! - **Action**: an immutable event value, routed by its concrete type
//! - **Dispatcher**: cloneable handle producers use to dispatch actions
//! - **Feature**: a named slice of state with typed reducers
//! - **Middleware**: veto, before/after hooks, initialization and change scopes
//! - **Effect**: predicate-gated side effect started after an action is processed
//! - **Store**: owns the queue, the registries and the activation lifecycle
//!
//! # Basic Example
//!
//! ```ignore
//! use store_dispatch_core::prelude::*;
//!
//! #[derive(Debug)]
//! struct Increment;
//!
//! impl Action for Increment {
//!     fn name(&self) -> &'static str { "Increment" }
//! }
//!
//! fn increment(count: &mut i64, _: &Increment) -> bool {
//!     *count += 1;
//!     true
//! }
//!
//! let dispatcher = Dispatcher::new();
//! let counter = Arc::new(StateFeature::new("Counter", 0i64).on(increment));
//! let store = Store::builder()
//!     .dispatcher(dispatcher.clone())
//!     .feature(counter.clone())
//!     .build()?;
//!
//! dispatcher.dispatch(Increment); // queued
//! store.initialize().await;       // processed here
//! assert_eq!(counter.state(), 1);
//! ```
//!
//! # Async Work
//!
//! Reducers stay synchronous. Slow work belongs in effects, which report
//! back by dispatching result actions:
//!
//! ```ignore
//! let fetch = effect_fn(|action: &FetchUser, dispatcher: Dispatcher| {
//!     let id = action.id;
//!     async move {
//!         let user = api::user(id).await.map_err(EffectError::from_error)?;
//!         dispatcher.dispatch(UserDidLoad(user));
//!         Ok(())
//!     }
//! });
//! store.add_effect(fetch);
//!
//! let mut errors = store.unhandled_errors();
//! while let Ok(failure) = errors.recv().await {
//!     tracing::warn!(action = failure.action.name(), error = %failure.error);
//! }
//! ```

pub mod action;
pub mod dispatcher;
pub mod effect;
pub mod error;
pub mod feature;
pub mod lifecycle;
pub mod logging;
pub mod markers;
pub mod middleware;
pub mod persistence;
pub mod queue;
pub mod store;
pub mod subscriptions;
pub mod testing;

// Action exports
pub use action::{action_ref, Action, ActionRef, AsAny};
pub use markers::{
    is_store_marker, StoreInitializedAction, StorePersistedAction, StorePersistingAction,
    StoreRehydratedAction, StoreRehydratingAction,
};

// Dispatch exports
pub use dispatcher::{Dispatcher, ListenerGuard, PENDING_LIMIT};
pub use queue::{action_queue, ActionQueue, QueueConsumer};

// Store exports
pub use lifecycle::LifecycleState;
pub use store::{Store, StoreBuilder, StoreConfig, WeakStore};

// Registry exports
pub use effect::{effect_fn, sync_effect_fn, Effect, EffectFn, EffectFuture, SyncEffectFn};
pub use feature::{Feature, Reducer, StateFeature};
pub use middleware::{InternalChange, Middleware, MiddlewareChangeGuard};
pub use subscriptions::{ActionSubscriptions, SubscriberId, SubscriptionGuard};

// Persistence exports
pub use persistence::{MemoryPersistence, PersistenceProvider};

// Logging exports
pub use logging::{glob_match, ActionLog, ActionLogConfig, ActionLogEntry, ActionLoggerConfig, LoggingMiddleware};

// Error exports
pub use error::{EffectError, MiddlewareError, StoreError, UnhandledEffectError};

// Testing exports
pub use testing::{ActionRecorder, TestHarness};

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::action::{Action, ActionRef};
    pub use crate::dispatcher::Dispatcher;
    pub use crate::effect::{effect_fn, sync_effect_fn, Effect, EffectFuture};
    pub use crate::error::{EffectError, MiddlewareError, StoreError, UnhandledEffectError};
    pub use crate::feature::{Feature, Reducer, StateFeature};
    pub use crate::logging::{ActionLoggerConfig, LoggingMiddleware};
    pub use crate::markers::{
        StoreInitializedAction, StorePersistedAction, StorePersistingAction,
        StoreRehydratedAction, StoreRehydratingAction,
    };
    pub use crate::middleware::{InternalChange, Middleware};
    pub use crate::persistence::{MemoryPersistence, PersistenceProvider};
    pub use crate::store::{Store, StoreBuilder, StoreConfig};
    pub use crate::subscriptions::SubscriberId;
}
