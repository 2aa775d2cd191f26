//! The store: queue, drain loop and activation
//!
//! A [`Store`] listens to a [`Dispatcher`]. Every dispatched action is
//! appended to an unbounded queue. Once the store is active, whichever
//! thread wins the drain region processes the queue until it is empty:
//!
//! 1. every middleware may veto the action
//! 2. `before_dispatch` hooks (registration order)
//! 3. every feature, in registration order
//! 4. type-keyed subscribers
//! 5. `after_dispatch` hooks (registration order)
//! 6. matching effects are started; the loop does not wait for them
//!
//! Actions dispatched while processing (from a reducer, subscriber or
//! middleware) are appended and picked up by the same drain pass.
//!
//! # Example
//!
//! ```ignore
//! use store_dispatch::prelude::*;
//!
//! let dispatcher = Dispatcher::new();
//! let counter = Arc::new(StateFeature::new("Counter", 0i64).on(increment));
//!
//! let store = Store::builder()
//!     .dispatcher(dispatcher.clone())
//!     .feature(counter.clone())
//!     .middleware(LoggingMiddleware::log_all())
//!     .build()?;
//!
//! store.initialize().await;
//! dispatcher.dispatch(Increment);
//! assert_eq!(counter.state(), 1);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::action::{Action, ActionRef};
use crate::dispatcher::{Dispatcher, ListenerGuard};
use crate::effect::{Effect, EffectRegistry, ErrorReporter};
use crate::error::{StoreError, UnhandledEffectError};
use crate::feature::{Feature, FeatureRegistry};
use crate::lifecycle::{Activation, Lifecycle, LifecycleState};
use crate::markers::{is_store_marker, StoreInitializedAction, StorePersistingAction, StoreRehydratingAction};
use crate::middleware::{Middleware, MiddlewareChangeGuard, MiddlewareEntry, MiddlewarePipeline};
use crate::persistence::{PersistenceEffect, PersistenceProvider};
use crate::queue::{action_queue, ActionQueue, QueueConsumer};
use crate::subscriptions::{ActionSubscriptions, SubscriberId, SubscriptionGuard};

/// Environment variable overriding [`StoreConfig::error_channel_capacity`].
pub const ERROR_CAPACITY_ENV: &str = "STORE_DISPATCH_ERROR_CAPACITY";
/// Environment variable overriding [`StoreConfig::persist_batches`].
pub const PERSIST_BATCHES_ENV: &str = "STORE_DISPATCH_PERSIST_BATCHES";

/// Tunables for a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Buffer of the unhandled effect error channel. Slow receivers lag
    /// once this many errors are queued.
    pub error_channel_capacity: usize,
    /// Append one `StorePersistingAction` to each drain batch when a
    /// persistence provider is configured.
    pub persist_batches: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            error_channel_capacity: 64,
            persist_batches: true,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `STORE_DISPATCH_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ERROR_CAPACITY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.error_channel_capacity = capacity,
                _ => tracing::warn!(value = %raw, "ignoring invalid {ERROR_CAPACITY_ENV}"),
            }
        }

        if let Some(raw) = lookup(PERSIST_BATCHES_ENV) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.persist_batches = true,
                "0" | "false" | "no" | "off" => config.persist_batches = false,
                _ => tracing::warn!(value = %raw, "ignoring invalid {PERSIST_BATCHES_ENV}"),
            }
        }

        config
    }
}

struct DrainState {
    consumer: QueueConsumer,
}

/// Resets the draining flag even if processing unwinds.
struct DrainingReset<'a>(&'a AtomicBool);

impl Drop for DrainingReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct StoreInner {
    dispatcher: Dispatcher,
    queue: ActionQueue,
    drain: Mutex<DrainState>,
    draining: AtomicBool,
    lifecycle: Lifecycle,
    features: FeatureRegistry,
    middlewares: Arc<MiddlewarePipeline>,
    effects: EffectRegistry,
    subscriptions: Arc<ActionSubscriptions>,
    reporter: ErrorReporter,
    runtime: Option<Handle>,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    config: StoreConfig,
    listener: Mutex<Option<ListenerGuard>>,
}

impl StoreInner {
    fn submit(&self, action: ActionRef) {
        if self.middlewares.change_depth() > 0 {
            tracing::trace!(action = action.name(), "dropped during middleware change");
            return;
        }

        self.queue.push(action);
        if !self.lifecycle.is_active() {
            return;
        }
        self.pump();
    }

    fn lock_drain(&self) -> MutexGuard<'_, DrainState> {
        self.drain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain if nobody else is, then re-check for entries that arrived
    /// after the drainer's last pop but before it released the region.
    fn pump(&self) {
        loop {
            if self.draining.load(Ordering::SeqCst) {
                return;
            }
            let mut state = match self.drain.try_lock() {
                Ok(state) => state,
                Err(TryLockError::WouldBlock) => return,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            self.drain_queue(&mut state);
            drop(state);

            if self.queue.is_empty() {
                return;
            }
        }
    }

    /// Must be called with the drain region held.
    fn drain_queue(&self, state: &mut DrainState) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let _reset = DrainingReset(&self.draining);
        let consumer = &mut state.consumer;

        if self.persistence.is_some() && self.config.persist_batches {
            consumer.stage_available();
            if consumer.staged().any(|action| !is_store_marker(action)) {
                consumer.inject(Arc::new(StorePersistingAction));
            }
        }

        let mut processed = 0usize;
        while let Some(action) = consumer.pop() {
            self.process(&action);
            processed += 1;
        }
        tracing::trace!(processed, "queue drained");
    }

    fn process(&self, action: &ActionRef) {
        let middlewares = self.middlewares.entries();
        if !MiddlewarePipeline::may_dispatch(&middlewares, action.as_ref()) {
            tracing::trace!(action = action.name(), "vetoed by middleware");
            return;
        }

        MiddlewarePipeline::before_dispatch(&middlewares, action.as_ref());
        for feature in self.features.snapshot() {
            feature.receive_dispatch_notification(action.as_ref());
        }
        self.subscriptions.notify(action.as_ref());
        MiddlewarePipeline::after_dispatch(&middlewares, action.as_ref());

        self.effects
            .trigger(action, &self.dispatcher, self.runtime.as_ref(), &self.reporter);
    }
}

/// Finishes activation when dropped, including when `initialize()` is
/// cancelled part way. Middlewares that never finished initializing are
/// treated as failed.
struct ActivationGuard<'a> {
    inner: &'a StoreInner,
    entries: Vec<Arc<MiddlewareEntry>>,
    settled: usize,
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        if self.settled < self.entries.len() {
            tracing::warn!(
                pending = self.entries.len() - self.settled,
                "initialize cancelled, activating without the remaining middlewares"
            );
        }
        for entry in self.entries.iter().filter(|entry| entry.is_initialized()) {
            entry.middleware.after_all_initialized();
        }

        {
            let mut state = self.inner.lock_drain();
            if self.inner.persistence.is_some() {
                self.inner.dispatcher.dispatch(StoreRehydratingAction);
            }
            self.inner.lifecycle.mark_active();
            self.inner.drain_queue(&mut state);
        }
        self.inner.pump();
    }
}

/// Shared handle to a store. Clones refer to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning handle to a [`Store`].
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    /// The store, if it is still alive.
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl std::fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("lifecycle", &self.lifecycle())
            .field("features", &self.inner.features.len())
            .field("middlewares", &self.inner.middlewares.len())
            .field("effects", &self.inner.effects.len())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Store {
    /// Build a store with default settings on `dispatcher`.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::assemble(dispatcher, StoreConfig::default(), Handle::try_current().ok(), None)
    }

    /// Start configuring a store.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    fn assemble(
        dispatcher: Dispatcher,
        config: StoreConfig,
        runtime: Option<Handle>,
        persistence: Option<Arc<dyn PersistenceProvider>>,
    ) -> Self {
        let (queue, consumer) = action_queue();
        let inner = Arc::new(StoreInner {
            dispatcher: dispatcher.clone(),
            queue,
            drain: Mutex::new(DrainState { consumer }),
            draining: AtomicBool::new(false),
            lifecycle: Lifecycle::new(),
            features: FeatureRegistry::default(),
            middlewares: Arc::new(MiddlewarePipeline::default()),
            effects: EffectRegistry::default(),
            subscriptions: Arc::new(ActionSubscriptions::new()),
            reporter: ErrorReporter::new(config.error_channel_capacity),
            runtime,
            persistence,
            config,
            listener: Mutex::new(None),
        });
        let store = Store { inner };

        if store.inner.persistence.is_some() {
            store
                .inner
                .effects
                .add(Arc::new(PersistenceEffect::new(store.downgrade())));
        }
        if store.inner.runtime.is_none() {
            tracing::debug!("no tokio runtime available, effects must complete synchronously");
        }

        let weak = Arc::downgrade(&store.inner);
        let guard = dispatcher.listen(move |action| {
            if let Some(inner) = weak.upgrade() {
                inner.submit(action);
            }
        });
        *store.inner.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);

        dispatcher.dispatch(StoreInitializedAction);
        store
    }

    /// Non-owning handle, for collaborators the store itself holds.
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The dispatcher this store listens to.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Enqueue an action directly, bypassing the dispatcher's other listeners.
    pub fn submit(&self, action: ActionRef) {
        self.inner.submit(action);
    }

    /// Activate the store.
    ///
    /// Initializes every middleware in registration order, then calls
    /// `after_all_initialized` on those that succeeded, then starts
    /// draining everything queued so far. Calling it again (or
    /// concurrently) waits for the first activation and returns.
    ///
    /// Dropping the future early still activates the store; middlewares
    /// whose initialization was cut short count as failed.
    pub async fn initialize(&self) {
        match self.inner.lifecycle.begin_activation() {
            Activation::Started => {}
            Activation::InProgress => {
                self.inner.lifecycle.wait_active().await;
                return;
            }
            Activation::AlreadyActive => return,
        }

        let mut activation = ActivationGuard {
            inner: &self.inner,
            entries: self.inner.middlewares.entries(),
            settled: 0,
        };
        while let Some(entry) = activation.entries.get(activation.settled).cloned() {
            let result = entry.middleware.initialize(&self.inner.dispatcher, self).await;
            activation.settled += 1;
            match result {
                Ok(()) => entry.mark_initialized(),
                Err(error) => tracing::warn!(
                    middleware = entry.middleware.name(),
                    %error,
                    "middleware failed to initialize"
                ),
            }
        }
        let middlewares = activation.entries.len();
        drop(activation);

        tracing::debug!(
            middlewares,
            features = self.inner.features.len(),
            "store active"
        );
    }

    /// Resolves once the store is active.
    pub async fn initialized(&self) {
        self.inner.lifecycle.wait_active().await;
    }

    /// Current activation state.
    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    /// Number of actions waiting to be processed.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Register a feature.
    ///
    /// Names are unique, ignoring case.
    pub fn add_feature<F: Feature>(&self, feature: Arc<F>) -> Result<(), StoreError> {
        self.add_feature_dyn(feature)
    }

    fn add_feature_dyn(&self, feature: Arc<dyn Feature>) -> Result<(), StoreError> {
        let name = feature.name().to_string();
        self.inner.features.add(feature)?;
        tracing::trace!(feature = %name, "feature registered");
        Ok(())
    }

    /// Look up a feature by name, ignoring case.
    pub fn feature(&self, name: &str) -> Option<Arc<dyn Feature>> {
        self.inner.features.get(name)
    }

    /// Every feature, in registration order.
    pub fn features(&self) -> Vec<Arc<dyn Feature>> {
        self.inner.features.snapshot()
    }

    /// Copy of a feature's state, if the feature exists and holds an `S`.
    pub fn state<S: 'static>(&self, name: &str) -> Option<S> {
        let state = self.inner.features.get(name)?.state_any();
        state.downcast::<S>().ok().map(|state| *state)
    }

    /// Register a middleware.
    ///
    /// On an active store the middleware is initialized in the background;
    /// a failure there is logged and otherwise ignored.
    pub fn add_middleware<M: Middleware>(&self, middleware: M) {
        self.add_middleware_arc(Arc::new(middleware));
    }

    /// Register a middleware the caller keeps a handle to.
    pub fn add_middleware_arc(&self, middleware: Arc<dyn Middleware>) {
        let entry = self.inner.middlewares.add(middleware);
        if !self.inner.lifecycle.is_active() {
            return;
        }

        let Some(runtime) = self.inner.runtime.clone() else {
            tracing::warn!(
                middleware = entry.middleware.name(),
                "no runtime to initialize middleware added after activation"
            );
            return;
        };
        let store = self.clone();
        runtime.spawn(async move {
            match entry.middleware.initialize(&store.inner.dispatcher, &store).await {
                Ok(()) => {
                    entry.mark_initialized();
                    entry.middleware.after_all_initialized();
                }
                Err(error) => tracing::debug!(
                    middleware = entry.middleware.name(),
                    %error,
                    "late middleware failed to initialize"
                ),
            }
        });
    }

    /// Number of registered middlewares.
    pub fn middleware_count(&self) -> usize {
        self.inner.middlewares.len()
    }

    /// Register an effect.
    pub fn add_effect<E: Effect>(&self, effect: E) {
        self.inner.effects.add(Arc::new(effect));
    }

    /// Register an effect the caller keeps a handle to.
    pub fn add_effect_arc(&self, effect: Arc<dyn Effect>) {
        self.inner.effects.add(effect);
    }

    /// Call `callback` for every processed action of type `A`.
    pub fn subscribe<A, F>(&self, subscriber: SubscriberId, callback: F)
    where
        A: Action,
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.inner.subscriptions.subscribe::<A, F>(subscriber, callback);
    }

    /// Remove every subscription of `subscriber`.
    pub fn unsubscribe_all(&self, subscriber: SubscriberId) {
        self.inner.subscriptions.unsubscribe_all(subscriber);
    }

    /// Guard that removes every subscription of `subscriber` when dropped.
    pub fn unsubscriber(&self, subscriber: SubscriberId) -> SubscriptionGuard {
        self.inner.subscriptions.unsubscriber(subscriber)
    }

    /// Receive every effect failure, one message per flattened error.
    ///
    /// While no receiver exists failures are logged with `tracing::error!`.
    pub fn unhandled_errors(&self) -> broadcast::Receiver<UnhandledEffectError> {
        self.inner.reporter.subscribe()
    }

    /// Open an internal change scope.
    ///
    /// Every middleware enters its own change window, and actions
    /// submitted while any scope is open are dropped. Scopes nest; the
    /// per-middleware windows close when the outermost guard drops.
    pub fn begin_internal_middleware_change(&self) -> MiddlewareChangeGuard {
        self.inner.middlewares.begin_change()
    }

    /// The configured persistence provider.
    pub fn persistence(&self) -> Option<Arc<dyn PersistenceProvider>> {
        self.inner.persistence.clone()
    }

    /// Every feature's state keyed by feature name.
    pub fn export_states(&self) -> Result<Map<String, Value>, StoreError> {
        let mut document = Map::new();
        for feature in self.inner.features.snapshot() {
            document.insert(feature.name().to_string(), feature.export_state()?);
        }
        Ok(document)
    }

    /// Restore features from a document produced by [`export_states`](Self::export_states).
    ///
    /// Keys without a matching feature are ignored, features without a key
    /// keep their state, and `null` values are skipped. Stops at the first
    /// value that does not deserialize.
    pub fn import_states(&self, document: &Value) -> Result<(), StoreError> {
        let Value::Object(states) = document else {
            return Err(StoreError::InvalidDocument {
                kind: json_kind(document),
            });
        };

        for (name, value) in states {
            let Some(feature) = self.inner.features.get(name) else {
                tracing::trace!(feature = %name, "no feature for imported state");
                continue;
            };
            feature.import_state(value.clone())?;
        }
        Ok(())
    }

    /// Import a single typed state into the named feature.
    pub fn restore_state<S: Send + 'static>(&self, name: &str, state: S) -> Result<bool, StoreError> {
        match self.inner.features.get(name) {
            Some(feature) => feature.restore_state_any(Box::new(state)).map(|()| true),
            None => Ok(false),
        }
    }

    /// Detach from the dispatcher and shut middlewares down, last
    /// registered first.
    ///
    /// Actions dispatched afterwards are buffered by the dispatcher, not
    /// processed by this store. That buffer is capped at
    /// [`PENDING_LIMIT`](crate::dispatcher::PENDING_LIMIT) and drops its
    /// oldest entries, so producers should stop dispatching once the store
    /// is shut down.
    pub fn shutdown(&self) {
        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(listener);

        for entry in self.inner.middlewares.reversed() {
            entry.middleware.shutdown();
        }
        tracing::debug!("store shut down");
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Configures and builds a [`Store`].
#[derive(Default)]
pub struct StoreBuilder {
    dispatcher: Option<Dispatcher>,
    config: Option<StoreConfig>,
    runtime: Option<Handle>,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    features: Vec<Arc<dyn Feature>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    effects: Vec<Arc<dyn Effect>>,
}

impl StoreBuilder {
    /// The dispatcher the store listens to. Required.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Override the default configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Runtime for effects and late middleware initialization.
    ///
    /// Defaults to the runtime current at `build()`, if any.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Enable rehydration on activation and per-batch persistence.
    pub fn persistence<P: PersistenceProvider>(mut self, provider: Arc<P>) -> Self {
        self.persistence = Some(provider);
        self
    }

    /// Register a feature.
    pub fn feature<F: Feature>(mut self, feature: Arc<F>) -> Self {
        self.features.push(feature);
        self
    }

    /// Register a middleware.
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Register a middleware the caller keeps a handle to.
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Register an effect.
    pub fn effect<E: Effect>(mut self, effect: E) -> Self {
        self.effects.push(Arc::new(effect));
        self
    }

    /// Register an effect the caller keeps a handle to.
    pub fn effect_arc(mut self, effect: Arc<dyn Effect>) -> Self {
        self.effects.push(effect);
        self
    }

    /// Build the store. It starts inactive; call [`Store::initialize`].
    pub fn build(self) -> Result<Store, StoreError> {
        let dispatcher = self.dispatcher.ok_or(StoreError::MissingDispatcher)?;
        let config = self.config.unwrap_or_default();
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());

        let store = Store::assemble(dispatcher, config, runtime, self.persistence);
        for feature in self.features {
            store.add_feature_dyn(feature)?;
        }
        for middleware in self.middlewares {
            store.add_middleware_arc(middleware);
        }
        for effect in self.effects {
            store.inner.effects.add(effect);
        }
        Ok(store)
    }
}
