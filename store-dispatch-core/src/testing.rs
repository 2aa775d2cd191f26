//! Test utilities for store-dispatch applications
//!
//! - [`ActionRecorder`]: effect that keeps every processed action
//! - [`TestHarness`]: an active store with a recorder already attached
//! - Assertion macros for verifying processed actions
//!
//! # Example
//!
//! ```ignore
//! use store_dispatch::testing::TestHarness;
//! use store_dispatch::{assert_dispatched, assert_not_dispatched};
//!
//! let harness = TestHarness::new().await;
//! harness.dispatch(SetValue(42));
//!
//! let actions = harness.drain_dispatched();
//! assert_dispatched!(actions, SetValue, SetValue(42));
//! assert_not_dispatched!(actions, Quit);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;

use crate::action::{Action, ActionRef};
use crate::dispatcher::Dispatcher;
use crate::effect::{Effect, EffectFuture};
use crate::error::{EffectError, StoreError};
use crate::store::{Store, StoreBuilder};

/// Records every action the store processes, in processing order.
///
/// Registered as an effect, so vetoed actions are never recorded.
#[derive(Debug, Default)]
pub struct ActionRecorder {
    recorded: Mutex<Vec<ActionRef>>,
}

impl ActionRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn recorded(&self) -> Vec<ActionRef> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<ActionRef> {
        std::mem::take(&mut *self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Names of the recorded actions.
    pub fn names(&self) -> Vec<&'static str> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|action| action.name())
            .collect()
    }

    /// Number of recorded actions.
    pub fn len(&self) -> usize {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Effect for ActionRecorder {
    fn should_react_to(&self, _action: &dyn Action) -> bool {
        true
    }

    fn handle(&self, action: ActionRef, _dispatcher: Dispatcher) -> Result<EffectFuture, EffectError> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
        Ok(futures::future::ok(()).boxed())
    }
}

/// An active store wired to an [`ActionRecorder`].
///
/// # Example
///
/// ```ignore
/// let counter = Arc::new(StateFeature::new("Counter", 0i64).on(increment));
/// let harness = TestHarness::start(Store::builder().feature(counter.clone())).await?;
///
/// harness.dispatch(Increment);
/// assert_eq!(counter.state(), 1);
/// assert_eq!(count_dispatched!(harness.drain_dispatched(), Increment), 1);
/// ```
pub struct TestHarness {
    store: Store,
    dispatcher: Dispatcher,
    recorder: Arc<ActionRecorder>,
}

impl TestHarness {
    /// A bare, already active store.
    pub async fn new() -> Self {
        let dispatcher = Dispatcher::new();
        let recorder = Arc::new(ActionRecorder::new());
        let store = Store::new(dispatcher.clone());
        store.add_effect_arc(recorder.clone());
        store.initialize().await;
        Self {
            store,
            dispatcher,
            recorder,
        }
    }

    /// Build `builder` with a fresh dispatcher and activate it.
    ///
    /// Any dispatcher already set on the builder is replaced.
    pub async fn start(builder: StoreBuilder) -> Result<Self, StoreError> {
        let dispatcher = Dispatcher::new();
        let recorder = Arc::new(ActionRecorder::new());
        let store = builder
            .dispatcher(dispatcher.clone())
            .effect_arc(recorder.clone())
            .build()?;
        store.initialize().await;
        Ok(Self {
            store,
            dispatcher,
            recorder,
        })
    }

    /// The store under test.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The dispatcher the store listens to.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The recorder attached to the store.
    pub fn recorder(&self) -> &ActionRecorder {
        &self.recorder
    }

    /// Dispatch an action; it is processed before this returns.
    pub fn dispatch<A: Action>(&self, action: A) {
        self.dispatcher.dispatch(action);
    }

    /// Take every action processed so far.
    pub fn drain_dispatched(&self) -> Vec<ActionRef> {
        self.recorder.drain()
    }

    /// Whether any action was processed since the last drain.
    pub fn has_dispatched(&self) -> bool {
        !self.recorder.is_empty()
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("store", &self.store)
            .field("recorded", &self.recorder.len())
            .finish()
    }
}

/// Assert that an action of a type (optionally matching a pattern) was processed.
///
/// # Example
///
/// ```ignore
/// let actions = harness.drain_dispatched();
/// assert_dispatched!(actions, Increment);
/// assert_dispatched!(actions, SetValue, SetValue(v) if *v > 40);
/// ```
#[macro_export]
macro_rules! assert_dispatched {
    ($actions:expr, $ty:ty) => {
        $crate::assert_dispatched!($actions, $ty, _)
    };
    ($actions:expr, $ty:ty, $pattern:pat $(if $guard:expr)?) => {{
        let actions = &$actions;
        assert!(
            actions.iter().any(|a| a
                .downcast_ref::<$ty>()
                .is_some_and(|a| matches!(a, $pattern $(if $guard)?))),
            "Expected `{}` matching `{}` to be dispatched, but got: {:?}",
            stringify!($ty),
            stringify!($pattern),
            actions
        );
    }};
}

/// Assert that no action of a type (optionally matching a pattern) was processed.
///
/// # Example
///
/// ```ignore
/// let actions = harness.drain_dispatched();
/// assert_not_dispatched!(actions, Quit);
/// ```
#[macro_export]
macro_rules! assert_not_dispatched {
    ($actions:expr, $ty:ty) => {
        $crate::assert_not_dispatched!($actions, $ty, _)
    };
    ($actions:expr, $ty:ty, $pattern:pat $(if $guard:expr)?) => {{
        let actions = &$actions;
        assert!(
            !actions.iter().any(|a| a
                .downcast_ref::<$ty>()
                .is_some_and(|a| matches!(a, $pattern $(if $guard)?))),
            "Expected no `{}` matching `{}` to be dispatched, but got: {:?}",
            stringify!($ty),
            stringify!($pattern),
            actions
        );
    }};
}

/// Count processed actions of a type (optionally matching a pattern).
///
/// # Example
///
/// ```ignore
/// assert_eq!(count_dispatched!(harness.drain_dispatched(), Tick), 3);
/// ```
#[macro_export]
macro_rules! count_dispatched {
    ($actions:expr, $ty:ty) => {
        $crate::count_dispatched!($actions, $ty, _)
    };
    ($actions:expr, $ty:ty, $pattern:pat $(if $guard:expr)?) => {
        $actions
            .iter()
            .filter(|a| a
                .downcast_ref::<$ty>()
                .is_some_and(|a| matches!(a, $pattern $(if $guard)?)))
            .count()
    };
}
