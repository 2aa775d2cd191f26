//! Features: named owners of a slice of state
//!
//! A feature is notified of every processed action and decides on its own
//! whether to change its state. [`StateFeature`] is the stock implementation:
//! a state value plus typed reducers, one per action type it cares about.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct CounterState { count: i32 }
//!
//! #[derive(Debug, Action)]
//! struct Increment;
//!
//! fn increment(state: &mut CounterState, _: &Increment) -> bool {
//!     state.count += 1;
//!     true
//! }
//!
//! let counter = Arc::new(StateFeature::new("Counter", CounterState::default()).on(increment));
//! store.add_feature(counter.clone())?;
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::action::Action;
use crate::error::StoreError;

/// A reducer for one action type
///
/// Returns `true` if the state changed.
pub type Reducer<S, A> = fn(&mut S, &A) -> bool;

/// Contract between the store and a state owner.
pub trait Feature: Send + Sync + 'static {
    /// Unique (case-insensitive) name within a store.
    fn name(&self) -> &str;

    /// Name of the declared state type.
    fn state_type_name(&self) -> &'static str;

    /// A copy of the current state, type-erased.
    fn state_any(&self) -> Box<dyn Any + Send>;

    /// Called for every processed action, in registration order.
    fn receive_dispatch_notification(&self, action: &dyn Action);

    /// Replace the state wholesale.
    fn restore_state_any(&self, state: Box<dyn Any + Send>) -> Result<(), StoreError>;

    /// Serialize the current state.
    fn export_state(&self) -> Result<serde_json::Value, StoreError>;

    /// Deserialize and restore. `null` is a no-op and returns `Ok(false)`.
    fn import_state(&self, value: serde_json::Value) -> Result<bool, StoreError>;
}

type ErasedReducer<S> = Box<dyn Fn(&mut S, &dyn Action) -> bool + Send + Sync>;

/// State value plus typed reducers
pub struct StateFeature<S> {
    name: String,
    state: RwLock<S>,
    reducers: HashMap<TypeId, Vec<ErasedReducer<S>>>,
    version: AtomicU64,
}

impl<S> std::fmt::Debug for StateFeature<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFeature")
            .field("name", &self.name)
            .field("state_type", &type_name::<S>())
            .field("reducers", &self.reducers.values().map(Vec::len).sum::<usize>())
            .field("version", &self.version())
            .finish()
    }
}

impl<S> StateFeature<S> {
    /// Incremented every time the state changes.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl<S> StateFeature<S>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a feature with an initial state and no reducers.
    pub fn new(name: impl Into<String>, initial: S) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(initial),
            reducers: HashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    /// Register a reducer for actions of type `A`.
    ///
    /// Several reducers may be registered for one action type; they run in
    /// registration order.
    pub fn on<A: Action>(mut self, reducer: Reducer<S, A>) -> Self {
        let erased: ErasedReducer<S> = Box::new(move |state, action| {
            match action.downcast_ref::<A>() {
                Some(action) => reducer(state, action),
                None => false,
            }
        });
        self.reducers
            .entry(TypeId::of::<A>())
            .or_default()
            .push(erased);
        self
    }

    /// A copy of the current state.
    pub fn state(&self) -> S {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the state and bump the version.
    pub fn restore_state(&self, state: S) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        self.version.fetch_add(1, Ordering::SeqCst);
    }

}

impl<S> Feature for StateFeature<S>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type_name(&self) -> &'static str {
        type_name::<S>()
    }

    fn state_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.state())
    }

    fn receive_dispatch_notification(&self, action: &dyn Action) {
        let Some(reducers) = self.reducers.get(&action.action_type()) else {
            return;
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;
        for reducer in reducers {
            changed |= reducer(&mut state, action);
        }
        if changed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn restore_state_any(&self, state: Box<dyn Any + Send>) -> Result<(), StoreError> {
        match state.downcast::<S>() {
            Ok(state) => {
                self.restore_state(*state);
                Ok(())
            }
            Err(_) => Err(StoreError::StateType {
                feature: self.name.clone(),
                expected: type_name::<S>(),
            }),
        }
    }

    fn export_state(&self) -> Result<serde_json::Value, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_value(&*state).map_err(|source| StoreError::State {
            feature: self.name.clone(),
            source,
        })
    }

    fn import_state(&self, value: serde_json::Value) -> Result<bool, StoreError> {
        if value.is_null() {
            return Ok(false);
        }
        let state: S = serde_json::from_value(value).map_err(|source| StoreError::State {
            feature: self.name.clone(),
            source,
        })?;
        self.restore_state(state);
        Ok(true)
    }
}

/// Ordered, name-keyed collection of features.
#[derive(Default)]
pub(crate) struct FeatureRegistry {
    inner: RwLock<FeatureEntries>,
}

#[derive(Default)]
struct FeatureEntries {
    ordered: Vec<Arc<dyn Feature>>,
    by_name: HashMap<String, usize>,
}

fn name_key(name: &str) -> String {
    name.to_lowercase()
}

impl FeatureRegistry {
    pub(crate) fn add(&self, feature: Arc<dyn Feature>) -> Result<(), StoreError> {
        let mut entries = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let key = name_key(feature.name());
        if entries.by_name.contains_key(&key) {
            return Err(StoreError::DuplicateFeature {
                name: feature.name().to_string(),
            });
        }
        let index = entries.ordered.len();
        entries.ordered.push(feature);
        entries.by_name.insert(key, index);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn Feature>> {
        let entries = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .by_name
            .get(&name_key(name))
            .map(|&i| Arc::clone(&entries.ordered[i]))
    }

    /// Registration-ordered copy, safe to iterate while features dispatch.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Feature>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: i32,
    }

    #[derive(Debug)]
    struct Increment;

    impl Action for Increment {
        fn name(&self) -> &'static str {
            "Increment"
        }
    }

    #[derive(Debug)]
    struct Add(i32);

    impl Action for Add {
        fn name(&self) -> &'static str {
            "Add"
        }
    }

    #[derive(Debug)]
    struct Unrelated;

    impl Action for Unrelated {
        fn name(&self) -> &'static str {
            "Unrelated"
        }
    }

    fn increment(state: &mut Counter, _: &Increment) -> bool {
        state.count += 1;
        true
    }

    fn add(state: &mut Counter, action: &Add) -> bool {
        state.count += action.0;
        action.0 != 0
    }

    fn counter() -> StateFeature<Counter> {
        StateFeature::new("Counter", Counter::default())
            .on(increment)
            .on(add)
    }

    #[test]
    fn test_reducers_route_by_type() {
        let feature = counter();
        feature.receive_dispatch_notification(&Increment);
        feature.receive_dispatch_notification(&Add(5));
        feature.receive_dispatch_notification(&Unrelated);

        assert_eq!(feature.state().count, 6);
        assert_eq!(feature.version(), 2);
    }

    #[test]
    fn test_unchanged_does_not_bump_version() {
        let feature = counter();
        feature.receive_dispatch_notification(&Add(0));
        assert_eq!(feature.version(), 0);
    }

    #[test]
    fn test_debug_shows_name_and_version() {
        let feature = counter();
        feature.restore_state(Counter { count: 1 });
        let debug = format!("{feature:?}");
        assert!(debug.contains("\"Counter\""));
        assert!(debug.contains("version: 1"));
    }

    #[test]
    fn test_restore_state_any_checks_type() {
        let feature = counter();
        feature
            .restore_state_any(Box::new(Counter { count: 9 }))
            .unwrap();
        assert_eq!(feature.state().count, 9);

        let err = feature.restore_state_any(Box::new(9_i32)).unwrap_err();
        assert_eq!(err.as_label(), "store_state_type");
    }

    #[test]
    fn test_export_import() {
        let feature = counter();
        feature.restore_state(Counter { count: 42 });
        let value = feature.export_state().unwrap();
        assert_eq!(value, serde_json::json!({ "count": 42 }));

        let fresh = counter();
        assert!(fresh.import_state(value).unwrap());
        assert_eq!(fresh.state().count, 42);
    }

    #[test]
    fn test_import_null_is_noop() {
        let feature = counter();
        feature.restore_state(Counter { count: 3 });
        assert!(!feature.import_state(serde_json::Value::Null).unwrap());
        assert_eq!(feature.state().count, 3);
    }

    #[test]
    fn test_import_wrong_shape_fails() {
        let feature = counter();
        let err = feature
            .import_state(serde_json::json!("not a counter"))
            .unwrap_err();
        assert_eq!(err.as_label(), "store_state_serde");
    }

    #[test]
    fn test_registry_rejects_duplicates_case_insensitively() {
        let registry = FeatureRegistry::default();
        registry.add(Arc::new(counter())).unwrap();

        let dup = StateFeature::new("COUNTER", Counter::default());
        let err = registry.add(Arc::new(dup)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFeature { ref name } if name == "COUNTER"));

        registry
            .add(Arc::new(StateFeature::new("Other", Counter::default())))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("counter").is_some());
        assert!(registry.get("OTHER").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_snapshot_keeps_order() {
        let registry = FeatureRegistry::default();
        for name in ["b", "a", "c"] {
            registry
                .add(Arc::new(StateFeature::new(name, Counter::default())))
                .unwrap();
        }
        let names: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
