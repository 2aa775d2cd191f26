//! Action trait for type-routed dispatch

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

/// A dispatched action as it travels through the store.
///
/// Actions are immutable once dispatched, so a single allocation is shared
/// between features, subscribers, effects and error reports.
pub type ActionRef = Arc<dyn Action>;

/// Upcast helper so `dyn Action` can be downcast to its concrete type.
///
/// Implemented for every `'static` type; you never implement it yourself.
pub trait AsAny: Any {
    /// View this value as `&dyn Any`
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marker trait for values that can be dispatched to the store
///
/// Actions represent something that happened. They should be:
/// - Debug: For debugging and logging
/// - Send + Sync + 'static: They are shared across threads behind an `Arc`
///
/// The store never inspects an action's fields. Routing is done by the
/// action's concrete type (subscriptions) and by predicates (effects,
/// middleware vetoes).
///
/// Use `#[derive(Action)]` from `store-dispatch-macros` to auto-implement this trait.
pub trait Action: AsAny + Debug + Send + Sync {
    /// Get the action name for logging and filtering
    fn name(&self) -> &'static str;
}

impl dyn Action {
    /// Returns true if the concrete type of this action is `T`.
    pub fn is<T: Action>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast to the concrete action type.
    pub fn downcast_ref<T: Action>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Runtime type tag used for subscription routing.
    pub fn action_type(&self) -> TypeId {
        self.as_any().type_id()
    }
}

/// Wrap a concrete action for dispatch.
pub fn action_ref<A: Action>(action: A) -> ActionRef {
    Arc::new(action)
}
