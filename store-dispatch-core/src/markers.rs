//! Lifecycle and persistence marker actions
//!
//! The store dispatches these itself. They flow through the normal pipeline,
//! so features, subscribers and effects can react to them like any other
//! action. A drain batch made up only of markers never triggers another
//! persistence flush.

use crate::action::Action;

/// Dispatched once when the store is built; processed on activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreInitializedAction;

/// Dispatched on activation when a persistence provider is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreRehydratingAction;

/// Dispatched after persisted state has been restored into the features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreRehydratedAction;

/// Appended to the tail of each drain batch to request one persistence flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorePersistingAction;

/// Dispatched after feature state has been written by the persistence provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorePersistedAction;

macro_rules! marker_action {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Action for $ty {
                fn name(&self) -> &'static str {
                    stringify!($ty)
                }
            }
        )*
    };
}

marker_action!(
    StoreInitializedAction,
    StoreRehydratingAction,
    StoreRehydratedAction,
    StorePersistingAction,
    StorePersistedAction,
);

/// Returns true for the store's own lifecycle/persistence markers.
pub fn is_store_marker(action: &dyn Action) -> bool {
    action.is::<StoreInitializedAction>()
        || action.is::<StoreRehydratingAction>()
        || action.is::<StoreRehydratedAction>()
        || action.is::<StorePersistingAction>()
        || action.is::<StorePersistedAction>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;

    impl Action for Ping {
        fn name(&self) -> &'static str {
            "Ping"
        }
    }

    #[test]
    fn test_markers_are_recognized() {
        assert!(is_store_marker(&StoreInitializedAction));
        assert!(is_store_marker(&StoreRehydratingAction));
        assert!(is_store_marker(&StoreRehydratedAction));
        assert!(is_store_marker(&StorePersistingAction));
        assert!(is_store_marker(&StorePersistedAction));
        assert!(!is_store_marker(&Ping));
    }

    #[test]
    fn test_marker_names() {
        assert_eq!(StorePersistingAction.name(), "StorePersistingAction");
        assert_eq!(StoreInitializedAction.name(), "StoreInitializedAction");
    }
}
