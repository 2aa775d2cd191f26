//! Error types used by the store and its collaborators.
//!
//! - [`StoreError`]: construction, registration and state import/export failures.
//! - [`MiddlewareError`]: a middleware failed to initialize.
//! - [`EffectError`]: an effect failed, synchronously or asynchronously.
//!
//! Each type exposes `as_label()` returning a short stable label for logs.

use std::sync::Arc;

use thiserror::Error;

use crate::action::ActionRef;

/// Errors raised by the store itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// `StoreBuilder::build` was called without a dispatcher.
    #[error("a dispatcher is required to build a store")]
    MissingDispatcher,

    /// Two features were registered under the same (case-insensitive) name.
    #[error("a feature named {name:?} is already registered")]
    DuplicateFeature {
        /// The conflicting feature name.
        name: String,
    },

    /// A state document passed to `import_states` was not a JSON object.
    #[error("state document must be a JSON object, got {kind}")]
    InvalidDocument {
        /// JSON kind that was received instead.
        kind: &'static str,
    },

    /// A feature's state could not be serialized or deserialized.
    #[error("state of feature {feature:?} could not be (de)serialized: {source}")]
    State {
        /// Feature name.
        feature: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// `restore_state_any` was handed a value of the wrong type.
    #[error("feature {feature:?} expects state of type {expected}")]
    StateType {
        /// Feature name.
        feature: String,
        /// Declared state type name.
        expected: &'static str,
    },

    /// The persistence provider failed.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::MissingDispatcher => "store_missing_dispatcher",
            StoreError::DuplicateFeature { .. } => "store_duplicate_feature",
            StoreError::InvalidDocument { .. } => "store_invalid_document",
            StoreError::State { .. } => "store_state_serde",
            StoreError::StateType { .. } => "store_state_type",
            StoreError::Persistence(_) => "store_persistence",
        }
    }
}

/// A middleware failed during `initialize`.
///
/// The failure is logged and the middleware's `after_all_initialized` hook
/// is skipped; activation of the store carries on.
#[derive(Error, Debug, Clone)]
#[error("middleware initialization failed: {reason}")]
pub struct MiddlewareError {
    /// Human readable reason.
    pub reason: String,
}

impl MiddlewareError {
    /// Create a new initialization error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors produced by effect handlers.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum EffectError {
    /// The effect reported a failure.
    #[error("effect failed: {message}")]
    Failed {
        /// The failure message.
        message: String,
    },

    /// The effect failed with an arbitrary error value.
    #[error("effect failed: {0}")]
    Source(Arc<dyn std::error::Error + Send + Sync>),

    /// Several failures bundled together; flattened before reporting.
    #[error("{} effect errors", .0.len())]
    Aggregate(Vec<EffectError>),

    /// The effect's future panicked.
    #[error("effect panicked: {0}")]
    Panicked(String),

    /// The effect returned a future but the store has no tokio runtime to run it on.
    #[error("no tokio runtime available to run the effect")]
    NoRuntime,
}

impl EffectError {
    /// Create a failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        EffectError::Failed {
            message: message.into(),
        }
    }

    /// Wrap any error value.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EffectError::Source(Arc::new(error))
    }

    /// Split aggregates (recursively) into their constituent errors.
    pub fn flatten(self) -> Vec<EffectError> {
        match self {
            EffectError::Aggregate(errors) => {
                errors.into_iter().flat_map(EffectError::flatten).collect()
            }
            other => vec![other],
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EffectError::Failed { .. } => "effect_failed",
            EffectError::Source(_) => "effect_source",
            EffectError::Aggregate(_) => "effect_aggregate",
            EffectError::Panicked(_) => "effect_panicked",
            EffectError::NoRuntime => "effect_no_runtime",
        }
    }
}

/// An effect failure nobody handled, paired with the action that triggered it.
#[derive(Debug, Clone)]
pub struct UnhandledEffectError {
    /// Action whose effects failed.
    pub action: ActionRef,
    /// One (already flattened) failure.
    pub error: EffectError,
}

impl std::fmt::Display for UnhandledEffectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (action {})", self.error, self.action.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested_aggregates() {
        let err = EffectError::Aggregate(vec![
            EffectError::failed("a"),
            EffectError::Aggregate(vec![EffectError::failed("b"), EffectError::NoRuntime]),
            EffectError::Aggregate(vec![]),
        ]);

        let flat = err.flatten();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].to_string(), "effect failed: a");
        assert_eq!(flat[1].to_string(), "effect failed: b");
        assert_eq!(flat[2].as_label(), "effect_no_runtime");
    }

    #[test]
    fn test_flatten_single() {
        let flat = EffectError::failed("only").flatten();
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn test_store_error_labels() {
        let err = StoreError::DuplicateFeature {
            name: "Counter".into(),
        };
        assert_eq!(err.as_label(), "store_duplicate_feature");
        assert_eq!(
            err.to_string(),
            "a feature named \"Counter\" is already registered"
        );
    }

    #[test]
    fn test_from_error_keeps_message() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = EffectError::from_error(io);
        assert_eq!(err.to_string(), "effect failed: disk gone");
    }
}
