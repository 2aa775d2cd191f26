//! Persistence collaborator
//!
//! The store does not know how state is stored. When a
//! [`PersistenceProvider`] is configured it:
//!
//! - dispatches `StoreRehydratingAction` on activation; the built-in
//!   persistence effect loads the document, imports it into the features
//!   and dispatches `StoreRehydratedAction`
//! - appends one `StorePersistingAction` to every drain batch; the effect
//!   snapshots all feature states, saves them and dispatches
//!   `StorePersistedAction`

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::action::{Action, ActionRef};
use crate::dispatcher::Dispatcher;
use crate::effect::{Effect, EffectFuture};
use crate::error::{EffectError, StoreError};
use crate::markers::{
    StorePersistedAction, StorePersistingAction, StoreRehydratedAction, StoreRehydratingAction,
};
use crate::store::WeakStore;

/// Durable storage for the exported state document.
#[async_trait]
pub trait PersistenceProvider: Send + Sync + 'static {
    /// Load the last saved document, if any.
    async fn load(&self) -> Result<Option<Value>, StoreError>;

    /// Save a document produced by `Store::export_states`.
    async fn save(&self, document: Value) -> Result<(), StoreError>;
}

/// Keeps the document in memory. Handy for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    document: Mutex<Option<Value>>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    /// Start empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a previously saved document.
    pub fn with_document(document: Value) -> Self {
        Self {
            document: Mutex::new(Some(document)),
            saves: Mutex::new(0),
        }
    }

    /// The last saved document.
    pub fn document(&self) -> Option<Value> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistenceProvider for MemoryPersistence {
    async fn load(&self) -> Result<Option<Value>, StoreError> {
        Ok(self.document())
    }

    async fn save(&self, document: Value) -> Result<(), StoreError> {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document);
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Reacts to the rehydrating/persisting markers.
pub(crate) struct PersistenceEffect {
    store: WeakStore,
}

impl PersistenceEffect {
    pub(crate) fn new(store: WeakStore) -> Self {
        Self { store }
    }
}

fn persistence_failed(error: StoreError) -> EffectError {
    EffectError::from_error(error)
}

impl Effect for PersistenceEffect {
    fn should_react_to(&self, action: &dyn Action) -> bool {
        action.is::<StoreRehydratingAction>() || action.is::<StorePersistingAction>()
    }

    fn handle(&self, action: ActionRef, dispatcher: Dispatcher) -> Result<EffectFuture, EffectError> {
        let Some(store) = self.store.upgrade() else {
            return Ok(futures::future::ok(()).boxed());
        };
        let Some(provider) = store.persistence() else {
            return Ok(futures::future::ok(()).boxed());
        };

        if action.is::<StorePersistingAction>() {
            // Snapshot now so the document matches the batch that requested it.
            let document = Value::Object(store.export_states().map_err(persistence_failed)?);
            return Ok(async move {
                provider.save(document).await.map_err(persistence_failed)?;
                tracing::trace!("feature state persisted");
                dispatcher.dispatch(StorePersistedAction);
                Ok::<(), EffectError>(())
            }
            .boxed());
        }

        Ok(async move {
            if let Some(document) = provider.load().await.map_err(persistence_failed)? {
                store.import_states(&document).map_err(persistence_failed)?;
                tracing::debug!("feature state rehydrated");
            }
            dispatcher.dispatch(StoreRehydratedAction);
            Ok::<(), EffectError>(())
        }
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_persistence_round_trip() {
        let provider = MemoryPersistence::new();
        assert!(provider.load().await.unwrap().is_none());

        provider
            .save(serde_json::json!({ "Counter": { "count": 1 } }))
            .await
            .unwrap();
        assert_eq!(provider.save_count(), 1);
        assert_eq!(
            provider.load().await.unwrap(),
            Some(serde_json::json!({ "Counter": { "count": 1 } }))
        );
    }
}
