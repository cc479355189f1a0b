use crate::errors::{SyncError, SyncResult};
use crate::gateway::{delete_by_id, insert_returning, update_returning, RemoteGateway};
use crate::poll::Refetcher;
use crate::store::{is_temp_id, Entity, EntityStore};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared optimistic write path: snapshot, apply locally, issue the remote
/// call, then commit the canonical row or restore the snapshot. The gate
/// serializes snapshot/restore pairs per store so an overlapping mutation
/// always snapshots the previous mutation's resolved state.
pub struct MutationEngine<T: Entity> {
    store: Arc<EntityStore<T>>,
    gateway: Arc<dyn RemoteGateway>,
    refetch: Refetcher,
    gate: Mutex<()>,
}

impl<T: Entity + DeserializeOwned> MutationEngine<T> {
    pub fn new(store: Arc<EntityStore<T>>, gateway: Arc<dyn RemoteGateway>, refetch: Refetcher) -> Self {
        Self {
            store,
            gateway,
            refetch,
            gate: Mutex::new(()),
        }
    }

    /// Create with a client-synthesized temp id. On success the temp row is
    /// retired and the canonical server row takes its place; a silent
    /// refetch is requested to absorb server-side side effects the response
    /// did not include.
    pub async fn create(&self, optimistic_row: T, payload: Value) -> SyncResult<T> {
        let temp_id = optimistic_row.id().to_string();
        if !is_temp_id(&temp_id) {
            return Err(SyncError::Internal(format!(
                "optimistic {} row must carry a temp id",
                T::table().as_str()
            )));
        }

        let _gate = self.gate.lock().await;
        let snapshot = self.store.snapshot();
        self.store.upsert_one(optimistic_row);

        match insert_returning::<T>(self.gateway.as_ref(), T::table(), payload).await {
            Ok(row) => {
                self.store.remove_one(&temp_id);
                self.store.upsert_one(row.clone());
                self.refetch.request();
                tracing::debug!(
                    table = T::table().as_str(),
                    id = row.id(),
                    "optimistic create confirmed"
                );
                Ok(row)
            }
            Err(error) => {
                self.store.restore(snapshot);
                tracing::warn!(
                    table = T::table().as_str(),
                    error = %error,
                    "optimistic create rolled back"
                );
                Err(error)
            }
        }
    }

    pub async fn update(
        &self,
        id: &str,
        apply: impl FnOnce(&mut T) + Send,
        payload: Value,
    ) -> SyncResult<T> {
        reject_pending_id::<T>(id)?;

        let _gate = self.gate.lock().await;
        let snapshot = self.store.snapshot();
        if !self.store.patch_one(id, apply) {
            return Err(SyncError::NotFound(format!(
                "{} {} is not in the local store",
                T::table().as_str(),
                id
            )));
        }

        match update_returning::<T>(self.gateway.as_ref(), T::table(), id, payload).await {
            Ok(row) => {
                self.store.upsert_one(row.clone());
                self.refetch.request();
                Ok(row)
            }
            Err(error) => {
                self.store.restore(snapshot);
                tracing::warn!(
                    table = T::table().as_str(),
                    id,
                    error = %error,
                    "optimistic update rolled back"
                );
                Err(error)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        reject_pending_id::<T>(id)?;

        let _gate = self.gate.lock().await;
        let snapshot = self.store.snapshot();
        self.store.remove_one(id);

        match delete_by_id(self.gateway.as_ref(), T::table(), id).await {
            Ok(()) => {
                self.refetch.request();
                Ok(())
            }
            Err(error) => {
                self.store.restore(snapshot);
                tracing::warn!(
                    table = T::table().as_str(),
                    id,
                    error = %error,
                    "optimistic delete rolled back"
                );
                Err(error)
            }
        }
    }
}

fn reject_pending_id<T: Entity>(id: &str) -> SyncResult<()> {
    if is_temp_id(id) {
        return Err(SyncError::Validation(format!(
            "{} {} is still syncing; retry once the create has confirmed",
            T::table().as_str(),
            id
        )));
    }
    Ok(())
}
