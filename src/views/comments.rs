use super::ViewCore;
use crate::errors::{SyncError, SyncResult};
use crate::gateway::Filter;
use crate::models::{CreateCommentPayload, Identity, LoadState, TaskComment};
use crate::mutation::MutationEngine;
use crate::store::temp_id;
use crate::SyncContext;
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

/// Comment thread hook for one task. Author fields come from the signed-in
/// identity; the core treats them as opaque payload.
pub struct CommentsView {
    core: ViewCore<TaskComment>,
    engine: MutationEngine<TaskComment>,
    identity: Identity,
    task_id: String,
}

impl CommentsView {
    pub async fn mount(ctx: &SyncContext, task_id: &str) -> Self {
        let core = ViewCore::mount(ctx, Some(Filter::eq("task_id", task_id))).await;
        let engine = MutationEngine::new(core.store.clone(), ctx.gateway(), core.refetcher.clone());
        Self {
            core,
            engine,
            identity: ctx.identity().clone(),
            task_id: task_id.to_string(),
        }
    }

    pub fn items(&self) -> Vec<TaskComment> {
        self.core.items()
    }

    pub fn watch_items(&self) -> watch::Receiver<Vec<TaskComment>> {
        self.core.watch_items()
    }

    pub fn state(&self) -> LoadState {
        self.core.state()
    }

    pub async fn refetch(&self) -> SyncResult<()> {
        self.core.refetch().await
    }

    pub async fn create_comment(&self, payload: CreateCommentPayload) -> SyncResult<TaskComment> {
        if payload.body.trim().is_empty() {
            return Err(SyncError::Validation("comment body is required".to_string()));
        }

        let body = json!({
            "task_id": self.task_id,
            "body": payload.body,
            "author_id": self.identity.user_id,
            "author_name": self.identity.display_name,
            "author_avatar": self.identity.avatar_url,
        });
        let optimistic = TaskComment {
            id: temp_id(),
            task_id: self.task_id.clone(),
            body: payload.body,
            author_id: self.identity.user_id.clone(),
            author_name: self.identity.display_name.clone(),
            author_avatar: self.identity.avatar_url.clone(),
            created_at: Utc::now(),
        };

        self.engine.create(optimistic, body).await
    }

    pub async fn delete_comment(&self, comment_id: &str) -> SyncResult<()> {
        self.engine.delete(comment_id).await
    }

    pub fn unmount(self) {
        self.core.unmount();
    }
}
