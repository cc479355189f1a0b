use super::ViewCore;
use crate::bus::{topic, EventBus};
use crate::errors::{SyncError, SyncResult};
use crate::gateway::Filter;
use crate::models::{AddMemberPayload, LoadState, RosterMember};
use crate::mutation::MutationEngine;
use crate::store::temp_id;
use crate::SyncContext;
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

/// Project roster hook. Successful membership mutations emit
/// `project.changed` so aggregate views (manpower) re-derive themselves.
pub struct RosterView {
    core: ViewCore<RosterMember>,
    engine: MutationEngine<RosterMember>,
    bus: EventBus,
    project_id: String,
}

impl RosterView {
    pub async fn mount(ctx: &SyncContext, project_id: &str) -> Self {
        let core = ViewCore::mount(ctx, Some(Filter::eq("project_id", project_id))).await;
        let engine = MutationEngine::new(core.store.clone(), ctx.gateway(), core.refetcher.clone());
        Self {
            core,
            engine,
            bus: ctx.bus().clone(),
            project_id: project_id.to_string(),
        }
    }

    pub fn items(&self) -> Vec<RosterMember> {
        self.core.items()
    }

    pub fn watch_items(&self) -> watch::Receiver<Vec<RosterMember>> {
        self.core.watch_items()
    }

    pub fn state(&self) -> LoadState {
        self.core.state()
    }

    pub async fn refetch(&self) -> SyncResult<()> {
        self.core.refetch().await
    }

    pub async fn add_member(&self, payload: AddMemberPayload) -> SyncResult<RosterMember> {
        validate_member(&payload)?;

        let body = json!({
            "project_id": self.project_id,
            "user_id": payload.user_id,
            "member_name": payload.member_name,
            "role": payload.role,
        });
        let optimistic = RosterMember {
            id: temp_id(),
            project_id: self.project_id.clone(),
            user_id: payload.user_id,
            member_name: payload.member_name,
            role: payload.role,
            joined_at: Utc::now(),
        };

        let member = self.engine.create(optimistic, body).await?;
        self.bus.emit(topic::PROJECT_CHANGED);
        Ok(member)
    }

    pub async fn remove_member(&self, member_id: &str) -> SyncResult<()> {
        self.engine.delete(member_id).await?;
        self.bus.emit(topic::PROJECT_CHANGED);
        Ok(())
    }

    pub fn unmount(self) {
        self.core.unmount();
    }
}

fn validate_member(payload: &AddMemberPayload) -> SyncResult<()> {
    if payload.user_id.trim().is_empty() {
        return Err(SyncError::Validation("member user id is required".to_string()));
    }
    if payload.member_name.trim().is_empty() {
        return Err(SyncError::Validation("member name is required".to_string()));
    }
    if payload.role.trim().is_empty() {
        return Err(SyncError::Validation("member role is required".to_string()));
    }
    Ok(())
}
