use super::ViewCore;
use crate::errors::{SyncError, SyncResult};
use crate::gateway::Filter;
use crate::models::{CreateTaskPayload, Identity, LoadState, Task, TaskPatch, TaskStatus};
use crate::mutation::MutationEngine;
use crate::store::temp_id;
use crate::SyncContext;
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

/// Kanban board hook for one project: optimistic create/update/status-change/
/// delete plus the live-feed and poll wiring shared by every view.
pub struct TasksView {
    core: ViewCore<Task>,
    engine: MutationEngine<Task>,
    identity: Identity,
    project_id: String,
}

impl TasksView {
    pub async fn mount(ctx: &SyncContext, project_id: &str) -> Self {
        let core = ViewCore::mount(ctx, Some(Filter::eq("project_id", project_id))).await;
        let engine = MutationEngine::new(core.store.clone(), ctx.gateway(), core.refetcher.clone());
        Self {
            core,
            engine,
            identity: ctx.identity().clone(),
            project_id: project_id.to_string(),
        }
    }

    pub fn items(&self) -> Vec<Task> {
        self.core.items()
    }

    pub fn watch_items(&self) -> watch::Receiver<Vec<Task>> {
        self.core.watch_items()
    }

    pub fn state(&self) -> LoadState {
        self.core.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoadState> {
        self.core.watch_state()
    }

    pub async fn refetch(&self) -> SyncResult<()> {
        self.core.refetch().await
    }

    pub async fn create_task(&self, payload: CreateTaskPayload) -> SyncResult<Task> {
        let (started_at, due_date) = validate_create(&payload)?;
        let status = payload.status.unwrap_or(TaskStatus::ToDo);
        let position = self.next_position();

        let body = json!({
            "project_id": self.project_id,
            "task_name": payload.task_name,
            "description": payload.description,
            "status": status,
            "position": position,
            "started_at": started_at,
            "due_date": due_date,
            "created_by": self.identity.user_id,
        });
        let optimistic = Task {
            id: temp_id(),
            project_id: self.project_id.clone(),
            task_name: payload.task_name,
            description: payload.description,
            status,
            position,
            started_at,
            due_date,
            created_by: self.identity.user_id.clone(),
            created_at: Utc::now(),
        };

        self.engine.create(optimistic, body).await
    }

    pub async fn update_task(&self, task_id: &str, patch: TaskPatch) -> SyncResult<Task> {
        if patch.is_empty() {
            return Err(SyncError::Validation("task patch has no fields".to_string()));
        }
        if let (Some(started_at), Some(due_date)) = (patch.started_at, patch.due_date) {
            if due_date < started_at {
                return Err(SyncError::Validation(
                    "due date precedes start date".to_string(),
                ));
            }
        }

        let body = serde_json::to_value(&patch)?;
        let applied = patch.clone();
        self.engine
            .update(task_id, move |row| applied.apply(row), body)
            .await
    }

    /// Kanban drag handler: the target column arrives as a display name and
    /// must be one of the known columns.
    pub async fn set_task_status(&self, task_id: &str, column: &str) -> SyncResult<Task> {
        let status = TaskStatus::parse(column).ok_or_else(|| {
            SyncError::Validation(format!("unknown board column '{column}'"))
        })?;
        self.update_task(
            task_id,
            TaskPatch {
                status: Some(status),
                ..TaskPatch::default()
            },
        )
        .await
    }

    pub async fn delete_task(&self, task_id: &str) -> SyncResult<()> {
        self.engine.delete(task_id).await
    }

    pub fn unmount(self) {
        self.core.unmount();
    }

    fn next_position(&self) -> f64 {
        self.core
            .items()
            .iter()
            .map(|task| task.position)
            .fold(0.0, f64::max)
            + 1.0
    }
}

fn validate_create(
    payload: &CreateTaskPayload,
) -> SyncResult<(chrono::NaiveDate, chrono::NaiveDate)> {
    if payload.task_name.trim().is_empty() {
        return Err(SyncError::Validation("task name is required".to_string()));
    }
    let started_at = payload
        .started_at
        .ok_or_else(|| SyncError::Validation("start date is required".to_string()))?;
    let due_date = payload
        .due_date
        .ok_or_else(|| SyncError::Validation("due date is required".to_string()))?;
    if due_date < started_at {
        return Err(SyncError::Validation(
            "due date precedes start date".to_string(),
        ));
    }
    Ok((started_at, due_date))
}
