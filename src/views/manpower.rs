use super::ViewCore;
use crate::bus::{topic, BusSubscription};
use crate::errors::SyncResult;
use crate::gateway::Filter;
use crate::models::{LoadState, ManpowerRecord};
use crate::SyncContext;
use tokio::sync::watch;

/// Manpower allocation hook: a read-only, server-computed aggregate. It is
/// re-derived by refetch, never patched locally, so cross-cutting
/// invalidation (a roster edit elsewhere) arrives via the event bus and
/// simply requests a refetch.
pub struct ManpowerView {
    core: ViewCore<ManpowerRecord>,
    _invalidation: BusSubscription,
}

impl ManpowerView {
    pub async fn mount(ctx: &SyncContext, project_id: &str) -> Self {
        let core = ViewCore::mount(ctx, Some(Filter::eq("project_id", project_id))).await;
        let invalidation = {
            let refetcher = core.refetcher.clone();
            ctx.bus().on(topic::PROJECT_CHANGED, move || refetcher.request())
        };
        Self {
            core,
            _invalidation: invalidation,
        }
    }

    pub fn items(&self) -> Vec<ManpowerRecord> {
        self.core.items()
    }

    pub fn watch_items(&self) -> watch::Receiver<Vec<ManpowerRecord>> {
        self.core.watch_items()
    }

    pub fn state(&self) -> LoadState {
        self.core.state()
    }

    pub async fn refetch(&self) -> SyncResult<()> {
        self.core.refetch().await
    }

    pub fn unmount(self) {
        self.core.unmount();
    }
}
