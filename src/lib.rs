mod bus;
mod errors;
mod feed;
mod gateway;
mod models;
mod mutation;
mod poll;
mod store;
mod views;

pub use bus::{topic, BusSubscription, EventBus};
pub use errors::{SyncError, SyncResult};
pub use feed::{ChangeEvent, ChangeOp, FeedHub, SubscriptionHandle};
pub use gateway::{Filter, GatewayError, GatewayRequest, RemoteGateway};
pub use models::{
    AddMemberPayload, CreateCommentPayload, CreateTaskPayload, Identity, LoadState,
    ManpowerRecord, RosterMember, Table, Task, TaskComment, TaskPatch, TaskStatus,
};
pub use poll::{PollConfig, Refetcher, VisibilitySignal};
pub use store::{is_temp_id, temp_id, Entity, EntityStore};
pub use views::{CommentsView, ManpowerView, RosterView, TasksView};

use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll: PollConfig,
    pub feed_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            feed_buffer: 64,
        }
    }
}

/// One per application root: the gateway, the change-feed hub, the event
/// bus, the visibility signal, and the signed-in identity that every view
/// mounts against. Replaces any process-wide registries so unrelated tests
/// and windows never share hidden state.
#[derive(Clone)]
pub struct SyncContext {
    gateway: Arc<dyn RemoteGateway>,
    feed: Arc<FeedHub>,
    bus: EventBus,
    visibility: VisibilitySignal,
    identity: Identity,
    config: SyncConfig,
}

impl SyncContext {
    pub fn new(gateway: Arc<dyn RemoteGateway>, identity: Identity) -> Self {
        Self::with_config(gateway, identity, SyncConfig::default())
    }

    pub fn with_config(
        gateway: Arc<dyn RemoteGateway>,
        identity: Identity,
        config: SyncConfig,
    ) -> Self {
        let feed = FeedHub::new(config.feed_buffer);
        Self {
            gateway,
            feed,
            bus: EventBus::new(),
            visibility: VisibilitySignal::new(),
            identity,
            config,
        }
    }

    pub fn gateway(&self) -> Arc<dyn RemoteGateway> {
        self.gateway.clone()
    }

    pub fn feed(&self) -> &Arc<FeedHub> {
        &self.feed
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn visibility(&self) -> &VisibilitySignal {
        &self.visibility
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Explicit teardown: release every live feed subscription and bus
    /// handler. Mounted views keep working off their own stores but stop
    /// receiving push notifications.
    pub fn shutdown(&self) {
        self.feed.shutdown();
        self.bus.clear();
        tracing::info!("sync context shut down");
    }
}

pub fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "sync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::init_tracing;

    #[test]
    fn init_tracing_creates_the_log_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Another test may already have installed a subscriber; directory
        // creation must succeed either way.
        let _ = init_tracing(dir.path());
        assert!(dir.path().join("logs").is_dir());
    }
}
