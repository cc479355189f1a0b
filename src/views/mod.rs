mod comments;
mod manpower;
mod roster;
mod tasks;

pub use comments::CommentsView;
pub use manpower::ManpowerView;
pub use roster::RosterView;
pub use tasks::TasksView;

use crate::errors::SyncResult;
use crate::feed::spawn_change_router;
use crate::gateway::{select_rows, Filter, RemoteGateway};
use crate::models::LoadState;
use crate::poll::{spawn_refresh_loop, Refetcher};
use crate::store::{Entity, EntityStore};
use crate::SyncContext;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared per-view wiring: one entity store, its change-feed router, its
/// poll loop, and the load/error state the UI renders. Mounting never fails;
/// an initial-load error lands in `LoadState` and the poll loop retries.
pub(crate) struct ViewCore<T: Entity + DeserializeOwned> {
    pub(crate) store: Arc<EntityStore<T>>,
    pub(crate) refetcher: Refetcher,
    gateway: Arc<dyn RemoteGateway>,
    filter: Option<Filter>,
    state_tx: Arc<watch::Sender<LoadState>>,
    poll_task: JoinHandle<()>,
    router_task: JoinHandle<()>,
}

impl<T: Entity + DeserializeOwned> ViewCore<T> {
    pub(crate) async fn mount(ctx: &SyncContext, filter: Option<Filter>) -> Self {
        let store = Arc::new(EntityStore::new());
        let refetcher = Refetcher::new();
        let gateway = ctx.gateway();

        let subscription = ctx.feed().subscribe(T::table(), filter.clone());
        let router_task = spawn_change_router(subscription, store.clone(), refetcher.clone());

        let poll_task = {
            let gateway = gateway.clone();
            let store = store.clone();
            let filter = filter.clone();
            spawn_refresh_loop(
                ctx.config().poll.clone(),
                ctx.visibility().watch(),
                refetcher.clone(),
                move || {
                    silent_refresh(gateway.clone(), filter.clone(), store.clone())
                },
            )
        };

        let (state_tx, _) = watch::channel(LoadState::default());
        let core = Self {
            store,
            refetcher,
            gateway,
            filter,
            state_tx: Arc::new(state_tx),
            poll_task,
            router_task,
        };
        core.initial_load().await;
        core
    }

    async fn initial_load(&self) {
        self.state_tx.send_replace(LoadState {
            is_loading: true,
            error: None,
        });
        let state = match self.refetch().await {
            Ok(()) => LoadState::default(),
            Err(error) => {
                tracing::warn!(
                    table = T::table().as_str(),
                    error = %error,
                    "initial load failed"
                );
                LoadState {
                    is_loading: false,
                    error: Some(error.to_string()),
                }
            }
        };
        self.state_tx.send_replace(state);
    }

    /// Full silent refetch into the store; shared by the poll loop, the
    /// initial load, and the hook-level `refetch()`.
    pub(crate) async fn refetch(&self) -> SyncResult<()> {
        silent_refresh(self.gateway.clone(), self.filter.clone(), self.store.clone()).await
    }

    pub(crate) fn items(&self) -> Vec<T> {
        self.store.items()
    }

    pub(crate) fn watch_items(&self) -> watch::Receiver<Vec<T>> {
        self.store.watch()
    }

    pub(crate) fn state(&self) -> LoadState {
        self.state_tx.borrow().clone()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<LoadState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn unmount(&self) {
        self.poll_task.abort();
        // Aborting the router drops the subscription handle, which releases
        // the feed registration.
        self.router_task.abort();
    }
}

impl<T: Entity + DeserializeOwned> Drop for ViewCore<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn silent_refresh<T: Entity + DeserializeOwned>(
    gateway: Arc<dyn RemoteGateway>,
    filter: Option<Filter>,
    store: Arc<EntityStore<T>>,
) -> SyncResult<()> {
    let rows = select_rows::<T>(gateway.as_ref(), T::table(), filter).await?;
    store.replace_all(rows);
    Ok(())
}
