use crate::errors::SyncResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Fixed cadence of the silent backstop refetch while the view is visible.
    pub interval: Duration,
    /// Minimum gap between two refetches; anything inside the window is skipped.
    pub debounce: Duration,
    /// Settle delay between an on-demand request and the refetch it triggers,
    /// coalescing bursts (e.g. several mutations confirming close together).
    pub refetch_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            debounce: Duration::from_secs(1),
            refetch_delay: Duration::from_millis(300),
        }
    }
}

/// Coalescing on-demand refetch trigger. Multiple requests collapse into a
/// single pending wake-up.
#[derive(Clone, Default)]
pub struct Refetcher {
    notify: Arc<Notify>,
}

impl Refetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Page-visibility input. The host flips it on visibility transitions; the
/// sync core only reads it.
#[derive(Clone)]
pub struct VisibilitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilitySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_visible(&self, visible: bool) {
        let previous = self.tx.send_replace(visible);
        if previous != visible {
            tracing::debug!(visible, "view visibility changed");
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

enum Wake {
    Tick,
    Demand,
    Visibility,
}

/// Correctness backstop for one mounted view: refetches on a fixed interval
/// while visible, parks while hidden, and fires one unthrottled refetch on
/// the hidden-to-visible transition. On-demand requests arrive through the
/// `Refetcher` and share the same debounce guard. Refreshes run inline so
/// they never overlap; failures are logged and left to the next tick.
pub fn spawn_refresh_loop<F, Fut>(
    config: PollConfig,
    mut visibility: watch::Receiver<bool>,
    refetcher: Refetcher,
    refresh: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<()>> + Send,
{
    tokio::spawn(async move {
        let mut last_completed: Option<Instant> = None;
        loop {
            if !*visibility.borrow_and_update() {
                // Parked: no remote calls while the view is hidden.
                if visibility.changed().await.is_err() {
                    break;
                }
                if *visibility.borrow_and_update() {
                    // Unthrottled catch-up closes the gap accumulated while hidden.
                    run_refresh(&refresh, &config, &mut last_completed, true, true).await;
                }
                continue;
            }

            let wake = tokio::select! {
                _ = tokio::time::sleep(config.interval) => Wake::Tick,
                _ = refetcher.wait() => Wake::Demand,
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    Wake::Visibility
                }
            };

            match wake {
                Wake::Tick => {
                    let visible = *visibility.borrow();
                    run_refresh(&refresh, &config, &mut last_completed, false, visible).await;
                }
                Wake::Demand => {
                    tokio::time::sleep(config.refetch_delay).await;
                    let visible = *visibility.borrow();
                    run_refresh(&refresh, &config, &mut last_completed, false, visible).await;
                }
                // A hidden transition is handled at the top of the loop.
                Wake::Visibility => {}
            }
        }
    })
}

async fn run_refresh<F, Fut>(
    refresh: &F,
    config: &PollConfig,
    last_completed: &mut Option<Instant>,
    force: bool,
    visible: bool,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = SyncResult<()>>,
{
    if !force {
        if !visible {
            return;
        }
        if let Some(at) = last_completed {
            if at.elapsed() < config.debounce {
                tracing::trace!("refresh skipped inside debounce window");
                return;
            }
        }
    }

    if let Err(error) = refresh().await {
        tracing::warn!(error = %error, "background refresh failed");
    }
    *last_completed = Some(Instant::now());
}
