//! Filesystem watcher feeding the job queue.
//!
//! Three tasks connected by channels:
//!
//! 1. the subscription loop owns the `notify` watcher and forwards raw
//!    create/modify paths; the OS callback only ever sends on a channel,
//! 2. the [`debounce`] loop holds each path back until it has been quiet,
//! 3. the feeder reads the settled note and enqueues it when it still needs
//!    enrichment.
//!
//! A failed or lost subscription is retried with capped exponential backoff;
//! after `escalate_after` consecutive failures the daemon reports degraded
//! health until a subscription succeeds again.

pub mod debounce;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{NoteDocument, NoteStore};
use crate::config::WatchConfig;
use crate::error::DaemonError;
use crate::health::DaemonStats;
use crate::queue::{Enqueued, JobAction, JobQueue};

const READY_CHANNEL_CAPACITY: usize = 256;

pub struct FileWatcher {
    config: WatchConfig,
    store: NoteStore,
    queue: Arc<JobQueue>,
    stats: Arc<DaemonStats>,
}

impl FileWatcher {
    /// `store` must be rooted at the canonical watch root, since event paths
    /// are reported in canonical form.
    pub fn new(
        config: WatchConfig,
        store: NoteStore,
        queue: Arc<JobQueue>,
        stats: Arc<DaemonStats>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            stats,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::channel(READY_CHANNEL_CAPACITY);

        info!(
            root = %self.store.root().display(),
            debounce_ms = self.config.debounce_ms,
            "File watcher started"
        );
        tokio::join!(
            self.subscription_loop(raw_tx, shutdown.clone()),
            debounce::run(raw_rx, ready_tx, self.config.debounce(), shutdown.clone()),
            self.feed(ready_rx),
        );
        info!("File watcher stopped");
    }

    async fn subscription_loop(
        &self,
        raw_tx: mpsc::UnboundedSender<PathBuf>,
        shutdown: CancellationToken,
    ) {
        let root = self.store.root();
        let mut failures: u32 = 0;

        while !shutdown.is_cancelled() {
            let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
            match subscribe(root, raw_tx.clone(), lost_tx) {
                Ok(watcher) => {
                    if failures > 0 {
                        info!(root = %root.display(), failures, "Watch subscription restored");
                    }
                    failures = 0;
                    self.stats.set_watcher_degraded(false);

                    let lost = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        lost = lost_rx.recv() => lost,
                    };
                    drop(watcher);
                    let Some(reason) = lost else {
                        break;
                    };
                    failures = 1;
                    warn!(root = %root.display(), %reason, "Watch subscription lost");
                    self.stats.record_error(format!("watcher: {reason}"));
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(root = %root.display(), error = %e, failures, "Watch subscription failed");
                    self.stats.record_error(e.to_string());
                }
            }

            if failures >= self.config.escalate_after && !self.stats.watcher_degraded() {
                error!(
                    root = %root.display(),
                    failures,
                    "Watch subscription keeps failing, reporting degraded health"
                );
                self.stats.set_watcher_degraded(true);
            }

            let delay = resubscribe_delay(&self.config, failures);
            debug!(delay_ms = delay.as_millis() as u64, "Retrying watch subscription");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn feed(&self, mut ready_rx: mpsc::Receiver<PathBuf>) {
        while let Some(path) = ready_rx.recv().await {
            self.offer(&path).await;
        }
    }

    /// Enqueues the note at `path` if it is a note below the root that still
    /// needs enrichment.
    pub async fn offer(&self, path: &Path) -> Option<Enqueued> {
        let target = self.store.target_for(path)?;
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Changed note no longer readable");
                return None;
            }
        };
        if !NoteDocument::parse(&text).needs_enrichment() {
            debug!(%target, "Note does not need enrichment");
            return None;
        }

        match self.queue.enqueue(&target, JobAction::ExtractQuotes) {
            Ok(enqueued) => Some(enqueued),
            Err(e) => {
                warn!(%target, error = %e, "Watcher could not enqueue note");
                None
            }
        }
    }
}

fn resubscribe_delay(config: &WatchConfig, failures: u32) -> Duration {
    let factor = 2u64.saturating_pow(failures.saturating_sub(1));
    Duration::from_millis(
        config
            .resubscribe_base_ms
            .saturating_mul(factor)
            .min(config.resubscribe_max_ms),
    )
}

/// Starts a recursive watch on `root`. Create/modify paths go to `raw_tx`;
/// watcher errors and removal of the root go to `lost_tx`.
fn subscribe(
    root: &Path,
    raw_tx: mpsc::UnboundedSender<PathBuf>,
    lost_tx: mpsc::UnboundedSender<String>,
) -> Result<RecommendedWatcher, DaemonError> {
    if !root.is_dir() {
        return Err(DaemonError::WatcherSubscription(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let watched = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => match event.kind {
                EventKind::Remove(_) if event.paths.iter().any(|p| p == &watched) => {
                    let _ = lost_tx.send(format!("{} was removed", watched.display()));
                }
                EventKind::Create(_) | EventKind::Modify(_) => {
                    for path in event.paths {
                        let _ = raw_tx.send(path);
                    }
                }
                _ => {}
            },
            Err(e) => {
                let _ = lost_tx.send(e.to_string());
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| DaemonError::WatcherSubscription(e.to_string()))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| DaemonError::WatcherSubscription(format!("{}: {e}", root.display())))?;
    Ok(watcher)
}
