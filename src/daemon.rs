//! The daemon context object.
//!
//! [`Daemon`] owns every shared component (queue, adapter, stats, health
//! monitor) and is constructed explicitly by the entry point. [`Daemon::start`]
//! spawns the long-running tasks and returns a [`RunningDaemon`] handle whose
//! [`shutdown`](RunningDaemon::shutdown) stops them in order: producers first,
//! then workers (in-flight jobs finish), then the final queue mirror flush.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::{Adapter, NoteStore, build_adapter};
use crate::api::{self, AppState};
use crate::config::DaemonConfig;
use crate::dispatcher::Dispatcher;
use crate::error::DaemonError;
use crate::health::{DaemonStats, HealthMonitor};
use crate::queue::{JobAction, JobQueue, mirror};
use crate::watcher::FileWatcher;

pub struct Daemon {
    config: DaemonConfig,
    root: PathBuf,
    queue: Arc<JobQueue>,
    adapter: Arc<dyn Adapter>,
    stats: Arc<DaemonStats>,
    health: Arc<HealthMonitor>,
}

impl Daemon {
    /// Builds a daemon with the adapter selected by `config.adapter.kind`.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        let store = NoteStore::new(resolve_root(&config.watch.root)?);
        let adapter = build_adapter(&config.adapter, store)?;
        Self::with_adapter(config, adapter)
    }

    /// Builds a daemon around an already constructed adapter.
    pub fn with_adapter(config: DaemonConfig, adapter: Arc<dyn Adapter>) -> Result<Self, DaemonError> {
        let root = resolve_root(&config.watch.root)?;
        let queue = Arc::new(JobQueue::new(
            config.retry.clone(),
            config.queue.max_terminal_jobs,
        ));
        let stats = Arc::new(DaemonStats::new());
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&queue),
            Arc::clone(&stats),
            config.health.clone(),
        ));
        Ok(Self {
            config,
            root,
            queue,
            adapter,
            stats,
            health,
        })
    }

    /// Recovers the mirrored queue, enqueues notes found by the startup scan,
    /// binds the HTTP listener and spawns every task.
    pub async fn start(self) -> Result<RunningDaemon, DaemonError> {
        if let Some(path) = &self.config.queue.state_file {
            mirror::recover(&self.queue, path).await;
        }
        self.enqueue_startup_scan().await;

        let addr = self.config.http.socket_addr()?;
        let listener = TcpListener::bind(addr).await.map_err(|source| DaemonError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let mirror_shutdown = CancellationToken::new();

        let router = api::router(
            AppState {
                queue: Arc::clone(&self.queue),
                health: Arc::clone(&self.health),
            },
            Duration::from_secs(self.config.http.request_timeout_secs),
        );
        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
            }
        });

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.adapter),
            Arc::clone(&self.stats),
            self.config.dispatcher.clone(),
        ));
        let workers = tokio::spawn(dispatcher.run(shutdown.clone()));

        let watcher = self.config.watch.enabled.then(|| {
            let watcher = FileWatcher::new(
                self.config.watch.clone(),
                NoteStore::new(&self.root),
                Arc::clone(&self.queue),
                Arc::clone(&self.stats),
            );
            tokio::spawn(watcher.run(shutdown.clone()))
        });

        let monitor = tokio::spawn(Arc::clone(&self.health).run(shutdown.clone()));

        let mirror = self.config.queue.state_file.clone().map(|path| {
            tokio::spawn(mirror::run(
                Arc::clone(&self.queue),
                path,
                Duration::from_millis(self.config.queue.mirror_interval_ms.max(1)),
                mirror_shutdown.clone(),
            ))
        });

        info!(
            addr = %local_addr,
            root = %self.root.display(),
            adapter = self.adapter.name(),
            workers = self.config.dispatcher.workers,
            watching = self.config.watch.enabled,
            "Daemon started"
        );

        Ok(RunningDaemon {
            local_addr,
            queue: self.queue,
            health: self.health,
            shutdown,
            mirror_shutdown,
            server,
            workers,
            watcher,
            monitor,
            mirror,
        })
    }

    /// Notes below the root that still need enrichment.
    pub async fn scan(&self) -> Vec<String> {
        self.adapter.scan().await
    }

    async fn enqueue_startup_scan(&self) {
        let targets = self.scan().await;
        let mut created = 0;
        for target in &targets {
            match self.queue.enqueue(target, JobAction::ExtractQuotes) {
                Ok(enqueued) if enqueued.created => created += 1,
                Ok(_) => {}
                Err(e) => warn!(%target, error = %e, "Skipping scanned note"),
            }
        }
        if !targets.is_empty() {
            info!(found = targets.len(), created, "Startup scan enqueued pending notes");
        }
    }
}

/// Handle to a started daemon.
pub struct RunningDaemon {
    local_addr: SocketAddr,
    queue: Arc<JobQueue>,
    health: Arc<HealthMonitor>,
    shutdown: CancellationToken,
    mirror_shutdown: CancellationToken,
    server: JoinHandle<std::io::Result<()>>,
    workers: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
    monitor: JoinHandle<()>,
    mirror: Option<JoinHandle<()>>,
}

impl RunningDaemon {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Stops accepting work, waits for in-flight jobs, then flushes the mirror.
    pub async fn shutdown(self) -> Result<(), DaemonError> {
        info!("Shutting down");
        self.shutdown.cancel();

        match self.server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server stopped with an error"),
            Err(e) => error!(error = %e, "HTTP server task aborted"),
        }
        if let Some(watcher) = self.watcher
            && let Err(e) = watcher.await
        {
            error!(error = %e, "File watcher task aborted");
        }
        if let Err(e) = self.workers.await {
            error!(error = %e, "Dispatcher task aborted");
        }
        if let Err(e) = self.monitor.await {
            error!(error = %e, "Health monitor task aborted");
        }

        self.mirror_shutdown.cancel();
        if let Some(mirror) = self.mirror
            && let Err(e) = mirror.await
        {
            error!(error = %e, "Queue mirror task aborted");
        }

        info!("Daemon stopped");
        Ok(())
    }
}

/// Canonical form of the watch root. A root that does not exist yet is made
/// absolute instead, so the watcher can pick it up once it appears.
fn resolve_root(root: &Path) -> Result<PathBuf, DaemonError> {
    match root.canonicalize() {
        Ok(root) => Ok(root),
        Err(_) => Ok(std::path::absolute(root)?),
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
