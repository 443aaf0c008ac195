//! Worker pool that drains the job queue through the configured adapter.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{Adapter, AdapterError, AdapterResult};
use crate::config::DispatcherConfig;
use crate::health::DaemonStats;
use crate::queue::{Job, JobQueue, Transition};

/// Fixed pool of `workers` tasks. Each worker claims one job at a time, so at
/// most `workers` `process` calls are ever in flight.
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    adapter: Arc<dyn Adapter>,
    stats: Arc<DaemonStats>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        adapter: Arc<dyn Adapter>,
        stats: Arc<DaemonStats>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            adapter,
            stats,
            config,
        }
    }

    fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.config.process_timeout_secs)
    }

    /// Runs the pool until `shutdown` is cancelled and every worker has
    /// finished its in-flight job.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            workers = self.config.workers,
            adapter = self.adapter.name(),
            timeout_secs = self.config.process_timeout_secs,
            "Dispatcher started"
        );

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            workers.spawn(Arc::clone(&self).worker(worker, shutdown.clone()));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task aborted");
            }
        }

        info!("Dispatcher stopped");
    }

    async fn worker(self: Arc<Self>, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "Worker started");
        while !shutdown.is_cancelled() {
            match self.queue.claim() {
                Some(job) => {
                    self.execute(&job).await;
                }
                None => self.idle(&shutdown).await,
            }
        }
        debug!(worker, "Worker stopped");
    }

    /// Sleeps until new work is signalled, the next retry is due, the poll
    /// interval elapses or shutdown is requested.
    async fn idle(&self, shutdown: &CancellationToken) {
        let poll = Instant::now() + Duration::from_millis(self.config.idle_poll_ms);
        let wake_at = self
            .queue
            .next_ready_at()
            .map_or(poll, |ready| ready.min(poll));

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = self.queue.wait_for_work() => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    }

    /// Runs one claimed job through the adapter and records the outcome.
    ///
    /// The queue lock is not held while the adapter runs. The call runs on its
    /// own task, so a panicking adapter still completes the job.
    pub async fn execute(&self, job: &Job) -> Option<Transition> {
        let _busy = self.stats.worker_busy();
        let timeout = self.process_timeout();

        let adapter = Arc::clone(&self.adapter);
        let target = job.target.clone();
        let mut call = tokio::spawn(async move { adapter.process(&target).await });

        let result = match tokio::time::timeout(timeout, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(job_id = %job.id, target = %job.target, error = %e, "Adapter task failed");
                AdapterResult::failure(AdapterError::Internal(e.to_string()))
            }
            Err(_) => {
                call.abort();
                warn!(
                    job_id = %job.id,
                    target = %job.target,
                    timeout_secs = timeout.as_secs(),
                    "Process call timed out"
                );
                AdapterResult::failure(AdapterError::ExternalServiceUnavailable(format!(
                    "process timed out after {}s",
                    timeout.as_secs()
                )))
            }
        };

        self.stats.record_outcome(&result);
        self.queue.complete(&job.id, &result)
    }
}
