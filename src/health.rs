//! Daemon self-check.
//!
//! [`DaemonStats`] is written by the dispatcher and the watcher; the
//! [`HealthMonitor`] samples it together with the queue on a fixed interval and
//! keeps the resulting status for the `/health` endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::AdapterResult;
use crate::config::HealthConfig;
use crate::queue::JobQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub last_successful_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub watcher_degraded: bool,
    /// Why the daemon is degraded; empty when healthy.
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Counters shared between workers, the watcher and the monitor.
pub struct DaemonStats {
    started: Instant,
    started_at: DateTime<Utc>,
    active_workers: AtomicUsize,
    watcher_degraded: AtomicBool,
    last_completion: Mutex<Option<Instant>>,
    last_success: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl Default for DaemonStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            active_workers: AtomicUsize::new(0),
            watcher_degraded: AtomicBool::new(false),
            last_completion: Mutex::new(None),
            last_success: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// Marks one worker busy until the returned guard is dropped.
    pub fn worker_busy(&self) -> BusyGuard<'_> {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
        BusyGuard { stats: self }
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    /// Records the outcome of one `process` call.
    pub fn record_outcome(&self, result: &AdapterResult) {
        *self.last_completion.lock() = Some(Instant::now());
        match &result.error {
            None => *self.last_success.lock() = Some(Utc::now()),
            Some(err) => *self.last_error.lock() = Some(err.to_string()),
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = Some(message.into());
    }

    pub fn set_watcher_degraded(&self, degraded: bool) {
        self.watcher_degraded.store(degraded, Ordering::Release);
    }

    pub fn watcher_degraded(&self) -> bool {
        self.watcher_degraded.load(Ordering::Acquire)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Last completion, or daemon start when nothing completed yet.
    fn last_activity(&self) -> Instant {
        self.last_completion.lock().unwrap_or(self.started)
    }
}

pub struct BusyGuard<'a> {
    stats: &'a DaemonStats,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.stats.active_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default)]
struct Evaluation {
    over_since: Option<Instant>,
    below_since: Option<Instant>,
    depth_degraded: bool,
    stale: bool,
}

/// Periodic evaluator of queue depth and worker liveness.
///
/// Depth over the threshold for longer than the grace period degrades the
/// daemon; it recovers once depth has stayed at or below the threshold for
/// one monitoring interval. Pending work with no completion within
/// `stale_after` also degrades it, as does a watcher that keeps failing to
/// subscribe.
pub struct HealthMonitor {
    queue: Arc<JobQueue>,
    stats: Arc<DaemonStats>,
    config: HealthConfig,
    eval: Mutex<Evaluation>,
}

impl HealthMonitor {
    pub fn new(queue: Arc<JobQueue>, stats: Arc<DaemonStats>, config: HealthConfig) -> Self {
        Self {
            queue,
            stats,
            config,
            eval: Mutex::new(Evaluation::default()),
        }
    }

    pub fn stats(&self) -> &Arc<DaemonStats> {
        &self.stats
    }

    /// Samples the queue at `now` and updates the stored status.
    pub fn evaluate(&self, now: Instant) -> HealthStatus {
        let depth = self.queue.counts().depth();
        let mut eval = self.eval.lock();
        let was_degraded = eval.depth_degraded || eval.stale;

        if depth > self.config.queue_depth_threshold {
            eval.below_since = None;
            let over_since = *eval.over_since.get_or_insert(now);
            if now.saturating_duration_since(over_since) > self.config.grace() {
                eval.depth_degraded = true;
            }
        } else {
            eval.over_since = None;
            if eval.depth_degraded {
                let below_since = *eval.below_since.get_or_insert(now);
                if now.saturating_duration_since(below_since) >= self.config.interval() {
                    eval.depth_degraded = false;
                    eval.below_since = None;
                }
            }
        }

        let idle_for = now.saturating_duration_since(self.stats.last_activity());
        eval.stale = depth > 0 && idle_for > self.config.stale_after();

        let degraded = eval.depth_degraded || eval.stale;
        if degraded && !was_degraded {
            warn!(
                queue_depth = depth,
                threshold = self.config.queue_depth_threshold,
                stale = eval.stale,
                "Health degraded"
            );
        } else if !degraded && was_degraded {
            info!(queue_depth = depth, "Health recovered");
        }

        if degraded || self.stats.watcher_degraded() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Current metrics with the status from the last evaluation.
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        let depth = self.queue.counts().depth();
        let eval = self.eval.lock();

        let mut reasons = Vec::new();
        if eval.depth_degraded {
            reasons.push(format!(
                "queue depth above {} for longer than {}s",
                self.config.queue_depth_threshold, self.config.grace_secs
            ));
        }
        if eval.stale {
            reasons.push(format!(
                "no job completed in the last {}s while work is pending",
                self.config.stale_after_secs
            ));
        }
        let watcher_degraded = self.stats.watcher_degraded();
        if watcher_degraded {
            reasons.push("file watcher subscription keeps failing".to_string());
        }

        HealthSnapshot {
            status: if reasons.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            queue_depth: depth,
            active_workers: self.stats.active_workers(),
            last_successful_run: self.stats.last_success(),
            last_error: self.stats.last_error(),
            uptime_secs: now.saturating_duration_since(self.stats.started).as_secs(),
            started_at: self.stats.started_at,
            watcher_degraded,
            reasons,
        }
    }

    /// Evaluates on every interval tick until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval().max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                tick = ticker.tick() => {
                    self.evaluate(tick);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterError;
    use crate::queue::{JobAction, RetryConfig};

    fn monitor(threshold: usize) -> HealthMonitor {
        let queue = Arc::new(JobQueue::new(RetryConfig::default(), 10));
        HealthMonitor::new(
            queue,
            Arc::new(DaemonStats::new()),
            HealthConfig {
                interval_secs: 5,
                queue_depth_threshold: threshold,
                grace_secs: 10,
                stale_after_secs: 600,
            },
        )
    }

    fn fill(m: &HealthMonitor, n: usize) {
        for i in 0..n {
            m.queue.enqueue(&format!("note-{i}"), JobAction::ExtractQuotes).unwrap();
        }
    }

    #[tokio::test]
    async fn depth_over_threshold_degrades_after_grace_and_recovers_after_interval() {
        let m = monitor(2);
        fill(&m, 3);
        let t0 = Instant::now();

        assert_eq!(m.evaluate(t0), HealthStatus::Healthy);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(5)), HealthStatus::Healthy);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(10)), HealthStatus::Healthy);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(11)), HealthStatus::Degraded);
        assert_eq!(m.snapshot().status, HealthStatus::Degraded);

        m.queue.claim().unwrap();
        assert_eq!(m.evaluate(t0 + Duration::from_secs(16)), HealthStatus::Degraded);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(20)), HealthStatus::Degraded);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(21)), HealthStatus::Healthy);
        assert!(m.snapshot().reasons.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn running_monitor_updates_status_on_ticks() {
        let m = Arc::new(monitor(2));
        fill(&m, 3);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&m).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(m.snapshot().status, HealthStatus::Healthy);
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(m.snapshot().status, HealthStatus::Degraded);

        m.queue.claim().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(m.snapshot().status, HealthStatus::Degraded);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(m.snapshot().status, HealthStatus::Healthy);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn short_spike_within_grace_stays_healthy() {
        let m = monitor(2);
        fill(&m, 3);
        let t0 = Instant::now();
        assert_eq!(m.evaluate(t0), HealthStatus::Healthy);
        m.queue.claim().unwrap();
        assert_eq!(m.evaluate(t0 + Duration::from_secs(8)), HealthStatus::Healthy);

        m.queue.enqueue("note-late", JobAction::ExtractQuotes).unwrap();
        assert_eq!(m.evaluate(t0 + Duration::from_secs(12)), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn recovery_requires_staying_below_for_a_full_interval() {
        let m = monitor(1);
        fill(&m, 2);
        let t0 = Instant::now();
        m.evaluate(t0);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(11)), HealthStatus::Degraded);

        let claimed = m.queue.claim().unwrap();
        assert_eq!(m.evaluate(t0 + Duration::from_secs(12)), HealthStatus::Degraded);
        m.queue.enqueue("note-again", JobAction::ExtractQuotes).unwrap();
        assert_eq!(m.evaluate(t0 + Duration::from_secs(14)), HealthStatus::Degraded);

        m.queue
            .complete(&claimed.id, &AdapterResult::ok(serde_json::Value::Null))
            .unwrap();
        m.queue.claim().unwrap();
        assert_eq!(m.evaluate(t0 + Duration::from_secs(15)), HealthStatus::Degraded);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(20)), HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_work_without_completions_is_stale() {
        let m = monitor(50);
        fill(&m, 1);
        assert_eq!(m.evaluate(Instant::now()), HealthStatus::Healthy);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(m.evaluate(Instant::now()), HealthStatus::Degraded);
        assert_eq!(m.snapshot().reasons.len(), 1);

        m.stats.record_outcome(&AdapterResult::failure(AdapterError::ExternalServiceUnavailable(
            "down".into(),
        )));
        assert_eq!(m.evaluate(Instant::now()), HealthStatus::Healthy);
        assert_eq!(
            m.snapshot().last_error.as_deref(),
            Some("external service unavailable: down")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_daemon_is_never_stale() {
        let m = monitor(50);
        tokio::time::advance(Duration::from_secs(10_000)).await;
        assert_eq!(m.evaluate(Instant::now()), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn watcher_failure_degrades_until_cleared() {
        let m = monitor(50);
        m.stats.set_watcher_degraded(true);
        assert_eq!(m.evaluate(Instant::now()), HealthStatus::Degraded);
        let snapshot = m.snapshot();
        assert!(snapshot.watcher_degraded);
        assert_eq!(snapshot.status, HealthStatus::Degraded);

        m.stats.set_watcher_degraded(false);
        assert_eq!(m.evaluate(Instant::now()), HealthStatus::Healthy);
        assert_eq!(m.snapshot().status, HealthStatus::Healthy);
    }

    #[test]
    fn busy_guard_tracks_active_workers() {
        let stats = DaemonStats::new();
        {
            let _a = stats.worker_busy();
            let _b = stats.worker_busy();
            assert_eq!(stats.active_workers(), 2);
        }
        assert_eq!(stats.active_workers(), 0);
    }

    #[test]
    fn snapshot_serializes_status_lowercase() {
        let m = monitor(50);
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["queue_depth"], 0);
        assert!(json["last_successful_run"].is_null());
    }
}
