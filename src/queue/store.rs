use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobAction, JobState, Target, job_id_for};
use super::state::{RetryConfig, StateMachine, Transition};
use crate::adapter::AdapterResult;
use crate::error::QueueError;

/// Outcome of an enqueue request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enqueued {
    pub job_id: String,
    /// `false` when an active job for the same target already existed.
    pub created: bool,
}

/// Read-only view of all retained jobs at a point in time.
///
/// Waiting jobs come first in claim order, then running jobs, then terminal
/// jobs from oldest to newest completion.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub taken_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Jobs waiting to be dispatched (`pending` + `retrying`).
    pub fn depth(&self) -> usize {
        self.pending + self.retrying
    }
}

#[derive(Default)]
struct QueueInner {
    jobs: HashMap<String, Job>,
    /// Pending and retrying job ids ordered by `created_at`.
    waiting: VecDeque<String>,
    /// Earliest instant a retrying job may be claimed again.
    not_before: HashMap<String, Instant>,
    /// Non-terminal job id per target.
    active: HashMap<Target, String>,
    /// Terminal job ids in completion order, bounded by `max_terminal`.
    terminal: VecDeque<String>,
}

impl QueueInner {
    fn insert_waiting(&mut self, id: String) {
        let created_at = self.jobs.get(&id).map(|j| j.created_at);
        let pos = self.waiting.partition_point(|other| {
            self.jobs.get(other).map(|j| j.created_at) <= created_at
        });
        self.waiting.insert(pos, id);
    }

    /// `retrying → pending` for every job whose backoff has elapsed.
    fn promote_due(&mut self, now: Instant) {
        let due: Vec<String> = self
            .not_before
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.not_before.remove(&id);
            if let Some(job) = self.jobs.get_mut(&id)
                && job.state == JobState::Retrying
            {
                job.state = JobState::Pending;
                job.next_attempt_at = None;
                job.touch();
            }
        }
    }

    fn retire(&mut self, id: &str, target: &Target, max_terminal: usize) {
        if self.active.get(target).is_some_and(|active| active == id) {
            self.active.remove(target);
        }
        self.terminal.push_back(id.to_string());
        while self.terminal.len() > max_terminal {
            if let Some(evicted) = self.terminal.pop_front() {
                debug!(job_id = %evicted, "Evicting terminal job");
                self.jobs.remove(&evicted);
            }
        }
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for job in self.jobs.values() {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Running => counts.running += 1,
                JobState::Retrying => counts.retrying += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// In-memory job queue shared by producers (watcher, HTTP API) and workers.
///
/// All mutations happen under one lock that is never held across an await,
/// so at most one non-terminal job exists per target.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    retry: RetryConfig,
    max_terminal: usize,
    generation: AtomicU64,
}

impl JobQueue {
    pub fn new(retry: RetryConfig, max_terminal: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            retry,
            max_terminal,
            generation: AtomicU64::new(0),
        }
    }

    /// Adds a job for `target` unless a non-terminal one already exists.
    pub fn enqueue(&self, target: &str, action: JobAction) -> Result<Enqueued, QueueError> {
        let target = Target::parse(target)?;
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.active.get(&target) {
            debug!(job_id = %existing, %target, "Target already active, enqueue is a no-op");
            return Ok(Enqueued {
                job_id: existing.clone(),
                created: false,
            });
        }

        let job = Job::new(target.clone(), action);
        let id = job.id.clone();
        if inner.jobs.remove(&id).is_some() {
            inner.terminal.retain(|t| t != &id);
        }
        inner.jobs.insert(id.clone(), job);
        inner.active.insert(target.clone(), id.clone());
        inner.insert_waiting(id.clone());
        drop(inner);

        info!(job_id = %id, %target, %action, "Job enqueued");
        self.changed();
        self.notify.notify_one();
        Ok(Enqueued {
            job_id: id,
            created: true,
        })
    }

    /// Atomically moves the oldest claimable job to `running` and returns it.
    pub fn claim(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        inner.promote_due(Instant::now());

        let pos = inner.waiting.iter().position(|id| {
            inner
                .jobs
                .get(id)
                .is_some_and(|j| j.state == JobState::Pending)
        })?;
        let id = inner.waiting.remove(pos)?;
        let job = inner.jobs.get_mut(&id)?;
        StateMachine::start(job);
        let claimed = job.clone();
        drop(inner);

        debug!(job_id = %claimed.id, target = %claimed.target, attempt = claimed.attempts, "Job claimed");
        self.changed();
        Some(claimed)
    }

    /// Records the adapter result for a running job.
    ///
    /// Returns `None` when the job is unknown or not running.
    pub fn complete(&self, job_id: &str, result: &AdapterResult) -> Option<Transition> {
        let mut inner = self.inner.lock();
        let job = match inner.jobs.get_mut(job_id) {
            Some(job) if job.state == JobState::Running => job,
            Some(job) => {
                warn!(job_id, state = %job.state, "Ignoring completion for job that is not running");
                return None;
            }
            None => {
                warn!(job_id, "Ignoring completion for unknown job");
                return None;
            }
        };

        let transition = StateMachine::complete(job, result, &self.retry);
        let target = job.target.clone();
        let attempts = job.attempts;

        match &transition {
            Transition::Succeeded { partial } => {
                info!(job_id, %target, attempts, partial, "Job succeeded");
                inner.retire(job_id, &target, self.max_terminal);
            }
            Transition::Retry { delay, reason } => {
                warn!(
                    job_id,
                    %target,
                    attempt = attempts,
                    max = self.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "Job failed, retrying"
                );
                inner
                    .not_before
                    .insert(job_id.to_string(), Instant::now() + *delay);
                inner.insert_waiting(job_id.to_string());
            }
            Transition::Failed { reason } => {
                error!(job_id, %target, attempts, %reason, "Job failed");
                inner.retire(job_id, &target, self.max_terminal);
            }
        }
        drop(inner);

        self.changed();
        if matches!(transition, Transition::Retry { .. }) {
            self.notify.notify_one();
        }
        Some(transition)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let mut inner = self.inner.lock();
        inner.promote_due(Instant::now());

        let mut jobs: Vec<Job> = inner
            .waiting
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect();
        let mut running: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .cloned()
            .collect();
        running.sort_by_key(|j| j.created_at);
        jobs.extend(running);
        jobs.extend(
            inner
                .terminal
                .iter()
                .filter_map(|id| inner.jobs.get(id).cloned()),
        );

        QueueSnapshot {
            taken_at: Utc::now(),
            jobs,
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().jobs.get(job_id).cloned()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut inner = self.inner.lock();
        inner.promote_due(Instant::now());
        inner.counts()
    }

    /// Earliest instant at which a retrying job becomes claimable.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.inner.lock().not_before.values().min().copied()
    }

    /// Resolves when a job may have become claimable.
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// Monotonic counter bumped on every mutation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Loads jobs recovered from a previous run.
    ///
    /// Non-terminal jobs come back as `pending`; jobs whose target is already
    /// active are skipped.
    pub fn restore(&self, jobs: Vec<Job>) -> usize {
        let mut inner = self.inner.lock();
        let mut restored = 0;

        let (mut terminal, mut open): (Vec<Job>, Vec<Job>) =
            jobs.into_iter().partition(|j| j.state.is_terminal());
        open.sort_by_key(|j| j.created_at);
        terminal.sort_by_key(|j| j.updated_at);

        for mut job in open {
            // Mirrored targets are re-canonicalized and the id follows the target.
            let Ok(target) = Target::parse(job.target.as_str()) else {
                warn!(job_id = %job.id, target = %job.target, "Dropping recovered job with invalid target");
                continue;
            };
            job.id = job_id_for(&target, job.action);
            job.target = target;
            if inner.active.contains_key(&job.target) || inner.jobs.contains_key(&job.id) {
                continue;
            }
            job.state = JobState::Pending;
            job.next_attempt_at = None;
            let id = job.id.clone();
            inner.active.insert(job.target.clone(), id.clone());
            inner.jobs.insert(id.clone(), job);
            inner.insert_waiting(id);
            restored += 1;
        }
        for job in terminal {
            if inner.jobs.contains_key(&job.id) {
                continue;
            }
            let id = job.id.clone();
            let target = job.target.clone();
            inner.jobs.insert(id.clone(), job);
            inner.retire(&id, &target, self.max_terminal);
        }
        drop(inner);

        if restored > 0 {
            self.changed();
            self.notify.notify_waiters();
        }
        restored
    }

    fn changed(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}
