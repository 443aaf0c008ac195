//! Disk mirror of the job queue.
//!
//! The queue stays authoritative in memory; the mirror is a best-effort copy
//! written whenever the queue changed, used to resume work after a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::Job;
use super::store::JobQueue;
use crate::error::DaemonError;

const MIRROR_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MirrorFile {
    version: u32,
    saved_at: DateTime<Utc>,
    jobs: Vec<Job>,
}

/// Writes the current queue snapshot to `path` via a temp file and rename.
pub async fn save(queue: &JobQueue, path: &Path) -> Result<(), DaemonError> {
    let file = MirrorFile {
        version: MIRROR_VERSION,
        saved_at: Utc::now(),
        jobs: queue.snapshot().jobs,
    };
    let json = serde_json::to_vec_pretty(&file)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), jobs = file.jobs.len(), "Queue mirror written");
    Ok(())
}

/// Reads jobs from a mirror file. A missing file yields no jobs.
pub async fn load(path: &Path) -> Result<Vec<Job>, DaemonError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let file: MirrorFile = serde_json::from_slice(&bytes)?;
    if file.version != MIRROR_VERSION {
        warn!(
            path = %path.display(),
            version = file.version,
            "Ignoring queue mirror with unknown version"
        );
        return Ok(Vec::new());
    }
    Ok(file.jobs)
}

/// Restores jobs from `path` into `queue`, logging and skipping a corrupt file.
pub async fn recover(queue: &JobQueue, path: &Path) -> usize {
    match load(path).await {
        Ok(jobs) => {
            let restored = queue.restore(jobs);
            if restored > 0 {
                info!(restored, path = %path.display(), "Recovered jobs from queue mirror");
            }
            restored
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Failed to read queue mirror, starting empty");
            0
        }
    }
}

/// Flushes the queue to disk whenever it changed, until `shutdown` fires.
/// A final flush runs on shutdown.
pub async fn run(
    queue: Arc<JobQueue>,
    path: PathBuf,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut last_saved = None;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let generation = queue.generation();
        if last_saved == Some(generation) {
            continue;
        }
        match save(&queue, &path).await {
            Ok(()) => last_saved = Some(generation),
            Err(e) => warn!(error = %e, path = %path.display(), "Failed to write queue mirror"),
        }
    }

    if let Err(e) = save(&queue, &path).await {
        warn!(error = %e, path = %path.display(), "Failed to write final queue mirror");
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
