use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Collapses bursts of events per path into one emission after `window` of quiet.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadlines: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadlines: HashMap::new(),
        }
    }

    /// Records an event for `path`, pushing its deadline to `now + window`.
    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.deadlines.insert(path, now + self.window);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns every path that has been quiet for the full window.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.deadlines.remove(path);
        }
        ready.sort();
        ready
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Forwards raw paths to `ready_tx` once each has been quiet for `window`.
///
/// Stops on shutdown, or once the raw channel is closed and nothing is pending.
pub async fn run(
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    ready_tx: mpsc::Sender<PathBuf>,
    window: Duration,
    shutdown: CancellationToken,
) {
    let mut debouncer = Debouncer::new(window);
    let mut raw_closed = false;

    loop {
        if raw_closed && debouncer.is_empty() {
            break;
        }
        let deadline = debouncer.next_deadline();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            raw = raw_rx.recv(), if !raw_closed => match raw {
                Some(path) => {
                    trace!(path = %path.display(), pending = debouncer.len() + 1, "Raw change");
                    debouncer.record(path, Instant::now());
                }
                None => raw_closed = true,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
        }

        for path in debouncer.drain_ready(Instant::now()) {
            if ready_tx.send(path).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_resets_deadline() {
        let window = Duration::from_millis(1500);
        let mut d = Debouncer::new(window);
        let t0 = Instant::now();
        d.record(PathBuf::from("a.md"), t0);
        d.record(PathBuf::from("a.md"), t0 + Duration::from_millis(1000));

        assert!(d.drain_ready(t0 + Duration::from_millis(1600)).is_empty());
        assert_eq!(
            d.drain_ready(t0 + Duration::from_millis(2500)),
            vec![PathBuf::from("a.md")]
        );
        assert!(d.is_empty());
    }

    #[test]
    fn paths_are_debounced_independently() {
        let mut d = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        d.record(PathBuf::from("b.md"), t0);
        d.record(PathBuf::from("a.md"), t0 + Duration::from_millis(50));
        assert_eq!(d.next_deadline(), Some(t0 + Duration::from_millis(100)));

        assert_eq!(
            d.drain_ready(t0 + Duration::from_millis(100)),
            vec![PathBuf::from("b.md")]
        );
        assert_eq!(d.len(), 1);
        assert_eq!(
            d.drain_ready(t0 + Duration::from_millis(150)),
            vec![PathBuf::from("a.md")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_modifications_emits_once() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (ready_tx, mut ready_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(raw_rx, ready_tx, Duration::from_millis(1500), shutdown.clone()));

        for _ in 0..10 {
            raw_tx.send(PathBuf::from("inbox/talk.md")).unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        raw_tx.send(PathBuf::from("other.md")).unwrap();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(ready_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let mut emitted = Vec::new();
        while let Ok(path) = ready_rx.try_recv() {
            emitted.push(path);
        }
        assert_eq!(
            emitted,
            vec![PathBuf::from("inbox/talk.md"), PathBuf::from("other.md")]
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_input_flushes_pending_then_stops() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (ready_tx, mut ready_rx) = mpsc::channel(16);
        let task = tokio::spawn(run(
            raw_rx,
            ready_tx,
            Duration::from_millis(300),
            CancellationToken::new(),
        ));

        raw_tx.send(PathBuf::from("a.md")).unwrap();
        drop(raw_tx);

        assert_eq!(ready_rx.recv().await, Some(PathBuf::from("a.md")));
        assert_eq!(ready_rx.recv().await, None);
        task.await.unwrap();
    }
}
