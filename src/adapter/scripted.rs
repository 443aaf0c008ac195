//! Scripted adapter used by dispatcher, daemon and API tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::note::NoteStore;
use super::{Adapter, AdapterError, AdapterResult, Enrichment, SourceMaterial};
use crate::queue::Target;

/// Returns queued results in order, then `fallback` forever.
pub struct ScriptedAdapter {
    store: NoteStore,
    script: Mutex<VecDeque<AdapterResult>>,
    fallback: AdapterResult,
    delay: Duration,
    panics: AtomicUsize,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn always(result: AdapterResult) -> Self {
        Self {
            store: NoteStore::new("/nonexistent"),
            script: Mutex::new(VecDeque::new()),
            fallback: result,
            delay: Duration::ZERO,
            panics: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::always(AdapterResult::ok(serde_json::json!({ "quotes": 1 })))
    }

    pub fn with_script(self, results: impl IntoIterator<Item = AdapterResult>) -> Self {
        self.script.lock().extend(results);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `n` calls panic instead of returning a result.
    pub fn with_panics(self, n: usize) -> Self {
        self.panics.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn notes(&self) -> &NoteStore {
        &self.store
    }

    async fn fetch(&self, target: &Target) -> Result<SourceMaterial, AdapterError> {
        Err(AdapterError::MalformedTarget(format!("no source for {target}")))
    }

    async fn enrich(&self, _source: &SourceMaterial) -> Result<Enrichment, AdapterError> {
        Err(AdapterError::MalformedTarget("nothing to enrich".into()))
    }

    async fn persist(&self, _target: &Target, _enrichment: &Enrichment) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn process(&self, target: &Target) -> AdapterResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(target.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("scripted adapter panic on {target}");
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
