//! Workflow adapters: the pluggable backends that enrich one note.
//!
//! The dispatcher only ever calls [`Adapter::process`]. Concrete adapters
//! implement the individual steps (fetch, enrich, persist) and inherit the
//! composition. Which adapter runs is decided once, at startup, by
//! [`build_adapter`].

pub mod current;
pub mod legacy;
pub mod note;
#[cfg(test)]
pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{BackendClient, BackendError, Quote};
use crate::config::AdapterConfig;
use crate::error::DaemonError;
use crate::queue::Target;

pub use current::CurrentAdapter;
pub use legacy::LegacyAdapter;
pub use note::{NoteDocument, NoteStore};

/// Failure taxonomy reported by adapters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The backend could not be reached or failed internally. Retryable.
    #[error("external service unavailable: {0}")]
    ExternalServiceUnavailable(String),

    /// The target can never succeed as-is. Not retryable.
    #[error("malformed target: {0}")]
    MalformedTarget(String),

    /// The backend asked us to slow down. Retryable, honoring `retry_after`.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Local filesystem failure while reading or writing the note.
    #[error("io error: {0}")]
    Io(String),

    /// The adapter task died (panicked or was cancelled). Not retryable.
    #[error("internal adapter failure: {0}")]
    Internal(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::ExternalServiceUnavailable(_) | AdapterError::RateLimited { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdapterError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<BackendError> for AdapterError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited { retry_after_ms } => AdapterError::RateLimited {
                message: err.to_string(),
                retry_after: retry_after_ms.map(Duration::from_millis),
            },
            BackendError::Rejected { .. } => AdapterError::MalformedTarget(err.to_string()),
            e if e.is_transient() => AdapterError::ExternalServiceUnavailable(e.to_string()),
            e => AdapterError::MalformedTarget(e.to_string()),
        }
    }
}

/// Outcome of one `process` call. `error` is present iff `success` is false.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResult {
    pub success: bool,
    /// Success with incomplete enrichment.
    pub partial: bool,
    pub payload: serde_json::Value,
    pub error: Option<AdapterError>,
}

impl AdapterResult {
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            partial: false,
            payload,
            error: None,
        }
    }

    pub fn partial(payload: serde_json::Value) -> Self {
        Self {
            partial: true,
            ..Self::ok(payload)
        }
    }

    pub fn failure(error: AdapterError) -> Self {
        Self {
            success: false,
            partial: false,
            payload: serde_json::Value::Null,
            error: Some(error),
        }
    }
}

/// A video referenced by a note, with whatever the adapter fetched for it.
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub video_id: String,
    pub title: Option<String>,
    pub transcript: Option<crate::backend::Transcript>,
}

/// Raw material gathered by [`Adapter::fetch`].
#[derive(Debug, Clone)]
pub struct SourceMaterial {
    pub document: NoteDocument,
    pub videos: Vec<VideoSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoQuotes {
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub quotes: Vec<Quote>,
}

/// Enrichment data produced by [`Adapter::enrich`]; also the job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub videos: Vec<VideoQuotes>,
    pub partial: bool,
}

impl Enrichment {
    pub fn quote_count(&self) -> usize {
        self.videos.iter().map(|v| v.quotes.len()).sum()
    }
}

/// Capability contract every workflow backend implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn notes(&self) -> &NoteStore;

    /// Targets below the root that currently need processing.
    async fn scan(&self) -> Vec<String> {
        let store = self.notes().clone();
        tokio::task::spawn_blocking(move || store.scan())
            .await
            .unwrap_or_default()
    }

    /// Resolves the note and gathers the external data it references.
    async fn fetch(&self, target: &Target) -> Result<SourceMaterial, AdapterError>;

    /// Turns fetched material into quotes.
    async fn enrich(&self, source: &SourceMaterial) -> Result<Enrichment, AdapterError>;

    /// Writes the enrichment back into the note.
    async fn persist(&self, target: &Target, enrichment: &Enrichment) -> Result<(), AdapterError>;

    /// resolve → fetch → enrich → write back, as one call.
    async fn process(&self, target: &Target) -> AdapterResult {
        let source = match self.fetch(target).await {
            Ok(source) => source,
            Err(e) => return AdapterResult::failure(e),
        };
        if source.document.is_enriched() {
            debug!(adapter = self.name(), %target, "Note already enriched, skipping");
            return AdapterResult::ok(serde_json::json!({ "skipped": "already enriched" }));
        }

        let enrichment = match self.enrich(&source).await {
            Ok(enrichment) => enrichment,
            Err(e) => return AdapterResult::failure(e),
        };
        if let Err(e) = self.persist(target, &enrichment).await {
            return AdapterResult::failure(e);
        }

        info!(
            adapter = self.name(),
            %target,
            quotes = enrichment.quote_count(),
            partial = enrichment.partial,
            "Note enriched"
        );
        let payload = serde_json::to_value(&enrichment).unwrap_or(serde_json::Value::Null);
        if enrichment.partial {
            AdapterResult::partial(payload)
        } else {
            AdapterResult::ok(payload)
        }
    }
}

/// Which adapter implementation the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Legacy,
    #[default]
    Current,
}

impl std::str::FromStr for AdapterKind {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(AdapterKind::Legacy),
            "current" => Ok(AdapterKind::Current),
            other => Err(DaemonError::Config(format!("unknown adapter kind: {other}"))),
        }
    }
}

/// Builds the configured adapter over `store`.
pub fn build_adapter(config: &AdapterConfig, store: NoteStore) -> Result<Arc<dyn Adapter>, DaemonError> {
    let client = BackendClient::new(
        &config.backend_url,
        config.api_key.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )
    .map_err(|e| DaemonError::Config(format!("backend client: {e}")))?;

    Ok(match config.kind {
        AdapterKind::Legacy => Arc::new(LegacyAdapter::new(client, store)),
        AdapterKind::Current => Arc::new(CurrentAdapter::new(client, store, config.max_quotes)),
    })
}
