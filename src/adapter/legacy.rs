use async_trait::async_trait;
use tracing::debug;

use super::note::{LEGACY_MARKER, NoteStore};
use super::{Adapter, AdapterError, Enrichment, SourceMaterial, VideoQuotes, VideoSource};
use crate::backend::{BackendClient, Quote};
use crate::queue::Target;

/// Adapter for the first-generation extraction endpoint.
///
/// One call per video returns finished quotes; the note gets a plain quotes
/// block closed by [`LEGACY_MARKER`].
pub struct LegacyAdapter {
    client: BackendClient,
    store: NoteStore,
}

impl LegacyAdapter {
    pub fn new(client: BackendClient, store: NoteStore) -> Self {
        Self { client, store }
    }
}

#[async_trait]
impl Adapter for LegacyAdapter {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn notes(&self) -> &NoteStore {
        &self.store
    }

    async fn fetch(&self, target: &Target) -> Result<SourceMaterial, AdapterError> {
        let document = self.store.read(target).await?;
        let videos: Vec<VideoSource> = document
            .video_ids()
            .into_iter()
            .map(|video_id| VideoSource {
                video_id,
                title: None,
                transcript: None,
            })
            .collect();
        if videos.is_empty() && !document.is_enriched() {
            return Err(AdapterError::MalformedTarget(format!(
                "note {target} has no video reference"
            )));
        }
        Ok(SourceMaterial { document, videos })
    }

    async fn enrich(&self, source: &SourceMaterial) -> Result<Enrichment, AdapterError> {
        let mut videos = Vec::with_capacity(source.videos.len());
        for video in &source.videos {
            let response = self.client.extract_quotes_v1(&video.video_id).await?;
            debug!(video_id = %video.video_id, quotes = response.quotes.len(), "Legacy extraction done");
            videos.push(VideoQuotes {
                video_id: video.video_id.clone(),
                title: None,
                quotes: response
                    .quotes
                    .into_iter()
                    .map(|text| Quote {
                        text,
                        timestamp_secs: None,
                    })
                    .collect(),
            });
        }
        Ok(Enrichment {
            videos,
            partial: false,
        })
    }

    async fn persist(&self, target: &Target, enrichment: &Enrichment) -> Result<(), AdapterError> {
        let mut document = self.store.read(target).await?;
        if document.is_enriched() {
            debug!(%target, "Note was enriched while quotes were extracted, keeping it");
            return Ok(());
        }
        let mut section = String::from("## Quotes\n");
        for video in &enrichment.videos {
            for quote in &video.quotes {
                section.push_str(&format!("\n> {}\n", quote.text.trim()));
            }
        }
        section.push('\n');
        section.push_str(LEGACY_MARKER);
        section.push('\n');
        document.append_section(&section);
        self.store.write(target, &document).await
    }
}
