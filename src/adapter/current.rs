use async_trait::async_trait;
use tracing::{debug, warn};

use super::note::{DONE_FLAG, NoteStore, PARTIAL_FLAG};
use super::{Adapter, AdapterError, Enrichment, SourceMaterial, VideoQuotes, VideoSource};
use crate::backend::{BackendClient, QuotesRequest};
use crate::queue::Target;

/// Adapter for the second-generation API: transcript fetch, then quote
/// extraction, then a timestamped quotes section plus front-matter flags.
pub struct CurrentAdapter {
    client: BackendClient,
    store: NoteStore,
    max_quotes: u32,
}

impl CurrentAdapter {
    pub fn new(client: BackendClient, store: NoteStore, max_quotes: u32) -> Self {
        Self {
            client,
            store,
            max_quotes,
        }
    }
}

#[async_trait]
impl Adapter for CurrentAdapter {
    fn name(&self) -> &'static str {
        "current"
    }

    fn notes(&self) -> &NoteStore {
        &self.store
    }

    async fn fetch(&self, target: &Target) -> Result<SourceMaterial, AdapterError> {
        let document = self.store.read(target).await?;
        if document.is_enriched() {
            return Ok(SourceMaterial {
                document,
                videos: Vec::new(),
            });
        }

        let ids = document.video_ids();
        if ids.is_empty() {
            return Err(AdapterError::MalformedTarget(format!(
                "note {target} has no video reference"
            )));
        }

        let mut videos = Vec::with_capacity(ids.len());
        for video_id in ids {
            let transcript = self.client.fetch_transcript(&video_id).await?;
            debug!(
                %video_id,
                segments = transcript.segments.len(),
                complete = transcript.complete,
                "Transcript fetched"
            );
            videos.push(VideoSource {
                video_id,
                title: transcript.title.clone(),
                transcript: Some(transcript),
            });
        }
        Ok(SourceMaterial { document, videos })
    }

    async fn enrich(&self, source: &SourceMaterial) -> Result<Enrichment, AdapterError> {
        let mut videos = Vec::with_capacity(source.videos.len());
        let mut partial = false;

        for video in &source.videos {
            let Some(transcript) = video.transcript.as_ref().filter(|t| !t.segments.is_empty())
            else {
                warn!(video_id = %video.video_id, "Empty transcript, skipping video");
                partial = true;
                continue;
            };

            let response = self
                .client
                .extract_quotes(&QuotesRequest {
                    video_id: video.video_id.clone(),
                    title: video.title.clone(),
                    segments: transcript.segments.clone(),
                    max_quotes: self.max_quotes,
                })
                .await?;
            partial |= response.partial || !transcript.complete;
            videos.push(VideoQuotes {
                video_id: video.video_id.clone(),
                title: video.title.clone(),
                quotes: response.quotes,
            });
        }

        if videos.is_empty() {
            return Err(AdapterError::MalformedTarget(
                "no usable transcript for any referenced video".to_string(),
            ));
        }
        Ok(Enrichment { videos, partial })
    }

    async fn persist(&self, target: &Target, enrichment: &Enrichment) -> Result<(), AdapterError> {
        let mut document = self.store.read(target).await?;
        if document.is_enriched() {
            debug!(%target, "Note was enriched while quotes were extracted, keeping it");
            return Ok(());
        }
        document.append_section(&render_section(enrichment));
        document.set_flag(DONE_FLAG, "true");
        if enrichment.partial {
            document.set_flag(PARTIAL_FLAG, "true");
        }
        self.store.write(target, &document).await
    }
}

fn render_section(enrichment: &Enrichment) -> String {
    let mut out = String::from("## Quotes\n");
    for video in &enrichment.videos {
        let heading = video.title.as_deref().unwrap_or(&video.video_id);
        out.push_str(&format!("\n### {heading}\n\n"));
        for quote in &video.quotes {
            match quote.timestamp_secs {
                Some(secs) => out.push_str(&format!(
                    "> {} ([{}](https://youtu.be/{}?t={}))\n",
                    quote.text.trim(),
                    format_timestamp(secs),
                    video.video_id,
                    secs.max(0.0).floor() as u64
                )),
                None => out.push_str(&format!("> {}\n", quote.text.trim())),
            }
        }
    }
    out
}

/// `m:ss` below one hour, `h:mm:ss` above.
fn format_timestamp(secs: f64) -> String {
    let total = secs.max(0.0).floor() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::NoteDocument;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NOTE: &str = "---\ntitle: Talk\n---\n# Talk\nhttps://www.youtube.com/watch?v=abcdefghijk\n";

    async fn setup(note: &str) -> (tempfile::TempDir, MockServer, CurrentAdapter) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("talk.md"), note).unwrap();
        let server = MockServer::start().await;
        let client = BackendClient::new(&server.uri(), String::new(), Duration::from_secs(5)).unwrap();
        let adapter = CurrentAdapter::new(client, NoteStore::new(dir.path()), 3);
        (dir, server, adapter)
    }

    async fn mount_transcript(server: &MockServer, complete: bool) {
        Mock::given(method("GET"))
            .and(path("/v2/transcripts/abcdefghijk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "video_id": "abcdefghijk",
                "title": "Deep Work",
                "segments": [{"start_secs": 75.0, "text": "focus is rare"}],
                "complete": complete
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn timestamps_format() {
        assert_eq!(format_timestamp(5.9), "0:05");
        assert_eq!(format_timestamp(75.0), "1:15");
        assert_eq!(format_timestamp(3725.0), "1:02:05");
        assert_eq!(format_timestamp(-3.0), "0:00");
    }

    #[tokio::test]
    async fn process_writes_section_and_sets_flag() {
        let (dir, server, adapter) = setup(NOTE).await;
        mount_transcript(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/v2/quotes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "quotes": [{"text": "Focus is rare.", "timestamp_secs": 75.0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = adapter.process(&Target::parse("talk").unwrap()).await;
        assert!(result.success, "{result:?}");
        assert!(!result.partial);
        assert_eq!(result.payload["videos"][0]["quotes"][0]["text"], "Focus is rare.");

        let written = std::fs::read_to_string(dir.path().join("talk.md")).unwrap();
        let doc = NoteDocument::parse(&written);
        assert_eq!(doc.flag(DONE_FLAG), Some("true"));
        assert_eq!(doc.flag(PARTIAL_FLAG), None);
        assert!(written.contains("### Deep Work"));
        assert!(written.contains("> Focus is rare. ([1:15](https://youtu.be/abcdefghijk?t=75))"));
    }

    #[tokio::test]
    async fn incomplete_transcript_yields_partial_result() {
        let (dir, server, adapter) = setup(NOTE).await;
        mount_transcript(&server, false).await;
        Mock::given(method("POST"))
            .and(path("/v2/quotes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "quotes": [{"text": "Focus is rare."}]
            })))
            .mount(&server)
            .await;

        let result = adapter.process(&Target::parse("talk").unwrap()).await;
        assert!(result.success);
        assert!(result.partial);
        let doc = NoteDocument::parse(&std::fs::read_to_string(dir.path().join("talk.md")).unwrap());
        assert_eq!(doc.flag(PARTIAL_FLAG), Some("true"));
    }

    #[tokio::test]
    async fn rate_limit_surfaces_retry_after() {
        let (dir, server, adapter) = setup(NOTE).await;
        Mock::given(method("GET"))
            .and(path("/v2/transcripts/abcdefghijk"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let result = adapter.process(&Target::parse("talk").unwrap()).await;
        let err = result.error.unwrap();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(std::fs::read_to_string(dir.path().join("talk.md")).unwrap(), NOTE);
    }

    #[tokio::test]
    async fn unknown_video_is_malformed_target() {
        let (_dir, server, adapter) = setup(NOTE).await;
        Mock::given(method("GET"))
            .and(path("/v2/transcripts/abcdefghijk"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such video"))
            .mount(&server)
            .await;

        let result = adapter.process(&Target::parse("talk").unwrap()).await;
        assert!(matches!(result.error, Some(AdapterError::MalformedTarget(_))));
    }

    #[tokio::test]
    async fn scan_lists_pending_notes() {
        let (dir, _server, adapter) = setup(NOTE).await;
        std::fs::write(dir.path().join("done.md"), format!("---\n{DONE_FLAG}: true\n---\nhttps://youtu.be/abcdefghijk\n")).unwrap();
        assert_eq!(adapter.scan().await, vec!["talk.md"]);
    }
}
