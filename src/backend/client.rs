use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use super::error::BackendError;
use super::types::{ExtractRequest, ExtractResponse, QuotesRequest, QuotesResponse, Transcript};

/// Largest `retry-after` hint honored; longer waits are clamped to it.
const MAX_RETRY_AFTER_SECS: u64 = 3600;

/// HTTP client for the external content-generation service.
pub struct BackendClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Legacy single-shot extraction: `POST /v1/extract`.
    pub async fn extract_quotes_v1(&self, video_id: &str) -> Result<ExtractResponse, BackendError> {
        let req = self
            .client
            .post(format!("{}/v1/extract", self.base_url))
            .json(&ExtractRequest {
                video_id: video_id.to_string(),
            });
        self.send(req).await
    }

    /// `GET /v2/transcripts/{video_id}`.
    pub async fn fetch_transcript(&self, video_id: &str) -> Result<Transcript, BackendError> {
        let req = self
            .client
            .get(format!("{}/v2/transcripts/{video_id}", self.base_url));
        self.send(req).await
    }

    /// `POST /v2/quotes`.
    pub async fn extract_quotes(&self, body: &QuotesRequest) -> Result<QuotesResponse, BackendError> {
        let req = self
            .client
            .post(format!("{}/v2/quotes", self.base_url))
            .json(body);
        self.send(req).await
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        let mut req = req.header("content-type", "application/json");
        if !self.api_key.is_empty() {
            req = req.header("x-api-key", &self.api_key);
        }
        let response = req.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs.min(MAX_RETRY_AFTER_SECS) * 1000);
            return Err(BackendError::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let status = status.as_u16();
            return Err(if status >= 500 {
                BackendError::Unavailable { status, message }
            } else {
                BackendError::Rejected { status, message }
            });
        }

        Ok(response.json::<T>().await?)
    }
}
