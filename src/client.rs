//! Cliente HTTP usado pelos subcomandos da CLI para falar com um daemon em execução.
//!
//! Um daemon inacessível é reportado como [`ClientError::Unreachable`] para que
//! a CLI possa tratá-lo como aviso em vez de falha.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::{ProcessRequest, ProcessResponse, QueueResponse};
use crate::health::HealthSnapshot;
use crate::queue::{Job, JobAction};

/// Erros do cliente do daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Não foi possível conectar ao daemon (não está rodando ou endereço errado).
    #[error("daemon unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        source: reqwest::Error,
    },

    /// O daemon respondeu com um erro (`{ error, code }`).
    #[error("daemon returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Falha de rede ou de decodificação depois de conectado.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl ClientError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Unreachable { .. })
    }
}

/// Cliente para a API de controle do daemon.
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `POST /process`.
    pub async fn process(&self, target: &str) -> Result<ProcessResponse, ClientError> {
        let req = self
            .client
            .post(format!("{}/process", self.base_url))
            .json(&ProcessRequest {
                target: target.to_string(),
                action: JobAction::ExtractQuotes,
            });
        self.send(req).await
    }

    /// `GET /queue`.
    pub async fn queue(&self) -> Result<QueueResponse, ClientError> {
        self.send(self.client.get(format!("{}/queue", self.base_url)))
            .await
    }

    /// `GET /jobs/{id}`; `None` quando o job não existe (ou já foi descartado).
    pub async fn job(&self, id: &str) -> Result<Option<Job>, ClientError> {
        match self
            .send(self.client.get(format!("{}/jobs/{id}", self.base_url)))
            .await
        {
            Ok(job) => Ok(Some(job)),
            Err(ClientError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthSnapshot, ClientError> {
        self.send(self.client.get(format!("{}/health", self.base_url)))
            .await
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ClientError::Unreachable {
                    url: self.base_url.clone(),
                    source: e,
                }
            } else {
                ClientError::Network(e)
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            code: body["code"].as_str().unwrap_or("UNKNOWN").to_string(),
            message: body["error"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        })
    }
}

/// URL base do daemon a partir do endereço de bind configurado.
pub fn base_url_for_bind(bind: &str) -> String {
    let bind = bind.replace("0.0.0.0", "127.0.0.1");
    format!("http://{bind}")
}
