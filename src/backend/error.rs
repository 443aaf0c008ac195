//! Tipos de erro para o cliente do serviço de geração de conteúdo.
//!
//! Define [`BackendError`] com variantes para rate limiting, indisponibilidade,
//! rejeição da requisição e erros de rede. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com o serviço de geração de conteúdo.
///
/// - [`RateLimited`](BackendError::RateLimited): o servidor retornou HTTP 429
/// - [`Unavailable`](BackendError::Unavailable): HTTP 5xx
/// - [`Rejected`](BackendError::Rejected): qualquer outro erro HTTP 4xx
/// - [`NetworkError`](BackendError::NetworkError): falha na camada de rede ou decodificação
#[derive(Debug, Error)]
pub enum BackendError {
    /// O servidor retornou HTTP 429.
    /// `retry_after_ms` vem do cabeçalho `retry-after`, quando presente.
    #[error("rate limited{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// O serviço está fora do ar ou com erro interno (5xx).
    #[error("service unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// O serviço recusou a requisição (4xx exceto 429); repetir não ajuda.
    #[error("request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout) ou corpo inválido.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    retry_after_ms
        .map(|ms| format!(", retry after {ms}ms"))
        .unwrap_or_default()
}

impl BackendError {
    /// Indica se uma nova tentativa pode ter sucesso.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::RateLimited { .. } | BackendError::Unavailable { .. } => true,
            BackendError::Rejected { .. } => false,
            BackendError::NetworkError(e) => !e.is_decode() && !e.is_builder(),
        }
    }
}
