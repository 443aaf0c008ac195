//! Tipos de dados para requisições e respostas do serviço de geração de conteúdo.
//!
//! O serviço expõe duas gerações de API: a `v1` (um único endpoint de extração,
//! usado pelo adaptador legado) e a `v2` (transcrição e extração separadas).

use serde::{Deserialize, Serialize};

/// Corpo da requisição para `POST /v1/extract`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequest {
    /// Identificador do vídeo (ex.: "dQw4w9WgXcQ").
    pub video_id: String,
}

/// Resposta de `POST /v1/extract`: citações já prontas, sem marcação de tempo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub quotes: Vec<String>,
}

/// Transcrição retornada por `GET /v2/transcripts/{video_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub video_id: String,
    /// Título do vídeo, quando conhecido.
    #[serde(default)]
    pub title: Option<String>,
    pub segments: Vec<TranscriptSegment>,
    /// `false` quando o serviço só conseguiu parte da transcrição.
    #[serde(default = "default_true")]
    pub complete: bool,
}

/// Um trecho da transcrição com o instante de início em segundos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_secs: f64,
    pub text: String,
}

/// Corpo da requisição para `POST /v2/quotes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotesRequest {
    pub video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub segments: Vec<TranscriptSegment>,
    /// Número máximo de citações desejadas.
    pub max_quotes: u32,
}

/// Resposta de `POST /v2/quotes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotesResponse {
    pub quotes: Vec<Quote>,
    /// `true` quando o serviço devolveu menos do que conseguiria com a transcrição completa.
    #[serde(default)]
    pub partial: bool,
}

/// Uma citação extraída, com o instante no vídeo quando disponível.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    #[serde(default)]
    pub timestamp_secs: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_defaults_to_complete() {
        let json = r#"{
            "video_id": "abc",
            "segments": [{"start_secs": 1.5, "text": "hello"}]
        }"#;
        let transcript: Transcript = serde_json::from_str(json).unwrap();
        assert!(transcript.complete);
        assert_eq!(transcript.title, None);
        assert_eq!(transcript.segments[0].start_secs, 1.5);
    }

    #[test]
    fn quotes_request_omits_missing_title() {
        let req = QuotesRequest {
            video_id: "abc".into(),
            title: None,
            segments: vec![],
            max_quotes: 3,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("title"));
        assert!(json.contains(r#""max_quotes":3"#));
    }

    #[test]
    fn quotes_response_deserialize_from_api_format() {
        let api_json = r#"{
            "quotes": [
                {"text": "First", "timestamp_secs": 12.0},
                {"text": "Second"}
            ]
        }"#;
        let resp: QuotesResponse = serde_json::from_str(api_json).unwrap();
        assert!(!resp.partial);
        assert_eq!(resp.quotes[0].timestamp_secs, Some(12.0));
        assert_eq!(resp.quotes[1].timestamp_secs, None);
    }
}
