//! Configuração do vaultd carregada a partir de `vaultd.toml`.
//!
//! A struct [`DaemonConfig`] agrupa as seções `watch`, `dispatcher`, `retry`,
//! `queue`, `http`, `health` e `adapter`. Valores não presentes no arquivo usam
//! defaults sensíveis. Variáveis de ambiente `VAULTD_*` têm precedência sobre o
//! arquivo.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::AdapterKind;
use crate::error::DaemonError;
use crate::queue::RetryConfig;

/// Arquivo procurado no diretório atual quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "vaultd.toml";

/// Configuração de nível superior carregada de `vaultd.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// Observação do sistema de arquivos.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Diretório observado; também é a base para resolver os alvos.
    #[serde(default = "default_watch_root")]
    pub root: PathBuf,
    /// Desliga o watcher (o daemon continua aceitando jobs via HTTP).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Janela de silêncio antes de um arquivo modificado virar job.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Atraso base para reinscrever o watcher após uma falha.
    #[serde(default = "default_resubscribe_base_ms")]
    pub resubscribe_base_ms: u64,
    /// Teto do atraso de reinscrição.
    #[serde(default = "default_resubscribe_max_ms")]
    pub resubscribe_max_ms: u64,
    /// Falhas consecutivas de inscrição antes de reportar estado degradado.
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u32,
}

/// Pool de workers.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Tempo máximo de uma chamada `process`; estourar conta como indisponibilidade.
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
    /// Intervalo de verificação quando não há sinal de trabalho novo.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

/// Retenção e espelhamento em disco da fila.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Quantos jobs terminais ficam visíveis antes de serem descartados.
    #[serde(default = "default_max_terminal_jobs")]
    pub max_terminal_jobs: usize,
    /// Arquivo JSON opcional que espelha a fila.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default = "default_mirror_interval_ms")]
    pub mirror_interval_ms: u64,
}

/// API HTTP de controle.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Limiares do monitor de saúde.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Profundidade da fila acima da qual o daemon pode ficar degradado.
    #[serde(default = "default_queue_depth_threshold")]
    pub queue_depth_threshold: usize,
    /// Por quanto tempo a profundidade pode ficar acima do limiar.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Idade máxima da última conclusão enquanto há jobs pendentes.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

/// Seleção e parâmetros do adaptador de workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub kind: AdapterKind,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Chave do serviço de geração de conteúdo.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_quotes")]
    pub max_quotes: u32,
    #[serde(default = "default_backend_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_watch_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_debounce_ms() -> u64 {
    1500
}

fn default_resubscribe_base_ms() -> u64 {
    500
}

fn default_resubscribe_max_ms() -> u64 {
    30_000
}

fn default_escalate_after() -> u32 {
    3
}

fn default_workers() -> usize {
    2
}

fn default_process_timeout_secs() -> u64 {
    120
}

fn default_idle_poll_ms() -> u64 {
    1000
}

fn default_max_terminal_jobs() -> usize {
    200
}

fn default_mirror_interval_ms() -> u64 {
    2000
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_queue_depth_threshold() -> usize {
    50
}

fn default_grace_secs() -> u64 {
    120
}

fn default_stale_after_secs() -> u64 {
    600
}

fn default_backend_url() -> String {
    "http://127.0.0.1:9400".to_string()
}

fn default_max_quotes() -> u32 {
    5
}

fn default_backend_timeout_secs() -> u64 {
    60
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: default_watch_root(),
            enabled: true,
            debounce_ms: default_debounce_ms(),
            resubscribe_base_ms: default_resubscribe_base_ms(),
            resubscribe_max_ms: default_resubscribe_max_ms(),
            escalate_after: default_escalate_after(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            process_timeout_secs: default_process_timeout_secs(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_terminal_jobs: default_max_terminal_jobs(),
            state_file: None,
            mirror_interval_ms: default_mirror_interval_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            queue_depth_threshold: default_queue_depth_threshold(),
            grace_secs: default_grace_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: AdapterKind::default(),
            backend_url: default_backend_url(),
            api_key: String::new(),
            max_quotes: default_max_quotes(),
            request_timeout_secs: default_backend_timeout_secs(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, DaemonError> {
        self.bind
            .parse()
            .map_err(|e| DaemonError::Config(format!("invalid http.bind {:?}: {e}", self.bind)))
    }
}

impl DaemonConfig {
    /// Carrega a configuração de `path`, ou de `vaultd.toml` no diretório atual.
    /// Usa valores padrão se o arquivo padrão não existir; um caminho explícito
    /// inexistente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self, DaemonError> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_toml(&std::fs::read_to_string(path)?)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, DaemonError> {
        Ok(toml::from_str::<DaemonConfig>(contents)?)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), DaemonError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("VAULTD_API_KEY") {
            self.adapter.api_key = key;
        }
        if let Some(bind) = non_empty("VAULTD_BIND") {
            self.http.bind = bind;
        }
        if let Some(root) = non_empty("VAULTD_WATCH_ROOT") {
            self.watch.root = PathBuf::from(root);
        }
        if let Some(kind) = non_empty("VAULTD_ADAPTER") {
            self.adapter.kind = kind.parse()?;
        }
        Ok(())
    }

    /// Rejeita combinações que deixariam o daemon sem trabalhar.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.dispatcher.workers == 0 {
            return Err(DaemonError::Config("dispatcher.workers must be at least 1".into()));
        }
        if self.dispatcher.process_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "dispatcher.process_timeout_secs must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DaemonError::Config("retry.max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(DaemonError::Config("retry.jitter_ratio must be within [0, 1]".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(DaemonError::Config(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        if self.health.interval_secs == 0 {
            return Err(DaemonError::Config("health.interval_secs must be at least 1".into()));
        }
        self.http.socket_addr()?;
        Ok(())
    }
}
