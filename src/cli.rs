//! Interface de linha de comando do vaultd baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, process, queue,
//! health, scan) e flags globais (--config, --url, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// vaultd: daemon local que enriquece notas com citações de vídeos.
#[derive(Debug, Parser)]
#[command(name = "vaultd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./vaultd.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// URL de um daemon em execução (padrão: derivada de `http.bind`).
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o daemon em primeiro plano até receber SIGINT/SIGTERM.
    Serve,

    /// Enfileira uma nota para enriquecimento num daemon em execução.
    Process {
        /// Nota relativa à raiz observada (ex.: "inbox/talk" ou "inbox/talk.md").
        target: String,

        /// Acompanha o job até ele terminar.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },

    /// Mostra a fila do daemon.
    Queue,

    /// Mostra o status de saúde do daemon.
    Health,

    /// Lista as notas que precisam de enriquecimento, sem enfileirar nada.
    Scan,
}
