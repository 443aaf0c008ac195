mod adapter;
mod api;
mod backend;
mod cli;
mod client;
mod config;
mod daemon;
mod dispatcher;
mod error;
mod health;
mod queue;
mod ui;
mod watcher;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use client::{ClientError, DaemonClient};
use config::DaemonConfig;
use daemon::Daemon;
use ui::JobProgress;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let url = cli
        .url
        .clone()
        .unwrap_or_else(|| client::base_url_for_bind(&config.http.bind));

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Process { target, wait } => process(&url, &target, wait).await,
        Command::Queue => {
            let client = DaemonClient::new(&url)?;
            if let Some(queue) = reachable(&url, client.queue().await)? {
                ui::print_queue(&queue);
            }
            Ok(())
        }
        Command::Health => {
            let client = DaemonClient::new(&url)?;
            if let Some(health) = reachable(&url, client.health().await)? {
                ui::print_health(&health);
            }
            Ok(())
        }
        Command::Scan => {
            let targets = Daemon::new(config)?.scan().await;
            ui::print_scan(&targets);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins; otherwise info for the daemon and HTTP layer, or debug with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "vaultd=debug,tower_http=debug"
    } else {
        "vaultd=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config: DaemonConfig) -> Result<()> {
    let running = Daemon::new(config)?.start().await?;
    daemon::shutdown_signal().await;
    running.shutdown().await?;
    Ok(())
}

async fn process(url: &str, target: &str, wait: bool) -> Result<()> {
    let client = DaemonClient::new(url)?;
    let Some(enqueued) = reachable(url, client.process(target).await)? else {
        return Ok(());
    };

    if enqueued.created {
        println!("Enqueued {target} as job {}", enqueued.job_id);
    } else {
        println!("{target} is already queued as job {}", enqueued.job_id);
    }
    if !wait {
        return Ok(());
    }

    let mut progress = JobProgress::start(target);
    loop {
        match reachable(url, client.job(&enqueued.job_id).await)? {
            Some(Some(job)) if job.state.is_terminal() => {
                progress.complete(&job);
                return Ok(());
            }
            Some(Some(job)) => progress.update(&job),
            Some(None) => {
                progress.abandon("job was evicted before it finished");
                return Ok(());
            }
            None => {
                progress.abandon("lost connection to the daemon");
                return Ok(());
            }
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// Turns an unreachable daemon into a warning and `None`; other errors propagate.
fn reachable<T>(url: &str, result: Result<T, ClientError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_unreachable() => {
            ui::warn_unreachable(url);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
