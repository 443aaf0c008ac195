//! Saída de terminal da CLI: spinners e tabelas coloridas.
//!
//! Usa `indicatif` para o spinner de `vaultd process --wait` e `console` para
//! colorir estados de jobs e o status de saúde do daemon.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::QueueResponse;
use crate::health::{HealthSnapshot, HealthStatus};
use crate::queue::{Job, JobState};

/// Indicador visual de progresso enquanto um job é acompanhado via polling.
///
/// Exibe um spinner com o estado atual e mensagens coloridas para sucesso
/// (verde), falha (vermelho) e retentativa (amarelo).
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    last_attempt: u32,
}

impl JobProgress {
    /// Inicia o spinner para o alvo informado.
    pub fn start(target: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("queued: {target}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            last_attempt: 0,
        }
    }

    /// Atualiza o spinner com o estado mais recente do job.
    ///
    /// Cada nova tentativa que falhou é impressa uma única vez.
    pub fn update(&mut self, job: &Job) {
        if job.state == JobState::Retrying && job.attempts > self.last_attempt {
            self.last_attempt = job.attempts;
            self.pb.println(format!(
                "  {} Attempt {} failed: {}",
                self.yellow.apply_to("↻"),
                job.attempts,
                job.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
        self.pb.set_message(format!(
            "{}: {} (attempt {})",
            job.state, job.target, job.attempts
        ));
    }

    /// Finaliza o spinner e exibe o resultado final do job.
    pub fn complete(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.state {
            JobState::Succeeded if job.partial => println!(
                "  {} {} enriched (partial) after {} attempt(s)",
                self.yellow.apply_to("✓"),
                job.target,
                job.attempts
            ),
            JobState::Succeeded => println!(
                "  {} {} enriched after {} attempt(s)",
                self.green.apply_to("✓"),
                job.target,
                job.attempts
            ),
            _ => println!(
                "  {} {} failed: {}",
                self.red.apply_to("✗"),
                job.target,
                job.last_error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    /// Encerra o spinner quando o job sumiu da fila antes de terminar.
    pub fn abandon(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.yellow.apply_to("!"));
    }
}

fn state_style(state: JobState) -> Style {
    match state {
        JobState::Succeeded => Style::new().green(),
        JobState::Failed => Style::new().red(),
        JobState::Retrying => Style::new().yellow(),
        JobState::Running => Style::new().cyan(),
        JobState::Pending => Style::new().dim(),
    }
}

/// Imprime a fila em formato de tabela.
pub fn print_queue(queue: &QueueResponse) {
    let bold = Style::new().bold();
    let c = &queue.counts;
    println!(
        "{} pending {} · running {} · retrying {} · succeeded {} · failed {}",
        bold.apply_to("Queue"),
        c.pending,
        c.running,
        c.retrying,
        c.succeeded,
        c.failed
    );
    if queue.jobs.is_empty() {
        println!("  (empty)");
        return;
    }
    for job in &queue.jobs {
        let state = format!("{:<9}", job.state.to_string());
        println!(
            "  {} {:>2}×  {}  {}",
            state_style(job.state).apply_to(state),
            job.attempts,
            job.target,
            job.last_error
                .as_deref()
                .map(|e| Style::new().dim().apply_to(format!("({e})")).to_string())
                .unwrap_or_default()
        );
    }
}

/// Imprime o snapshot de saúde.
pub fn print_health(health: &HealthSnapshot) {
    let status = match health.status {
        HealthStatus::Healthy => Style::new().green().bold().apply_to("healthy"),
        HealthStatus::Degraded => Style::new().red().bold().apply_to("degraded"),
    };
    println!("Status:          {status}");
    println!("Queue depth:     {}", health.queue_depth);
    println!("Active workers:  {}", health.active_workers);
    println!("Uptime:          {}s", health.uptime_secs);
    println!(
        "Last success:    {}",
        health
            .last_successful_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(err) = &health.last_error {
        println!("Last error:      {}", Style::new().yellow().apply_to(err));
    }
    for reason in &health.reasons {
        println!("  {} {reason}", Style::new().red().apply_to("•"));
    }
}

/// Lista os alvos encontrados por `vaultd scan`.
pub fn print_scan(targets: &[String]) {
    if targets.is_empty() {
        println!("No notes need enrichment.");
        return;
    }
    println!(
        "{} note(s) need enrichment:",
        Style::new().bold().apply_to(targets.len())
    );
    for target in targets {
        println!("  {target}");
    }
}

/// Aviso exibido quando o daemon não responde; não é tratado como erro.
pub fn warn_unreachable(url: &str) {
    eprintln!(
        "{} vaultd is not reachable at {url}; the note will be picked up on the next start",
        Style::new().yellow().bold().apply_to("warning:")
    );
}
