//! Verso command-line runner
//!
//! Reads a numbered study document, retrieves supporting passages for
//! every section and refines them against the LLM judge.

mod app;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use verso_agent::{parse_document, CancellationToken, RunReport};
use verso_config::{load_settings_from, Settings};

use app::App;

#[derive(Parser, Debug)]
#[command(name = "verso", version, about = "Retrieve and refine passages for a study document")]
struct Cli {
    /// Study document (plain text with numbered sections)
    input: PathBuf,

    /// Configuration directory
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Environment overlay (`<config_dir>/<env>.yaml`)
    #[arg(short, long, env = "VERSO_ENV")]
    env: Option<String>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the mode decision and pursue quality on every section
    #[arg(long)]
    aggressive: bool,

    /// Persist strategies that improve a section
    #[arg(long)]
    learn: bool,

    /// Items per section
    #[arg(short = 'k', long)]
    items: Option<usize>,

    /// Sections processed concurrently
    #[arg(long)]
    concurrency: Option<usize>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if self.aggressive {
            settings.refinement.force_aggressive = true;
        }
        if self.learn {
            settings.strategy.learning_enabled = true;
        }
        if let Some(k) = self.items {
            settings.retrieval.items_per_section = k;
        }
        if let Some(n) = self.concurrency {
            settings.pipeline.max_concurrent_sections = n;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match load_settings_from(&cli.config_dir, cli.env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!(
                "Failed to load configuration from {}: {}. Using defaults.",
                cli.config_dir.display(),
                e
            );
            Settings::default()
        }
    };
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    init_tracing(&settings);

    let text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let document = parse_document(&text);
    if document.is_empty() {
        tracing::warn!(input = %cli.input.display(), "No numbered sections found");
    }
    tracing::info!(
        title = document.title.as_deref().unwrap_or(""),
        sections = document.sections.len(),
        "Parsed document"
    );

    let app = App::build(&settings).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight sections");
            on_signal.cancel();
        }
    });

    let report = app.runner.run(&document, &cancel).await;
    log_summary(&report);
    tracing::debug!(strategies = app.strategies.len(), "Strategy store after run");

    let json = serde_json::to_string_pretty(&report).context("serializing report")?;
    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn log_summary(report: &RunReport) {
    tracing::info!(
        sections = report.sections.len(),
        skipped = report.skipped,
        flagged = report.flagged,
        mean_score = ?report.mean_score,
        session_strategies = report.session_strategies.len(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed_ms,
        "Run complete"
    );
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("verso={}", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    // Logs go to stderr so the report can be piped from stdout
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    subscriber.with(fmt_layer).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::try_parse_from([
            "verso",
            "study.txt",
            "--aggressive",
            "--learn",
            "-k",
            "8",
            "--concurrency",
            "2",
        ])
        .unwrap();

        let mut settings = Settings::default();
        cli.apply(&mut settings);

        assert_eq!(cli.input, PathBuf::from("study.txt"));
        assert_eq!(cli.config_dir, PathBuf::from("config"));
        assert!(settings.refinement.force_aggressive);
        assert!(settings.strategy.learning_enabled);
        assert_eq!(settings.retrieval.items_per_section, 8);
        assert_eq!(settings.pipeline.max_concurrent_sections, 2);
    }

    #[test]
    fn test_defaults_leave_settings_untouched() {
        let cli = Cli::try_parse_from(["verso", "study.txt"]).unwrap();
        let mut settings = Settings::default();
        cli.apply(&mut settings);

        assert!(!settings.refinement.force_aggressive);
        assert!(!settings.strategy.learning_enabled);
        assert_eq!(settings.retrieval.items_per_section, 15);
    }

    #[test]
    fn test_input_is_required() {
        assert!(Cli::try_parse_from(["verso"]).is_err());
    }
}
