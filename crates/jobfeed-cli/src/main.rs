use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobfeed_storage::PgCanonicalStore;
use jobfeed_sync::{maybe_build_scheduler, PipelineCoordinator, RunStatus, ScoreSelector, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jobfeed")]
#[command(about = "Job feed ingestion, reconciliation and tiered scoring")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest all enabled sources, then score unscored records.
    Run,
    /// Ingest only.
    Ingest,
    /// Score only.
    Score {
        /// Re-score every record, not just unscored ones.
        #[arg(long)]
        all: bool,
    },
    /// Apply database migrations (requires DATABASE_URL).
    Migrate,
    /// Run on the configured crons until interrupted.
    Schedule,
}

/// Exit code when a stage stopped on a store failure; setup errors exit 1 through `Err`.
const EXIT_PARTIAL: u8 = 2;

fn exit_status(status: &RunStatus) -> u8 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::Partial { .. } => EXIT_PARTIAL,
    }
}

fn status_label(status: &RunStatus) -> String {
    match status {
        RunStatus::Completed => "completed".to_string(),
        RunStatus::Partial { stage, error } => format!("partial ({stage:?}: {error})"),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobfeed=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    let status = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let coordinator = PipelineCoordinator::from_config(&config).await?;
            let run = coordinator.run_once().await?;
            println!("pipeline {}", run.summary_line());
            run.status
        }
        Commands::Ingest => {
            let coordinator = PipelineCoordinator::from_config(&config).await?;
            let (stats, status) = coordinator.ingest_once().await?;
            println!(
                "ingest {}: seen={} inserted={} url_dup={} fuzzy_dup={} superseded={} invalid={} failed_sources={}",
                status_label(&status),
                stats.total_seen,
                stats.inserted,
                stats.url_duplicates,
                stats.fuzzy_duplicates_discarded,
                stats.superseded,
                stats.invalid,
                stats.failed_sources.len()
            );
            status
        }
        Commands::Score { all } => {
            let coordinator = PipelineCoordinator::from_config(&config).await?;
            let selector = if all { ScoreSelector::All } else { ScoreSelector::Unscored };
            let (stats, status) = coordinator.score_once(selector).await;
            println!(
                "score {}: selected={} scored={} pre_filtered={} high={} medium={} low={} oracle_failures={} documents={} document_failures={}",
                status_label(&status),
                stats.total_selected,
                stats.scored_ok,
                stats.pre_filtered,
                stats.tier_counts.high,
                stats.tier_counts.medium,
                stats.tier_counts.low,
                stats.oracle_failures,
                stats.documents_generated,
                stats.document_failures
            );
            status
        }
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to migrate")?;
            PgCanonicalStore::connect(url).await?.migrate().await?;
            println!("migrations applied");
            RunStatus::Completed
        }
        Commands::Schedule => {
            let coordinator = Arc::new(PipelineCoordinator::from_config(&config).await?);
            let Some(mut sched) = maybe_build_scheduler(coordinator.clone(), &config).await? else {
                anyhow::bail!("scheduler disabled; set JOBFEED_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron_1 = %config.sync_cron_1, cron_2 = %config.sync_cron_2, "scheduler started");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            coordinator.router().cancellation_token().cancel();
            sched.shutdown().await.context("stopping scheduler")?;
            RunStatus::Completed
        }
    };

    if !status.is_completed() {
        eprintln!("run finished partially: {}", status_label(&status));
    }
    Ok(ExitCode::from(exit_status(&status)))
}
