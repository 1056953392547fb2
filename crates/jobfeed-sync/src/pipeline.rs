//! One pipeline run: ingest every enabled source, then score what is still unscored.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_adapters::{source_from_registry, RecordSource};
use jobfeed_core::SourcePriorityTable;
use jobfeed_storage::{ArtifactStore, CanonicalStore, MemoryStore, PgCanonicalStore};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{SourceRegistry, SyncConfig};
use crate::documents::BriefDocumentGenerator;
use crate::ingest::{BatchProcessor, BatchStats};
use crate::oracle::HttpScoringOracle;
use crate::prefilter::{PreFilter, PreFilterRules};
use crate::reconcile::Reconciler;
use crate::scoring::{
    DocumentGenerator, OracleError, OracleVerdict, RouterConfig, ScoreSelector, ScoringOracle,
    ScoringRouter, ScoringStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Ingest,
    Scoring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// A stage hit a store failure; its counters cover the work committed before it.
    Partial { stage: RunStage, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ingest: BatchStats,
    pub scoring: ScoringStats,
    pub status: RunStatus,
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        *self == RunStatus::Completed
    }
}

impl PipelineRun {
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "run_id={} status={} ingested={} inserted={} superseded={} invalid={} failed_sources={} scored={} pre_filtered={} high={} medium={} low={} oracle_failures={} documents={}",
            self.run_id,
            match &self.status {
                RunStatus::Completed => "completed",
                RunStatus::Partial { .. } => "partial",
            },
            self.ingest.total_seen,
            self.ingest.inserted,
            self.ingest.superseded,
            self.ingest.invalid,
            self.ingest.failed_sources.len(),
            self.scoring.scored_ok,
            self.scoring.pre_filtered,
            self.scoring.tier_counts.high,
            self.scoring.tier_counts.medium,
            self.scoring.tier_counts.low,
            self.scoring.oracle_failures,
            self.scoring.documents_generated,
        )
    }
}

/// Where a run's raw records come from.
pub enum SourcePlan {
    /// `sources.yaml`, re-read at the start of every run. Relative paths resolve against `root`.
    Registry { path: PathBuf, root: PathBuf },
    Fixed(Vec<Box<dyn RecordSource>>),
}

/// Stand-in used when no oracle endpoint is configured; every call fails and records stay
/// unscored.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredOracle;

#[async_trait]
impl ScoringOracle for UnconfiguredOracle {
    async fn score(&self, _description: &str, _context: &str) -> Result<OracleVerdict, OracleError> {
        Err(OracleError::Transport("no scoring oracle configured (JOBFEED_ORACLE_URL)".into()))
    }
}

pub struct PipelineCoordinator {
    processor: BatchProcessor,
    router: ScoringRouter,
    oracle: Arc<dyn ScoringOracle>,
    documents: Arc<dyn DocumentGenerator>,
    sources: SourcePlan,
    reports_dir: Option<PathBuf>,
    run_lock: Mutex<()>,
}

impl PipelineCoordinator {
    pub fn new(
        processor: BatchProcessor,
        router: ScoringRouter,
        oracle: Arc<dyn ScoringOracle>,
        documents: Arc<dyn DocumentGenerator>,
        sources: SourcePlan,
    ) -> Self {
        Self {
            processor,
            router,
            oracle,
            documents,
            sources,
            reports_dir: None,
            run_lock: Mutex::new(()),
        }
    }

    /// Write `<reports_dir>/<run_id>/run.json` after each run.
    pub fn with_reports_dir(mut self, reports_dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(reports_dir.into());
        self
    }

    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let priorities = SourcePriorityTable::standard();
        priorities.validate().context("validating source priority table")?;

        let store: Arc<dyn CanonicalStore> = match &config.database_url {
            Some(url) => {
                let pg = PgCanonicalStore::connect(url)
                    .await
                    .context("connecting to DATABASE_URL")?;
                pg.migrate().await.context("migrating jobs schema")?;
                Arc::new(pg)
            }
            None => {
                warn!("DATABASE_URL not set; using an in-memory store for this process");
                Arc::new(MemoryStore::new())
            }
        };

        let reconciler = Reconciler::new(store.clone())
            .with_policy(config.supersede_policy)
            .with_priority_table(priorities);
        let processor = BatchProcessor::new(Arc::new(reconciler));

        let router_config = RouterConfig {
            thresholds: config.thresholds,
            concurrency: config.scoring_concurrency,
            oracle_timeout: config.oracle.timeout,
        };
        let router = ScoringRouter::new(store, router_config)
            .context("validating tier thresholds")?
            .with_profile_context(load_profile(&config.profile_path).await?)
            .with_prefilter(PreFilter::new(
                &PreFilterRules::load(&config.prefilter_path).await?,
            ));

        let oracle: Arc<dyn ScoringOracle> =
            match HttpScoringOracle::from_config(&config.oracle, config.scoring_concurrency)? {
                Some(oracle) => Arc::new(oracle),
                None => {
                    warn!("JOBFEED_ORACLE_URL not set; scoring will leave records unscored");
                    Arc::new(UnconfiguredOracle)
                }
            };
        let documents = Arc::new(BriefDocumentGenerator::new(ArtifactStore::new(
            config.artifacts_dir.clone(),
        )));

        let sources = SourcePlan::Registry {
            path: config.registry_path(),
            root: config.workspace_root.clone(),
        };

        Ok(Self::new(processor, router, oracle, documents, sources)
            .with_reports_dir(config.reports_dir()))
    }

    pub fn router(&self) -> &ScoringRouter {
        &self.router
    }

    /// Ingest, then score. Runs never overlap; a second caller waits for the first.
    pub async fn run_once(&self) -> Result<PipelineRun> {
        let _running = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        async {
            let (ingest, mut status) = self.ingest_stage().await?;
            let scoring = if status == RunStatus::Completed {
                let (scoring, scoring_status) = self.scoring_stage(ScoreSelector::Unscored).await;
                status = scoring_status;
                scoring
            } else {
                warn!("skipping scoring after ingest store failure");
                ScoringStats::default()
            };

            let run = PipelineRun {
                run_id,
                started_at,
                finished_at: Utc::now(),
                ingest,
                scoring,
                status,
            };
            if let Some(dir) = &self.reports_dir {
                write_run_report(dir, &run).await?;
            }
            info!(summary = %run.summary_line(), "pipeline run finished");
            Ok(run)
        }
        .instrument(info_span!("pipeline_run", %run_id))
        .await
    }

    /// Ingest only; no scoring.
    pub async fn ingest_once(&self) -> Result<(BatchStats, RunStatus)> {
        let _running = self.run_lock.lock().await;
        self.ingest_stage().await
    }

    /// Score only, over the chosen selection.
    pub async fn score_once(&self, selector: ScoreSelector) -> (ScoringStats, RunStatus) {
        let _running = self.run_lock.lock().await;
        self.scoring_stage(selector).await
    }

    async fn ingest_stage(&self) -> Result<(BatchStats, RunStatus)> {
        let registry_sources;
        let sources: &[Box<dyn RecordSource>] = match &self.sources {
            SourcePlan::Fixed(sources) => sources,
            SourcePlan::Registry { path, root } => {
                let registry = SourceRegistry::load(path).await?;
                registry.warn_unknown_platforms(&SourcePriorityTable::standard());
                registry_sources = registry
                    .enabled()
                    .map(|entry| source_from_registry(entry, root))
                    .collect::<Vec<_>>();
                &registry_sources
            }
        };

        Ok(match self.processor.ingest_sources(sources).await {
            Ok(stats) => (stats, RunStatus::Completed),
            Err(err) => {
                error!(error = %err, "ingest aborted on store failure");
                (
                    err.stats().clone(),
                    RunStatus::Partial {
                        stage: RunStage::Ingest,
                        error: err.to_string(),
                    },
                )
            }
        })
    }

    async fn scoring_stage(&self, selector: ScoreSelector) -> (ScoringStats, RunStatus) {
        match self
            .router
            .score_pending(selector, self.oracle.as_ref(), self.documents.as_ref())
            .await
        {
            Ok(stats) => (stats, RunStatus::Completed),
            Err(err) => {
                error!(error = %err, "scoring aborted on store failure");
                (
                    *err.stats(),
                    RunStatus::Partial {
                        stage: RunStage::Scoring,
                        error: err.to_string(),
                    },
                )
            }
        }
    }
}

async fn load_profile(path: &Path) -> Result<String> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "candidate profile not found; scoring without profile context");
            Ok(String::new())
        }
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

pub async fn write_run_report(reports_dir: &Path, run: &PipelineRun) -> Result<PathBuf> {
    let run_dir = reports_dir.join(run.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;
    let path = run_dir.join("run.json");
    let bytes = serde_json::to_vec_pretty(run).context("serializing run report")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Cron scheduler that triggers `run_once` on both configured crons, or `None` when the
/// scheduler is disabled.
pub async fn maybe_build_scheduler(
    coordinator: Arc<PipelineCoordinator>,
    config: &SyncConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.sync_cron_1, &config.sync_cron_2] {
        let coordinator = coordinator.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let coordinator = coordinator.clone();
            Box::pin(async move {
                if let Err(err) = coordinator.run_once().await {
                    error!(error = %format!("{err:#}"), "scheduled pipeline run failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}

pub async fn run_pipeline_once_from_env() -> Result<PipelineRun> {
    let config = SyncConfig::from_env()?;
    let coordinator = PipelineCoordinator::from_config(&config).await?;
    coordinator.run_once().await
}
