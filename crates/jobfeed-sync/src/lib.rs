//! Ingestion, reconciliation, tiered scoring and run coordination for jobfeed.

pub mod config;
pub mod documents;
pub mod ingest;
pub mod oracle;
pub mod pipeline;
pub mod prefilter;
pub mod reconcile;
pub mod scoring;

pub use config::{OracleConfig, SourceRegistry, SyncConfig};
pub use documents::{render_brief, BriefDocumentGenerator};
pub use ingest::{BatchProcessor, BatchStats, IngestError, SourceCounters};
pub use oracle::{build_prompt, parse_verdict, HttpScoringOracle};
pub use pipeline::{
    maybe_build_scheduler, run_pipeline_once_from_env, write_run_report, PipelineCoordinator,
    PipelineRun, RunStage, RunStatus, SourcePlan, UnconfiguredOracle,
};
pub use prefilter::{PreFilter, PreFilterRules, DEFAULT_REJECT_KEYWORDS};
pub use reconcile::{
    KeyedLocks, ParseSupersedePolicyError, ReconcileError, ReconcileOutcome, Reconciler,
    SupersedePolicy,
};
pub use scoring::{
    oracle_description, DocumentError, DocumentGenerator, GeneratedDocument, OracleError,
    OracleVerdict, RouterConfig, ScoreSelector, ScoringError, ScoringOracle, ScoringRouter,
    ScoringStats, TierCounts,
};

pub const CRATE_NAME: &str = "jobfeed-sync";
