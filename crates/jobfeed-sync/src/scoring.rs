//! Tiered scoring: ask the oracle for a score, persist it with its tier, and hand HIGH-tier
//! records to the document generator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use jobfeed_core::{
    CanonicalJobRecord, ThresholdError, Tier, TierThresholds, MAX_SCORE, MIN_SCORE,
};
use jobfeed_storage::{CanonicalStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::prefilter::PreFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub score: f64,
    pub reasoning: String,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle transport failure: {0}")]
    Transport(String),
    #[error("oracle returned status {status}")]
    Status { status: u16 },
    #[error("oracle response unusable: {0}")]
    InvalidResponse(String),
}

/// External text classifier that rates a job description against the candidate profile.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    async fn score(&self, description: &str, context: &str) -> Result<OracleVerdict, OracleError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("rendering document for {record_id}: {reason}")]
    Render { record_id: Uuid, reason: String },
    #[error("writing document for {record_id}: {reason}")]
    Write { record_id: Uuid, reason: String },
}

/// Consumer of HIGH-tier decisions.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate(&self, record: &CanonicalJobRecord) -> Result<GeneratedDocument, DocumentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSelector {
    #[default]
    Unscored,
    All,
}

#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub thresholds: TierThresholds,
    pub concurrency: usize,
    pub oracle_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            thresholds: TierThresholds::default(),
            concurrency: 4,
            oracle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl TierCounts {
    fn add(&mut self, tier: Tier) {
        match tier {
            Tier::High => self.high += 1,
            Tier::Medium => self.medium += 1,
            Tier::Low => self.low += 1,
            Tier::Unscored => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringStats {
    pub total_selected: usize,
    pub scored_ok: usize,
    pub oracle_failures: usize,
    pub tier_counts: TierCounts,
    pub documents_generated: usize,
    pub document_failures: usize,
    /// Rejected by the pre-filter and stored at score 0 without an oracle call.
    pub pre_filtered: usize,
    /// Selected records never sent to the oracle because the run was cancelled.
    pub cancelled: usize,
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("store failure after {} scored records: {source}", .stats.scored_ok)]
    Store {
        stats: ScoringStats,
        #[source]
        source: StoreError,
    },
}

impl ScoringError {
    pub fn stats(&self) -> &ScoringStats {
        match self {
            ScoringError::Store { stats, .. } => stats,
        }
    }
}

enum RecordOutcome {
    PreFiltered,
    OracleFailed,
    Scored { tier: Tier, document: Option<bool> },
}

pub struct ScoringRouter {
    store: Arc<dyn CanonicalStore>,
    config: RouterConfig,
    profile_context: String,
    prefilter: PreFilter,
    cancel: CancellationToken,
}

impl ScoringRouter {
    pub fn new(store: Arc<dyn CanonicalStore>, config: RouterConfig) -> Result<Self, ThresholdError> {
        config.thresholds.validate()?;
        Ok(Self {
            store,
            config,
            profile_context: String::new(),
            prefilter: PreFilter::disabled(),
            cancel: CancellationToken::new(),
        })
    }

    /// Candidate profile text passed to the oracle alongside every description.
    pub fn with_profile_context(mut self, context: impl Into<String>) -> Self {
        self.profile_context = context.into();
        self
    }

    pub fn with_prefilter(mut self, prefilter: PreFilter) -> Self {
        self.prefilter = prefilter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Score the selected records with up to `concurrency` oracle calls in flight.
    ///
    /// Oracle and document failures are counted and skipped. A store failure stops the run
    /// and comes back with the counters gathered so far.
    pub async fn score_pending(
        &self,
        selector: ScoreSelector,
        oracle: &dyn ScoringOracle,
        documents: &dyn DocumentGenerator,
    ) -> Result<ScoringStats, ScoringError> {
        let mut stats = ScoringStats::default();
        let selected = match selector {
            ScoreSelector::Unscored => self.store.list_unscored().await,
            ScoreSelector::All => self.store.list_all().await,
        };
        let records = selected.map_err(|source| ScoringError::Store { stats, source })?;
        stats.total_selected = records.len();

        let cancel = self.cancel.clone();
        let mut outcomes = stream::iter(records)
            .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
            .map(|record| self.score_one(record, oracle, documents))
            .buffer_unordered(self.config.concurrency.max(1));

        let mut submitted = 0usize;
        while let Some(outcome) = outcomes.next().await {
            submitted += 1;
            match outcome {
                Ok(RecordOutcome::PreFiltered) => stats.pre_filtered += 1,
                Ok(RecordOutcome::OracleFailed) => stats.oracle_failures += 1,
                Ok(RecordOutcome::Scored { tier, document }) => {
                    stats.scored_ok += 1;
                    stats.tier_counts.add(tier);
                    match document {
                        Some(true) => stats.documents_generated += 1,
                        Some(false) => stats.document_failures += 1,
                        None => {}
                    }
                }
                Err(source) => {
                    return Err(ScoringError::Store { stats, source });
                }
            }
        }
        stats.cancelled = stats.total_selected - submitted;
        if stats.cancelled > 0 {
            warn!(cancelled = stats.cancelled, "scoring cancelled before all records were submitted");
        }
        Ok(stats)
    }

    async fn score_one(
        &self,
        mut record: CanonicalJobRecord,
        oracle: &dyn ScoringOracle,
        documents: &dyn DocumentGenerator,
    ) -> Result<RecordOutcome, StoreError> {
        let span = info_span!("oracle_call", record_id = %record.id, source = %record.source);
        async move {
            if let Some(reason) = self.prefilter.rejection(&record) {
                record.apply_score(
                    MIN_SCORE,
                    format!("Pre-filter: {reason}"),
                    &self.config.thresholds,
                    Utc::now(),
                );
                self.persist_scoring(&record).await?;
                debug!(%reason, "pre-filtered");
                return Ok(RecordOutcome::PreFiltered);
            }

            let description = oracle_description(&record);
            let timeout = self.config.oracle_timeout;
            let verdict = match tokio::time::timeout(timeout, oracle.score(&description, &self.profile_context)).await {
                Err(_) => Err(OracleError::Timeout(timeout)),
                Ok(result) => result.and_then(check_verdict),
            };
            let verdict = match verdict {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(error = %err, "oracle failed; record left unscored");
                    return Ok(RecordOutcome::OracleFailed);
                }
            };

            record.apply_score(verdict.score, verdict.reasoning, &self.config.thresholds, Utc::now());
            let record = self.persist_scoring(&record).await?;
            let tier = record.tier();
            debug!(score = verdict.score, tier = tier.as_str(), "scored");

            let document = if tier == Tier::High {
                match documents.generate(&record).await {
                    Ok(doc) => {
                        debug!(path = %doc.path.display(), "document generated");
                        Some(true)
                    }
                    Err(err) => {
                        warn!(error = %err, "document generation failed; score kept");
                        Some(false)
                    }
                }
            } else {
                None
            };
            Ok(RecordOutcome::Scored { tier, document })
        }
        .instrument(span)
        .await
    }

    /// Content may have been superseded while the oracle was thinking; only the scoring
    /// columns are written, and the returned record reflects what is stored now.
    async fn persist_scoring(
        &self,
        record: &CanonicalJobRecord,
    ) -> Result<CanonicalJobRecord, StoreError> {
        self.store
            .update_scoring(record.id, &record.scoring(), record.updated_at)
            .await
    }
}

/// Text sent to the oracle: the description, or `"{title} at {company}"` when there is none.
pub fn oracle_description(record: &CanonicalJobRecord) -> String {
    match record.description.as_deref().map(str::trim) {
        Some(description) if !description.is_empty() => description.to_string(),
        _ => format!("{} at {}", record.title.trim(), record.company.trim()),
    }
}

fn check_verdict(verdict: OracleVerdict) -> Result<OracleVerdict, OracleError> {
    if verdict.score.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&verdict.score) {
        Ok(verdict)
    } else {
        Err(OracleError::InvalidResponse(format!(
            "score {} outside [{MIN_SCORE}, {MAX_SCORE}]",
            verdict.score
        )))
    }
}
