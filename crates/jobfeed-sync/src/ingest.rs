//! Sequential batch ingestion through the reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;

use jobfeed_adapters::RecordSource;
use jobfeed_core::RawJobRecord;
use jobfeed_storage::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounters {
    pub total_seen: usize,
    pub inserted: usize,
    pub url_duplicates: usize,
    pub fuzzy_duplicates_discarded: usize,
    pub superseded: usize,
    pub invalid: usize,
}

impl SourceCounters {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Inserted(_) => self.inserted += 1,
            ReconcileOutcome::SkippedUrlDuplicate(_) => self.url_duplicates += 1,
            ReconcileOutcome::SkippedFuzzyDuplicateLowerPriority(_) => {
                self.fuzzy_duplicates_discarded += 1
            }
            ReconcileOutcome::SupersededByPriority(_) => self.superseded += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_seen: usize,
    pub inserted: usize,
    pub url_duplicates: usize,
    pub fuzzy_duplicates_discarded: usize,
    pub superseded: usize,
    pub invalid: usize,
    pub by_source: BTreeMap<String, SourceCounters>,
    /// Registry sources that could not be loaded and were skipped.
    pub failed_sources: Vec<String>,
}

impl BatchStats {
    fn seen(&mut self, source: &str) {
        self.total_seen += 1;
        self.by_source.entry(source.to_string()).or_default().total_seen += 1;
    }

    fn record(&mut self, source: &str, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Inserted(_) => self.inserted += 1,
            ReconcileOutcome::SkippedUrlDuplicate(_) => self.url_duplicates += 1,
            ReconcileOutcome::SkippedFuzzyDuplicateLowerPriority(_) => {
                self.fuzzy_duplicates_discarded += 1
            }
            ReconcileOutcome::SupersededByPriority(_) => self.superseded += 1,
        }
        self.by_source.entry(source.to_string()).or_default().record(outcome);
    }

    fn invalid(&mut self, source: &str) {
        self.invalid += 1;
        self.by_source.entry(source.to_string()).or_default().invalid += 1;
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The store failed mid-batch. Records before the failure are committed; `stats`
    /// covers exactly those.
    #[error("store failure after {} records: {source}", .stats.total_seen)]
    Store {
        stats: BatchStats,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    pub fn stats(&self) -> &BatchStats {
        match self {
            IngestError::Store { stats, .. } => stats,
        }
    }
}

pub struct BatchProcessor {
    reconciler: Arc<Reconciler>,
}

impl BatchProcessor {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Reconcile `raws` one at a time, in order. Invalid records are counted and skipped.
    pub async fn ingest_batch(&self, raws: &[RawJobRecord]) -> Result<BatchStats, IngestError> {
        let mut stats = BatchStats::default();
        self.ingest_into(raws, &mut stats).await.map(|()| stats)
    }

    /// Load each source in order and ingest its records. A source that fails to load is
    /// logged, listed in `failed_sources` and skipped.
    pub async fn ingest_sources(
        &self,
        sources: &[Box<dyn RecordSource>],
    ) -> Result<BatchStats, IngestError> {
        let mut stats = BatchStats::default();
        for source in sources {
            let records = match source.load().await {
                Ok(records) => records,
                Err(err) => {
                    warn!(source = %source.source_id(), error = %err, "source failed to load; skipping");
                    stats.failed_sources.push(source.source_id().to_string());
                    continue;
                }
            };
            info!(source = %source.source_id(), records = records.len(), "ingesting source");
            self.ingest_into(&records, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn ingest_into(
        &self,
        raws: &[RawJobRecord],
        stats: &mut BatchStats,
    ) -> Result<(), IngestError> {
        for (index, raw) in raws.iter().enumerate() {
            stats.seen(&raw.source);
            match self.reconciler.reconcile(raw).await {
                Ok(outcome) => {
                    debug!(
                        source = %raw.source,
                        record_id = %outcome.record_id(),
                        outcome = outcome.as_str(),
                        "reconciled"
                    );
                    stats.record(&raw.source, &outcome);
                }
                Err(ReconcileError::InvalidRecord { field }) => {
                    warn!(source = %raw.source, index, %field, url = %raw.url, "skipping invalid record");
                    stats.invalid(&raw.source);
                }
                Err(ReconcileError::Store(source)) => {
                    return Err(IngestError::Store {
                        stats: std::mem::take(stats),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}
