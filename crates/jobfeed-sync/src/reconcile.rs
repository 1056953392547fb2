//! Decides what happens to each incoming raw record: insert, discard, or supersede.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use jobfeed_core::{
    compute_fuzzy_key, compute_url_key, CanonicalJobRecord, RawJobRecord, RequiredField,
    SourcePriorityTable,
};
use jobfeed_storage::{CanonicalStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    Inserted(Uuid),
    SkippedUrlDuplicate(Uuid),
    SkippedFuzzyDuplicateLowerPriority(Uuid),
    SupersededByPriority(Uuid),
}

impl ReconcileOutcome {
    pub fn record_id(&self) -> Uuid {
        match self {
            ReconcileOutcome::Inserted(id)
            | ReconcileOutcome::SkippedUrlDuplicate(id)
            | ReconcileOutcome::SkippedFuzzyDuplicateLowerPriority(id)
            | ReconcileOutcome::SupersededByPriority(id) => *id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Inserted(_) => "inserted",
            ReconcileOutcome::SkippedUrlDuplicate(_) => "skipped_url_duplicate",
            ReconcileOutcome::SkippedFuzzyDuplicateLowerPriority(_) => {
                "skipped_fuzzy_duplicate_lower_priority"
            }
            ReconcileOutcome::SupersededByPriority(_) => "superseded_by_priority",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid record: {field} is empty")]
    InvalidRecord { field: RequiredField },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happens to an existing score when a higher-priority source supersedes the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedePolicy {
    /// Keep score, reasoning and tier as they are.
    #[default]
    PreserveScore,
    /// Reset scoring to UNSCORED so the next scoring pass sees the new content.
    InvalidateScore,
}

#[derive(Debug, Error)]
#[error("unknown supersede policy {0:?} (expected `preserve` or `invalidate`)")]
pub struct ParseSupersedePolicyError(String);

impl FromStr for SupersedePolicy {
    type Err = ParseSupersedePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preserve" | "preserve_score" => Ok(SupersedePolicy::PreserveScore),
            "invalidate" | "invalidate_score" => Ok(SupersedePolicy::InvalidateScore),
            _ => Err(ParseSupersedePolicyError(s.to_string())),
        }
    }
}

impl fmt::Display for SupersedePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SupersedePolicy::PreserveScore => "preserve",
            SupersedePolicy::InvalidateScore => "invalidate",
        })
    }
}

/// One async mutex per key, created on first use and dropped once nobody holds or awaits it.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys`. Keys are taken in sorted order, so two callers with
    /// overlapping key sets cannot deadlock.
    pub async fn lock<I, K>(&self, keys: I) -> KeyedGuard<'_>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let slot = self.slot(key);
            guards.push(slot.lock_owned().await);
        }
        KeyedGuard {
            owner: self,
            keys,
            guards,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, keys: &[String]) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(key);
            }
        }
    }
}

pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        self.owner.release(&self.keys);
    }
}

/// Applies the dedup rules against a canonical store.
///
/// The read-check-write for one raw record runs under locks on its url_key and fuzzy_key,
/// so concurrent callers never both insert the same identity.
pub struct Reconciler {
    store: Arc<dyn CanonicalStore>,
    priorities: SourcePriorityTable,
    policy: SupersedePolicy,
    locks: KeyedLocks,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CanonicalStore>) -> Self {
        Self {
            store,
            priorities: SourcePriorityTable::standard(),
            policy: SupersedePolicy::default(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_policy(mut self, policy: SupersedePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_priority_table(mut self, priorities: SourcePriorityTable) -> Self {
        self.priorities = priorities;
        self
    }

    pub fn policy(&self) -> SupersedePolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn CanonicalStore> {
        &self.store
    }

    pub async fn reconcile(&self, raw: &RawJobRecord) -> Result<ReconcileOutcome, ReconcileError> {
        if let Some(field) = raw.missing_required_field() {
            return Err(ReconcileError::InvalidRecord { field });
        }

        let url_key = compute_url_key(&raw.url);
        let fuzzy_key = compute_fuzzy_key(&raw.company, &raw.title);
        let _guard = self
            .locks
            .lock([format!("url:{url_key}"), format!("fuzzy:{fuzzy_key}")])
            .await;

        if let Some(existing) = self.store.find_by_url_key(&url_key).await? {
            debug!(record_id = %existing.id, url = %raw.url, "url duplicate");
            return Ok(ReconcileOutcome::SkippedUrlDuplicate(existing.id));
        }

        let incoming_priority = self.priorities.priority_for(&raw.source);
        let now = Utc::now();

        match self.store.find_by_fuzzy_key(&fuzzy_key).await? {
            None => {
                let record = CanonicalJobRecord::from_raw(raw, incoming_priority, now);
                self.store.insert(&record).await?;
                Ok(ReconcileOutcome::Inserted(record.id))
            }
            Some(mut existing) if incoming_priority < existing.source_priority => {
                debug!(
                    record_id = %existing.id,
                    from = %existing.source,
                    to = %raw.source,
                    "superseding with higher-priority source"
                );
                existing.supersede_with(raw, incoming_priority, now);
                if self.policy == SupersedePolicy::InvalidateScore {
                    existing.clear_score(now);
                }
                self.store.update(&existing).await?;
                Ok(ReconcileOutcome::SupersededByPriority(existing.id))
            }
            Some(existing) => Ok(ReconcileOutcome::SkippedFuzzyDuplicateLowerPriority(existing.id)),
        }
    }
}
