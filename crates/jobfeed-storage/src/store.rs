//! The canonical store contract and its in-process implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_core::{CanonicalJobRecord, ScoringState};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached. Fatal to the in-flight operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{index} conflict: {detail}")]
    Conflict { index: String, detail: String },
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Sole source of truth for canonical records, keyed by id with secondary lookups on
/// `url_key` and `fuzzy_key`. Both keys are unique across the store.
///
/// Implementations make each call atomic on its own; the read-check-write sequence of a
/// reconcile is serialized by the caller.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    async fn find_by_url_key(&self, url_key: &str) -> Result<Option<CanonicalJobRecord>, StoreError>;

    async fn find_by_fuzzy_key(
        &self,
        fuzzy_key: &str,
    ) -> Result<Option<CanonicalJobRecord>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<CanonicalJobRecord>, StoreError>;

    async fn insert(&self, record: &CanonicalJobRecord) -> Result<(), StoreError>;

    /// Replace the stored record with the same id.
    async fn update(&self, record: &CanonicalJobRecord) -> Result<(), StoreError>;

    /// Write only the scoring columns and `updated_at`, leaving content and identity as they
    /// are now. Returns the record as stored afterwards.
    async fn update_scoring(
        &self,
        id: Uuid,
        scoring: &ScoringState,
        updated_at: DateTime<Utc>,
    ) -> Result<CanonicalJobRecord, StoreError>;

    /// Records with no score, ordered by `created_at` then `id`.
    async fn list_unscored(&self) -> Result<Vec<CanonicalJobRecord>, StoreError>;

    /// Every record, ordered by `created_at` then `id`.
    async fn list_all(&self) -> Result<Vec<CanonicalJobRecord>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<CanonicalJobRecord>,
    by_id: HashMap<Uuid, usize>,
    by_url_key: HashMap<String, Uuid>,
    by_fuzzy_key: HashMap<String, Uuid>,
}

impl MemoryState {
    fn check_unique(&self, record: &CanonicalJobRecord) -> Result<(), StoreError> {
        if let Some(holder) = self.by_url_key.get(&record.url_key) {
            if *holder != record.id {
                return Err(StoreError::Conflict {
                    index: "url_key".into(),
                    detail: format!("{} already held by {holder}", record.url_key),
                });
            }
        }
        if let Some(holder) = self.by_fuzzy_key.get(&record.fuzzy_key) {
            if *holder != record.id {
                return Err(StoreError::Conflict {
                    index: "fuzzy_key".into(),
                    detail: format!("{} already held by {holder}", record.fuzzy_key),
                });
            }
        }
        Ok(())
    }

    fn lookup(&self, id: Option<&Uuid>) -> Option<CanonicalJobRecord> {
        id.and_then(|id| self.by_id.get(id))
            .map(|idx| self.records[*idx].clone())
    }

    fn sorted(&self, mut records: Vec<CanonicalJobRecord>) -> Vec<CanonicalJobRecord> {
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }
}

/// In-process store backed by a `tokio` read/write lock. Used for tests and for single-run
/// pipelines without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CanonicalStore for MemoryStore {
    async fn find_by_url_key(&self, url_key: &str) -> Result<Option<CanonicalJobRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.lookup(state.by_url_key.get(url_key)))
    }

    async fn find_by_fuzzy_key(
        &self,
        fuzzy_key: &str,
    ) -> Result<Option<CanonicalJobRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.lookup(state.by_fuzzy_key.get(fuzzy_key)))
    }

    async fn get(&self, id: Uuid) -> Result<Option<CanonicalJobRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.lookup(Some(&id)))
    }

    async fn insert(&self, record: &CanonicalJobRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.by_id.contains_key(&record.id) {
            return Err(StoreError::Conflict {
                index: "id".into(),
                detail: format!("{} already exists", record.id),
            });
        }
        state.check_unique(record)?;

        let idx = state.records.len();
        state.by_id.insert(record.id, idx);
        state.by_url_key.insert(record.url_key.clone(), record.id);
        state.by_fuzzy_key.insert(record.fuzzy_key.clone(), record.id);
        state.records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &CanonicalJobRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let idx = *state
            .by_id
            .get(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;
        state.check_unique(record)?;

        let previous = std::mem::replace(&mut state.records[idx], record.clone());
        if previous.url_key != record.url_key {
            state.by_url_key.remove(&previous.url_key);
            state.by_url_key.insert(record.url_key.clone(), record.id);
        }
        if previous.fuzzy_key != record.fuzzy_key {
            state.by_fuzzy_key.remove(&previous.fuzzy_key);
            state.by_fuzzy_key.insert(record.fuzzy_key.clone(), record.id);
        }
        Ok(())
    }

    async fn update_scoring(
        &self,
        id: Uuid,
        scoring: &ScoringState,
        updated_at: DateTime<Utc>,
    ) -> Result<CanonicalJobRecord, StoreError> {
        let mut state = self.state.write().await;
        let idx = *state.by_id.get(&id).ok_or(StoreError::NotFound(id))?;
        let record = &mut state.records[idx];
        record
            .restore_scoring(scoring.score, scoring.reasoning.clone(), scoring.tier)
            .map_err(|e| StoreError::Corrupt(format!("rejected scoring state for {id}: {e}")))?;
        record.updated_at = updated_at;
        Ok(record.clone())
    }

    async fn list_unscored(&self) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        let state = self.state.read().await;
        let unscored = state
            .records
            .iter()
            .filter(|r| !r.is_scored())
            .cloned()
            .collect();
        Ok(state.sorted(unscored))
    }

    async fn list_all(&self) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sorted(state.records.clone()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use jobfeed_core::{RawJobRecord, TierThresholds};

    fn record(url: &str, company: &str, title: &str, minute: i64) -> CanonicalJobRecord {
        let created = Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap()
            + Duration::minutes(minute);
        CanonicalJobRecord::from_raw(&RawJobRecord::new("lever", url, title, company), 1, created)
    }

    #[tokio::test]
    async fn insert_and_lookup_by_both_keys() {
        let store = MemoryStore::new();
        let rec = record("https://x/1", "Acme", "AI Engineer", 0);
        store.insert(&rec).await.unwrap();

        let by_url = store.find_by_url_key(&rec.url_key).await.unwrap().unwrap();
        let by_fuzzy = store.find_by_fuzzy_key(&rec.fuzzy_key).await.unwrap().unwrap();
        assert_eq!(by_url.id, rec.id);
        assert_eq!(by_fuzzy.id, rec.id);
        assert!(store.find_by_url_key("missing").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() {
        let store = MemoryStore::new();
        store.insert(&record("https://x/1", "Acme", "AI Engineer", 0)).await.unwrap();

        let same_url = record("https://x/1", "Other", "Role", 1);
        assert!(matches!(
            store.insert(&same_url).await,
            Err(StoreError::Conflict { ref index, .. }) if index == "url_key"
        ));

        let same_fuzzy = record("https://x/2", "ACME", "ai engineer", 2);
        assert!(matches!(
            store.insert(&same_fuzzy).await,
            Err(StoreError::Conflict { ref index, .. }) if index == "fuzzy_key"
        ));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_moves_url_index() {
        let store = MemoryStore::new();
        let mut rec = record("https://x/2", "Acme", "AI Engineer", 0);
        store.insert(&rec).await.unwrap();
        let old_key = rec.url_key.clone();

        let better = RawJobRecord::new("greenhouse", "https://x/3", "AI Engineer", "Acme");
        rec.supersede_with(&better, 1, Utc::now());
        store.update(&rec).await.unwrap();

        assert!(store.find_by_url_key(&old_key).await.unwrap().is_none());
        let moved = store.find_by_url_key(&rec.url_key).await.unwrap().unwrap();
        assert_eq!(moved.id, rec.id);
        assert_eq!(moved.source, "greenhouse");
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_not_found() {
        let store = MemoryStore::new();
        let rec = record("https://x/1", "Acme", "AI Engineer", 0);
        assert!(matches!(store.update(&rec).await, Err(StoreError::NotFound(id)) if id == rec.id));
    }

    #[tokio::test]
    async fn scoring_update_keeps_newer_content() {
        let store = MemoryStore::new();
        let listed = record("https://x/2", "Acme", "AI Engineer", 0);
        store.insert(&listed).await.unwrap();

        let mut superseded = listed.clone();
        superseded.supersede_with(
            &RawJobRecord::new("lever", "https://x/3", "AI Engineer", "Acme"),
            1,
            Utc::now(),
        );
        store.update(&superseded).await.unwrap();

        let mut scored = listed.clone();
        scored.apply_score(70.0, "ok", &TierThresholds::default(), Utc::now());
        let stored = store
            .update_scoring(listed.id, &scored.scoring(), scored.updated_at)
            .await
            .unwrap();

        assert_eq!(stored.url, "https://x/3");
        assert_eq!(stored.url_key, superseded.url_key);
        assert_eq!(stored.score(), Some(70.0));
        assert_eq!(stored.tier(), jobfeed_core::Tier::Medium);
        assert_eq!(store.get(listed.id).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn scoring_update_of_unknown_record_is_not_found() {
        let store = MemoryStore::new();
        let rec = record("https://x/1", "Acme", "AI Engineer", 0);
        assert!(matches!(
            store.update_scoring(rec.id, &rec.scoring(), Utc::now()).await,
            Err(StoreError::NotFound(id)) if id == rec.id
        ));
    }

    #[tokio::test]
    async fn list_unscored_is_ordered_and_filtered() {
        let store = MemoryStore::new();
        let late = record("https://x/late", "Acme", "Late", 10);
        let early = record("https://x/early", "Acme", "Early", 1);
        let mut scored = record("https://x/scored", "Acme", "Scored", 5);
        scored.apply_score(70.0, "ok", &TierThresholds::default(), Utc::now());

        store.insert(&late).await.unwrap();
        store.insert(&scored).await.unwrap();
        store.insert(&early).await.unwrap();

        let unscored = store.list_unscored().await.unwrap();
        let titles: Vec<_> = unscored.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Early", "Late"]);

        let all = store.list_all().await.unwrap();
        let titles: Vec<_> = all.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Early", "Scored", "Late"]);
    }
}
