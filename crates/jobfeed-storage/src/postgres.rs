//! Postgres-backed canonical store (`jobs` table, see `migrations/`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_core::{CanonicalJobRecord, RawJobRecord, ScoringState, Tier};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{CanonicalStore, StoreError};

const COLUMNS: &str = "id, source, external_id, url, title, company, location, description, \
    posted_date, salary, salary_min, salary_max, url_key, fuzzy_key, source_priority, score, \
    score_reasoning, tier, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgCanonicalStore {
    pool: PgPool,
}

impl PgCanonicalStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Unavailable(format!("running migrations: {err}")))?;
        info!("jobs schema migrated");
        Ok(())
    }

    async fn fetch_optional(
        &self,
        clause: &str,
        key: &str,
    ) -> Result<Option<CanonicalJobRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE {clause} = $1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn fetch_list(&self, filter: &str) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs {filter} ORDER BY created_at, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl CanonicalStore for PgCanonicalStore {
    async fn find_by_url_key(&self, url_key: &str) -> Result<Option<CanonicalJobRecord>, StoreError> {
        self.fetch_optional("url_key", url_key).await
    }

    async fn find_by_fuzzy_key(
        &self,
        fuzzy_key: &str,
    ) -> Result<Option<CanonicalJobRecord>, StoreError> {
        self.fetch_optional("fuzzy_key", fuzzy_key).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<CanonicalJobRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert(&self, record: &CanonicalJobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source, external_id, url, title, company, location, description, posted_date,
                url_key, fuzzy_key, source_priority, score, score_reasoning, tier, decision_mode,
                created_at, updated_at, salary, salary_min, salary_max
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                      $19, $20, $21)
            "#,
        )
        .bind(record.id)
        .bind(&record.source)
        .bind(&record.external_id)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.description)
        .bind(&record.posted_date)
        .bind(&record.url_key)
        .bind(&record.fuzzy_key)
        .bind(i16::from(record.source_priority))
        .bind(record.score())
        .bind(record.score_reasoning())
        .bind(record.tier().as_str())
        .bind(record.decision_mode().as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.salary)
        .bind(record.salary_min)
        .bind(record.salary_max)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        debug!(record_id = %record.id, "inserted job");
        Ok(())
    }

    async fn update(&self, record: &CanonicalJobRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
               SET source = $2, external_id = $3, url = $4, title = $5, company = $6,
                   location = $7, description = $8, posted_date = $9, url_key = $10,
                   fuzzy_key = $11, source_priority = $12, score = $13, score_reasoning = $14,
                   tier = $15, decision_mode = $16, updated_at = $17, salary = $18,
                   salary_min = $19, salary_max = $20
             WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.source)
        .bind(&record.external_id)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.description)
        .bind(&record.posted_date)
        .bind(&record.url_key)
        .bind(&record.fuzzy_key)
        .bind(i16::from(record.source_priority))
        .bind(record.score())
        .bind(record.score_reasoning())
        .bind(record.tier().as_str())
        .bind(record.decision_mode().as_str())
        .bind(record.updated_at)
        .bind(&record.salary)
        .bind(record.salary_min)
        .bind(record.salary_max)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id));
        }
        Ok(())
    }

    async fn update_scoring(
        &self,
        id: Uuid,
        scoring: &ScoringState,
        updated_at: DateTime<Utc>,
    ) -> Result<CanonicalJobRecord, StoreError> {
        let sql = format!(
            "UPDATE jobs SET score = $2, score_reasoning = $3, tier = $4, decision_mode = $5, \
             updated_at = $6 WHERE id = $1 RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(scoring.score)
            .bind(&scoring.reasoning)
            .bind(scoring.tier.as_str())
            .bind(scoring.decision_mode().as_str())
            .bind(updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn list_unscored(&self) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        self.fetch_list("WHERE score IS NULL").await
    }

    async fn list_all(&self) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        self.fetch_list("").await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let n: i64 = row.try_get("n").map_err(map_sqlx_error)?;
        usize::try_from(n).map_err(|_| StoreError::Corrupt(format!("negative row count {n}")))
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            index: db.constraint().unwrap_or("unique").to_string(),
            detail: db.message().to_string(),
        },
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

fn record_from_row(row: &PgRow) -> Result<CanonicalJobRecord, StoreError> {
    let id: Uuid = row.try_get("id").map_err(map_sqlx_error)?;
    let corrupt = |reason: String| StoreError::Corrupt(format!("job {id}: {reason}"));

    let raw = RawJobRecord {
        source: row.try_get("source").map_err(map_sqlx_error)?,
        external_id: row.try_get("external_id").map_err(map_sqlx_error)?,
        url: row.try_get("url").map_err(map_sqlx_error)?,
        title: row.try_get("title").map_err(map_sqlx_error)?,
        company: row.try_get("company").map_err(map_sqlx_error)?,
        location: row.try_get("location").map_err(map_sqlx_error)?,
        description: row.try_get("description").map_err(map_sqlx_error)?,
        posted_date: row.try_get("posted_date").map_err(map_sqlx_error)?,
        salary: row.try_get("salary").map_err(map_sqlx_error)?,
    };
    let priority: i16 = row.try_get("source_priority").map_err(map_sqlx_error)?;
    let priority = u8::try_from(priority).map_err(|_| corrupt(format!("source_priority {priority}")))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_sqlx_error)?;

    let mut record = CanonicalJobRecord::from_raw(&raw, priority, created_at);
    record.id = id;
    record.url_key = row.try_get("url_key").map_err(map_sqlx_error)?;
    record.fuzzy_key = row.try_get("fuzzy_key").map_err(map_sqlx_error)?;
    record.updated_at = row.try_get("updated_at").map_err(map_sqlx_error)?;
    record.salary_min = row.try_get("salary_min").map_err(map_sqlx_error)?;
    record.salary_max = row.try_get("salary_max").map_err(map_sqlx_error)?;

    let tier: String = row.try_get("tier").map_err(map_sqlx_error)?;
    let tier: Tier = tier.parse().map_err(|e: jobfeed_core::ParseEnumError| corrupt(e.to_string()))?;
    let score: Option<f64> = row.try_get("score").map_err(map_sqlx_error)?;
    let reasoning: Option<String> = row.try_get("score_reasoning").map_err(map_sqlx_error)?;
    record
        .restore_scoring(score, reasoning, tier)
        .map_err(|e| corrupt(e.to_string()))?;
    Ok(record)
}
