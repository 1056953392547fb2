//! Environment-driven runtime configuration and the `sources.yaml` registry.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use jobfeed_adapters::RegistryEntry;
use jobfeed_core::{SourcePriorityTable, TierThresholds};
use jobfeed_storage::PacerConfig;
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

use crate::reconcile::SupersedePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<RegistryEntry>,
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text).context("parsing source registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.sources {
            if entry.source_id.trim().is_empty() {
                bail!("source registry entry with empty source_id");
            }
            if !seen.insert(entry.source_id.as_str()) {
                bail!("duplicate source_id {:?} in source registry", entry.source_id);
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.sources.iter().filter(|entry| entry.enabled)
    }

    /// Warn about enabled entries whose id is not a platform the priority table knows.
    /// Their records still ingest, at the lowest priority.
    pub fn warn_unknown_platforms(&self, table: &SourcePriorityTable) {
        for entry in self.enabled() {
            if !table.is_known(&entry.source_id) {
                warn!(
                    source = %entry.source_id,
                    priority = table.priority_for(&entry.source_id),
                    "source id is not a known platform; records without a source fall back to the lowest priority"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    /// Shared across every oracle request; `None` leaves requests unpaced.
    pub rate_limit: Option<PacerConfig>,
}

impl OracleConfig {
    /// `JOBFEED_ORACLE_RATE_BURST` turns pacing on; `JOBFEED_ORACLE_RATE_REFILL_MS` (default
    /// 1000) sets how often a spent request is given back.
    fn rate_limit_from_env() -> Result<Option<PacerConfig>> {
        let Ok(burst) = std::env::var("JOBFEED_ORACLE_RATE_BURST") else {
            return Ok(None);
        };
        let burst: u32 = burst
            .trim()
            .parse()
            .with_context(|| format!("parsing JOBFEED_ORACLE_RATE_BURST={burst:?}"))?;
        if burst == 0 {
            bail!("JOBFEED_ORACLE_RATE_BURST must be at least 1");
        }
        Ok(Some(PacerConfig {
            burst,
            refill_every: Duration::from_millis(env_parse("JOBFEED_ORACLE_RATE_REFILL_MS", 1000)?),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub artifacts_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub oracle: OracleConfig,
    pub scoring_concurrency: usize,
    pub thresholds: TierThresholds,
    pub supersede_policy: SupersedePolicy,
    pub profile_path: PathBuf,
    pub prefilter_path: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let thresholds = TierThresholds::new(
            env_parse("JOBFEED_TIER_HIGH", 85.0)?,
            env_parse("JOBFEED_TIER_MEDIUM", 60.0)?,
        )
        .context("validating JOBFEED_TIER_HIGH / JOBFEED_TIER_MEDIUM")?;

        let supersede_policy = match std::env::var("JOBFEED_SUPERSEDE_POLICY") {
            Ok(value) => value
                .parse()
                .context("parsing JOBFEED_SUPERSEDE_POLICY")?,
            Err(_) => SupersedePolicy::default(),
        };

        let workspace_root = std::env::var("JOBFEED_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            artifacts_dir: std::env::var("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./artifacts")),
            scheduler_enabled: std::env::var("JOBFEED_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron_1: std::env::var("SYNC_CRON_1").unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            sync_cron_2: std::env::var("SYNC_CRON_2").unwrap_or_else(|_| "0 0 18 * * *".to_string()),
            oracle: OracleConfig {
                url: std::env::var("JOBFEED_ORACLE_URL").ok(),
                api_key: std::env::var("JOBFEED_ORACLE_API_KEY").ok(),
                model: std::env::var("JOBFEED_ORACLE_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                timeout: Duration::from_secs(env_parse("JOBFEED_ORACLE_TIMEOUT_SECS", 60)?),
                rate_limit: OracleConfig::rate_limit_from_env()?,
            },
            scoring_concurrency: env_parse("JOBFEED_SCORING_CONCURRENCY", 4usize)?.max(1),
            thresholds,
            supersede_policy,
            profile_path: std::env::var("JOBFEED_PROFILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| workspace_root.join("profile.md")),
            prefilter_path: std::env::var("JOBFEED_FILTERS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| workspace_root.join("filters.yaml")),
            workspace_root,
        })
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("parsing {name}={value:?}")),
        Err(_) => Ok(default),
    }
}
