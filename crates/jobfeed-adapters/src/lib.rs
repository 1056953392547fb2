//! Raw record sources: scraper JSON exports and ATS dork result files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jobfeed_core::RawJobRecord;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "jobfeed-adapters";

/// Hosts of the ATS platforms reached through search-engine dorking.
const ATS_HOSTS: &[(&str, &str)] = &[
    ("boards.greenhouse.io", "greenhouse"),
    ("jobs.greenhouse.io", "greenhouse"),
    ("jobs.lever.co", "lever"),
    ("jobs.ashbyhq.com", "ashby"),
    ("apply.workable.com", "workable"),
];

/// Platforms a browser-agent export is named after.
const SCRAPED_PLATFORMS: &[&str] = &["linkedin", "indeed", "glassdoor", "wellfound"];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Producer of raw job records. Records come back in a deterministic order.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn load(&self) -> Result<Vec<RawJobRecord>, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ScrapedJson,
    DorkResults,
}

/// One `sources.yaml` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub source_id: String,
    pub kind: SourceKind,
    pub path: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Browser-agent export: a JSON array of raw records named like `linkedin_scraped.json`.
#[derive(Debug, Clone)]
pub struct ScrapedJsonSource {
    source_id: String,
    path: PathBuf,
}

impl ScrapedJsonSource {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for ScrapedJsonSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn load(&self) -> Result<Vec<RawJobRecord>, AdapterError> {
        let mut records: Vec<RawJobRecord> = read_json_file(&self.path).await?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let detected = detect_source_from_filename(&file_name);
        fill_missing_source(&mut records, |_| detected.clone());
        debug!(source = %self.source_id, detected = %detected, count = records.len(), "loaded scraped export");
        Ok(records)
    }
}

/// ATS dork results: a JSON array of raw records whose URLs point at ATS job boards.
#[derive(Debug, Clone)]
pub struct DorkResultSource {
    source_id: String,
    path: PathBuf,
}

impl DorkResultSource {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for DorkResultSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn load(&self) -> Result<Vec<RawJobRecord>, AdapterError> {
        let mut records: Vec<RawJobRecord> = read_json_file(&self.path).await?;
        fill_missing_source(&mut records, |record| {
            detect_ats_platform(&record.url)
                .map(str::to_string)
                .unwrap_or_default()
        });
        debug!(source = %self.source_id, count = records.len(), "loaded dork results");
        Ok(records)
    }
}

/// Build the source described by a registry entry. Relative paths resolve against `root`.
pub fn source_from_registry(entry: &RegistryEntry, root: &Path) -> Box<dyn RecordSource> {
    let path = if entry.path.is_absolute() {
        entry.path.clone()
    } else {
        root.join(&entry.path)
    };
    match entry.kind {
        SourceKind::ScrapedJson => Box::new(ScrapedJsonSource::new(entry.source_id.clone(), path)),
        SourceKind::DorkResults => Box::new(DorkResultSource::new(entry.source_id.clone(), path)),
    }
}

/// `linkedin_scraped.json` -> `linkedin`. Known platform names win over the file stem.
pub fn detect_source_from_filename(file_name: &str) -> String {
    let lower = file_name.to_lowercase();
    if let Some(platform) = SCRAPED_PLATFORMS.iter().find(|p| lower.contains(*p)) {
        return (*platform).to_string();
    }
    file_name
        .replace("_scraped.json", "")
        .replace(".json", "")
}

/// ATS platform for a job URL, by host. `None` for hosts outside the dork targets.
pub fn detect_ats_platform(url: &str) -> Option<&'static str> {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default().to_lowercase();

    ATS_HOSTS
        .iter()
        .find(|(ats_host, _)| host == *ats_host)
        .map(|(_, platform)| *platform)
}

fn fill_missing_source<F>(records: &mut [RawJobRecord], detect: F)
where
    F: Fn(&RawJobRecord) -> String,
{
    for record in records.iter_mut() {
        if record.source.trim().is_empty() {
            record.source = detect(record);
        }
    }
}

async fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, AdapterError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AdapterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&data).map_err(|source| AdapterError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_detection_prefers_known_platforms() {
        assert_eq!(detect_source_from_filename("linkedin_scraped.json"), "linkedin");
        assert_eq!(detect_source_from_filename("Glassdoor-2026-02.json"), "glassdoor");
        assert_eq!(detect_source_from_filename("remoteok_scraped.json"), "remoteok");
        assert_eq!(detect_source_from_filename("misc.json"), "misc");
    }

    #[test]
    fn ats_hosts_map_to_platforms() {
        assert_eq!(
            detect_ats_platform("https://boards.greenhouse.io/acme/jobs/123"),
            Some("greenhouse")
        );
        assert_eq!(
            detect_ats_platform("  https://JOBS.LEVER.CO/acme/abc-def "),
            Some("lever")
        );
        assert_eq!(detect_ats_platform("https://jobs.ashbyhq.com/acme/x"), Some("ashby"));
        assert_eq!(
            detect_ats_platform("https://apply.workable.com/acme/j/ABC123"),
            Some("workable")
        );
        assert_eq!(detect_ats_platform("https://example.com/jobs.lever.co"), None);
        assert_eq!(detect_ats_platform(""), None);
    }

    #[test]
    fn registry_entries_default_to_enabled() {
        let entry: RegistryEntry = serde_json::from_str(
            r#"{"source_id":"lever-dorks","kind":"dork_results","path":"data/lever.json"}"#,
        )
        .expect("entry");
        assert!(entry.enabled);
        assert_eq!(entry.kind, SourceKind::DorkResults);
    }
}
