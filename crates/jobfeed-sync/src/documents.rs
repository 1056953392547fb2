//! Application briefs for HIGH-tier records, written to the artifact store.

use std::fmt::Write as _;

use async_trait::async_trait;
use jobfeed_core::CanonicalJobRecord;
use jobfeed_storage::ArtifactStore;
use tracing::info;

use crate::scoring::{DocumentError, DocumentGenerator, GeneratedDocument};

const NAMESPACE: &str = "briefs";

#[derive(Debug, Clone)]
pub struct BriefDocumentGenerator {
    artifacts: ArtifactStore,
}

impl BriefDocumentGenerator {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self { artifacts }
    }
}

pub fn render_brief(record: &CanonicalJobRecord) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# {} at {}", record.title.trim(), record.company.trim())?;
    writeln!(out)?;
    writeln!(out, "- Source: {}", record.source)?;
    writeln!(out, "- URL: {}", record.url.trim())?;
    if let Some(location) = record.location.as_deref().filter(|l| !l.trim().is_empty()) {
        writeln!(out, "- Location: {location}")?;
    }
    if let Some(salary) = record.salary.as_deref().filter(|s| !s.trim().is_empty()) {
        writeln!(out, "- Salary: {}", salary.trim())?;
    }
    if let Some(score) = record.score() {
        writeln!(out, "- Score: {score:.1} ({})", record.tier().as_str())?;
    }
    writeln!(out, "- Decision: {}", record.decision_mode().as_str())?;
    if let Some(reasoning) = record.score_reasoning() {
        writeln!(out)?;
        writeln!(out, "## Why it fits")?;
        writeln!(out)?;
        writeln!(out, "{}", reasoning.trim())?;
    }
    Ok(out)
}

#[async_trait]
impl DocumentGenerator for BriefDocumentGenerator {
    async fn generate(&self, record: &CanonicalJobRecord) -> Result<GeneratedDocument, DocumentError> {
        let brief = render_brief(record).map_err(|e| DocumentError::Render {
            record_id: record.id,
            reason: e.to_string(),
        })?;
        let stored = self
            .artifacts
            .store_bytes(record.updated_at, NAMESPACE, "md", brief.as_bytes())
            .await
            .map_err(|e| DocumentError::Write {
                record_id: record.id,
                reason: format!("{e:#}"),
            })?;
        info!(
            record_id = %record.id,
            path = %stored.relative_path.display(),
            deduplicated = stored.deduplicated,
            "application brief written"
        );
        Ok(GeneratedDocument {
            path: stored.absolute_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobfeed_core::{RawJobRecord, TierThresholds};
    use tempfile::tempdir;

    fn high_record() -> CanonicalJobRecord {
        let raw = RawJobRecord::new("lever", "https://jobs.lever.co/acme/1", "AI Engineer", "Acme")
            .with_location("Remote")
            .with_salary("$150k-200k");
        let mut record = CanonicalJobRecord::from_raw(&raw, 1, Utc::now());
        record.apply_score(92.0, "Strong Rust and ML overlap.", &TierThresholds::default(), Utc::now());
        record
    }

    #[test]
    fn brief_lists_the_decision_inputs() {
        let brief = render_brief(&high_record()).unwrap();
        assert!(brief.starts_with("# AI Engineer at Acme\n"));
        assert!(brief.contains("- Score: 92.0 (high)"));
        assert!(brief.contains("- Decision: auto"));
        assert!(brief.contains("- Location: Remote"));
        assert!(brief.contains("- Salary: $150k-200k"));
        assert!(brief.contains("Strong Rust and ML overlap."));
    }

    #[tokio::test]
    async fn brief_is_written_under_briefs_namespace() {
        let dir = tempdir().expect("tempdir");
        let generator = BriefDocumentGenerator::new(ArtifactStore::new(dir.path()));
        let record = high_record();

        let doc = generator.generate(&record).await.expect("generate");
        assert!(doc.path.starts_with(dir.path().join("briefs")));
        let written = std::fs::read_to_string(&doc.path).unwrap();
        assert_eq!(written, render_brief(&record).unwrap());
    }
}
