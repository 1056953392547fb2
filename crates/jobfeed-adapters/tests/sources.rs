use std::path::Path;

use jobfeed_adapters::{
    source_from_registry, AdapterError, DorkResultSource, RecordSource, RegistryEntry,
    ScrapedJsonSource, SourceKind,
};
use tempfile::tempdir;

fn write(path: &Path, body: &str) {
    std::fs::write(path, body).expect("write fixture");
}

#[tokio::test]
async fn scraped_export_fills_source_from_filename() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("linkedin_scraped.json");
    write(
        &path,
        r#"[
            {"url": "https://www.linkedin.com/jobs/view/1", "title": "AI Engineer", "company": "Acme"},
            {"source": "indeed", "url": "https://indeed.com/2", "title": "ML Engineer", "company": "Beta"},
            {"url": "https://www.linkedin.com/jobs/view/3", "title": "Data Engineer"}
        ]"#,
    );

    let records = ScrapedJsonSource::new("linkedin", &path)
        .load()
        .await
        .expect("load");

    let sources: Vec<_> = records.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec!["linkedin", "indeed", "linkedin"]);
    assert_eq!(records[2].company, "");
}

#[tokio::test]
async fn dork_results_detect_ats_from_url() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("dorks.json");
    write(
        &path,
        r#"[
            {"url": "https://jobs.lever.co/acme/abc", "title": "AI Engineer", "company": "Acme"},
            {"url": "https://careers.example.com/1", "title": "AI Engineer", "company": "Gamma"}
        ]"#,
    );

    let records = DorkResultSource::new("ats", &path).load().await.expect("load");
    assert_eq!(records[0].source, "lever");
    assert_eq!(records[1].source, "");
}

#[tokio::test]
async fn registry_entry_resolves_relative_path() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("data")).expect("mkdir");
    write(
        &dir.path().join("data/greenhouse.json"),
        r#"[{"url": "https://boards.greenhouse.io/acme/jobs/1", "title": "T", "company": "C"}]"#,
    );

    let entry = RegistryEntry {
        source_id: "greenhouse-dorks".into(),
        kind: SourceKind::DorkResults,
        path: "data/greenhouse.json".into(),
        enabled: true,
        notes: None,
    };
    let source = source_from_registry(&entry, dir.path());
    assert_eq!(source.source_id(), "greenhouse-dorks");
    let records = source.load().await.expect("load");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, "greenhouse");
}

#[tokio::test]
async fn missing_and_malformed_files_are_reported() {
    let dir = tempdir().expect("tempdir");
    let missing = ScrapedJsonSource::new("x", dir.path().join("nope.json"));
    assert!(matches!(missing.load().await, Err(AdapterError::Io { .. })));

    let bad = dir.path().join("bad_scraped.json");
    write(&bad, "{not json");
    let malformed = ScrapedJsonSource::new("bad", &bad);
    assert!(matches!(malformed.load().await, Err(AdapterError::Parse { .. })));
}
