//! Core domain model for jobfeed: raw and canonical job records, tiers and decision modes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod identity;
pub mod priority;
pub mod salary;

pub use identity::{compute_fuzzy_key, compute_url_key};
pub use priority::{source_priority, PriorityTableError, SourceClass, SourcePriorityTable};
pub use salary::{parse_salary, SalaryRange};

pub const CRATE_NAME: &str = "jobfeed-core";

/// Job posting as handed over by a scraper or browser agent. Nothing about it is trusted.
///
/// Missing required fields deserialize as empty strings so that validation, not parsing,
/// decides whether a record is usable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawJobRecord {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    /// Salary as posted, e.g. `"$150k-200k"`.
    #[serde(default)]
    pub salary: Option<String>,
}

impl RawJobRecord {
    pub fn new(
        source: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            title: title.into(),
            company: company.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_salary(mut self, salary: impl Into<String>) -> Self {
        self.salary = Some(salary.into());
        self
    }

    pub fn salary_range(&self) -> SalaryRange {
        self.salary.as_deref().map(parse_salary).unwrap_or_default()
    }

    /// First required field that is blank after trimming, checked in url, title, company order.
    pub fn missing_required_field(&self) -> Option<RequiredField> {
        if self.url.trim().is_empty() {
            Some(RequiredField::Url)
        } else if self.title.trim().is_empty() {
            Some(RequiredField::Title)
        } else if self.company.trim().is_empty() {
            Some(RequiredField::Company)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    Url,
    Title,
    Company,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequiredField::Url => "url",
            RequiredField::Title => "title",
            RequiredField::Company => "company",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Unscored,
    High,
    Medium,
    Low,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Unscored => "unscored",
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }
}

impl FromStr for Tier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unscored" => Ok(Tier::Unscored),
            "high" => Ok(Tier::High),
            "medium" => Ok(Tier::Medium),
            "low" => Ok(Tier::Low),
            other => Err(ParseEnumError {
                kind: "tier",
                value: other.to_string(),
            }),
        }
    }
}

/// What happens to a scored record downstream: automated handling, human review, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    #[default]
    None,
    Auto,
    Manual,
}

impl DecisionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionMode::None => "none",
            DecisionMode::Auto => "auto",
            DecisionMode::Manual => "manual",
        }
    }
}

impl FromStr for DecisionMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DecisionMode::None),
            "auto" => Ok(DecisionMode::Auto),
            "manual" => Ok(DecisionMode::Manual),
            other => Err(ParseEnumError {
                kind: "decision_mode",
                value: other.to_string(),
            }),
        }
    }
}

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("tier thresholds must be finite (high={high}, medium={medium})")]
    NotFinite { high: f64, medium: f64 },
    #[error("tier thresholds must satisfy 0 <= medium <= high <= 100 (high={high}, medium={medium})")]
    OutOfOrder { high: f64, medium: f64 },
}

/// Lower bounds of the HIGH and MEDIUM tiers. Each bound is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: 85.0,
            medium: 60.0,
        }
    }
}

impl TierThresholds {
    pub fn new(high: f64, medium: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self { high, medium };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if !self.high.is_finite() || !self.medium.is_finite() {
            return Err(ThresholdError::NotFinite {
                high: self.high,
                medium: self.medium,
            });
        }
        if self.medium < MIN_SCORE || self.medium > self.high || self.high > MAX_SCORE {
            return Err(ThresholdError::OutOfOrder {
                high: self.high,
                medium: self.medium,
            });
        }
        Ok(())
    }

    /// Total over all `f64`: NaN fails every comparison and lands in LOW.
    pub fn classify(&self, score: f64) -> Tier {
        if score >= self.high {
            Tier::High
        } else if score >= self.medium {
            Tier::Medium
        } else {
            Tier::Low
        }
    }
}

/// Tier for `score` under the default 85 / 60 thresholds.
pub fn classify_tier(score: f64) -> Tier {
    TierThresholds::default().classify(score)
}

pub fn decision_mode_for(tier: Tier) -> DecisionMode {
    match tier {
        Tier::High => DecisionMode::Auto,
        Tier::Medium => DecisionMode::Manual,
        Tier::Low | Tier::Unscored => DecisionMode::None,
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScoringStateError {
    #[error("score {0} is outside [0, 100]")]
    ScoreOutOfRange(f64),
    #[error("score present without a tier")]
    MissingTier,
    #[error("tier {0:?} present without a score")]
    MissingScore(Tier),
}

/// Snapshot of a record's scoring columns, written on its own by
/// `CanonicalStore::update_scoring` so a concurrent content change is not overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringState {
    pub score: Option<f64>,
    pub reasoning: Option<String>,
    pub tier: Tier,
}

impl ScoringState {
    pub fn decision_mode(&self) -> DecisionMode {
        decision_mode_for(self.tier)
    }
}

/// The single authoritative representation of a job posting after deduplication.
///
/// Scoring fields are private: `tier` and `decision_mode` can only change together with
/// `score`, through [`CanonicalJobRecord::apply_score`] or [`CanonicalJobRecord::clear_score`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalJobRecord {
    pub id: Uuid,
    pub source: String,
    pub external_id: Option<String>,
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub posted_date: Option<String>,
    pub salary: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub url_key: String,
    pub fuzzy_key: String,
    pub source_priority: u8,
    score: Option<f64>,
    score_reasoning: Option<String>,
    tier: Tier,
    decision_mode: DecisionMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalJobRecord {
    /// New unscored record with a fresh id and both identity keys computed from `raw`.
    pub fn from_raw(raw: &RawJobRecord, source_priority: u8, now: DateTime<Utc>) -> Self {
        let salary = raw.salary_range();
        Self {
            id: Uuid::new_v4(),
            source: raw.source.clone(),
            external_id: raw.external_id.clone(),
            url: raw.url.clone(),
            title: raw.title.clone(),
            company: raw.company.clone(),
            location: raw.location.clone(),
            description: raw.description.clone(),
            posted_date: raw.posted_date.clone(),
            salary: raw.salary.clone(),
            salary_min: salary.min,
            salary_max: salary.max,
            url_key: compute_url_key(&raw.url),
            fuzzy_key: compute_fuzzy_key(&raw.company, &raw.title),
            source_priority,
            score: None,
            score_reasoning: None,
            tier: Tier::Unscored,
            decision_mode: DecisionMode::None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite content and URL identity with a higher-priority version of the same posting.
    ///
    /// `id`, `fuzzy_key`, `created_at` and the scoring state are kept.
    pub fn supersede_with(&mut self, raw: &RawJobRecord, source_priority: u8, now: DateTime<Utc>) {
        self.source = raw.source.clone();
        self.external_id = raw.external_id.clone();
        self.url = raw.url.clone();
        self.url_key = compute_url_key(&raw.url);
        self.title = raw.title.clone();
        self.company = raw.company.clone();
        self.location = raw.location.clone();
        self.description = raw.description.clone();
        self.posted_date = raw.posted_date.clone();
        let salary = raw.salary_range();
        self.salary = raw.salary.clone();
        self.salary_min = salary.min;
        self.salary_max = salary.max;
        self.source_priority = source_priority;
        self.updated_at = now;
    }

    pub fn apply_score(
        &mut self,
        score: f64,
        reasoning: impl Into<String>,
        thresholds: &TierThresholds,
        now: DateTime<Utc>,
    ) {
        let tier = thresholds.classify(score);
        self.score = Some(score);
        self.score_reasoning = Some(reasoning.into());
        self.tier = tier;
        self.decision_mode = decision_mode_for(tier);
        self.updated_at = now;
    }

    pub fn clear_score(&mut self, now: DateTime<Utc>) {
        self.score = None;
        self.score_reasoning = None;
        self.tier = Tier::Unscored;
        self.decision_mode = DecisionMode::None;
        self.updated_at = now;
    }

    /// Reload scoring state from storage; `decision_mode` is re-derived from `tier`.
    pub fn restore_scoring(
        &mut self,
        score: Option<f64>,
        reasoning: Option<String>,
        tier: Tier,
    ) -> Result<(), ScoringStateError> {
        match (score, tier) {
            (None, Tier::Unscored) => {}
            (None, tier) => return Err(ScoringStateError::MissingScore(tier)),
            (Some(_), Tier::Unscored) => return Err(ScoringStateError::MissingTier),
            (Some(value), _) if !(MIN_SCORE..=MAX_SCORE).contains(&value) => {
                return Err(ScoringStateError::ScoreOutOfRange(value))
            }
            (Some(_), _) => {}
        }
        self.score = score;
        self.score_reasoning = reasoning;
        self.tier = tier;
        self.decision_mode = decision_mode_for(tier);
        Ok(())
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn scoring(&self) -> ScoringState {
        ScoringState {
            score: self.score,
            reasoning: self.score_reasoning.clone(),
            tier: self.tier,
        }
    }

    pub fn score_reasoning(&self) -> Option<&str> {
        self.score_reasoning.as_deref()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn decision_mode(&self) -> DecisionMode {
        self.decision_mode
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn tier_boundaries_are_inclusive_on_lower_bound() {
        assert_eq!(classify_tier(59.999), Tier::Low);
        assert_eq!(classify_tier(60.0), Tier::Medium);
        assert_eq!(classify_tier(84.999), Tier::Medium);
        assert_eq!(classify_tier(85.0), Tier::High);
        assert_eq!(classify_tier(0.0), Tier::Low);
        assert_eq!(classify_tier(100.0), Tier::High);
    }

    #[test]
    fn classify_is_total_for_non_finite_scores() {
        assert_eq!(classify_tier(f64::NAN), Tier::Low);
        assert_eq!(classify_tier(f64::NEG_INFINITY), Tier::Low);
        assert_eq!(classify_tier(f64::INFINITY), Tier::High);
    }

    #[test]
    fn decision_mode_follows_tier() {
        assert_eq!(decision_mode_for(Tier::High), DecisionMode::Auto);
        assert_eq!(decision_mode_for(Tier::Medium), DecisionMode::Manual);
        assert_eq!(decision_mode_for(Tier::Low), DecisionMode::None);
        assert_eq!(decision_mode_for(Tier::Unscored), DecisionMode::None);
    }

    #[test]
    fn custom_thresholds_are_validated() {
        let t = TierThresholds::new(90.0, 50.0).unwrap();
        assert_eq!(t.classify(89.9), Tier::Medium);
        assert_eq!(t.classify(50.0), Tier::Medium);
        assert_eq!(t.classify(49.0), Tier::Low);

        assert!(matches!(
            TierThresholds::new(50.0, 60.0),
            Err(ThresholdError::OutOfOrder { .. })
        ));
        assert!(matches!(
            TierThresholds::new(f64::NAN, 60.0),
            Err(ThresholdError::NotFinite { .. })
        ));
        assert!(TierThresholds::new(101.0, 60.0).is_err());
    }

    #[test]
    fn apply_score_keeps_tier_and_mode_consistent() {
        let raw = RawJobRecord::new("lever", "https://x/1", "AI Engineer", "Acme");
        let mut record = CanonicalJobRecord::from_raw(&raw, 1, ts());
        assert_eq!(record.tier(), Tier::Unscored);
        assert_eq!(record.decision_mode(), DecisionMode::None);

        record.apply_score(72.0, "solid overlap", &TierThresholds::default(), ts());
        assert_eq!(record.score(), Some(72.0));
        assert_eq!(record.tier(), Tier::Medium);
        assert_eq!(record.decision_mode(), DecisionMode::Manual);
        assert_eq!(record.score_reasoning(), Some("solid overlap"));

        record.clear_score(ts());
        assert!(!record.is_scored());
        assert_eq!(record.tier(), Tier::Unscored);
        assert_eq!(record.decision_mode(), DecisionMode::None);
    }

    #[test]
    fn supersede_keeps_identity_and_score() {
        let first = RawJobRecord::new("linkedin", "https://x/2", "AI Engineer", "Acme");
        let mut record = CanonicalJobRecord::from_raw(&first, 2, ts());
        record.apply_score(90.0, "great", &TierThresholds::default(), ts());
        let id = record.id;
        let fuzzy = record.fuzzy_key.clone();

        let better = RawJobRecord::new("lever", "https://x/3", "ai engineer", "ACME")
            .with_description("full text");
        record.supersede_with(&better, 1, ts());

        assert_eq!(record.id, id);
        assert_eq!(record.fuzzy_key, fuzzy);
        assert_eq!(record.source, "lever");
        assert_eq!(record.url_key, compute_url_key("https://x/3"));
        assert_eq!(record.description.as_deref(), Some("full text"));
        assert_eq!(record.tier(), Tier::High);
    }

    #[test]
    fn salary_text_is_parsed_into_bounds() {
        let raw = RawJobRecord::new("lever", "https://x/1", "AI Engineer", "Acme")
            .with_salary("$150k-200k");
        let mut record = CanonicalJobRecord::from_raw(&raw, 1, ts());
        assert_eq!(record.salary_min, Some(150_000));
        assert_eq!(record.salary_max, Some(200_000));

        let better = RawJobRecord::new("greenhouse", "https://x/2", "AI Engineer", "Acme")
            .with_salary("Up to $210k");
        record.supersede_with(&better, 1, ts());
        assert_eq!(record.salary.as_deref(), Some("Up to $210k"));
        assert_eq!(record.salary_min, None);
        assert_eq!(record.salary_max, Some(210_000));
    }

    #[test]
    fn scoring_snapshot_carries_derived_decision_mode() {
        let raw = RawJobRecord::new("lever", "https://x/1", "AI Engineer", "Acme");
        let mut record = CanonicalJobRecord::from_raw(&raw, 1, ts());
        assert_eq!(record.scoring().tier, Tier::Unscored);

        record.apply_score(91.0, "great", &TierThresholds::default(), ts());
        let snapshot = record.scoring();
        assert_eq!(snapshot.score, Some(91.0));
        assert_eq!(snapshot.reasoning.as_deref(), Some("great"));
        assert_eq!(snapshot.decision_mode(), DecisionMode::Auto);
    }

    #[test]
    fn restore_scoring_rejects_inconsistent_rows() {
        let raw = RawJobRecord::new("lever", "https://x/1", "AI Engineer", "Acme");
        let mut record = CanonicalJobRecord::from_raw(&raw, 1, ts());
        assert_eq!(
            record.restore_scoring(None, None, Tier::High),
            Err(ScoringStateError::MissingScore(Tier::High))
        );
        assert_eq!(
            record.restore_scoring(Some(50.0), None, Tier::Unscored),
            Err(ScoringStateError::MissingTier)
        );
        assert_eq!(
            record.restore_scoring(Some(150.0), None, Tier::High),
            Err(ScoringStateError::ScoreOutOfRange(150.0))
        );
        record
            .restore_scoring(Some(88.0), Some("ok".into()), Tier::High)
            .unwrap();
        assert_eq!(record.decision_mode(), DecisionMode::Auto);
    }

    #[test]
    fn missing_required_fields_are_reported_in_order() {
        let mut raw = RawJobRecord::new("lever", " ", "", "Acme");
        assert_eq!(raw.missing_required_field(), Some(RequiredField::Url));
        raw.url = "https://x/1".into();
        assert_eq!(raw.missing_required_field(), Some(RequiredField::Title));
        raw.title = "Engineer".into();
        raw.company = "\t".into();
        assert_eq!(raw.missing_required_field(), Some(RequiredField::Company));
        raw.company = "Acme".into();
        assert_eq!(raw.missing_required_field(), None);
    }

    #[test]
    fn raw_record_tolerates_missing_fields_in_json() {
        let raw: RawJobRecord =
            serde_json::from_str(r#"{"url":"https://x/9","title":"Data Engineer"}"#).unwrap();
        assert_eq!(raw.company, "");
        assert_eq!(raw.source, "");
        assert_eq!(raw.missing_required_field(), Some(RequiredField::Company));
    }

    #[test]
    fn enum_string_forms_round_trip() {
        for tier in [Tier::Unscored, Tier::High, Tier::Medium, Tier::Low] {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        for mode in [DecisionMode::None, DecisionMode::Auto, DecisionMode::Manual] {
            assert_eq!(mode.as_str().parse::<DecisionMode>().unwrap(), mode);
        }
        assert!("HIGH".parse::<Tier>().is_err());
    }
}
