//! Cheap rejection ahead of the oracle: blacklisted companies and deal-breaker phrases in the
//! description.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use jobfeed_core::CanonicalJobRecord;
use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_REJECT_KEYWORDS: &[&str] = &[
    "security clearance",
    "clearance required",
    "secret clearance",
    "ts/sci",
    "top secret",
    "us citizen only",
    "us citizens only",
    "must be a us citizen",
    "permanent resident required",
    "no sponsorship",
    "not able to sponsor",
    "unable to sponsor",
    "must be authorized to work without sponsorship",
    "without visa sponsorship",
    "no visa sponsorship",
    "sponsorship not available",
    "cannot sponsor",
    "will not sponsor",
    "w2 through our vendor",
    "contract to hire",
    "corp to corp",
    "c2c position",
    "third party",
    "staffing agency",
];

/// Contents of `filters.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreFilterRules {
    #[serde(default)]
    pub blacklisted_companies: Vec<String>,
    #[serde(default)]
    pub reject_keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub include_default_keywords: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PreFilterRules {
    fn default() -> Self {
        Self {
            blacklisted_companies: Vec::new(),
            reject_keywords: Vec::new(),
            include_default_keywords: true,
        }
    }
}

impl PreFilterRules {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing pre-filter rules")
    }

    /// A missing file means the default rules.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(text) => {
                Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "pre-filter rules not found; using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreFilter {
    companies: HashSet<String>,
    keywords: Vec<String>,
}

impl PreFilter {
    /// Rejects nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(rules: &PreFilterRules) -> Self {
        let companies: HashSet<String> = rules
            .blacklisted_companies
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        let mut keywords: Vec<String> = Vec::new();
        let defaults = DEFAULT_REJECT_KEYWORDS
            .iter()
            .map(|k| k.to_string())
            .filter(|_| rules.include_default_keywords);
        for keyword in rules.reject_keywords.iter().cloned().chain(defaults) {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }

        info!(
            companies = companies.len(),
            keywords = keywords.len(),
            "pre-filter loaded"
        );
        Self {
            companies,
            keywords,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.companies.is_empty() && self.keywords.is_empty()
    }

    /// Why `record` should be rejected without asking the oracle, if it should.
    pub fn rejection(&self, record: &CanonicalJobRecord) -> Option<String> {
        if self.companies.contains(&record.company.trim().to_lowercase()) {
            return Some(format!("Blacklisted company: {}", record.company.trim()));
        }
        let description = record.description.as_deref()?.to_lowercase();
        self.keywords
            .iter()
            .find(|keyword| description.contains(keyword.as_str()))
            .map(|keyword| format!("Reject keyword found: '{keyword}'"))
    }
}
