//! Static source priority table. Lower number wins a fuzzy-key conflict.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PRIORITY_ATS: u8 = 1;
pub const PRIORITY_VISUAL: u8 = 2;
pub const PRIORITY_OTHER: u8 = 3;

/// ATS platforms and text-heavy boards: postings come straight from the employer.
pub const ATS_SOURCES: &[&str] = &["greenhouse", "lever", "ashby", "workable", "indeed", "wellfound"];

/// Visual boards scraped through the browser agent; descriptions are often truncated.
pub const VISUAL_SOURCES: &[&str] = &["linkedin", "glassdoor"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceClass {
    Ats,
    Visual,
    Other,
}

impl SourceClass {
    pub fn priority(&self) -> u8 {
        match self {
            SourceClass::Ats => PRIORITY_ATS,
            SourceClass::Visual => PRIORITY_VISUAL,
            SourceClass::Other => PRIORITY_OTHER,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriorityTableError {
    #[error("source {0:?} is listed as both ATS and visual")]
    Overlap(&'static str),
    #[error("source {0:?} must be lowercase without surrounding whitespace")]
    NotCanonical(&'static str),
    #[error("source {0:?} is listed twice")]
    Duplicate(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct SourcePriorityTable {
    ats: &'static [&'static str],
    visual: &'static [&'static str],
}

impl Default for SourcePriorityTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl SourcePriorityTable {
    pub const fn standard() -> Self {
        Self {
            ats: ATS_SOURCES,
            visual: VISUAL_SOURCES,
        }
    }

    pub const fn new(ats: &'static [&'static str], visual: &'static [&'static str]) -> Self {
        Self { ats, visual }
    }

    /// Lookup is case-insensitive; unknown and empty names fall back to [`SourceClass::Other`].
    pub fn classify(&self, source: &str) -> SourceClass {
        let source = source.trim().to_ascii_lowercase();
        if self.ats.contains(&source.as_str()) {
            SourceClass::Ats
        } else if self.visual.contains(&source.as_str()) {
            SourceClass::Visual
        } else {
            SourceClass::Other
        }
    }

    pub fn priority_for(&self, source: &str) -> u8 {
        self.classify(source).priority()
    }

    pub fn is_known(&self, source: &str) -> bool {
        self.classify(source) != SourceClass::Other
    }

    /// Checked once at startup.
    pub fn validate(&self) -> Result<(), PriorityTableError> {
        let mut seen: Vec<&'static str> = Vec::new();
        for name in self.ats.iter().chain(self.visual.iter()).copied() {
            if name.is_empty() || name != name.trim() || name != name.to_ascii_lowercase() {
                return Err(PriorityTableError::NotCanonical(name));
            }
            if seen.contains(&name) {
                return if self.ats.contains(&name) && self.visual.contains(&name) {
                    Err(PriorityTableError::Overlap(name))
                } else {
                    Err(PriorityTableError::Duplicate(name))
                };
            }
            seen.push(name);
        }
        Ok(())
    }
}

/// Priority under the standard table.
pub fn source_priority(source: &str) -> u8 {
    SourcePriorityTable::standard().priority_for(source)
}
