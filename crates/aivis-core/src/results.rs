//! Raw per-module result rows produced by the analysis backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::scan::ModuleKind;
use crate::ParseEnumError;

/// Where the brand placed in one AI shopping answer. Lower rank is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingPlacement {
    #[serde(default)]
    pub query: String,
    pub rank: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    #[serde(rename = "pos")]
    Positive,
    #[serde(rename = "neu")]
    Neutral,
    #[serde(rename = "neg")]
    Negative,
}

impl Sentiment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "pos",
            Sentiment::Neutral => "neu",
            Sentiment::Negative => "neg",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pos" => Ok(Sentiment::Positive),
            "neu" => Ok(Sentiment::Neutral),
            "neg" => Ok(Sentiment::Negative),
            other => Err(ParseEnumError {
                kind: "sentiment",
                value: other.to_string(),
            }),
        }
    }
}

/// A descriptor AI answers attach to the brand, tagged with its sentiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandDescriptor {
    #[serde(default)]
    pub descriptor: String,
    pub sentiment: Sentiment,
}

/// Coverage of the brand in one conversation topic, 0–100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationCoverage {
    #[serde(default)]
    pub topic: String,
    pub score: f64,
}

/// Site issue severity. Any tag other than `high` counts as an ordinary issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Severity {
    High,
    Other,
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("high") {
            Severity::High
        } else {
            Severity::Other
        }
    }
}

/// A structural problem found on the brand's website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteIssue {
    #[serde(default)]
    pub issue: String,
    pub severity: Severity,
}

/// The rows one module produced for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module", content = "rows", rename_all = "lowercase")]
pub enum ModuleResultSet {
    Shopping(Vec<ShoppingPlacement>),
    Brand(Vec<BrandDescriptor>),
    Conversations(Vec<ConversationCoverage>),
    Website(Vec<SiteIssue>),
}

impl ModuleResultSet {
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleResultSet::Shopping(_) => ModuleKind::Shopping,
            ModuleResultSet::Brand(_) => ModuleKind::Brand,
            ModuleResultSet::Conversations(_) => ModuleKind::Conversations,
            ModuleResultSet::Website(_) => ModuleKind::Website,
        }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        match self {
            ModuleResultSet::Shopping(rows) => rows.len(),
            ModuleResultSet::Brand(rows) => rows.len(),
            ModuleResultSet::Conversations(rows) => rows.len(),
            ModuleResultSet::Website(rows) => rows.len(),
        }
    }

    /// Parse a bare JSON array of rows for the given module.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the rows do not match the module's
    /// row shape.
    pub fn from_rows(kind: ModuleKind, rows: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ModuleKind::Shopping => ModuleResultSet::Shopping(serde_json::from_value(rows)?),
            ModuleKind::Brand => ModuleResultSet::Brand(serde_json::from_value(rows)?),
            ModuleKind::Conversations => {
                ModuleResultSet::Conversations(serde_json::from_value(rows)?)
            }
            ModuleKind::Website => ModuleResultSet::Website(serde_json::from_value(rows)?),
        })
    }

    /// The rows as a bare JSON array.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn rows_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            ModuleResultSet::Shopping(rows) => serde_json::to_value(rows),
            ModuleResultSet::Brand(rows) => serde_json::to_value(rows),
            ModuleResultSet::Conversations(rows) => serde_json::to_value(rows),
            ModuleResultSet::Website(rows) => serde_json::to_value(rows),
        }
    }
}

/// Everything the scoring engine reads for one scan. Modules that failed or
/// never reported simply have no rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResults {
    pub shopping: Vec<ShoppingPlacement>,
    pub brand: Vec<BrandDescriptor>,
    pub conversations: Vec<ConversationCoverage>,
    pub website: Vec<SiteIssue>,
}

impl ScanResults {
    /// Fold one module's rows in, replacing whatever that module had.
    pub fn insert(&mut self, set: ModuleResultSet) {
        match set {
            ModuleResultSet::Shopping(rows) => self.shopping = rows,
            ModuleResultSet::Brand(rows) => self.brand = rows,
            ModuleResultSet::Conversations(rows) => self.conversations = rows,
            ModuleResultSet::Website(rows) => self.website = rows,
        }
    }
}

impl FromIterator<ModuleResultSet> for ScanResults {
    fn from_iter<I: IntoIterator<Item = ModuleResultSet>>(iter: I) -> Self {
        let mut results = ScanResults::default();
        for set in iter {
            results.insert(set);
        }
        results
    }
}
