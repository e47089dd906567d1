//! Scan records and the status vocabularies shared by every crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseEnumError;

/// One of the four analysis modules a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Shopping,
    Brand,
    Conversations,
    Website,
}

impl ModuleKind {
    /// All modules in priority order. `current_module` picks the first
    /// non-terminal entry of this list.
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Shopping,
        ModuleKind::Brand,
        ModuleKind::Conversations,
        ModuleKind::Website,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Shopping => "shopping",
            ModuleKind::Brand => "brand",
            ModuleKind::Conversations => "conversations",
            ModuleKind::Website => "website",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shopping" => Ok(ModuleKind::Shopping),
            "brand" => Ok(ModuleKind::Brand),
            "conversations" => Ok(ModuleKind::Conversations),
            "website" => Ok(ModuleKind::Website),
            other => Err(ParseEnumError {
                kind: "module",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a single module inside a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ModuleStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleStatus::Done | ModuleStatus::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleStatus::Pending => "pending",
            ModuleStatus::Running => "running",
            ModuleStatus::Done => "done",
            ModuleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ModuleStatus::Pending),
            "running" => Ok(ModuleStatus::Running),
            "done" => Ok(ModuleStatus::Done),
            "failed" => Ok(ModuleStatus::Failed),
            other => Err(ParseEnumError {
                kind: "module status",
                value: other.to_string(),
            }),
        }
    }
}

/// Aggregate status of a scan, derived from its module map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Running,
    Partial,
    Done,
    Failed,
}

impl ScanStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Done | ScanStatus::Partial | ScanStatus::Failed
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Partial => "partial",
            ScanStatus::Done => "done",
            ScanStatus::Failed => "failed",
        }
    }

    /// The terminal outcome, or `None` while the scan is still in flight.
    #[must_use]
    pub fn outcome(self) -> Option<ScanOutcome> {
        match self {
            ScanStatus::Done => Some(ScanOutcome::Done),
            ScanStatus::Partial => Some(ScanOutcome::Partial),
            ScanStatus::Failed => Some(ScanOutcome::Failed),
            ScanStatus::Queued | ScanStatus::Running => None,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ScanStatus::Queued),
            "running" => Ok(ScanStatus::Running),
            "partial" => Ok(ScanStatus::Partial),
            "done" => Ok(ScanStatus::Done),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(ParseEnumError {
                kind: "scan status",
                value: other.to_string(),
            }),
        }
    }
}

/// How a finished scan ended. Failed modules are never re-run; a retry is a
/// brand-new scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Done,
    Partial,
    Failed,
}

impl ScanOutcome {
    /// `Done` and `Partial` scans have at least one module's data to score.
    #[must_use]
    pub fn is_scoreable(self) -> bool {
        matches!(self, ScanOutcome::Done | ScanOutcome::Partial)
    }
}

/// Status of one module plus its optional in-flight progress hint (0–100).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleState {
    pub status: ModuleStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self {
            status: ModuleStatus::Pending,
            progress: 0,
            error: None,
        }
    }
}

/// The per-module state of a scan. Exactly one entry per [`ModuleKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMap {
    pub shopping: ModuleState,
    pub brand: ModuleState,
    pub conversations: ModuleState,
    pub website: ModuleState,
}

impl ModuleMap {
    #[must_use]
    pub fn get(&self, kind: ModuleKind) -> &ModuleState {
        match kind {
            ModuleKind::Shopping => &self.shopping,
            ModuleKind::Brand => &self.brand,
            ModuleKind::Conversations => &self.conversations,
            ModuleKind::Website => &self.website,
        }
    }

    pub fn get_mut(&mut self, kind: ModuleKind) -> &mut ModuleState {
        match kind {
            ModuleKind::Shopping => &mut self.shopping,
            ModuleKind::Brand => &mut self.brand,
            ModuleKind::Conversations => &mut self.conversations,
            ModuleKind::Website => &mut self.website,
        }
    }

    /// Iterate modules in priority order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleKind, &ModuleState)> {
        ModuleKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }

    /// Build a map from plain statuses, mostly useful in tests.
    #[must_use]
    pub fn from_statuses(statuses: [ModuleStatus; 4]) -> Self {
        let mut map = Self::default();
        for (kind, status) in ModuleKind::ALL.into_iter().zip(statuses) {
            map.get_mut(kind).status = status;
        }
        map
    }
}

/// One execution of the four analysis modules against a brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub status: ScanStatus,
    pub progress: u8,
    pub current_module: Option<ModuleKind>,
    pub modules: ModuleMap,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter, bumped by the store on every write.
    pub version: i32,
}

impl Scan {
    /// A freshly requested scan: `queued`, all modules `pending`.
    #[must_use]
    pub fn new(brand_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            brand_id,
            status: ScanStatus::Queued,
            progress: 0,
            current_module: Some(ModuleKind::Shopping),
            modules: ModuleMap::default(),
            started_at: now,
            completed_at: None,
            version: 0,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
