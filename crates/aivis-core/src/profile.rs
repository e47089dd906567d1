//! Per-brand visibility profile and the per-scan score record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current visibility standing of one brand.
///
/// `score_change` is always `visibility_score - previous_visibility_score`;
/// the three are written together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandVisibilityProfile {
    pub brand_id: Uuid,
    pub visibility_score: f64,
    pub previous_visibility_score: f64,
    pub score_change: f64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub scan_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BrandVisibilityProfile {
    /// A brand that has never completed a scan.
    #[must_use]
    pub fn new(brand_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            brand_id,
            visibility_score: 0.0,
            previous_visibility_score: 0.0,
            score_change: 0.0,
            last_scan_at: None,
            scan_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Proof that a scan's score was applied to its brand's profile. One per scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub scan_id: Uuid,
    pub brand_id: Uuid,
    pub previous_score: f64,
    pub new_score: f64,
    pub score_change: f64,
    pub recorded_at: DateTime<Utc>,
}

impl ScoreRecord {
    #[must_use]
    pub fn message(&self) -> String {
        score_message(self.score_change)
    }
}

/// Human-readable summary of a score change, e.g. `"Score improved by 4.2%"`.
///
/// A zero change reads as an improvement. Halves round away from zero, so a
/// change of 24.25 reads as 24.3.
#[must_use]
pub fn score_message(change: f64) -> String {
    let magnitude = (change.abs() * 10.0).round() / 10.0;
    if change >= 0.0 {
        format!("Score improved by {magnitude:.1}%")
    } else {
        format!("Score decreased by {magnitude:.1}%")
    }
}
