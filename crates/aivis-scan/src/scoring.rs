//! Visibility scoring: four bounded subscores summed into a 0–100 total.
//!
//! A module with no rows (failed, or nothing found) contributes exactly 0.
//! The weights below are fixed product constants, not tuning knobs.

use aivis_core::{ScanResults, Sentiment, Severity};
use serde::{Deserialize, Serialize};

pub const SHOPPING_MAX: f64 = 25.0;
pub const BRAND_MAX: f64 = 25.0;
pub const CONVERSATIONS_MAX: f64 = 20.0;
pub const WEBSITE_MAX: f64 = 30.0;
pub const SCORE_MAX: f64 = 100.0;

/// Each average rank position costs a quarter point.
const SHOPPING_RANK_DIVISOR: f64 = 4.0;
const HIGH_SEVERITY_PENALTY: f64 = 3.0;
const OTHER_SEVERITY_PENALTY: f64 = 1.0;

/// The four parts of a visibility score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscores {
    pub shopping: f64,
    pub brand: f64,
    pub conversations: f64,
    pub website: f64,
}

impl Subscores {
    /// Sum of the subscores, clamped to `[0, 100]`.
    #[must_use]
    pub fn total(&self) -> f64 {
        let sum = self.shopping + self.brand + self.conversations + self.website;
        // `max` before `min` so a NaN sum lands on 0.
        sum.max(0.0).min(SCORE_MAX)
    }
}

/// Compute the visibility score for one scan's result rows.
#[must_use]
pub fn compute_visibility_score(results: &ScanResults) -> f64 {
    compute_subscores(results).total()
}

/// Compute every subscore. Each is floored at 0 (and capped at its maximum)
/// before summation.
#[must_use]
pub fn compute_subscores(results: &ScanResults) -> Subscores {
    Subscores {
        shopping: bounded(shopping_subscore(results), SHOPPING_MAX),
        brand: bounded(brand_subscore(results), BRAND_MAX),
        conversations: bounded(conversation_subscore(results), CONVERSATIONS_MAX),
        website: bounded(website_subscore(results), WEBSITE_MAX),
    }
}

/// Round a score to the two decimals stored on the profile.
#[must_use]
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

fn bounded(value: f64, max: f64) -> f64 {
    value.max(0.0).min(max)
}

#[allow(clippy::cast_precision_loss)]
fn mean(sum: f64, count: usize) -> f64 {
    sum / count as f64
}

fn shopping_subscore(results: &ScanResults) -> f64 {
    if results.shopping.is_empty() {
        return 0.0;
    }
    let sum: f64 = results.shopping.iter().map(|row| row.rank).sum();
    let avg_rank = mean(sum, results.shopping.len());
    SHOPPING_MAX - avg_rank / SHOPPING_RANK_DIVISOR
}

fn brand_subscore(results: &ScanResults) -> f64 {
    if results.brand.is_empty() {
        return 0.0;
    }
    let positive = results
        .brand
        .iter()
        .filter(|row| row.sentiment == Sentiment::Positive)
        .count();
    #[allow(clippy::cast_precision_loss)]
    let positive_fraction = mean(positive as f64, results.brand.len());
    (positive_fraction * BRAND_MAX).min(BRAND_MAX)
}

fn conversation_subscore(results: &ScanResults) -> f64 {
    if results.conversations.is_empty() {
        return 0.0;
    }
    let sum: f64 = results.conversations.iter().map(|row| row.score).sum();
    let avg_score = mean(sum, results.conversations.len());
    (avg_score / 100.0) * CONVERSATIONS_MAX
}

fn website_subscore(results: &ScanResults) -> f64 {
    if results.website.is_empty() {
        return 0.0;
    }
    let high = results
        .website
        .iter()
        .filter(|row| row.severity == Severity::High)
        .count();
    let other = results.website.len() - high;
    #[allow(clippy::cast_precision_loss)]
    let penalty = high as f64 * HIGH_SEVERITY_PENALTY + other as f64 * OTHER_SEVERITY_PENALTY;
    WEBSITE_MAX - penalty
}
