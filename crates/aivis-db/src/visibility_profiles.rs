//! Database operations for `brand_visibility_profiles` and `scan_score_records`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `brand_visibility_profiles` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VisibilityProfileRow {
    pub brand_id: Uuid,
    pub visibility_score: Decimal,
    pub previous_visibility_score: Decimal,
    pub score_change: Decimal,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub scan_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `scan_score_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScoreRecordRow {
    pub scan_id: Uuid,
    pub brand_id: Uuid,
    pub previous_score: Decimal,
    pub new_score: Decimal,
    pub score_change: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// Result of [`record_scan_score`].
#[derive(Debug, Clone)]
pub struct ScoreRecording {
    pub profile: VisibilityProfileRow,
    pub record: ScoreRecordRow,
    /// `false` when the scan had already been recorded and nothing changed.
    pub newly_recorded: bool,
}

const PROFILE_COLUMNS: &str = "brand_id, visibility_score, previous_visibility_score, \
                               score_change, last_scan_at, scan_count, created_at, updated_at";

const RECORD_COLUMNS: &str =
    "scan_id, brand_id, previous_score, new_score, score_change, recorded_at";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Get the visibility profile for a brand, if it exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_visibility_profile(
    pool: &PgPool,
    brand_id: Uuid,
) -> Result<Option<VisibilityProfileRow>, DbError> {
    Ok(sqlx::query_as::<_, VisibilityProfileRow>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM brand_visibility_profiles WHERE brand_id = $1"
    ))
    .bind(brand_id)
    .fetch_optional(pool)
    .await?)
}

/// Get the score record for a scan, if its score has been recorded.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_score_record(
    pool: &PgPool,
    scan_id: Uuid,
) -> Result<Option<ScoreRecordRow>, DbError> {
    Ok(sqlx::query_as::<_, ScoreRecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM scan_score_records WHERE scan_id = $1"
    ))
    .bind(scan_id)
    .fetch_optional(pool)
    .await?)
}

/// Apply a completed scan's score to its brand's profile, exactly once.
///
/// Runs in one transaction holding the profile row lock:
/// 1. If `scan_score_records` already has `scan_id`, return it unchanged.
/// 2. Otherwise shift `visibility_score` into `previous_visibility_score`,
///    store `new_score` and its delta, bump `scan_count`, set `last_scan_at`,
///    and insert the score record.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the brand has no profile, or
/// [`DbError::Sqlx`] if any statement fails (the transaction is rolled back).
pub async fn record_scan_score(
    pool: &PgPool,
    scan_id: Uuid,
    brand_id: Uuid,
    new_score: Decimal,
    recorded_at: DateTime<Utc>,
) -> Result<ScoreRecording, DbError> {
    let mut tx = pool.begin().await?;

    // Lock the profile first: concurrent recordings for the same brand queue
    // here, so the idempotency check below sees committed state.
    let current = sqlx::query_as::<_, VisibilityProfileRow>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM brand_visibility_profiles \
         WHERE brand_id = $1 FOR UPDATE"
    ))
    .bind(brand_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let existing = sqlx::query_as::<_, ScoreRecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM scan_score_records WHERE scan_id = $1"
    ))
    .bind(scan_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(record) = existing {
        tx.commit().await?;
        return Ok(ScoreRecording {
            profile: current,
            record,
            newly_recorded: false,
        });
    }

    let previous = current.visibility_score;
    let change = new_score - previous;

    let profile = sqlx::query_as::<_, VisibilityProfileRow>(&format!(
        "UPDATE brand_visibility_profiles \
         SET previous_visibility_score = $1, visibility_score = $2, score_change = $3, \
             last_scan_at = $4, scan_count = scan_count + 1, updated_at = NOW() \
         WHERE brand_id = $5 \
         RETURNING {PROFILE_COLUMNS}"
    ))
    .bind(previous)
    .bind(new_score)
    .bind(change)
    .bind(recorded_at)
    .bind(brand_id)
    .fetch_one(&mut *tx)
    .await?;

    let record = sqlx::query_as::<_, ScoreRecordRow>(&format!(
        "INSERT INTO scan_score_records \
             (scan_id, brand_id, previous_score, new_score, score_change, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {RECORD_COLUMNS}"
    ))
    .bind(scan_id)
    .bind(brand_id)
    .bind(previous)
    .bind(new_score)
    .bind(change)
    .bind(recorded_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ScoreRecording {
        profile,
        record,
        newly_recorded: true,
    })
}
