use aivis_core::{BrandVisibilityProfile, ModuleResultSet, Scan, ScanResults, ScoreRecord};
use aivis_db::{DbError, ScoreRecordRow, VisibilityProfileRow};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{RecordedScore, ScanStore};
use crate::error::StoreError;

/// [`ScanStore`] backed by Postgres through `aivis-db`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn profile_from_row(row: VisibilityProfileRow) -> BrandVisibilityProfile {
    BrandVisibilityProfile {
        brand_id: row.brand_id,
        visibility_score: decimal_to_f64(row.visibility_score),
        previous_visibility_score: decimal_to_f64(row.previous_visibility_score),
        score_change: decimal_to_f64(row.score_change),
        last_scan_at: row.last_scan_at,
        scan_count: row.scan_count,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn record_from_row(row: ScoreRecordRow) -> ScoreRecord {
    ScoreRecord {
        scan_id: row.scan_id,
        brand_id: row.brand_id,
        previous_score: decimal_to_f64(row.previous_score),
        new_score: decimal_to_f64(row.new_score),
        score_change: decimal_to_f64(row.score_change),
        recorded_at: row.recorded_at,
    }
}

fn map_update_error(scan_id: Uuid, err: DbError) -> StoreError {
    match err {
        DbError::NotFound => StoreError::ScanNotFound(scan_id),
        DbError::Conflict { id, .. } => StoreError::Conflict { id },
        DbError::DuplicateModuleResults { scan_id, module } => match module.parse() {
            Ok(module) => StoreError::DuplicateResults { scan_id, module },
            Err(_) => StoreError::Db(DbError::DuplicateModuleResults { scan_id, module }),
        },
        other => StoreError::Db(other),
    }
}

impl ScanStore for PgStore {
    fn insert_scan<'a>(&'a self, scan: &'a Scan) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { Ok(aivis_db::insert_scan(&self.pool, scan).await?) })
    }

    fn get_scan(&self, scan_id: Uuid) -> BoxFuture<'_, Result<Option<Scan>, StoreError>> {
        Box::pin(async move {
            match aivis_db::get_scan(&self.pool, scan_id).await? {
                Some(row) => Ok(Some(row.into_scan()?)),
                None => Ok(None),
            }
        })
    }

    fn update_scan<'a>(
        &'a self,
        scan: &'a Scan,
        expected_version: i32,
        results: Option<&'a ModuleResultSet>,
    ) -> BoxFuture<'a, Result<i32, StoreError>> {
        Box::pin(async move {
            let outcome = match results {
                Some(set) => {
                    aivis_db::update_scan_with_results(&self.pool, scan, expected_version, set)
                        .await
                }
                None => aivis_db::update_scan(&self.pool, scan, expected_version).await,
            };
            outcome.map_err(|e| map_update_error(scan.id, e))
        })
    }

    fn load_results(&self, scan_id: Uuid) -> BoxFuture<'_, Result<ScanResults, StoreError>> {
        Box::pin(async move {
            let rows = aivis_db::list_module_results(&self.pool, scan_id).await?;
            let mut results = ScanResults::default();
            for row in rows {
                results.insert(row.into_result_set()?);
            }
            Ok(results)
        })
    }

    fn get_profile(
        &self,
        brand_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<BrandVisibilityProfile>, StoreError>> {
        Box::pin(async move {
            Ok(aivis_db::get_visibility_profile(&self.pool, brand_id)
                .await?
                .map(profile_from_row))
        })
    }

    fn get_score_record(
        &self,
        scan_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<ScoreRecord>, StoreError>> {
        Box::pin(async move {
            Ok(aivis_db::get_score_record(&self.pool, scan_id)
                .await?
                .map(record_from_row))
        })
    }

    fn record_score(
        &self,
        scan_id: Uuid,
        brand_id: Uuid,
        new_score: f64,
        recorded_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RecordedScore, StoreError>> {
        Box::pin(async move {
            let score = Decimal::from_f64(new_score)
                .ok_or(StoreError::InvalidScore(new_score))?
                .round_dp(2);
            let recording =
                aivis_db::record_scan_score(&self.pool, scan_id, brand_id, score, recorded_at)
                    .await
                    .map_err(|e| match e {
                        DbError::NotFound => StoreError::ProfileNotFound(brand_id),
                        other => StoreError::Db(other),
                    })?;
            Ok(RecordedScore {
                profile: profile_from_row(recording.profile),
                record: record_from_row(recording.record),
                newly_recorded: recording.newly_recorded,
            })
        })
    }

    fn list_scans_for_brand(
        &self,
        brand_id: Uuid,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Scan>, StoreError>> {
        Box::pin(async move {
            let rows = aivis_db::list_scans_for_brand(&self.pool, brand_id, limit).await?;
            Ok(rows
                .into_iter()
                .map(aivis_db::ScanRow::into_scan)
                .collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn list_stale_scans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<Scan>, StoreError>> {
        Box::pin(async move {
            let rows = aivis_db::list_stale_scans(&self.pool, cutoff).await?;
            Ok(rows
                .into_iter()
                .map(aivis_db::ScanRow::into_scan)
                .collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { Ok(aivis_db::health_check(&self.pool).await?) })
    }
}
