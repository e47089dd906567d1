//! Persistence seam for the coordinator.
//!
//! [`MemoryStore`] backs tests and database-less runs; [`PgStore`] wraps the
//! `aivis-db` query functions. Both enforce the same contract: scan writes are
//! compare-and-swap on `version`, module rows are write-once and committed
//! with the scan update, and a scan's score is applied to its profile at most
//! once.

mod memory;
mod postgres;

use aivis_core::{BrandVisibilityProfile, ModuleResultSet, Scan, ScanResults, ScoreRecord};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of [`ScanStore::record_score`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedScore {
    pub profile: BrandVisibilityProfile,
    pub record: ScoreRecord,
    /// `false` when the scan had already been recorded and nothing changed.
    pub newly_recorded: bool,
}

pub trait ScanStore: Send + Sync {
    /// Persist a new scan, creating the brand's profile on its first scan.
    fn insert_scan<'a>(&'a self, scan: &'a Scan) -> BoxFuture<'a, Result<(), StoreError>>;

    fn get_scan(&self, scan_id: Uuid) -> BoxFuture<'_, Result<Option<Scan>, StoreError>>;

    /// Write `scan` if the stored copy is still at `expected_version`,
    /// together with `results` when given. Returns the new version.
    ///
    /// Fails with [`StoreError::Conflict`] when another writer got there first
    /// and [`StoreError::DuplicateResults`] when the module already has rows.
    fn update_scan<'a>(
        &'a self,
        scan: &'a Scan,
        expected_version: i32,
        results: Option<&'a ModuleResultSet>,
    ) -> BoxFuture<'a, Result<i32, StoreError>>;

    fn load_results(&self, scan_id: Uuid) -> BoxFuture<'_, Result<ScanResults, StoreError>>;

    fn get_profile(
        &self,
        brand_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<BrandVisibilityProfile>, StoreError>>;

    fn get_score_record(
        &self,
        scan_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<ScoreRecord>, StoreError>>;

    /// Apply `new_score` to the brand's profile, exactly once per scan.
    fn record_score(
        &self,
        scan_id: Uuid,
        brand_id: Uuid,
        new_score: f64,
        recorded_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RecordedScore, StoreError>>;

    /// Most recent scans for a brand, newest first.
    fn list_scans_for_brand(
        &self,
        brand_id: Uuid,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Scan>, StoreError>>;

    /// Non-terminal scans that started before `cutoff`.
    fn list_stale_scans(&self, cutoff: DateTime<Utc>)
        -> BoxFuture<'_, Result<Vec<Scan>, StoreError>>;

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}
