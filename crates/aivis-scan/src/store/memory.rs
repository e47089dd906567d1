use std::collections::HashMap;

use aivis_core::{
    BrandVisibilityProfile, ModuleKind, ModuleResultSet, Scan, ScanResults, ScoreRecord,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RecordedScore, ScanStore};
use crate::error::StoreError;
use crate::scoring::round_score;

#[derive(Debug, Default)]
struct Inner {
    scans: HashMap<Uuid, Scan>,
    results: HashMap<(Uuid, ModuleKind), ModuleResultSet>,
    profiles: HashMap<Uuid, BrandVisibilityProfile>,
    records: HashMap<Uuid, ScoreRecord>,
}

/// In-process [`ScanStore`]. One mutex serializes every operation, so each
/// call is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScanStore for MemoryStore {
    fn insert_scan<'a>(&'a self, scan: &'a Scan) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner
                .profiles
                .entry(scan.brand_id)
                .or_insert_with(|| BrandVisibilityProfile::new(scan.brand_id, scan.started_at));
            inner.scans.insert(scan.id, scan.clone());
            Ok(())
        })
    }

    fn get_scan(&self, scan_id: Uuid) -> BoxFuture<'_, Result<Option<Scan>, StoreError>> {
        Box::pin(async move { Ok(self.inner.lock().await.scans.get(&scan_id).cloned()) })
    }

    fn update_scan<'a>(
        &'a self,
        scan: &'a Scan,
        expected_version: i32,
        results: Option<&'a ModuleResultSet>,
    ) -> BoxFuture<'a, Result<i32, StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let stored_version = inner
                .scans
                .get(&scan.id)
                .map(|s| s.version)
                .ok_or(StoreError::ScanNotFound(scan.id))?;

            if let Some(set) = results {
                if inner.results.contains_key(&(scan.id, set.kind())) {
                    return Err(StoreError::DuplicateResults {
                        scan_id: scan.id,
                        module: set.kind(),
                    });
                }
            }
            if stored_version != expected_version {
                return Err(StoreError::Conflict { id: scan.id });
            }

            let mut updated = scan.clone();
            updated.version = expected_version + 1;
            let version = updated.version;
            inner.scans.insert(scan.id, updated);
            if let Some(set) = results {
                inner.results.insert((scan.id, set.kind()), set.clone());
            }
            Ok(version)
        })
    }

    fn load_results(&self, scan_id: Uuid) -> BoxFuture<'_, Result<ScanResults, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(ModuleKind::ALL
                .into_iter()
                .filter_map(|kind| inner.results.get(&(scan_id, kind)).cloned())
                .collect())
        })
    }

    fn get_profile(
        &self,
        brand_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<BrandVisibilityProfile>, StoreError>> {
        Box::pin(async move { Ok(self.inner.lock().await.profiles.get(&brand_id).cloned()) })
    }

    fn get_score_record(
        &self,
        scan_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<ScoreRecord>, StoreError>> {
        Box::pin(async move { Ok(self.inner.lock().await.records.get(&scan_id).cloned()) })
    }

    fn record_score(
        &self,
        scan_id: Uuid,
        brand_id: Uuid,
        new_score: f64,
        recorded_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RecordedScore, StoreError>> {
        Box::pin(async move {
            if !new_score.is_finite() {
                return Err(StoreError::InvalidScore(new_score));
            }
            let mut inner = self.inner.lock().await;
            let Inner {
                profiles, records, ..
            } = &mut *inner;

            let profile = profiles
                .get_mut(&brand_id)
                .ok_or(StoreError::ProfileNotFound(brand_id))?;

            if let Some(record) = records.get(&scan_id) {
                return Ok(RecordedScore {
                    profile: profile.clone(),
                    record: record.clone(),
                    newly_recorded: false,
                });
            }

            let new_score = round_score(new_score);
            let previous = profile.visibility_score;
            let change = round_score(new_score - previous);

            profile.previous_visibility_score = previous;
            profile.visibility_score = new_score;
            profile.score_change = change;
            profile.last_scan_at = Some(recorded_at);
            profile.scan_count += 1;
            profile.updated_at = recorded_at;

            let record = ScoreRecord {
                scan_id,
                brand_id,
                previous_score: previous,
                new_score,
                score_change: change,
                recorded_at,
            };
            records.insert(scan_id, record.clone());

            Ok(RecordedScore {
                profile: profile.clone(),
                record,
                newly_recorded: true,
            })
        })
    }

    fn list_scans_for_brand(
        &self,
        brand_id: Uuid,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Scan>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let mut scans: Vec<Scan> = inner
                .scans
                .values()
                .filter(|s| s.brand_id == brand_id)
                .cloned()
                .collect();
            scans.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            scans.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
            Ok(scans)
        })
    }

    fn list_stale_scans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<Scan>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let mut scans: Vec<Scan> = inner
                .scans
                .values()
                .filter(|s| !s.is_terminal() && s.started_at < cutoff)
                .cloned()
                .collect();
            scans.sort_by_key(|s| s.started_at);
            Ok(scans)
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }
}
