//! The scan coordinator: sole writer of a scan's aggregate state.
//!
//! Every write is read-modify-write against the store with a compare-and-swap
//! on `version`. A lost race re-reads and re-applies the change, up to
//! `max_write_attempts` times. When a write turns the scan terminal with at
//! least one `done` module, the coordinator records the visibility score.

use std::fmt;
use std::sync::Arc;

use aivis_core::{
    BrandVisibilityProfile, ModuleKind, ModuleMap, ModuleResultSet, ModuleStatus, Scan,
    ScanStatus, ScoreRecord,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ScanError, StoreError};
use crate::scoring::{compute_subscores, round_score, Subscores};
use crate::status::{apply_module_update, ModuleUpdate};
use crate::store::ScanStore;

const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 10;

/// Error recorded on modules still in flight when a scan outlives its budget.
pub const LIFETIME_EXCEEDED: &str = "scan exceeded maximum lifetime";

/// How a module finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOutcome {
    Done(ModuleResultSet),
    Failed(String),
}

/// Read-only view of a scan for pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStatusReport {
    pub scan_id: Uuid,
    pub brand_id: Uuid,
    pub status: ScanStatus,
    pub progress: u8,
    pub current_module: Option<ModuleKind>,
    pub modules: ModuleMap,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Recorded score, once the scan has been scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_change: Option<f64>,
}

impl ScanStatusReport {
    #[must_use]
    pub fn from_scan(scan: &Scan, record: Option<&ScoreRecord>) -> Self {
        Self {
            scan_id: scan.id,
            brand_id: scan.brand_id,
            status: scan.status,
            progress: scan.progress,
            current_module: scan.current_module,
            modules: scan.modules.clone(),
            message: status_message(scan, record),
            started_at: scan.started_at,
            completed_at: scan.completed_at,
            score: record.map(|r| r.new_score),
            score_change: record.map(|r| r.score_change),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Result of applying a scan's score to its brand's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub profile: BrandVisibilityProfile,
    pub score: f64,
    pub delta: f64,
    pub message: String,
    /// `false` when this scan had already been recorded.
    pub newly_recorded: bool,
    pub subscores: Subscores,
}

fn status_message(scan: &Scan, record: Option<&ScoreRecord>) -> String {
    match scan.status {
        ScanStatus::Queued => "Scan queued".to_string(),
        ScanStatus::Running => match scan.current_module {
            Some(module) => format!("Analyzing {module}"),
            None => "Analyzing".to_string(),
        },
        ScanStatus::Done | ScanStatus::Partial => match record {
            Some(record) => record.message(),
            None if scan.status == ScanStatus::Done => "Scan complete".to_string(),
            None => "Scan completed with partial results".to_string(),
        },
        ScanStatus::Failed => "Scan failed: all analysis modules failed".to_string(),
    }
}

/// Owns scan lifecycle transitions and score recording.
#[derive(Clone)]
pub struct ScanCoordinator {
    store: Arc<dyn ScanStore>,
    max_write_attempts: u32,
}

impl fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanCoordinator")
            .field("max_write_attempts", &self.max_write_attempts)
            .finish_non_exhaustive()
    }
}

impl ScanCoordinator {
    #[must_use]
    pub fn new(store: Arc<dyn ScanStore>) -> Self {
        Self {
            store,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    /// Bound the number of read-modify-write attempts per update (minimum 1).
    #[must_use]
    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    /// Create a `queued` scan with every module `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Store`] if the scan cannot be persisted.
    pub async fn create_scan(&self, brand_id: Uuid) -> Result<Scan, ScanError> {
        let scan = Scan::new(brand_id, Utc::now());
        self.store.insert_scan(&scan).await?;
        tracing::info!(scan_id = %scan.id, %brand_id, "scan created");
        Ok(scan)
    }

    /// Snapshot of a scan's state. Never mutates the scan.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ScanNotFound`] for an unknown id.
    pub async fn status(&self, scan_id: Uuid) -> Result<ScanStatusReport, ScanError> {
        let scan = self.load_scan(scan_id).await?;
        let record = if scan.status.outcome().is_some_and(|o| o.is_scoreable()) {
            self.store.get_score_record(scan_id).await?
        } else {
            None
        };
        Ok(ScanStatusReport::from_scan(&scan, record.as_ref()))
    }

    /// Mark a module `running`. Starting a module that is already running is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidModuleTransition`] if the module already
    /// finished, [`ScanError::ScanNotFound`], or [`ScanError::Conflict`] when
    /// every write attempt lost a race.
    pub async fn start_module(&self, scan_id: Uuid, kind: ModuleKind) -> Result<Scan, ScanError> {
        let (scan, changed) = self
            .mutate_scan(scan_id, None, |scan| {
                apply_module_update(scan, kind, ModuleUpdate::Start, Utc::now())
            })
            .await?;
        if changed {
            tracing::debug!(%scan_id, module = %kind, "module started");
        }
        Ok(scan)
    }

    /// Raise a running module's progress hint. Hints for modules that are not
    /// running, or that would lower the stored hint, are ignored.
    ///
    /// # Errors
    ///
    /// As for [`ScanCoordinator::start_module`].
    pub async fn report_progress(
        &self,
        scan_id: Uuid,
        kind: ModuleKind,
        hint: u8,
    ) -> Result<Scan, ScanError> {
        let (scan, _) = self
            .mutate_scan(scan_id, None, |scan| {
                apply_module_update(scan, kind, ModuleUpdate::Progress(hint), Utc::now())
            })
            .await?;
        Ok(scan)
    }

    /// Move a module to `done` (storing its rows in the same write) or
    /// `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ResultsMismatch`] if the rows belong to another
    /// module, [`ScanError::InvalidModuleTransition`] if the module already
    /// finished, plus the errors of [`ScanCoordinator::start_module`].
    pub async fn complete_module(
        &self,
        scan_id: Uuid,
        kind: ModuleKind,
        outcome: ModuleOutcome,
    ) -> Result<Scan, ScanError> {
        let (status, error, results) = match outcome {
            ModuleOutcome::Done(results) => {
                if results.kind() != kind {
                    return Err(ScanError::ResultsMismatch {
                        expected: kind,
                        got: results.kind(),
                    });
                }
                (ModuleStatus::Done, None, Some(results))
            }
            ModuleOutcome::Failed(error) => (ModuleStatus::Failed, Some(error), None),
        };

        let (scan, _) = self
            .mutate_scan(scan_id, results.as_ref(), |scan| {
                apply_module_update(
                    scan,
                    kind,
                    ModuleUpdate::Finish {
                        status,
                        error: error.clone(),
                    },
                    Utc::now(),
                )
            })
            .await?;

        match &error {
            Some(error) => {
                tracing::warn!(%scan_id, module = %kind, %error, "module failed");
            }
            None => tracing::info!(
                %scan_id,
                module = %kind,
                rows = results.as_ref().map_or(0, ModuleResultSet::row_count),
                "module done"
            ),
        }
        Ok(scan)
    }

    /// Compute the scan's visibility score from its stored rows and apply it
    /// to the brand's profile. Re-running for an already-recorded scan
    /// returns the original result without touching the profile.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ScanNotFound`], [`ScanError::ScanNotComplete`]
    /// while any module is in flight, [`ScanError::ScanNotScoreable`] when
    /// every module failed, or [`ScanError::ProfileNotFound`].
    pub async fn record_score(&self, scan_id: Uuid) -> Result<ScoreUpdate, ScanError> {
        let scan = self.load_scan(scan_id).await?;
        match scan.status.outcome() {
            None => {
                return Err(ScanError::ScanNotComplete {
                    scan_id,
                    status: scan.status,
                })
            }
            Some(outcome) if !outcome.is_scoreable() => {
                return Err(ScanError::ScanNotScoreable { scan_id })
            }
            Some(_) => {}
        }

        let results = self.store.load_results(scan_id).await?;
        let subscores = compute_subscores(&results);
        let score = round_score(subscores.total());

        let recorded = self
            .store
            .record_score(scan_id, scan.brand_id, score, Utc::now())
            .await
            .map_err(|e| match e {
                StoreError::ProfileNotFound(brand_id) => ScanError::ProfileNotFound(brand_id),
                other => ScanError::Store(other),
            })?;

        let message = recorded.record.message();
        if recorded.newly_recorded {
            tracing::info!(
                %scan_id,
                brand_id = %scan.brand_id,
                score = recorded.record.new_score,
                delta = recorded.record.score_change,
                "visibility score recorded"
            );
        } else {
            tracing::debug!(%scan_id, "visibility score already recorded");
        }

        Ok(ScoreUpdate {
            score: recorded.record.new_score,
            delta: recorded.record.score_change,
            message,
            newly_recorded: recorded.newly_recorded,
            profile: recorded.profile,
            subscores,
        })
    }

    /// Fail every in-flight module of scans that started more than
    /// `max_lifetime` before `now`. Returns how many scans were expired.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Store`] if the stale scans cannot be listed.
    /// Per-scan failures are logged and skipped.
    pub async fn expire_stale_scans(
        &self,
        max_lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, ScanError> {
        let stale = self.store.list_stale_scans(now - max_lifetime).await?;
        let mut expired = 0;

        for candidate in stale {
            let outcome = self
                .mutate_scan(candidate.id, None, |scan| {
                    let mut changed = false;
                    for kind in ModuleKind::ALL {
                        if !scan.modules.get(kind).status.is_terminal() {
                            changed |= apply_module_update(
                                scan,
                                kind,
                                ModuleUpdate::Finish {
                                    status: ModuleStatus::Failed,
                                    error: Some(LIFETIME_EXCEEDED.to_string()),
                                },
                                now,
                            )?;
                        }
                    }
                    Ok(changed)
                })
                .await;

            match outcome {
                Ok((scan, true)) => {
                    expired += 1;
                    tracing::warn!(
                        scan_id = %scan.id,
                        status = %scan.status,
                        "scan exceeded maximum lifetime; in-flight modules failed"
                    );
                }
                Ok((_, false)) => {}
                Err(e) => {
                    tracing::error!(scan_id = %candidate.id, error = %e, "failed to expire scan");
                }
            }
        }

        Ok(expired)
    }

    /// The brand's current visibility profile.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ProfileNotFound`] if the brand has never been
    /// scanned.
    pub async fn profile(&self, brand_id: Uuid) -> Result<BrandVisibilityProfile, ScanError> {
        self.store
            .get_profile(brand_id)
            .await?
            .ok_or(ScanError::ProfileNotFound(brand_id))
    }

    /// Most recent scans for a brand, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Store`] on storage failure.
    pub async fn list_brand_scans(
        &self,
        brand_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Scan>, ScanError> {
        Ok(self.store.list_scans_for_brand(brand_id, limit).await?)
    }

    async fn load_scan(&self, scan_id: Uuid) -> Result<Scan, ScanError> {
        self.store
            .get_scan(scan_id)
            .await?
            .ok_or(ScanError::ScanNotFound(scan_id))
    }

    /// Read the scan, apply `change`, and write it back if it reported a
    /// change. Returns the scan as written (or as read, when unchanged).
    async fn mutate_scan<F>(
        &self,
        scan_id: Uuid,
        results: Option<&ModuleResultSet>,
        mut change: F,
    ) -> Result<(Scan, bool), ScanError>
    where
        F: FnMut(&mut Scan) -> Result<bool, ScanError>,
    {
        for attempt in 1..=self.max_write_attempts {
            let mut scan = self.load_scan(scan_id).await?;
            let was_terminal = scan.is_terminal();
            let expected_version = scan.version;

            if !change(&mut scan)? {
                return Ok((scan, false));
            }

            match self
                .store
                .update_scan(&scan, expected_version, results)
                .await
            {
                Ok(version) => {
                    scan.version = version;
                    if !was_terminal && scan.is_terminal() {
                        self.on_scan_finished(&scan).await;
                    }
                    return Ok((scan, true));
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(%scan_id, attempt, "scan write lost a race, retrying");
                }
                Err(StoreError::ScanNotFound(id)) => return Err(ScanError::ScanNotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            %scan_id,
            attempts = self.max_write_attempts,
            "giving up on scan write after repeated conflicts"
        );
        Err(ScanError::Conflict {
            scan_id,
            attempts: self.max_write_attempts,
        })
    }

    async fn on_scan_finished(&self, scan: &Scan) {
        tracing::info!(
            scan_id = %scan.id,
            brand_id = %scan.brand_id,
            status = %scan.status,
            "scan finished"
        );
        if scan.status.outcome().is_some_and(|o| o.is_scoreable()) {
            if let Err(e) = self.record_score(scan.id).await {
                tracing::error!(scan_id = %scan.id, error = %e, "automatic score recording failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
