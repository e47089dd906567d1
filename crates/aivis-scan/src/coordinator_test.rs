use std::sync::atomic::{AtomicU32, Ordering};

use aivis_core::{BrandDescriptor, Sentiment, ShoppingPlacement};
use futures::future::BoxFuture;

use super::*;
use crate::store::{MemoryStore, RecordedScore};

const EPSILON: f64 = 1e-9;

fn coordinator() -> ScanCoordinator {
    ScanCoordinator::new(Arc::new(MemoryStore::new()))
}

fn shopping_rows(ranks: &[f64]) -> ModuleResultSet {
    ModuleResultSet::Shopping(
        ranks
            .iter()
            .map(|&rank| ShoppingPlacement {
                query: "trail running shoes".to_string(),
                rank,
            })
            .collect(),
    )
}

fn brand_rows(tags: &[Sentiment]) -> ModuleResultSet {
    ModuleResultSet::Brand(
        tags.iter()
            .map(|&sentiment| BrandDescriptor {
                descriptor: "durable".to_string(),
                sentiment,
            })
            .collect(),
    )
}

fn empty_rows(kind: ModuleKind) -> ModuleResultSet {
    ModuleResultSet::from_rows(kind, serde_json::json!([])).expect("empty rows")
}

fn failed(msg: &str) -> ModuleOutcome {
    ModuleOutcome::Failed(msg.to_string())
}

// ---------------------------------------------------------------------------
// Lifecycle and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_scan_reports_queued() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Queued);
    assert_eq!(report.progress, 0);
    assert_eq!(report.current_module, Some(ModuleKind::Shopping));
    assert_eq!(report.message, "Scan queued");
    assert!(report.completed_at.is_none());
    assert!(report.score.is_none());
}

#[tokio::test]
async fn status_of_unknown_scan_is_not_found() {
    let err = coordinator()
        .status(Uuid::new_v4())
        .await
        .expect_err("unknown scan");
    assert!(matches!(err, ScanError::ScanNotFound(_)));
}

#[tokio::test]
async fn status_query_is_read_only() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");
    coord
        .start_module(scan.id, ModuleKind::Brand)
        .await
        .expect("start");

    let before = coord.store().get_scan(scan.id).await.expect("get").expect("exists");
    for _ in 0..3 {
        coord.status(scan.id).await.expect("status");
    }
    let after = coord.store().get_scan(scan.id).await.expect("get").expect("exists");
    assert_eq!(before, after);
}

#[tokio::test]
async fn running_message_names_current_module() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");
    coord
        .complete_module(scan.id, ModuleKind::Shopping, failed("timeout"))
        .await
        .expect("fail shopping");
    coord
        .start_module(scan.id, ModuleKind::Website)
        .await
        .expect("start website");

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Running);
    assert_eq!(report.current_module, Some(ModuleKind::Brand));
    assert_eq!(report.message, "Analyzing brand");
    assert_eq!(report.progress, 25);
}

#[tokio::test]
async fn finished_module_cannot_be_restarted() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");
    coord
        .complete_module(scan.id, ModuleKind::Brand, ModuleOutcome::Done(brand_rows(&[])))
        .await
        .expect("done");

    let err = coord
        .start_module(scan.id, ModuleKind::Brand)
        .await
        .expect_err("restart");
    assert!(matches!(
        err,
        ScanError::InvalidModuleTransition {
            module: ModuleKind::Brand,
            from: ModuleStatus::Done,
            ..
        }
    ));
    let err = coord
        .complete_module(scan.id, ModuleKind::Brand, failed("late failure"))
        .await
        .expect_err("second completion");
    assert!(matches!(err, ScanError::InvalidModuleTransition { .. }));
}

#[tokio::test]
async fn rows_for_the_wrong_module_are_rejected() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");
    let err = coord
        .complete_module(
            scan.id,
            ModuleKind::Website,
            ModuleOutcome::Done(shopping_rows(&[1.0])),
        )
        .await
        .expect_err("mismatch");
    assert!(matches!(
        err,
        ScanError::ResultsMismatch {
            expected: ModuleKind::Website,
            got: ModuleKind::Shopping
        }
    ));
}

#[tokio::test]
async fn progress_hints_raise_scan_progress() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");
    coord
        .start_module(scan.id, ModuleKind::Conversations)
        .await
        .expect("start");
    let scan = coord
        .report_progress(scan.id, ModuleKind::Conversations, 60)
        .await
        .expect("hint");
    assert_eq!(scan.progress, 15);

    let scan = coord
        .report_progress(scan.id, ModuleKind::Conversations, 10)
        .await
        .expect("lower hint");
    assert_eq!(scan.progress, 15, "progress must not go backwards");
}

// ---------------------------------------------------------------------------
// Completion and scoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_modules_done_records_score_automatically() {
    let coord = coordinator();
    let brand_id = Uuid::new_v4();
    let scan = coord.create_scan(brand_id).await.expect("create");

    coord
        .complete_module(
            scan.id,
            ModuleKind::Shopping,
            ModuleOutcome::Done(shopping_rows(&[1.0, 5.0])),
        )
        .await
        .expect("shopping");
    for kind in [ModuleKind::Brand, ModuleKind::Conversations, ModuleKind::Website] {
        coord
            .complete_module(scan.id, kind, ModuleOutcome::Done(empty_rows(kind)))
            .await
            .expect("complete");
    }

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.progress, 100);
    assert!(report.current_module.is_none());
    assert!(report.completed_at.is_some());
    assert_eq!(report.score, Some(24.25));
    assert_eq!(report.message, "Score improved by 24.3%");

    let profile = coord.profile(brand_id).await.expect("profile");
    assert!((profile.visibility_score - 24.25).abs() < EPSILON);
    assert_eq!(profile.scan_count, 1);
}

#[tokio::test]
async fn all_modules_failed_is_failed_and_not_scoreable() {
    let coord = coordinator();
    let brand_id = Uuid::new_v4();
    let scan = coord.create_scan(brand_id).await.expect("create");
    for kind in ModuleKind::ALL {
        coord
            .complete_module(scan.id, kind, failed("analysis backend unavailable"))
            .await
            .expect("fail");
    }

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Failed);
    assert_eq!(report.message, "Scan failed: all analysis modules failed");

    let err = coord.record_score(scan.id).await.expect_err("not scoreable");
    assert!(matches!(err, ScanError::ScanNotScoreable { .. }));

    let profile = coord.profile(brand_id).await.expect("profile");
    assert_eq!(profile.scan_count, 0);
    assert_eq!(profile.visibility_score, 0.0);
}

#[tokio::test]
async fn two_done_two_failed_scores_from_done_modules_only() {
    let coord = coordinator();
    let brand_id = Uuid::new_v4();
    let scan = coord.create_scan(brand_id).await.expect("create");

    coord
        .complete_module(scan.id, ModuleKind::Website, failed("crawl blocked"))
        .await
        .expect("website");
    coord
        .complete_module(
            scan.id,
            ModuleKind::Brand,
            ModuleOutcome::Done(brand_rows(&[
                Sentiment::Positive,
                Sentiment::Positive,
                Sentiment::Negative,
            ])),
        )
        .await
        .expect("brand");
    coord
        .complete_module(scan.id, ModuleKind::Conversations, failed("timeout"))
        .await
        .expect("conversations");
    coord
        .complete_module(
            scan.id,
            ModuleKind::Shopping,
            ModuleOutcome::Done(shopping_rows(&[1.0, 5.0])),
        )
        .await
        .expect("shopping");

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Partial);
    // 24.25 + 16.67; the failed modules add nothing.
    assert_eq!(report.score, Some(40.92));
    assert_eq!(report.score_change, Some(40.92));

    let update = coord.record_score(scan.id).await.expect("replay");
    assert!(!update.newly_recorded);
    assert!((update.subscores.shopping - 24.25).abs() < EPSILON);
    assert_eq!(update.subscores.website, 0.0);
    assert_eq!(update.subscores.conversations, 0.0);
    assert_eq!(update.profile.scan_count, 1);
}

#[test]
fn partial_message_before_recording() {
    let scan = {
        let mut scan = Scan::new(Uuid::new_v4(), Utc::now());
        scan.modules = ModuleMap::from_statuses([
            ModuleStatus::Done,
            ModuleStatus::Failed,
            ModuleStatus::Done,
            ModuleStatus::Done,
        ]);
        scan.status = ScanStatus::Partial;
        scan
    };
    let report = ScanStatusReport::from_scan(&scan, None);
    assert_eq!(report.message, "Scan completed with partial results");

    let done = Scan {
        status: ScanStatus::Done,
        ..scan
    };
    assert_eq!(
        ScanStatusReport::from_scan(&done, None).message,
        "Scan complete"
    );
}

#[tokio::test]
async fn score_trigger_rejects_running_scan_with_its_status() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");
    coord
        .start_module(scan.id, ModuleKind::Shopping)
        .await
        .expect("start");

    let err = coord.record_score(scan.id).await.expect_err("running");
    assert!(matches!(
        err,
        ScanError::ScanNotComplete {
            status: ScanStatus::Running,
            ..
        }
    ));
    let err = coord
        .record_score(Uuid::new_v4())
        .await
        .expect_err("unknown");
    assert!(matches!(err, ScanError::ScanNotFound(_)));
}

#[tokio::test]
async fn second_scan_reports_signed_delta() {
    let coord = coordinator();
    let brand_id = Uuid::new_v4();

    let first = coord.create_scan(brand_id).await.expect("first");
    coord
        .complete_module(
            first.id,
            ModuleKind::Shopping,
            ModuleOutcome::Done(shopping_rows(&[0.0])),
        )
        .await
        .expect("shopping");
    for kind in [ModuleKind::Brand, ModuleKind::Conversations, ModuleKind::Website] {
        coord
            .complete_module(first.id, kind, failed("skipped"))
            .await
            .expect("fail");
    }

    let second = coord.create_scan(brand_id).await.expect("second");
    coord
        .complete_module(
            second.id,
            ModuleKind::Shopping,
            ModuleOutcome::Done(shopping_rows(&[40.0])),
        )
        .await
        .expect("shopping");
    for kind in [ModuleKind::Brand, ModuleKind::Conversations, ModuleKind::Website] {
        coord
            .complete_module(second.id, kind, failed("skipped"))
            .await
            .expect("fail");
    }

    let update = coord.record_score(second.id).await.expect("replay");
    assert!((update.profile.previous_visibility_score - 25.0).abs() < EPSILON);
    assert!((update.profile.visibility_score - 15.0).abs() < EPSILON);
    assert!((update.delta + 10.0).abs() < EPSILON);
    assert_eq!(update.message, "Score decreased by 10.0%");
    assert_eq!(update.profile.scan_count, 2);

    let history = coord.list_brand_scans(brand_id, 10).await.expect("history");
    assert_eq!(history.len(), 2);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_converge_and_record_once() {
    let coord = coordinator();
    let brand_id = Uuid::new_v4();
    let scan = coord.create_scan(brand_id).await.expect("create");

    let mut handles = Vec::new();
    for kind in ModuleKind::ALL {
        let coord = coord.clone();
        handles.push(tokio::spawn(async move {
            coord.start_module(scan.id, kind).await?;
            coord
                .complete_module(scan.id, kind, ModuleOutcome::Done(empty_rows(kind)))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("module update");
    }

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.progress, 100);
    assert!(report
        .modules
        .iter()
        .all(|(_, m)| m.status == ModuleStatus::Done));

    let profile = coord.profile(brand_id).await.expect("profile");
    assert_eq!(profile.scan_count, 1, "score applied exactly once");
}

/// Store whose scan writes always lose the race.
struct AlwaysConflicting {
    inner: MemoryStore,
    writes: AtomicU32,
}

impl ScanStore for AlwaysConflicting {
    fn insert_scan<'a>(&'a self, scan: &'a Scan) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.insert_scan(scan)
    }

    fn get_scan(&self, scan_id: Uuid) -> BoxFuture<'_, Result<Option<Scan>, StoreError>> {
        self.inner.get_scan(scan_id)
    }

    fn update_scan<'a>(
        &'a self,
        scan: &'a Scan,
        _expected_version: i32,
        _results: Option<&'a ModuleResultSet>,
    ) -> BoxFuture<'a, Result<i32, StoreError>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Err(StoreError::Conflict { id: scan.id }) })
    }

    fn load_results(
        &self,
        scan_id: Uuid,
    ) -> BoxFuture<'_, Result<aivis_core::ScanResults, StoreError>> {
        self.inner.load_results(scan_id)
    }

    fn get_profile(
        &self,
        brand_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<BrandVisibilityProfile>, StoreError>> {
        self.inner.get_profile(brand_id)
    }

    fn get_score_record(
        &self,
        scan_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<ScoreRecord>, StoreError>> {
        self.inner.get_score_record(scan_id)
    }

    fn record_score(
        &self,
        scan_id: Uuid,
        brand_id: Uuid,
        new_score: f64,
        recorded_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RecordedScore, StoreError>> {
        self.inner
            .record_score(scan_id, brand_id, new_score, recorded_at)
    }

    fn list_scans_for_brand(
        &self,
        brand_id: Uuid,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Scan>, StoreError>> {
        self.inner.list_scans_for_brand(brand_id, limit)
    }

    fn list_stale_scans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<Scan>, StoreError>> {
        self.inner.list_stale_scans(cutoff)
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        self.inner.health_check()
    }
}

#[tokio::test]
async fn persistent_conflicts_surface_after_bounded_attempts() {
    let store = Arc::new(AlwaysConflicting {
        inner: MemoryStore::new(),
        writes: AtomicU32::new(0),
    });
    let coord = ScanCoordinator::new(store.clone()).with_max_write_attempts(3);
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");

    let err = coord
        .start_module(scan.id, ModuleKind::Shopping)
        .await
        .expect_err("conflict");
    assert!(matches!(err, ScanError::Conflict { attempts: 3, .. }));
    assert_eq!(store.writes.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Lifetime expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_scans_fail_in_flight_modules_and_score_partial() {
    let coord = coordinator();
    let brand_id = Uuid::new_v4();
    let scan = coord.create_scan(brand_id).await.expect("create");
    coord
        .complete_module(
            scan.id,
            ModuleKind::Shopping,
            ModuleOutcome::Done(shopping_rows(&[2.0])),
        )
        .await
        .expect("shopping");
    coord
        .start_module(scan.id, ModuleKind::Brand)
        .await
        .expect("start brand");

    // Nothing is stale yet.
    let expired = coord
        .expire_stale_scans(Duration::minutes(15), Utc::now())
        .await
        .expect("expire");
    assert_eq!(expired, 0);

    let later = Utc::now() + Duration::minutes(16);
    let expired = coord
        .expire_stale_scans(Duration::minutes(15), later)
        .await
        .expect("expire");
    assert_eq!(expired, 1);

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Partial);
    assert_eq!(
        report.modules.brand.error.as_deref(),
        Some(LIFETIME_EXCEEDED)
    );
    assert_eq!(report.modules.shopping.status, ModuleStatus::Done);
    assert_eq!(report.score, Some(24.5));

    let again = coord
        .expire_stale_scans(Duration::minutes(15), later)
        .await
        .expect("expire");
    assert_eq!(again, 0, "terminal scans are never expired twice");
}

#[tokio::test]
async fn stale_scan_with_no_done_module_ends_failed() {
    let coord = coordinator();
    let scan = coord.create_scan(Uuid::new_v4()).await.expect("create");

    let later = Utc::now() + Duration::hours(1);
    coord
        .expire_stale_scans(Duration::minutes(15), later)
        .await
        .expect("expire");

    let report = coord.status(scan.id).await.expect("status");
    assert_eq!(report.status, ScanStatus::Failed);
    assert!(report.score.is_none());
}
