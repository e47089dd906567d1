//! Live integration tests for aivis-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/aivis-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use aivis_core::{
    ModuleKind, ModuleResultSet, ModuleStatus, Scan, ScanStatus, Severity, ShoppingPlacement,
    SiteIssue,
};
use aivis_db::{
    get_scan, get_score_record, get_visibility_profile, insert_scan, list_module_results,
    list_scans_for_brand, list_stale_scans, record_scan_score, update_scan,
    update_scan_with_results, DbError,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn insert_new_scan(pool: &sqlx::PgPool, brand_id: Uuid) -> Scan {
    let scan = Scan::new(brand_id, Utc::now());
    insert_scan(pool, &scan)
        .await
        .unwrap_or_else(|e| panic!("insert_scan failed for brand {brand_id}: {e}"));
    scan
}

// ---------------------------------------------------------------------------
// Section 1: Scan rows
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn insert_scan_creates_profile_and_round_trips(pool: sqlx::PgPool) {
    let brand_id = Uuid::new_v4();
    let scan = insert_new_scan(&pool, brand_id).await;

    let row = get_scan(&pool, scan.id)
        .await
        .expect("get_scan failed")
        .expect("scan should exist");
    let stored = row.into_scan().expect("decode");
    assert_eq!(stored.status, ScanStatus::Queued);
    assert_eq!(stored.current_module, Some(ModuleKind::Shopping));
    assert_eq!(stored.version, 0);

    let profile = get_visibility_profile(&pool, brand_id)
        .await
        .expect("get_visibility_profile failed")
        .expect("profile should be created with the first scan");
    assert_eq!(profile.visibility_score, Decimal::ZERO);
    assert_eq!(profile.scan_count, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn update_scan_bumps_version_and_rejects_stale_writers(pool: sqlx::PgPool) {
    let mut scan = insert_new_scan(&pool, Uuid::new_v4()).await;
    scan.modules.shopping.status = ModuleStatus::Running;
    scan.status = ScanStatus::Running;

    let version = update_scan(&pool, &scan, 0).await.expect("first update");
    assert_eq!(version, 1);

    let err = update_scan(&pool, &scan, 0)
        .await
        .expect_err("stale version must conflict");
    assert!(matches!(err, DbError::Conflict { expected_version: 0, .. }));
}

#[sqlx::test(migrations = "../../migrations")]
async fn update_scan_on_missing_scan_is_not_found(pool: sqlx::PgPool) {
    let scan = Scan::new(Uuid::new_v4(), Utc::now());
    let err = update_scan(&pool, &scan, 0)
        .await
        .expect_err("missing scan");
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn module_results_are_write_once(pool: sqlx::PgPool) {
    let mut scan = insert_new_scan(&pool, Uuid::new_v4()).await;
    scan.modules.shopping.status = ModuleStatus::Done;
    let rows = ModuleResultSet::Shopping(vec![
        ShoppingPlacement {
            query: "best running shoes".to_string(),
            rank: 1.0,
        },
        ShoppingPlacement {
            query: "trail shoes".to_string(),
            rank: 5.0,
        },
    ]);

    let version = update_scan_with_results(&pool, &scan, 0, &rows)
        .await
        .expect("first write");
    assert_eq!(version, 1);

    let err = update_scan_with_results(&pool, &scan, version, &rows)
        .await
        .expect_err("second write must be rejected");
    assert!(matches!(err, DbError::DuplicateModuleResults { .. }));

    // The rejected write rolled back: version unchanged.
    let stored = get_scan(&pool, scan.id)
        .await
        .expect("get_scan")
        .expect("exists");
    assert_eq!(stored.version, 1);

    let results = list_module_results(&pool, scan.id)
        .await
        .expect("list_module_results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].row_count, 2);
    let decoded = results[0].clone().into_result_set().expect("decode");
    assert_eq!(decoded, rows);
}

#[sqlx::test(migrations = "../../migrations")]
async fn results_write_rolls_back_on_version_conflict(pool: sqlx::PgPool) {
    let mut scan = insert_new_scan(&pool, Uuid::new_v4()).await;
    scan.modules.website.status = ModuleStatus::Done;
    let rows = ModuleResultSet::Website(vec![SiteIssue {
        issue: "broken canonical".to_string(),
        severity: Severity::High,
    }]);

    let err = update_scan_with_results(&pool, &scan, 7, &rows)
        .await
        .expect_err("wrong version");
    assert!(matches!(err, DbError::Conflict { .. }));

    let results = list_module_results(&pool, scan.id).await.expect("list");
    assert!(results.is_empty(), "rows must not survive a failed update");
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_scan_listing_skips_terminal_and_recent_scans(pool: sqlx::PgPool) {
    let brand_id = Uuid::new_v4();
    let old = Scan::new(brand_id, Utc::now() - Duration::hours(2));
    insert_scan(&pool, &old).await.expect("insert old");

    let mut old_done = Scan::new(brand_id, Utc::now() - Duration::hours(2));
    old_done.status = ScanStatus::Done;
    old_done.completed_at = Some(Utc::now());
    insert_scan(&pool, &old_done).await.expect("insert old done");

    let _recent = insert_new_scan(&pool, brand_id).await;

    let stale = list_stale_scans(&pool, Utc::now() - Duration::hours(1))
        .await
        .expect("list_stale_scans");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, old.id);

    let history = list_scans_for_brand(&pool, brand_id, 10)
        .await
        .expect("list_scans_for_brand");
    assert_eq!(history.len(), 3);
}

// ---------------------------------------------------------------------------
// Section 2: Score recording
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn record_scan_score_applies_delta_once(pool: sqlx::PgPool) {
    let brand_id = Uuid::new_v4();
    let scan = insert_new_scan(&pool, brand_id).await;
    let score = Decimal::new(6525, 2); // 65.25

    let first = record_scan_score(&pool, scan.id, brand_id, score, Utc::now())
        .await
        .expect("first recording");
    assert!(first.newly_recorded);
    assert_eq!(first.profile.visibility_score, score);
    assert_eq!(first.profile.previous_visibility_score, Decimal::ZERO);
    assert_eq!(first.profile.score_change, score);
    assert_eq!(first.profile.scan_count, 1);
    assert!(first.profile.last_scan_at.is_some());

    let second = record_scan_score(&pool, scan.id, brand_id, Decimal::new(9000, 2), Utc::now())
        .await
        .expect("second recording");
    assert!(!second.newly_recorded);
    assert_eq!(second.profile.visibility_score, score);
    assert_eq!(second.profile.scan_count, 1);
    assert_eq!(second.record.new_score, score);

    let record = get_score_record(&pool, scan.id)
        .await
        .expect("get_score_record")
        .expect("record exists");
    assert_eq!(record.score_change, score);
}

#[sqlx::test(migrations = "../../migrations")]
async fn second_scan_records_signed_delta(pool: sqlx::PgPool) {
    let brand_id = Uuid::new_v4();
    let first = insert_new_scan(&pool, brand_id).await;
    let second = insert_new_scan(&pool, brand_id).await;

    record_scan_score(&pool, first.id, brand_id, Decimal::new(7000, 2), Utc::now())
        .await
        .expect("first");
    let outcome = record_scan_score(&pool, second.id, brand_id, Decimal::new(5550, 2), Utc::now())
        .await
        .expect("second");

    assert_eq!(outcome.profile.previous_visibility_score, Decimal::new(7000, 2));
    assert_eq!(outcome.profile.visibility_score, Decimal::new(5550, 2));
    assert_eq!(outcome.profile.score_change, Decimal::new(-1450, 2));
    assert_eq!(outcome.profile.scan_count, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn record_scan_score_without_profile_is_not_found(pool: sqlx::PgPool) {
    let err = record_scan_score(
        &pool,
        Uuid::new_v4(),
        Uuid::new_v4(),
        Decimal::ONE,
        Utc::now(),
    )
    .await
    .expect_err("no profile");
    assert!(matches!(err, DbError::NotFound));
}
