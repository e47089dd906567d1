//! Database operations for the `scans` table.
//!
//! Every update is a compare-and-swap on `version`: the caller passes the
//! version it read, and a concurrent writer that got there first turns the
//! update into [`DbError::Conflict`].

use aivis_core::{ModuleKind, ModuleMap, ModuleResultSet, Scan, ScanStatus};
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgConnection, PgPool};
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `scans` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanRow {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub status: String,
    pub progress: i16,
    pub current_module: Option<String>,
    pub modules: serde_json::Value,
    pub version: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScanRow {
    /// Decode the stored columns into the domain [`Scan`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Decode`] if a status or module name is not one the
    /// domain knows, or [`DbError::Json`] if the module map is malformed.
    pub fn into_scan(self) -> Result<Scan, DbError> {
        let status: ScanStatus = self
            .status
            .parse()
            .map_err(|e| DbError::Decode(format!("scan {}: {e}", self.id)))?;
        let current_module: Option<ModuleKind> = self
            .current_module
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| DbError::Decode(format!("scan {}: {e}", self.id)))?;
        let modules: ModuleMap = serde_json::from_value(self.modules)?;
        let progress = u8::try_from(self.progress)
            .map_err(|_| DbError::Decode(format!("scan {}: progress {}", self.id, self.progress)))?;

        Ok(Scan {
            id: self.id,
            brand_id: self.brand_id,
            status,
            progress,
            current_module,
            modules,
            started_at: self.started_at,
            completed_at: self.completed_at,
            version: self.version,
        })
    }
}

const SCAN_COLUMNS: &str = "id, brand_id, status, progress, current_module, modules, version, \
                            started_at, completed_at, created_at";

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Inserts a new scan, creating the brand's visibility profile first if this
/// is the brand's first scan.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either insert fails.
pub async fn insert_scan(pool: &PgPool, scan: &Scan) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO brand_visibility_profiles (brand_id) VALUES ($1) \
         ON CONFLICT (brand_id) DO NOTHING",
    )
    .bind(scan.brand_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO scans \
             (id, brand_id, status, progress, current_module, modules, version, \
              started_at, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(scan.id)
    .bind(scan.brand_id)
    .bind(scan.status.as_str())
    .bind(i16::from(scan.progress))
    .bind(scan.current_module.map(|m| m.as_str()))
    .bind(Json(&scan.modules))
    .bind(scan.version)
    .bind(scan.started_at)
    .bind(scan.completed_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Writes the aggregate fields and module map of `scan` if the stored row is
/// still at `expected_version`. Returns the new version.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the scan does not exist,
/// [`DbError::Conflict`] if another writer updated it first, or
/// [`DbError::Sqlx`] on query failure.
pub async fn update_scan(pool: &PgPool, scan: &Scan, expected_version: i32) -> Result<i32, DbError> {
    let mut conn = pool.acquire().await?;
    update_scan_on(&mut *conn, scan, expected_version).await
}

/// Stores one module's result rows and the scan update that marks the module
/// finished, atomically. Nothing is written if either half fails.
///
/// # Errors
///
/// Returns [`DbError::DuplicateModuleResults`] if the module already has rows
/// for this scan, [`DbError::Conflict`] / [`DbError::NotFound`] as for
/// [`update_scan`], or [`DbError::Sqlx`] on query failure.
pub async fn update_scan_with_results(
    pool: &PgPool,
    scan: &Scan,
    expected_version: i32,
    results: &ModuleResultSet,
) -> Result<i32, DbError> {
    let module = results.kind().as_str();
    let rows = results.rows_json()?;
    let row_count = i32::try_from(results.row_count())
        .map_err(|_| DbError::Decode(format!("too many rows for module '{module}'")))?;

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO scan_module_results (scan_id, module, result_rows, row_count) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (scan_id, module) DO NOTHING",
    )
    .bind(scan.id)
    .bind(module)
    .bind(rows)
    .bind(row_count)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(DbError::DuplicateModuleResults {
            scan_id: scan.id,
            module: module.to_string(),
        });
    }

    let version = update_scan_on(&mut *tx, scan, expected_version).await?;
    tx.commit().await?;
    Ok(version)
}

async fn update_scan_on(
    conn: &mut PgConnection,
    scan: &Scan,
    expected_version: i32,
) -> Result<i32, DbError> {
    let version: Option<i32> = sqlx::query_scalar(
        "UPDATE scans \
         SET status = $1, progress = $2, current_module = $3, modules = $4, \
             completed_at = $5, version = version + 1, updated_at = NOW() \
         WHERE id = $6 AND version = $7 \
         RETURNING version",
    )
    .bind(scan.status.as_str())
    .bind(i16::from(scan.progress))
    .bind(scan.current_module.map(|m| m.as_str()))
    .bind(Json(&scan.modules))
    .bind(scan.completed_at)
    .bind(scan.id)
    .bind(expected_version)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(version) = version {
        return Ok(version);
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM scans WHERE id = $1)")
        .bind(scan.id)
        .fetch_one(&mut *conn)
        .await?;

    if exists {
        Err(DbError::Conflict {
            id: scan.id,
            expected_version,
        })
    } else {
        Err(DbError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Fetches a scan by id, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_scan(pool: &PgPool, id: Uuid) -> Result<Option<ScanRow>, DbError> {
    let row = sqlx::query_as::<_, ScanRow>(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns the most recent `limit` scans for a brand, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_scans_for_brand(
    pool: &PgPool,
    brand_id: Uuid,
    limit: i64,
) -> Result<Vec<ScanRow>, DbError> {
    let rows = sqlx::query_as::<_, ScanRow>(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans \
         WHERE brand_id = $1 \
         ORDER BY started_at DESC, created_at DESC \
         LIMIT $2"
    ))
    .bind(brand_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns scans still `queued` or `running` that started before `cutoff`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_stale_scans(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<ScanRow>, DbError> {
    let rows = sqlx::query_as::<_, ScanRow>(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans \
         WHERE status IN ('queued', 'running') AND started_at < $1 \
         ORDER BY started_at"
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
