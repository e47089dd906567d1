//! Read access to the write-once `scan_module_results` table.
//!
//! Rows are inserted only together with the module's terminal status, see
//! [`crate::update_scan_with_results`].

use aivis_core::{ModuleKind, ModuleResultSet};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `scan_module_results` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ModuleResultRow {
    pub scan_id: Uuid,
    pub module: String,
    pub result_rows: serde_json::Value,
    pub row_count: i32,
    pub created_at: DateTime<Utc>,
}

impl ModuleResultRow {
    /// Decode the stored JSON back into the module's typed rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Decode`] for an unknown module name or
    /// [`DbError::Json`] if the rows do not match the module's row shape.
    pub fn into_result_set(self) -> Result<ModuleResultSet, DbError> {
        let kind: ModuleKind = self
            .module
            .parse()
            .map_err(|e| DbError::Decode(format!("scan {}: {e}", self.scan_id)))?;
        Ok(ModuleResultSet::from_rows(kind, self.result_rows)?)
    }
}

/// Returns every module's stored result rows for a scan.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_module_results(
    pool: &PgPool,
    scan_id: Uuid,
) -> Result<Vec<ModuleResultRow>, DbError> {
    let rows = sqlx::query_as::<_, ModuleResultRow>(
        "SELECT scan_id, module, result_rows, row_count, created_at \
         FROM scan_module_results \
         WHERE scan_id = $1 \
         ORDER BY module",
    )
    .bind(scan_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
