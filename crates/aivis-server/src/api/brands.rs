use aivis_core::{BrandVisibilityProfile, ModuleKind, Scan, ScanStatus};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_scan_error, normalize_limit, parse_uuid, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct BrandScansQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct BrandScanItem {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub progress: u8,
    pub current_module: Option<ModuleKind>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Scan> for BrandScanItem {
    fn from(scan: Scan) -> Self {
        Self {
            scan_id: scan.id,
            status: scan.status,
            progress: scan.progress,
            current_module: scan.current_module,
            started_at: scan.started_at,
            completed_at: scan.completed_at,
        }
    }
}

/// GET /api/v1/brands/{brand_id}/visibility
pub(super) async fn get_visibility(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(brand_id): Path<String>,
) -> Result<Json<ApiResponse<BrandVisibilityProfile>>, ApiError> {
    let brand_id = parse_uuid(&req_id.0, "brand_id", &brand_id)?;
    let profile = state
        .coordinator
        .profile(brand_id)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, profile)))
}

/// GET /api/v1/brands/{brand_id}/scans
pub(super) async fn list_scans(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(brand_id): Path<String>,
    Query(query): Query<BrandScansQuery>,
) -> Result<Json<ApiResponse<Vec<BrandScanItem>>>, ApiError> {
    let brand_id = parse_uuid(&req_id.0, "brand_id", &brand_id)?;
    let scans = state
        .coordinator
        .list_brand_scans(brand_id, normalize_limit(query.limit))
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(
        req_id.0,
        scans.into_iter().map(BrandScanItem::from).collect(),
    )))
}
