//! Scan handlers: create, status, module result writes, and score recording.

use aivis_core::{ModuleKind, ModuleResultSet, ModuleStatus, ParseEnumError, ScanStatus};
use aivis_scan::{ModuleOutcome, ScanStatusReport, ScoreUpdate};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_scan_error, parse_uuid, ApiError, ApiResponse, AppState};

const DEFAULT_FAILURE: &str = "module reported failure";

#[derive(Debug, Deserialize)]
pub(super) struct CreateScanRequest {
    pub brand_id: Uuid,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateScanResponse {
    pub scan_id: Uuid,
    pub status: ScanStatus,
}

/// Body of a module result write. `rows` is only read for `done`, `progress`
/// only for `running`, `error` only for `failed`.
#[derive(Debug, Deserialize)]
pub(super) struct ModuleWriteRequest {
    pub status: ModuleStatus,
    #[serde(default)]
    pub rows: Option<serde_json::Value>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub error: Option<String>,
}

/// POST /api/v1/scans
pub(super) async fn create_scan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateScanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateScanResponse>>), ApiError> {
    let scan = state
        .coordinator
        .create_scan(body.brand_id)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;

    if let Some(runner) = &state.runner {
        // Detached: the scan's state is observable through the status route.
        let _task = runner.spawn(scan.id, scan.brand_id);
    }

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            req_id.0,
            CreateScanResponse {
                scan_id: scan.id,
                status: scan.status,
            },
        )),
    ))
}

/// GET /api/v1/scans/{scan_id}
pub(super) async fn get_scan_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(scan_id): Path<String>,
) -> Result<Json<ApiResponse<ScanStatusReport>>, ApiError> {
    let scan_id = parse_uuid(&req_id.0, "scan_id", &scan_id)?;
    let report = state
        .coordinator
        .status(scan_id)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, report)))
}

/// PUT /api/v1/scans/{scan_id}/modules/{module}
pub(super) async fn write_module_result(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((scan_id, module)): Path<(String, String)>,
    Json(body): Json<ModuleWriteRequest>,
) -> Result<Json<ApiResponse<ScanStatusReport>>, ApiError> {
    let rid = &req_id.0;
    let scan_id = parse_uuid(rid, "scan_id", &scan_id)?;
    let kind: ModuleKind = module
        .parse()
        .map_err(|e: ParseEnumError| ApiError::new(rid, "validation_error", e.to_string()))?;
    let coordinator = &state.coordinator;

    match body.status {
        ModuleStatus::Pending => {
            return Err(ApiError::new(
                rid,
                "validation_error",
                "status must be 'running', 'done', or 'failed'",
            ));
        }
        ModuleStatus::Running => {
            if body.progress.is_some_and(|p| p > 100) {
                return Err(ApiError::new(
                    rid,
                    "validation_error",
                    "progress must be between 0 and 100",
                ));
            }
            coordinator
                .start_module(scan_id, kind)
                .await
                .map_err(|e| map_scan_error(rid.clone(), &e))?;
            if let Some(hint) = body.progress {
                coordinator
                    .report_progress(scan_id, kind, hint)
                    .await
                    .map_err(|e| map_scan_error(rid.clone(), &e))?;
            }
        }
        ModuleStatus::Done => {
            let rows = body
                .rows
                .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
            let results = ModuleResultSet::from_rows(kind, rows).map_err(|e| {
                ApiError::new(rid, "validation_error", format!("invalid {kind} rows: {e}"))
            })?;
            coordinator
                .complete_module(scan_id, kind, ModuleOutcome::Done(results))
                .await
                .map_err(|e| map_scan_error(rid.clone(), &e))?;
        }
        ModuleStatus::Failed => {
            let error = body
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
            coordinator
                .complete_module(scan_id, kind, ModuleOutcome::Failed(error))
                .await
                .map_err(|e| map_scan_error(rid.clone(), &e))?;
        }
    }

    let report = coordinator
        .status(scan_id)
        .await
        .map_err(|e| map_scan_error(rid.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, report)))
}

/// POST /api/v1/scans/{scan_id}/score
pub(super) async fn score_scan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(scan_id): Path<String>,
) -> Result<Json<ApiResponse<ScoreUpdate>>, ApiError> {
    let scan_id = parse_uuid(&req_id.0, "scan_id", &scan_id)?;
    let update = state
        .coordinator
        .record_score(scan_id)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, update)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_write_request_accepts_minimal_body() {
        let body: ModuleWriteRequest =
            serde_json::from_str(r#"{"status":"failed"}"#).expect("deserialize");
        assert_eq!(body.status, ModuleStatus::Failed);
        assert!(body.rows.is_none());
        assert!(body.error.is_none());
    }

    #[test]
    fn create_scan_response_serializes_lowercase_status() {
        let json = serde_json::to_value(CreateScanResponse {
            scan_id: Uuid::nil(),
            status: ScanStatus::Queued,
        })
        .expect("serialize");
        assert_eq!(json["status"], "queued");
    }
}
