mod brands;
mod scans;

use aivis_scan::{ModuleRunner, ScanCoordinator, ScanError, StoreError};
use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::middleware::{request_id, require_bearer_auth, AuthState, RequestId};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: ScanCoordinator,
    /// Present when an analysis backend is configured. Without it, module
    /// results arrive through the module-write endpoint.
    pub runner: Option<ModuleRunner>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(request_id: String, data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta::new(request_id),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" | "scan_not_complete" | "scan_not_scoreable" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn normalize_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 200)
}

pub(super) fn parse_uuid(request_id: &str, field: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError::new(
            request_id,
            "validation_error",
            format!("{field} must be a UUID, got '{raw}'"),
        )
    })
}

/// Translate coordinator errors into API error codes. Storage failures are
/// logged and reported without detail.
pub(super) fn map_scan_error(request_id: String, error: &ScanError) -> ApiError {
    let code = match error {
        ScanError::ScanNotFound(_)
        | ScanError::ProfileNotFound(_)
        | ScanError::Store(StoreError::ScanNotFound(_) | StoreError::ProfileNotFound(_)) => {
            "not_found"
        }
        ScanError::ScanNotComplete { .. } => "scan_not_complete",
        ScanError::ScanNotScoreable { .. } => "scan_not_scoreable",
        ScanError::InvalidModuleTransition { .. }
        | ScanError::Conflict { .. }
        | ScanError::Store(StoreError::Conflict { .. } | StoreError::DuplicateResults { .. }) => {
            "conflict"
        }
        ScanError::ResultsMismatch { .. } => "validation_error",
        ScanError::Store(StoreError::InvalidScore(_) | StoreError::Db(_)) => {
            tracing::error!(error = %error, "scan store operation failed");
            return ApiError::new(request_id, "internal_error", "database query failed");
        }
    };
    ApiError::new(request_id, code, error.to_string())
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/scans", post(scans::create_scan))
        .route("/api/v1/scans/{scan_id}", get(scans::get_scan_status))
        .route(
            "/api/v1/scans/{scan_id}/modules/{module}",
            put(scans::write_module_result),
        )
        .route("/api/v1/scans/{scan_id}/score", post(scans::score_scan))
        .route(
            "/api/v1/brands/{brand_id}/visibility",
            get(brands::get_visibility),
        )
        .route("/api/v1/brands/{brand_id}/scans", get(brands::list_scans))
        .layer(axum::middleware::from_fn_with_state(
            auth,
            require_bearer_auth,
        ))
}

pub fn build_app(state: AppState, auth: AuthState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);

    match state.coordinator.store().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                    },
                    meta,
                }),
            )
        }
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
