use std::time::Duration;

use aivis_core::{ModuleKind, ModuleStatus, ScanStatus};
use aivis_db::DbError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the scan coordinator to its callers.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan {0} not found")]
    ScanNotFound(Uuid),

    #[error("brand {0} has no visibility profile")]
    ProfileNotFound(Uuid),

    /// The score was requested before every module reached a terminal state.
    #[error("scan {scan_id} is not complete (status: {status})")]
    ScanNotComplete { scan_id: Uuid, status: ScanStatus },

    /// Every module failed; there is no data to score.
    #[error("scan {scan_id} failed in every module and cannot be scored")]
    ScanNotScoreable { scan_id: Uuid },

    #[error("module '{module}' cannot move from {from} to {to}")]
    InvalidModuleTransition {
        module: ModuleKind,
        from: ModuleStatus,
        to: ModuleStatus,
    },

    #[error("module '{expected}' reported rows for module '{got}'")]
    ResultsMismatch { expected: ModuleKind, got: ModuleKind },

    /// Optimistic writes kept losing to concurrent writers.
    #[error("scan {scan_id} update lost {attempts} consecutive write races")]
    Conflict { scan_id: Uuid, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from a [`crate::ScanStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("scan {0} not found")]
    ScanNotFound(Uuid),

    #[error("brand {0} has no visibility profile")]
    ProfileNotFound(Uuid),

    #[error("scan {id} was modified concurrently")]
    Conflict { id: Uuid },

    #[error("results for module '{module}' of scan {scan_id} were already written")]
    DuplicateResults { scan_id: Uuid, module: ModuleKind },

    #[error("invalid score value: {0}")]
    InvalidScore(f64),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Errors raised while running a single analysis module. These never escape
/// the runner: they become the module's `failed` status.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("analysis backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid analysis URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("module timed out after {0:?}")]
    Timeout(Duration),

    #[error("module panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    /// Returns `true` for errors that are worth retrying after a back-off delay.
    ///
    /// **Retriable:** connect/timeout failures, HTTP 5xx and 429 responses,
    /// and per-attempt timeouts.
    ///
    /// **Not retriable:** other 4xx responses, malformed bodies, bad URLs,
    /// panics, and module-declared failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ModuleError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            ModuleError::Status { status, .. } => *status >= 500 || *status == 429,
            ModuleError::Timeout(_) => true,
            ModuleError::Deserialize { .. }
            | ModuleError::InvalidUrl { .. }
            | ModuleError::Panicked(_)
            | ModuleError::Failed(_) => false,
        }
    }
}
