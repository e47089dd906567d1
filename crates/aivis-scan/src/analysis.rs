//! HTTP client for the external analysis backend, and the [`AnalysisModule`]
//! implementation that uses it.
//!
//! The backend exposes one endpoint per module:
//! `GET {base}/v1/modules/{module}?scan_id=..&brand_id=..`, answering
//! `{ "rows": [...] }` with the module's result rows.

use std::sync::Arc;
use std::time::Duration;

use aivis_core::{ModuleKind, ModuleResultSet};
use futures::future::BoxFuture;
use reqwest::{Client, Url};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ModuleError;
use crate::runner::{AnalysisModule, ModuleContext};

/// Longest error body kept in a [`ModuleError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct RowsEnvelope {
    rows: serde_json::Value,
}

/// Client for the analysis backend.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    client: Client,
    base_url: Url,
}

impl AnalysisClient {
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidUrl`] if `base_url` does not parse, or
    /// [`ModuleError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ModuleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("aivis/0.1 (visibility-scan)")
            .build()?;

        // Exactly one trailing slash so `join` appends instead of replacing
        // the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| ModuleError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { client, base_url })
    }

    fn module_url(
        &self,
        kind: ModuleKind,
        scan_id: Uuid,
        brand_id: Uuid,
    ) -> Result<Url, ModuleError> {
        let mut url = self
            .base_url
            .join(&format!("v1/modules/{kind}"))
            .map_err(|e| ModuleError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;
        url.query_pairs_mut()
            .append_pair("scan_id", &scan_id.to_string())
            .append_pair("brand_id", &brand_id.to_string());
        Ok(url)
    }

    /// Fetch one module's rows for a scan.
    ///
    /// # Errors
    ///
    /// - [`ModuleError::Http`] on network failure or timeout.
    /// - [`ModuleError::Status`] on a non-2xx response.
    /// - [`ModuleError::Deserialize`] if the body is not `{ "rows": [...] }`
    ///   with rows of the module's shape.
    pub async fn fetch_module(
        &self,
        kind: ModuleKind,
        scan_id: Uuid,
        brand_id: Uuid,
    ) -> Result<ModuleResultSet, ModuleError> {
        let url = self.module_url(kind, scan_id, brand_id)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ModuleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: RowsEnvelope =
            serde_json::from_str(&body).map_err(|e| ModuleError::Deserialize {
                context: format!("{kind} response"),
                source: e,
            })?;
        ModuleResultSet::from_rows(kind, envelope.rows).map_err(|e| ModuleError::Deserialize {
            context: format!("{kind} rows"),
            source: e,
        })
    }
}

/// An [`AnalysisModule`] answered by the analysis backend.
#[derive(Debug, Clone)]
pub struct HttpAnalysisModule {
    kind: ModuleKind,
    client: Arc<AnalysisClient>,
}

impl HttpAnalysisModule {
    #[must_use]
    pub fn new(kind: ModuleKind, client: Arc<AnalysisClient>) -> Self {
        Self { kind, client }
    }
}

impl AnalysisModule for HttpAnalysisModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn run<'a>(
        &'a self,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, Result<ModuleResultSet, ModuleError>> {
        Box::pin(async move {
            self.client
                .fetch_module(self.kind, ctx.scan_id, ctx.brand_id)
                .await
        })
    }
}

/// One [`HttpAnalysisModule`] per module kind, sharing `client`.
#[must_use]
pub fn http_modules(client: Arc<AnalysisClient>) -> Vec<Arc<dyn AnalysisModule>> {
    ModuleKind::ALL
        .into_iter()
        .map(|kind| {
            Arc::new(HttpAnalysisModule::new(kind, Arc::clone(&client))) as Arc<dyn AnalysisModule>
        })
        .collect()
}
