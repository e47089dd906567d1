//! Concurrent execution of a scan's four analysis modules.
//!
//! Each module runs in its own task. A module's errors, timeouts and panics
//! are contained at this boundary and become that module's `failed` status;
//! they never affect sibling modules.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use aivis_core::{AppConfig, ModuleKind, ModuleResultSet};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::coordinator::{ModuleOutcome, ScanCoordinator};
use crate::error::{ModuleError, ScanError, StoreError};
use crate::retry::retry_with_backoff;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_MODULE_TIMEOUT: Duration = Duration::from_secs(300);

/// One analysis module. Implementations do their own work sequentially and
/// return every row at once; rows are never stored piecemeal.
pub trait AnalysisModule: Send + Sync {
    fn kind(&self) -> ModuleKind;

    fn run<'a>(
        &'a self,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, Result<ModuleResultSet, ModuleError>>;
}

/// What a running module knows about its scan.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub scan_id: Uuid,
    pub brand_id: Uuid,
    pub kind: ModuleKind,
    coordinator: ScanCoordinator,
}

impl ModuleContext {
    /// Report an in-flight progress hint (0–100). Best effort: failures are
    /// logged and otherwise ignored.
    pub async fn report_progress(&self, hint: u8) {
        if let Err(e) = self
            .coordinator
            .report_progress(self.scan_id, self.kind, hint)
            .await
        {
            tracing::debug!(
                scan_id = %self.scan_id,
                module = %self.kind,
                error = %e,
                "progress hint dropped"
            );
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Retries after the first attempt, for transient errors only.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Limit for a single attempt.
    pub module_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            module_timeout: DEFAULT_MODULE_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.module_max_retries,
            backoff_base_ms: config.module_retry_backoff_base_ms,
            module_timeout: Duration::from_secs(config.module_timeout_secs),
        }
    }
}

/// Runs the configured modules for a scan and reports their outcomes to the
/// coordinator.
#[derive(Clone)]
pub struct ModuleRunner {
    coordinator: ScanCoordinator,
    modules: Arc<HashMap<ModuleKind, Arc<dyn AnalysisModule>>>,
    config: RunnerConfig,
}

impl std::fmt::Debug for ModuleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<ModuleKind> = self.modules.keys().copied().collect();
        kinds.sort();
        f.debug_struct("ModuleRunner")
            .field("modules", &kinds)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModuleRunner {
    /// Build a runner. When two modules claim the same kind the first one
    /// wins.
    #[must_use]
    pub fn new(
        coordinator: ScanCoordinator,
        modules: Vec<Arc<dyn AnalysisModule>>,
        config: RunnerConfig,
    ) -> Self {
        let mut by_kind: HashMap<ModuleKind, Arc<dyn AnalysisModule>> = HashMap::new();
        for module in modules {
            let kind = module.kind();
            if by_kind.contains_key(&kind) {
                tracing::warn!(module = %kind, "duplicate analysis module ignored");
                continue;
            }
            by_kind.insert(kind, module);
        }
        Self {
            coordinator,
            modules: Arc::new(by_kind),
            config,
        }
    }

    /// Run a scan in the background.
    #[must_use]
    pub fn spawn(&self, scan_id: Uuid, brand_id: Uuid) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_scan(scan_id, brand_id).await })
    }

    /// Run all four modules concurrently and wait for every one to be
    /// recorded.
    pub async fn run_scan(&self, scan_id: Uuid, brand_id: Uuid) {
        tracing::info!(%scan_id, %brand_id, "running analysis modules");
        let mut tasks = JoinSet::new();

        for kind in ModuleKind::ALL {
            let ctx = ModuleContext {
                scan_id,
                brand_id,
                kind,
                coordinator: self.coordinator.clone(),
            };
            let module = self.modules.get(&kind).cloned();
            let config = self.config;
            tasks.spawn(run_module(ctx, module, config));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(%scan_id, error = %e, "module task aborted");
            }
        }
        tracing::debug!(%scan_id, "all module tasks finished");
    }
}

async fn run_module(
    ctx: ModuleContext,
    module: Option<Arc<dyn AnalysisModule>>,
    config: RunnerConfig,
) {
    let ModuleContext { scan_id, kind, .. } = ctx;

    match ctx.coordinator.start_module(scan_id, kind).await {
        Ok(_) => {}
        Err(ScanError::InvalidModuleTransition { from, .. }) => {
            tracing::debug!(%scan_id, module = %kind, %from, "module already finished; skipping");
            return;
        }
        Err(e @ (ScanError::ScanNotFound(_) | ScanError::Store(StoreError::ScanNotFound(_)))) => {
            tracing::warn!(%scan_id, module = %kind, error = %e, "scan is gone; module not run");
            return;
        }
        Err(e) => {
            tracing::warn!(%scan_id, module = %kind, error = %e, "could not mark module running");
        }
    }

    let outcome = match module {
        None => ModuleOutcome::Failed("no analysis module configured".to_string()),
        Some(module) => match execute(&ctx, module.as_ref(), config).await {
            Ok(rows) if rows.kind() == kind => ModuleOutcome::Done(rows),
            Ok(rows) => ModuleOutcome::Failed(format!(
                "module returned rows for '{}'",
                rows.kind()
            )),
            Err(e) => ModuleOutcome::Failed(e.to_string()),
        },
    };

    if let Err(e) = ctx.coordinator.complete_module(scan_id, kind, outcome).await {
        tracing::error!(
            %scan_id,
            module = %kind,
            error = %e,
            "failed to record module outcome; its rows are lost and the module stays running until the lifetime sweep fails it"
        );
    }
}

async fn execute(
    ctx: &ModuleContext,
    module: &dyn AnalysisModule,
    config: RunnerConfig,
) -> Result<ModuleResultSet, ModuleError> {
    retry_with_backoff(
        ctx.kind,
        config.max_retries,
        config.backoff_base_ms,
        |attempt| run_attempt(ctx, module, config.module_timeout, attempt),
    )
    .await
}

async fn run_attempt(
    ctx: &ModuleContext,
    module: &dyn AnalysisModule,
    limit: Duration,
    attempt: u32,
) -> Result<ModuleResultSet, ModuleError> {
    tracing::debug!(scan_id = %ctx.scan_id, module = %ctx.kind, attempt, "module attempt");
    // The call itself happens inside the guarded future so a panic while
    // building the module's future is caught too.
    let guarded = AssertUnwindSafe(async { module.run(ctx).await }).catch_unwind();
    match tokio::time::timeout(limit, guarded).await {
        Err(_) => Err(ModuleError::Timeout(limit)),
        Ok(Err(panic)) => Err(ModuleError::Panicked(panic_message(panic.as_ref()))),
        Ok(Ok(result)) => result,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
