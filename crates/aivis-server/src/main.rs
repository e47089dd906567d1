mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use aivis_scan::{http_modules, AnalysisClient, ModuleRunner, PgStore, RunnerConfig, ScanCoordinator};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(aivis_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = aivis_db::PoolConfig::from_app_config(&config);
    let pool = aivis_db::connect_pool(&config.database_url, pool_config).await?;
    aivis_db::run_migrations(&pool).await?;

    let coordinator = ScanCoordinator::new(Arc::new(PgStore::new(pool)));
    let runner = match &config.analysis_url {
        Some(url) => {
            let client = AnalysisClient::new(url, config.analysis_request_timeout_secs)?;
            tracing::info!(analysis_url = %url, "analysis backend configured");
            Some(ModuleRunner::new(
                coordinator.clone(),
                http_modules(Arc::new(client)),
                RunnerConfig::from_app_config(&config),
            ))
        }
        None => {
            tracing::info!("no analysis backend configured; expecting module result writes");
            None
        }
    };

    let max_lifetime =
        chrono::Duration::from_std(Duration::from_secs(config.scan_max_lifetime_secs))?;
    let _scheduler = scheduler::build_scheduler(coordinator.clone(), max_lifetime).await?;

    let auth = AuthState::from_env(matches!(config.env, aivis_core::Environment::Development))?;
    let app = build_app(
        AppState {
            coordinator,
            runner,
        },
        auth,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, env = %config.env, "aivis-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
