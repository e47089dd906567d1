mod profile;
mod scan;

use std::sync::Arc;
use std::time::Duration;

use aivis_core::AppConfig;
use aivis_scan::{PgStore, ScanCoordinator};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::profile::ProfileCommands;
use crate::scan::ScanCommands;

#[derive(Debug, Parser)]
#[command(name = "aivis-cli")]
#[command(about = "AIVIS visibility scan command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Start, inspect, and score visibility scans
    Scan {
        #[command(subcommand)]
        command: ScanCommands,
    },
    /// Inspect brand visibility profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log_level = std::env::var("AIVIS_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        None => println!("aivis-cli: no command given; run with --help for usage"),
        Some(Commands::Migrate) => {
            let config = aivis_core::load_app_config()?;
            let pool = connect(&config).await?;
            let applied = aivis_db::run_migrations(&pool).await?;
            println!("migrations up to date ({applied} applied)");
        }
        Some(Commands::Scan { command }) => match command {
            ScanCommands::Start { brand, wait } => {
                let (config, coordinator) = connect_coordinator().await?;
                scan::run_scan_start(&config, &coordinator, brand, wait).await?;
            }
            ScanCommands::Status { scan_id } => {
                let (_, coordinator) = connect_coordinator().await?;
                scan::run_scan_status(&coordinator, scan_id).await?;
            }
            ScanCommands::Watch {
                scan_id,
                api_url,
                api_key,
                interval_secs,
                max_polls,
            } => {
                scan::run_scan_watch(
                    &api_url,
                    api_key.as_deref(),
                    scan_id,
                    Duration::from_secs(interval_secs),
                    max_polls,
                )
                .await?;
            }
            ScanCommands::Score { scan_id } => {
                let (_, coordinator) = connect_coordinator().await?;
                scan::run_scan_score(&coordinator, scan_id).await?;
            }
        },
        Some(Commands::Profile {
            command: ProfileCommands::Show { brand, scans },
        }) => {
            let (_, coordinator) = connect_coordinator().await?;
            profile::run_profile_show(&coordinator, brand, scans).await?;
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = aivis_db::PoolConfig::from_app_config(config);
    Ok(aivis_db::connect_pool(&config.database_url, pool_config).await?)
}

/// Load config and build a coordinator over the Postgres store.
async fn connect_coordinator() -> anyhow::Result<(AppConfig, ScanCoordinator)> {
    let config = aivis_core::load_app_config()?;
    let pool = connect(&config).await?;
    let coordinator = ScanCoordinator::new(Arc::new(PgStore::new(pool)));
    Ok((config, coordinator))
}

#[cfg(test)]
mod tests;
