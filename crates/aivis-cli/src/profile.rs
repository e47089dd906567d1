//! Visibility profile command handlers for the CLI.

use aivis_core::{score_message, BrandVisibilityProfile};
use aivis_scan::ScanCoordinator;
use clap::Subcommand;
use uuid::Uuid;

/// Sub-commands available under `profile`.
#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    /// Show a brand's visibility score and recent scans
    Show {
        brand: Uuid,
        /// Number of recent scans to list
        #[arg(long, default_value = "5")]
        scans: i64,
    },
}

fn format_profile(profile: &BrandVisibilityProfile) -> Vec<String> {
    let last_scan = profile.last_scan_at.map_or_else(
        || "never".to_string(),
        |at| at.format("%Y-%m-%d %H:%M UTC").to_string(),
    );
    vec![
        format!("brand     {}", profile.brand_id),
        format!(
            "score     {:.2} (previous {:.2})",
            profile.visibility_score, profile.previous_visibility_score
        ),
        format!("change    {}", score_message(profile.score_change)),
        format!("scans     {} (last: {last_scan})", profile.scan_count),
    ]
}

/// Print a brand's profile followed by its most recent scans.
///
/// # Errors
///
/// Returns an error if the brand has no profile or the store is unreachable.
pub(crate) async fn run_profile_show(
    coordinator: &ScanCoordinator,
    brand_id: Uuid,
    scan_limit: i64,
) -> anyhow::Result<()> {
    let profile = coordinator.profile(brand_id).await?;
    for line in format_profile(&profile) {
        println!("{line}");
    }

    let scans = coordinator
        .list_brand_scans(brand_id, scan_limit.clamp(1, 200))
        .await?;
    if scans.is_empty() {
        return Ok(());
    }
    println!();
    println!("recent scans:");
    for scan in scans {
        println!(
            "  {} {:<8} {:>3}% started {}",
            scan.id,
            scan.status.as_str(),
            scan.progress,
            scan.started_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
