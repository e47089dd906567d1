//! Scan command handlers for the CLI.
//!
//! `start`, `status` and `score` talk to Postgres through the scan
//! coordinator. `watch` polls a running `aivis-server` over HTTP.

use std::sync::Arc;
use std::time::Duration;

use aivis_core::AppConfig;
use aivis_scan::{
    http_modules, poll_until_terminal, AnalysisClient, ModuleRunner, PollError, RunnerConfig,
    ScanCoordinator, ScanStatusReport,
};
use clap::Subcommand;
use serde::Deserialize;
use uuid::Uuid;

/// Sub-commands available under `scan`.
#[derive(Debug, Subcommand)]
pub enum ScanCommands {
    /// Create a scan for a brand and run its modules when a backend is configured
    Start {
        /// Brand to scan
        #[arg(long)]
        brand: Uuid,
        /// Print progress until the scan finishes
        #[arg(long)]
        wait: bool,
    },
    /// Show the current state of a scan
    Status { scan_id: Uuid },
    /// Poll a scan through the HTTP API until it finishes
    Watch {
        scan_id: Uuid,
        /// Base URL of the aivis-server API
        #[arg(long, env = "AIVIS_API_URL", default_value = "http://localhost:3000")]
        api_url: String,
        /// Bearer token for the API
        #[arg(long, env = "AIVIS_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Seconds between polls
        #[arg(long, default_value = "3")]
        interval_secs: u64,
        /// Give up after this many polls
        #[arg(long)]
        max_polls: Option<u32>,
    },
    /// Record a finished scan's score on its brand profile
    Score { scan_id: Uuid },
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// One progress line, e.g. `" 50% running  Analyzing conversations"`.
pub(crate) fn format_snapshot(report: &ScanStatusReport) -> String {
    format!(
        "{:>3}% {:<8} {}",
        report.progress,
        report.status.as_str(),
        report.message
    )
}

fn print_report(report: &ScanStatusReport) {
    println!("scan      {}", report.scan_id);
    println!("brand     {}", report.brand_id);
    println!("status    {} ({}%)", report.status, report.progress);
    println!("message   {}", report.message);
    for (kind, state) in report.modules.iter() {
        match &state.error {
            Some(error) => println!("  {:<14} {} ({error})", kind.as_str(), state.status),
            None => println!("  {:<14} {}", kind.as_str(), state.status),
        }
    }
    if let Some(score) = report.score {
        println!("score     {score:.2}");
    }
}

/// Create a scan. With an analysis backend configured the modules run in
/// this process, so the command returns once they finish. Without one the
/// scan waits for module results written through the API.
///
/// # Errors
///
/// Returns an error if the scan cannot be created, the analysis client
/// cannot be built, or polling fails.
pub(crate) async fn run_scan_start(
    config: &AppConfig,
    coordinator: &ScanCoordinator,
    brand_id: Uuid,
    wait: bool,
) -> anyhow::Result<()> {
    let scan = coordinator.create_scan(brand_id).await?;
    println!("scan {} queued for brand {brand_id}", scan.id);

    let runner = match &config.analysis_url {
        Some(url) => {
            let client = AnalysisClient::new(url, config.analysis_request_timeout_secs)?;
            tracing::debug!(scan_id = %scan.id, analysis_url = %url, "running modules in-process");
            Some(ModuleRunner::new(
                coordinator.clone(),
                http_modules(Arc::new(client)),
                RunnerConfig::from_app_config(config),
            ))
        }
        None => None,
    };
    let task = runner.as_ref().map(|r| r.spawn(scan.id, brand_id));

    if wait {
        let report = poll_until_terminal(
            || {
                let coordinator = coordinator.clone();
                async move { coordinator.status(scan.id).await }
            },
            Duration::from_secs(config.poll_interval_secs.max(1)),
            None,
            |snapshot| println!("{}", format_snapshot(snapshot)),
        )
        .await?;
        if let Some(task) = task {
            task.await?;
        }
        print_report(&report);
    } else if let Some(task) = task {
        task.await?;
        print_report(&coordinator.status(scan.id).await?);
    } else {
        println!("no analysis backend configured; report module results through the API");
    }

    Ok(())
}

/// Print a scan's current state.
///
/// # Errors
///
/// Returns an error if the scan does not exist or cannot be loaded.
pub(crate) async fn run_scan_status(
    coordinator: &ScanCoordinator,
    scan_id: Uuid,
) -> anyhow::Result<()> {
    let report = coordinator.status(scan_id).await?;
    print_report(&report);
    Ok(())
}

/// Record (or replay) a finished scan's score.
///
/// # Errors
///
/// Returns an error if the scan is unknown, still running, or failed in
/// every module.
pub(crate) async fn run_scan_score(
    coordinator: &ScanCoordinator,
    scan_id: Uuid,
) -> anyhow::Result<()> {
    let update = coordinator.record_score(scan_id).await?;
    if !update.newly_recorded {
        println!("score already recorded for scan {scan_id}");
    }
    println!("{}", update.message);
    println!(
        "score {:.2} (previous {:.2}, change {:+.2})",
        update.score, update.profile.previous_visibility_score, update.delta
    );
    let s = &update.subscores;
    println!(
        "  shopping {:.2}  brand {:.2}  conversations {:.2}  website {:.2}",
        s.shopping, s.brand, s.conversations, s.website
    );
    Ok(())
}

/// Fetch one status snapshot from the HTTP API.
pub(crate) async fn fetch_status(
    client: &reqwest::Client,
    api_url: &str,
    api_key: Option<&str>,
    scan_id: Uuid,
) -> Result<ScanStatusReport, reqwest::Error> {
    let url = format!("{}/api/v1/scans/{scan_id}", api_url.trim_end_matches('/'));
    let mut request = client.get(url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let envelope: Envelope<ScanStatusReport> =
        request.send().await?.error_for_status()?.json().await?;
    Ok(envelope.data)
}

/// Poll until the scan finishes, printing one line per snapshot.
pub(crate) async fn watch_scan(
    client: &reqwest::Client,
    api_url: &str,
    api_key: Option<&str>,
    scan_id: Uuid,
    interval: Duration,
    max_polls: Option<u32>,
) -> Result<ScanStatusReport, PollError<reqwest::Error>> {
    poll_until_terminal(
        || fetch_status(client, api_url, api_key, scan_id),
        interval,
        max_polls,
        |snapshot| println!("{}", format_snapshot(snapshot)),
    )
    .await
}

/// `scan watch`: poll the API until the scan reaches a terminal state.
///
/// # Errors
///
/// Returns an error if a request fails or `max_polls` is exhausted.
pub(crate) async fn run_scan_watch(
    api_url: &str,
    api_key: Option<&str>,
    scan_id: Uuid,
    interval: Duration,
    max_polls: Option<u32>,
) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let report = watch_scan(&client, api_url, api_key, scan_id, interval, max_polls).await?;
    print_report(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use aivis_core::{Scan, ScanStatus};
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn report_json(scan: &Scan) -> serde_json::Value {
        let report = ScanStatusReport::from_scan(scan, None);
        serde_json::json!({
            "data": report,
            "meta": { "request_id": "req-1", "timestamp": Utc::now() }
        })
    }

    #[test]
    fn snapshot_line_is_aligned() {
        let mut scan = Scan::new(Uuid::nil(), Utc::now());
        scan.status = ScanStatus::Running;
        scan.progress = 50;
        let report = ScanStatusReport::from_scan(&scan, None);
        assert_eq!(format_snapshot(&report), " 50% running  Analyzing shopping");
    }

    #[tokio::test]
    async fn fetch_status_sends_bearer_token_and_unwraps_envelope() {
        let server = MockServer::start().await;
        let scan = Scan::new(Uuid::new_v4(), Utc::now());

        Mock::given(method("GET"))
            .and(path(format!("/api/v1/scans/{}", scan.id)))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(report_json(&scan)))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let api_url = format!("{}/", server.uri());
        let report = fetch_status(&client, &api_url, Some("secret"), scan.id)
            .await
            .expect("status");
        assert_eq!(report.scan_id, scan.id);
        assert_eq!(report.status, ScanStatus::Queued);
    }

    #[tokio::test]
    async fn watch_stops_at_the_terminal_snapshot() {
        let server = MockServer::start().await;
        let mut scan = Scan::new(Uuid::new_v4(), Utc::now());
        scan.status = ScanStatus::Running;
        let running = report_json(&scan);
        scan.status = ScanStatus::Partial;
        scan.progress = 100;
        let finished = report_json(&scan);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(running))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(finished))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let report = watch_scan(
            &client,
            &server.uri(),
            None,
            scan.id,
            Duration::from_millis(1),
            Some(10),
        )
        .await
        .expect("terminal");
        assert_eq!(report.status, ScanStatus::Partial);
        assert_eq!(report.progress, 100);
        assert_eq!(server.received_requests().await.map(|r| r.len()), Some(3));
    }

    #[tokio::test]
    async fn watch_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = watch_scan(
            &client,
            &server.uri(),
            None,
            Uuid::new_v4(),
            Duration::from_millis(1),
            None,
        )
        .await
        .expect_err("404");
        let PollError::Fetch(err) = err else {
            panic!("expected a fetch error, got {err:?}");
        };
        assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
    }
}
