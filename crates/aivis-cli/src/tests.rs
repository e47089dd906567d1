use uuid::Uuid;

use super::*;

const BRAND: &str = "6f1c2d7e-1b0a-4c8e-9a52-3f4e5d6c7b8a";

#[test]
fn parses_migrate_command() {
    let cli = Cli::try_parse_from(["aivis-cli", "migrate"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Migrate)));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["aivis-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_scan_start_with_wait() {
    let cli = Cli::try_parse_from(["aivis-cli", "scan", "start", "--brand", BRAND, "--wait"])
        .expect("expected valid cli args");
    let expected = Uuid::parse_str(BRAND).expect("uuid");
    assert!(matches!(
        cli.command,
        Some(Commands::Scan {
            command: ScanCommands::Start { brand, wait: true }
        }) if brand == expected
    ));
}

#[test]
fn scan_start_requires_a_brand() {
    assert!(Cli::try_parse_from(["aivis-cli", "scan", "start"]).is_err());
}

#[test]
fn scan_start_rejects_a_malformed_brand_id() {
    assert!(Cli::try_parse_from(["aivis-cli", "scan", "start", "--brand", "acme"]).is_err());
}

#[test]
fn parses_scan_status_and_score() {
    let cli = Cli::try_parse_from(["aivis-cli", "scan", "status", BRAND]).expect("status");
    assert!(matches!(
        cli.command,
        Some(Commands::Scan {
            command: ScanCommands::Status { .. }
        })
    ));

    let cli = Cli::try_parse_from(["aivis-cli", "scan", "score", BRAND]).expect("score");
    assert!(matches!(
        cli.command,
        Some(Commands::Scan {
            command: ScanCommands::Score { .. }
        })
    ));
}

#[test]
fn parses_scan_watch_options() {
    let cli = Cli::try_parse_from([
        "aivis-cli",
        "scan",
        "watch",
        BRAND,
        "--api-url",
        "http://aivis.internal:8080",
        "--interval-secs",
        "5",
        "--max-polls",
        "20",
    ])
    .expect("expected valid cli args");

    let Some(Commands::Scan {
        command:
            ScanCommands::Watch {
                api_url,
                interval_secs,
                max_polls,
                ..
            },
    }) = cli.command
    else {
        panic!("unexpected command variant");
    };
    assert_eq!(api_url, "http://aivis.internal:8080");
    assert_eq!(interval_secs, 5);
    assert_eq!(max_polls, Some(20));
}

#[test]
fn parses_profile_show_with_default_scan_count() {
    let cli = Cli::try_parse_from(["aivis-cli", "profile", "show", BRAND]).expect("profile");
    assert!(matches!(
        cli.command,
        Some(Commands::Profile {
            command: ProfileCommands::Show { scans: 5, .. }
        })
    ));
}
