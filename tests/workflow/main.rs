//! Integration tests for the command-line workflow
//!
//! These tests verify that arguments, the configuration file and the time
//! window parsing combine into the runtime settings a download runs with.

use std::fs;
use std::time::Duration;

use clap::Parser;
use tempfile::TempDir;

use dump_fetcher::app::crawl::{parse_instant, parse_offset, TimeWindow};
use dump_fetcher::app::{CrawlRequest, Strategy};
use dump_fetcher::cli::{Cli, Commands, DownloadArgs};
use dump_fetcher::config::AppConfig;
use dump_fetcher::errors::ConfigError;

fn download_args(argv: &[&str]) -> DownloadArgs {
    let mut full = vec!["dump_fetcher", "download", "--host", "app-host"];
    full.extend_from_slice(argv);
    match Cli::try_parse_from(full).unwrap().command {
        Commands::Download(args) => args,
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_config_file_drives_runtime_settings() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dump-fetcher.toml");
    fs::write(
        &path,
        r#"
[connection]
port = 2222
user = "deploy"

[shell]
command_timeout_secs = 30

[transfer]
parallel_degree = 4
protocol = "sink"

[crawl]
skip_details = true
time_zone = "+03:00"
"#,
    )
    .unwrap();

    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.connection.user.as_deref(), Some("deploy"));
    assert!(config.crawl.skip_details);

    let settings = config.connection.to_settings("app-host", "deploy");
    assert_eq!(settings.port, 2222);
    assert_eq!(settings.host, "app-host");

    let (session, transfer) = config.to_runtime_config();
    assert_eq!(session.command_timeout, Duration::from_secs(30));
    assert_eq!(transfer.parallel_degree, 4);
    assert_eq!(transfer.strategy, Strategy::Sink);
    assert_eq!(transfer.session.command_timeout, Duration::from_secs(30));
    assert!(transfer.validate().is_ok());
}

#[test]
fn test_requested_degree_is_capped() {
    let transfer = AppConfig::default()
        .to_runtime_config()
        .1
        .with_parallel_degree(50);
    assert_eq!(transfer.parallel_degree, transfer.max_parallel_degree);
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = AppConfig::load(Some(&temp_dir.path().join("absent.toml")));
    assert!(matches!(result, Err(ConfigError::NotFound { .. })));
}

#[test]
fn test_default_file_round_trips_to_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let (written, created) = AppConfig::write_default_file(&path).unwrap();
    assert!(created);
    assert_eq!(AppConfig::load(Some(&written)).unwrap(), AppConfig::default());
}

#[test]
fn test_window_from_arguments() {
    let args = download_args(&["-s", "2h", "-e", "2024-01-01 12:00", "--time-zone", "+03:00"]);
    let offset = parse_offset(args.time_zone.as_deref().unwrap()).unwrap();

    let end = parse_instant(args.end_date.as_deref().unwrap(), offset, 0).unwrap();
    let start = parse_instant(&args.start_date, offset, end).unwrap();
    assert_eq!(end, 1_704_099_600_000);
    assert_eq!(start, 1_704_092_400_000);

    let window = TimeWindow::new(start, Some(end), offset).unwrap();
    assert_eq!(window.default_output_name(), "dump_202401011000_202401011200");
    assert_eq!(window.end_path().as_deref(), Some("/2024/01/01/1704099600000"));

    let mut request = CrawlRequest::new(window, "/opt/app/dump", window.default_output_name());
    request.servers = args.server_filter();
    assert!(request.servers.is_none());
    assert!(window.contains(start));
    assert!(!window.contains(end + 1));
}

#[test]
fn test_open_window_name() {
    let offset = parse_offset("UTC").unwrap();
    let start = parse_instant("2024-01-01", offset, 0).unwrap();
    let window = TimeWindow::new(start, None, offset).unwrap();

    assert_eq!(window.default_output_name(), "dump_202401010000_now");
    assert!(window.end_path().is_none());
}
