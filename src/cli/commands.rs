//! Command handlers for Dump Fetcher CLI
//!
//! This module implements the command handlers that turn CLI arguments and
//! configuration into a connected [`DumpFetcher`] and drive it.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::app::crawl::{now_millis, parse_instant, parse_offset};
use crate::app::shell::SessionConfig;
use crate::app::ssh::{SshConnector, SshSettings};
use crate::app::transfer::Strategy;
use crate::app::{find_dump_roots, open_listing, CrawlRequest, DumpFetcher, TimeWindow, Watchdog};
use crate::auth::{resolve_password, resolve_user};
use crate::cli::progress::format_mb;
use crate::cli::{
    ConfigAction, ConfigArgs, ConnectionArgs, DownloadArgs, ProgressConfig, ProgressDisplay,
    RootsArgs,
};
use crate::config::AppConfig;
use crate::errors::{AppError, ConfigError, Result};

type Fetcher = DumpFetcher<SshConnector>;

/// Handle the download command
///
/// Connects, resolves the window and dump root, crawls, and copies the
/// selected files while showing progress.
pub fn handle_download(args: DownloadArgs, config: &AppConfig) -> Result<()> {
    let start_time = Instant::now();
    args.validate().map_err(AppError::generic)?;

    let strategy = args.strategy(configured_strategy(config));
    info!("Download protocol is {}", strategy);
    let mut fetcher = connect(&args.connection, config, args.parallel_degree, strategy)?;

    let result = run_download(&mut fetcher, &args, config);
    fetcher.close();
    if result.is_ok() {
        info!("Download command finished in {:?}", start_time.elapsed());
    }
    result
}

fn run_download(fetcher: &mut Fetcher, args: &DownloadArgs, config: &AppConfig) -> Result<()> {
    let window = resolve_window(fetcher, args, config)?;
    let output = match (&args.output, &config.crawl.output_root) {
        (Some(output), _) => output.clone(),
        (None, Some(root)) => root.join(window.default_output_name()),
        (None, None) => PathBuf::from(window.default_output_name()),
    };

    let skip_details = args.skip_details || config.crawl.skip_details;
    if skip_details {
        info!("Will skip export of trace, sql, xml folders");
    }
    if args.dry_run {
        info!("Running in dry-run mode. No writes will be performed.");
    }
    info!("Will export results to {}", output.display());

    let dump_root = match &args.dump_root {
        Some(root) => root.clone(),
        None => {
            info!("Path to dump root isn't set, looking for dump roots on the host");
            choose_dump_root(fetcher.find_dump_roots()?)?
        }
    };

    let mut request = CrawlRequest::new(window, dump_root, output.clone());
    request.servers = args.server_filter();
    request.skip_details = skip_details;
    request.preload = args.preload || config.crawl.preload_tree;

    let (tasks, stats) = fetcher.collect(&request)?;
    if tasks.is_empty() {
        if stats.files_up_to_date > 0 {
            println!(
                "All {} matching files are already present in {}",
                stats.files_up_to_date,
                output.display()
            );
            return Ok(());
        }
        return Err(AppError::generic("No files found by the specified arguments"));
    }

    println!(
        "Found {} files with total size {} Mb",
        stats.files_selected,
        format_mb(stats.bytes_selected)
    );
    if args.dry_run {
        info!("Dry-run export finished successfully");
        return Ok(());
    }

    info!("Starting downloading files");
    let download_start = Instant::now();
    let progress = fetcher.start(tasks)?;
    let mut display = ProgressDisplay::new(ProgressConfig::default());
    let snapshot = display.watch(&progress);

    println!("\nDownload Summary:");
    println!("  Total files: {}", snapshot.files_total);
    println!("  Completed: {}", snapshot.files_done);
    println!("  Failed: {}", snapshot.files_failed);
    println!("  Downloaded: {} Mb", format_mb(snapshot.bytes_done));
    println!("  Download time: {:?}", download_start.elapsed());

    let failures = progress.failures();
    if !failures.is_empty() {
        error!("The following errors happened");
        for failure in &failures {
            error!("{}", failure);
            println!("  • {}", failure);
        }
        return Err(AppError::generic(format!(
            "{} of {} files failed to download",
            failures.len(),
            snapshot.files_total
        )));
    }

    println!("Successfully exported dump to {}", output.display());
    Ok(())
}

/// Handle the roots command
///
/// Only the listing shell is opened; no transfer connections are needed.
pub fn handle_roots(args: RootsArgs, config: &AppConfig) -> Result<()> {
    let settings = resolve_settings(&args.connection, config)?;
    let session = session_config(&args.connection, config);

    info!("Connecting to {}@{}", settings.user, settings.host);
    let manager = open_listing(&SshConnector::new(settings), session, Watchdog::new())?;
    let result = find_dump_roots(&manager);
    if let Err(e) = manager.close() {
        warn!("Error closing listing shell: {}", e);
    }

    let roots = result?;
    if roots.is_empty() {
        println!("No dump roots found on {}", args.connection.host);
    }
    for root in roots {
        println!("{}", root);
    }
    Ok(())
}

/// Handle configuration commands
pub fn handle_config(args: ConfigArgs, config_file: Option<&Path>) -> Result<()> {
    match args.action {
        ConfigAction::Init { path } => {
            let (path, created) = match path {
                Some(path) => AppConfig::write_default_file(&path)?,
                None => AppConfig::initialize_first_run()?,
            };
            if created {
                println!("Created default configuration file:");
                println!("   {}", path.display());
                println!("   You can customize settings by editing this file.");
            } else {
                println!("Configuration file already exists: {}", path.display());
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = AppConfig::load(config_file)?;
            let content = toml::to_string_pretty(&config)
                .map_err(|e| AppError::generic(format!("Failed to render configuration: {}", e)))?;
            print!("{}", content);
            Ok(())
        }
    }
}

/// Configured protocol, sink when the configuration elevates
fn configured_strategy(config: &AppConfig) -> Strategy {
    if config.shell.elevate_command.is_some() {
        Strategy::Sink
    } else {
        config.transfer.protocol
    }
}

/// Connection settings with credentials from arguments, environment and config
fn resolve_settings(connection: &ConnectionArgs, config: &AppConfig) -> Result<SshSettings> {
    let user = resolve_user(connection.user.as_deref(), config.connection.user.as_deref())?;
    let login = format!("{}@{}", user, connection.host);
    let password = resolve_password(connection.password.clone(), connection.ask_password, &login)?;

    let mut settings = config
        .connection
        .to_settings(&connection.host, &user)
        .with_password(password);
    if let Some(port) = connection.port {
        settings = settings.with_port(port);
    }
    if connection.identity.is_some() {
        settings = settings.with_identity(connection.identity.clone());
    }
    Ok(settings)
}

/// Shell settings from config with the `--elevate` override
fn session_config(connection: &ConnectionArgs, config: &AppConfig) -> SessionConfig {
    let mut session = config.shell.to_runtime_config();
    if let Some(command) = &connection.elevate {
        info!("Init shell command is '{}'", command);
        session.elevate_command = Some(command.clone());
    }
    session
}

/// Resolve credentials and settings, then connect
fn connect(
    connection: &ConnectionArgs,
    config: &AppConfig,
    parallel_degree: Option<usize>,
    strategy: Strategy,
) -> Result<Fetcher> {
    let settings = resolve_settings(connection, config)?;
    let login = format!("{}@{}", settings.user, settings.host);
    let session = session_config(connection, config);

    let degree = parallel_degree.unwrap_or(config.transfer.parallel_degree);
    let mut transfer = config
        .transfer
        .to_runtime_config(&session)
        .with_parallel_degree(degree);
    transfer.strategy = strategy;

    info!("Connecting to {}", login);
    let fetcher = DumpFetcher::connect(
        Arc::new(SshConnector::new(settings)),
        session,
        transfer,
        Watchdog::new(),
    )?;
    info!("Connected");
    Ok(fetcher)
}

/// Build the window from the arguments in the remote time zone
fn resolve_window(fetcher: &Fetcher, args: &DownloadArgs, config: &AppConfig) -> Result<TimeWindow> {
    let offset = match args.time_zone.as_ref().or(config.crawl.time_zone.as_ref()) {
        Some(zone) => parse_offset(zone)?,
        None => {
            info!("Time zone isn't set, so getting it from the server");
            let offset = fetcher.server_offset()?;
            info!("Server time zone is {}", offset);
            offset
        }
    };

    let now = now_millis();
    let end = args
        .end_date
        .as_deref()
        .map(|end| parse_instant(end, offset, now))
        .transpose()?;
    let start = parse_instant(&args.start_date, offset, end.unwrap_or(now))?;
    if start > now {
        return Err(ConfigError::InvalidTime {
            input: args.start_date.clone(),
            reason: "the window starts in the future".to_string(),
        }
        .into());
    }

    let window = TimeWindow::new(start, end, offset)?;
    info!("Exporting the data from {}", window);
    Ok(window)
}

/// Pick the only dump root or ask the user to choose
fn choose_dump_root(roots: Vec<String>) -> Result<String> {
    match roots.len() {
        0 => Err(AppError::generic(
            "Couldn't detect dump roots on the host, please specify one with --dump-root",
        )),
        1 => {
            info!("Found 1 dump root on the host: {}", roots[0]);
            Ok(roots.into_iter().next().unwrap_or_default())
        }
        count => {
            println!();
            println!("Found the following dump roots:");
            for (i, root) in roots.iter().enumerate() {
                println!("  {}. {}", i + 1, root);
            }
            println!();

            loop {
                print!("Select dump root (1-{}): ", count);
                io::stdout().flush()?;

                let mut input = String::new();
                if io::stdin().read_line(&mut input)? == 0 {
                    return Err(AppError::generic("No dump root selected"));
                }
                if let Some(index) = parse_choice(&input, count) {
                    info!("Selected dump root: {}", roots[index]);
                    return Ok(roots[index].clone());
                }
                warn!("Invalid choice {:?}", input.trim());
                println!("Invalid choice. Please enter a number between 1 and {}", count);
            }
        }
    }
}

/// Zero-based index of a one-based menu choice
fn parse_choice(input: &str, count: usize) -> Option<usize> {
    match input.trim().parse::<usize>() {
        Ok(choice) if (1..=count).contains(&choice) => Some(choice - 1),
        _ => None,
    }
}
