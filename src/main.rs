//! Dump Fetcher CLI application
//!
//! Command-line interface for copying profiler dump files of a time window
//! from a remote host over SSH.

use std::process;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use dump_fetcher::cli::{Cli, Commands, handle_config, handle_download, handle_roots};
use dump_fetcher::config::AppConfig;
use dump_fetcher::errors::Result;

fn main() {
    let result = run();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    let config_file = cli.global.config.clone();

    // A broken file must not stop `config init` from replacing it
    let (config, load_error) = match AppConfig::load(config_file.as_deref()) {
        Ok(config) => (config, None),
        Err(e) if matches!(cli.command, Commands::Config(_)) => (AppConfig::default(), Some(e)),
        Err(e) => return Err(e.into()),
    };

    init_logging(&cli, &config);
    info!("Dump Fetcher v{} starting", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        warn!("Ignoring configuration: {}", e);
    }

    match cli.command {
        Commands::Download(args) => {
            info!("Executing download command");
            handle_download(args, &config)
        }
        Commands::Roots(args) => {
            info!("Executing roots command");
            handle_roots(args, &config)
        }
        Commands::Config(args) => {
            info!("Executing config command");
            handle_config(args, config_file.as_deref())
        }
    }
}

/// Initialize logging from the CLI flags, else the configured level
fn init_logging(cli: &Cli, config: &AppConfig) {
    let global = &cli.global;
    let level = if global.quiet || global.verbose || global.very_verbose {
        cli.log_level().to_string().to_lowercase()
    } else {
        config.logging.level.clone()
    };

    let filter = match format!("dump_fetcher={}", level).parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(global.very_verbose)
        .with_ansi(config.logging.colored_output)
        .init();

    if global.very_verbose {
        info!("Very verbose logging enabled");
    } else if global.verbose {
        info!("Verbose logging enabled");
    }
}
