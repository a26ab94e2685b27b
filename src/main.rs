// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use romsync::config::{self, Config};
use romsync::error::ErrorBuilder;
use romsync::inventory::{InventoryStore, LocalInventory};
use romsync::remote::{CatalogSource, RommClient};
use romsync::scan::ScanOrchestrator;
use romsync::scanner::RomScanner;
use romsync::server::{AppState, Server};
use romsync::utils::{format_bytes, mask_sensitive};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following BSD sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Service unavailable - RomM not reachable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
}

/// Spinner helpers for consistent progress indicators
mod spinner {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    /// Create a spinner with consistent styling
    pub fn create(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("\u{28FB}\u{28F9}\u{28FC}\u{28F8}\u{28FE}\u{28F6}\u{28F7}\u{28E7}\u{28CF}\u{28DF} ")
            .template("{spinner:.cyan} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    pub fn finish_success(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("\x1b[32m[OK]\x1b[0m {}", message);
    }

    pub fn finish_error(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("\x1b[31m[X]\x1b[0m {}", message);
    }
}

/// romsync - sync a RomM library into your local ROM folders.
#[derive(Parser)]
#[command(name = "romsync")]
#[command(version = VERSION)]
#[command(about = "Browse a RomM library, compare it with your local ROMs, queue the missing ones.")]
#[command(long_about = "romsync - RomM to local collection sync proxy\n\n\
    Start the server:    romsync\n\
    Scan local folders:  romsync scan snes gb\n\
    Show config:         romsync config show\n\
    Suggest mappings:    romsync mappings")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to ~/.romsync/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    ///
    /// Examples:
    ///   romsync serve
    ///   romsync serve --port 8080 --host 0.0.0.0
    Serve {
        /// Port to listen on (overrides app.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind to (overrides app.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Scan local platform folders and update the inventory
    ///
    /// Examples:
    ///   romsync scan           (every mapped folder)
    ///   romsync scan snes gba
    Scan {
        /// Local folder names; all mapped folders when omitted
        folders: Vec<String>,
    },

    /// Show or locate the configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },

    /// Print a platform mapping suggested from the RomM platform list
    Mappings,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the current configuration (password masked)
    Show,
    /// Print the config file path
    Path,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Config { command }) => handle_config(command, &config, cli.config.as_deref()),
        command => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(run_async(command, config))
        }
    }
}

async fn run_async(command: Option<Commands>, config: Config) -> Result<()> {
    match command {
        None => serve(config, None, None).await,
        Some(Commands::Serve { port, host }) => serve(config, port, host).await,
        Some(Commands::Scan { folders }) => scan(config, folders).await,
        Some(Commands::Mappings) => mappings(config).await,
        Some(Commands::Config { .. }) => Ok(()),
    }
}

fn print_problems(problems: &[String]) {
    let mut builder = ErrorBuilder::new("romsync is not fully configured");
    for problem in problems {
        builder = builder.cause(problem.as_str());
    }
    let path = config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "~/.romsync/config.json".to_string());
    let builder = builder
        .fix(format!("Edit {}", path))
        .fix("Print a starting mapping with: romsync mappings");
    eprintln!("{}", builder.build().yellow());
}

fn open_inventory(config: &Config) -> Result<LocalInventory> {
    let path = config.inventory_path()?;
    Ok(LocalInventory::open(InventoryStore::new(path)))
}

async fn serve(config: Config, port: Option<u16>, host: Option<String>) -> Result<()> {
    let problems = config.problems();
    if config.romm.url.trim().is_empty() {
        print_problems(&problems);
        std::process::exit(exit_codes::CONFIG);
    }
    if !problems.is_empty() {
        print_problems(&problems);
    }

    let catalog: Arc<dyn CatalogSource> = Arc::new(RommClient::new(&config.romm)?);
    let spin = spinner::create(&format!("Connecting to RomM at {}", config.romm.url));
    match catalog.ping().await {
        Ok(()) => spinner::finish_success(&spin, "RomM reachable"),
        Err(e) => spinner::finish_error(
            &spin,
            &format!("RomM not reachable ({}); serving anyway", e),
        ),
    }

    let inventory = open_inventory(&config)?;
    let host = host.unwrap_or_else(|| config.app.host.clone());
    let port = port.unwrap_or(config.app.port);

    println!(
        "{} romsync {} listening on {}",
        "[+]".green(),
        VERSION,
        format!("http://{}:{}", host, port).cyan()
    );
    println!("    ROM root: {}", config.roms_root().display());

    let state = AppState::new(config, catalog, inventory);
    Server::new(state, host, port).start().await
}

async fn scan(config: Config, folders: Vec<String>) -> Result<()> {
    let folders = if folders.is_empty() {
        config
            .platform_mapping
            .folders()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        folders
    };

    let inventory = open_inventory(&config)?;
    let scanner = RomScanner::new(config.roms_root());
    let scans = ScanOrchestrator::new(inventory.clone(), scanner.clone(), config.scan.stale_after());

    if let Err(e) = scans.start_scan(folders.clone()) {
        eprintln!("{} {}", "[✗]".red(), e);
        std::process::exit(exit_codes::CONFIG);
    }
    let spin = spinner::create(&format!("Scanning {}", folders.join(", ")));
    let job = scans.wait_idle().await;

    if let Some(err) = job.last_error {
        spinner::finish_error(&spin, &err);
        std::process::exit(exit_codes::ERROR);
    }
    spinner::finish_success(&spin, &format!("Found {} ROM files", job.files_found));

    for folder in &folders {
        let stats = scanner.platform_stats(folder);
        let indexed = inventory.read(|s| s.platform_file_count(folder));
        println!(
            "  {:<14} {:>6} files  {:>10}",
            folder.bold(),
            indexed,
            format_bytes(stats.total_bytes)
        );
    }
    Ok(())
}

async fn mappings(config: Config) -> Result<()> {
    if config.romm.url.trim().is_empty() {
        print_problems(&config.problems());
        std::process::exit(exit_codes::CONFIG);
    }
    let client = RommClient::new(&config.romm)?;
    let spin = spinner::create("Fetching platforms from RomM");
    let platforms = match client.platforms().await {
        Ok(platforms) => {
            spinner::finish_success(&spin, &format!("{} platforms", platforms.len()));
            platforms
        }
        Err(e) => {
            spinner::finish_error(&spin, &e.to_string());
            std::process::exit(exit_codes::SERVICE_UNAVAILABLE);
        }
    };

    let suggested = config::suggest_mapping(&platforms);
    println!("{}", serde_json::to_string_pretty(&suggested)?);
    Ok(())
}

fn handle_config(
    command: Option<ConfigCommands>,
    config: &Config,
    explicit: Option<&std::path::Path>,
) -> Result<()> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => config::config_path()?,
    };

    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            println!("{}", "romsync configuration".bold());
            println!("  File:       {}", path.display());
            println!("  RomM URL:   {}", display_or_unset(&config.romm.url));
            println!("  Username:   {}", display_or_unset(&config.romm.username));
            println!(
                "  Password:   {}",
                display_or_unset(&mask_sensitive(&config.romm.password, 0))
            );
            println!("  ROM root:   {}", config.roms_root().display());
            println!("  Listen:     {}:{}", config.app.host, config.app.port);
            println!("  Downloads:  {} at a time", config.downloads.max_concurrent.max(1));
            println!("  Mappings:   {}", config.platform_mapping.len());
            for (platform, folder) in config.platform_mapping.iter() {
                println!("    {} -> {}", platform, folder.cyan());
            }

            let problems = config.problems();
            if !problems.is_empty() {
                println!();
                print_problems(&problems);
            }
        }
    }
    Ok(())
}

fn display_or_unset(value: &str) -> String {
    if value.is_empty() {
        "(not set)".dimmed().to_string()
    } else {
        value.to_string()
    }
}
