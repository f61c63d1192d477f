use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cfgsnap::logging::{self, LogConfig};
use cfgsnap::{adapters, config::AppConfig, context::AppContext, core::Orchestrator, inventory};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

/// Exit code when the pass completed but at least one device failed.
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "cfgsnap")]
#[command(about = "Back up the running configuration of network devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $CFGSNAP_CONFIG, then ./cfgsnap.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every device in the inventory once
    Run(RunArgs),
    /// Load config and inventory without contacting any device
    Check(RunArgs),
    /// Print the default configuration as TOML
    InitConfig,
}

#[derive(Args, Serialize)]
struct RunArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    backup_directory: Option<PathBuf>,

    #[serde(rename = "inventory_path", skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    inventory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    max_workers: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    retry_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(rename = "json_logs", skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json: Option<bool>,

    /// Print the sealed run as JSON on stdout
    #[serde(skip)]
    #[arg(long)]
    print_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => {
            let config = load_config(&cli, args)?;
            run_backup(config, args.print_json).await
        }
        Commands::Check(args) => {
            let config = load_config(&cli, args)?;
            run_check(&config)
        }
        Commands::InitConfig => {
            let rendered = AppConfig::default()
                .to_toml()
                .context("Failed to render default config")?;
            print!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(cli: &Cli, args: &RunArgs) -> Result<AppConfig> {
    let config =
        AppConfig::load(cli.config.as_deref(), Some(args)).context("Failed to load config")?;

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: config.log_file.clone(),
    })?;

    Ok(config)
}

async fn run_backup(config: AppConfig, print_json: bool) -> Result<ExitCode> {
    let devices = inventory::load(&config.inventory_path).with_context(|| {
        format!(
            "Failed to load inventory {}",
            config.inventory_path.display()
        )
    })?;

    let shutdown = cfgsnap::shutdown::install_shutdown_handler();
    let fetcher = adapters::get_fetcher(&config);
    let ctx = AppContext::new(config, fetcher).with_shutdown(shutdown);

    let outcome = Orchestrator::new(ctx).execute(devices).await;
    let tally = outcome.run.tally();

    if print_json {
        let json =
            serde_json::to_string_pretty(&outcome.run).context("Failed to serialize run")?;
        println!("{}", json);
    }

    let summary_path = outcome.summary.context("Failed to write run summary")?;
    eprintln!(
        "{}/{} devices backed up, summary: {}",
        tally.succeeded,
        tally.total,
        summary_path.display()
    );

    if tally.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    }
}

fn run_check(config: &AppConfig) -> Result<ExitCode> {
    let devices = inventory::load(&config.inventory_path).with_context(|| {
        format!(
            "Failed to load inventory {}",
            config.inventory_path.display()
        )
    })?;

    let unsupported: Vec<&str> = devices
        .iter()
        .filter(|d| !config.simulation && !config.platforms.contains_key(&d.platform))
        .map(|d| d.id.as_str())
        .collect();

    println!(
        "{} devices, backups to {}, summaries to {}",
        devices.len(),
        config.backup_directory.display(),
        config.summary_dir().display()
    );

    if unsupported.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        println!("No fetch command for: {}", unsupported.join(", "));
        Ok(ExitCode::FAILURE)
    }
}
