//! # azdo-harness CLI (`azh`)
//!
//! Runs one sync invocation and writes each document batch to stdout as a
//! JSON line; diagnostics go to stderr. The downstream indexer owns
//! delivery and cursor persistence; this binary only produces the stream.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `azh sync` | Full load of every enabled entity kind |
//! | `azh poll --start S --end E` | Incremental poll over an epoch-seconds window |
//! | `azh sources` | Show enabled entity kinds and credential status |
//!
//! Credentials are read from `AZUREDEVOPS_ACCESS_TOKEN` and
//! `AZUREDEVOPS_URL`; everything else comes from the TOML config file.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use azdo_harness::config::{self, Config};
use azdo_harness::remote::Credentials;
use azdo_harness::sync::{DocumentBatches, SyncDriver};

#[derive(Parser)]
#[command(
    name = "azh",
    about = "Harvest an Azure DevOps project into document batches for a search indexer",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/azh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full load: harvest every enabled entity kind from scratch.
    Sync,

    /// Incremental poll over a time window.
    Poll {
        /// Window start in epoch seconds. Zero means no prior cursor
        /// exists and the run degrades to a full load.
        #[arg(long)]
        start: i64,

        /// Window end in epoch seconds.
        #[arg(long)]
        end: i64,
    },

    /// Show enabled entity kinds and credential status.
    Sources,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sync => {
            let driver = connect(config)?;
            emit_batches(driver.load_full()?)
        }
        Commands::Poll { start, end } => {
            let driver = connect(config)?;
            emit_batches(driver.poll(start, end)?)
        }
        Commands::Sources => show_sources(&config),
    }
}

fn connect(config: Config) -> Result<SyncDriver> {
    let mut driver = SyncDriver::new(config)?;
    let credentials = Credentials::from_env()
        .context("AZUREDEVOPS_ACCESS_TOKEN and AZUREDEVOPS_URL must be set")?;
    driver.load_credentials(credentials)?;
    Ok(driver)
}

fn emit_batches(batches: DocumentBatches) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut emitted = 0usize;
    let mut failed_segments = 0usize;

    for batch in batches {
        match batch {
            Ok(documents) => {
                serde_json::to_writer(&mut out, &documents)?;
                out.write_all(b"\n")?;
                emitted += 1;
            }
            Err(err) => {
                failed_segments += 1;
                tracing::error!(error = %err, "segment failed");
            }
        }
    }

    eprintln!("emitted {emitted} batch(es)");
    if failed_segments > 0 {
        anyhow::bail!("{failed_segments} segment(s) failed");
    }
    Ok(())
}

fn show_sources(config: &Config) -> Result<()> {
    let credentials = if Credentials::from_env().is_ok() {
        "OK"
    } else {
        "NOT SET"
    };

    println!("{:<16} ENABLED", "KIND");
    println!("{:<16} {}", "code", config.sync.include_code);
    println!(
        "{:<16} {}",
        "pull_requests", config.sync.include_pull_requests
    );
    println!("{:<16} {}", "work_items", config.sync.include_work_items);
    println!();
    println!(
        "project: {}  repository: {}  branch: {}",
        config.project.name, config.project.repository, config.project.branch
    );
    println!("credentials: {credentials}");

    Ok(())
}
