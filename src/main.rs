//! azblob -- command-line front end for the blob storage service.
//!
//! Loads a YAML configuration holding the two connection strings and runs
//! one service operation per invocation. Data goes to stdout; logs and the
//! optional metrics dump go to stderr.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use azblob_failover::config::{Config, LoggingConfig};
use azblob_failover::{BatchResult, BlobStorageService};

/// Command-line arguments for azblob.
#[derive(Parser, Debug)]
#[command(
    name = "azblob",
    version,
    about = "Azure Blob Storage client with primary/secondary credential failover"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "azblob.yaml")]
    config: PathBuf,

    /// Print Prometheus metrics for this run to stderr on exit.
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every container in the account.
    Containers,

    /// List blob names in a container.
    Files {
        container: String,

        /// Only list names starting with this prefix.
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Download a blob into the download directory.
    Download {
        url: String,

        /// Write the blob to stdout instead of a file.
        #[arg(long)]
        stdout: bool,
    },

    /// Print a read-only shared access URL for a blob.
    Share {
        url: String,

        /// Lifetime of the URL in minutes.
        #[arg(long, default_value_t = 60, allow_negative_numbers = true)]
        minutes: i64,
    },

    /// Upload a local file, replacing any existing blob.
    Upload {
        container: String,
        name: String,
        file: PathBuf,
    },

    /// Delete blobs by URL.
    Delete {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Check whether blobs exist.
    Exists {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_batch(result: BatchResult<bool>) -> anyhow::Result<()> {
    let sorted: BTreeMap<String, bool> = result.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&sorted)?);
    Ok(())
}

async fn run(service: &BlobStorageService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Containers => {
            for container in service.list_all_containers().await? {
                println!("{}", container);
            }
        }
        Command::Files { container, prefix } => {
            let names = service
                .list_all_files_from_container(&container, prefix.as_deref())
                .await?;
            for name in names {
                println!("{}", name);
            }
        }
        Command::Download { url, stdout: true } => {
            let mut stream = service.download_file_to_stream(&url).await?;
            let mut out = tokio::io::stdout();
            while let Some(chunk) = stream.try_next().await? {
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
        }
        Command::Download { url, stdout: false } => {
            let path = service.download_file_to_disk(&url).await?;
            println!("{}", path.display());
        }
        Command::Share { url, minutes } => {
            println!(
                "{}",
                service
                    .download_file_to_access_shared_url(&url, minutes)
                    .await?
            );
        }
        Command::Upload {
            container,
            name,
            file,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            println!("{}", service.upload_file(&container, &name, data).await?);
        }
        Command::Delete { urls } => print_batch(service.delete_files(urls).await?)?,
        Command::Exists { urls } => print_batch(service.check_if_files_exists(urls).await?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config: Config = azblob_failover::config::load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config.display());

    if config.observability.metrics || cli.print_metrics {
        azblob_failover::metrics::init_metrics();
        azblob_failover::metrics::describe_metrics();
    }

    let service = BlobStorageService::from_config(&config)?;
    let result = run(&service, cli.command).await;

    if cli.print_metrics {
        if let Some(rendered) = azblob_failover::metrics::render() {
            eprintln!("{}", rendered);
        }
    }

    result
}
