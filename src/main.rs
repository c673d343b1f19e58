use anyhow::Context;
use clap::{Parser, Subcommand};
use pageledger::{
    api, config,
    logging,
    processing::{BatchOptions, IngestApi, IngestService},
    source::ListFilter,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Page-level document ingestion with content-addressed deduplication.
#[derive(Parser)]
#[command(name = "pageledger", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Ingest every matching file below a folder of the document source.
    Ingest {
        /// Folder relative to `SOURCE_ROOT`.
        folder: String,
        /// Only pick files with these extensions (repeatable, e.g. `--ext pdf --ext png`).
        #[arg(long = "ext")]
        extensions: Vec<String>,
        /// Process content already tracked under another locator.
        #[arg(long)]
        no_skip_duplicates: bool,
        /// Also pick up pending and retryable failed files from earlier runs.
        #[arg(long)]
        resume: bool,
    },
    /// Run a batch over pending and retryable failed files only.
    Resume,
    /// Print status store statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let cli = Cli::parse();

    let config = config::Config::from_env().context("Failed to load configuration")?;
    let service = Arc::new(
        IngestService::from_config(&config)
            .await
            .context("Failed to initialize ingestion service")?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = api::create_router(service);
            let (listener, port) = bind_listener(config.server_port)
                .await
                .context("Failed to bind listener")?;
            tracing::info!("Listening on http://0.0.0.0:{}", port);
            axum::serve(listener, app).await.context("HTTP server failed")?;
        }
        Command::Ingest {
            folder,
            extensions,
            no_skip_duplicates,
            resume,
        } => {
            let filter = ListFilter::extensions(extensions);
            let entries = service
                .list_documents(&folder, &filter)
                .await
                .with_context(|| format!("Failed to list {folder}"))?;
            tracing::info!(folder = %folder, files = entries.len(), "Listed source folder");
            let locators = entries.into_iter().map(|entry| entry.locator).collect();
            let summary = service
                .process_batch(
                    locators,
                    BatchOptions {
                        skip_duplicates: !no_skip_duplicates,
                        resume,
                    },
                )
                .await
                .context("Batch aborted")?;
            print_json(&summary)?;
        }
        Command::Resume => {
            let summary = service
                .process_batch(Vec::new(), BatchOptions::resuming())
                .await
                .context("Batch aborted")?;
            print_json(&summary)?;
        }
        Command::Stats => {
            let statistics = service
                .get_statistics()
                .await
                .context("Failed to read statistics")?;
            print_json(&statistics)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn bind_listener(server_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
