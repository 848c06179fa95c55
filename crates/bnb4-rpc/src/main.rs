//! bnb4 RPC Server - JSON-RPC backend for the desktop front-end.
//!
//! Wraps the bnb4-core controller so a separate UI process can fill in the
//! conversion form, start and cancel jobs, and poll their progress.

mod handlers;
mod server;

use anyhow::Result;
use bnb4_core::config::{default_data_dir, UiConfig};
use bnb4_core::ConverterBuilder;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "bnb4-rpc")]
#[command(about = "JSON-RPC server for the bnb4 model converter")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Data directory for the helper script and Python environment
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Settings file (defaults to gui_settings.json in the working directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Python interpreter to use instead of the managed environment
    #[arg(long)]
    python: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting bnb4 RPC Server");

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    info!("Data directory: {}", data_dir.display());

    let mut builder = ConverterBuilder::new(&data_dir);
    if let Some(settings) = args.settings {
        builder = builder.settings_path(settings);
    }
    if let Some(python) = args.python {
        builder = builder.python(python);
    }
    let converter = builder.build()?;
    let controller = converter.controller.clone();
    let poller = controller.spawn_poller(UiConfig::POLL_INTERVAL);

    let (addr, state) = server::start_server(converter, &args.host, args.port).await?;

    // Print port for the front-end to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, exiting");
        }
        _ = state.shutdown.notified() => {
            info!("Shutdown requested over RPC, exiting");
        }
    }

    controller.shutdown().await;
    poller.abort();

    Ok(())
}
