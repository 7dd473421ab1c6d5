//! rdagent Server Binary
//!
//! Starts the TCP server for rdagent.

use std::path::PathBuf;

use clap::Parser;
use rdagent::config::ConfigBuilder;
use rdagent::{Config, Server};
use tracing_subscriber::{fmt, EnvFilter};

/// rdagent Server
#[derive(Parser, Debug)]
#[command(name = "rdagent-server")]
#[command(about = "Remote debug agent: runs processes and transfers files for a development client")]
#[command(version)]
struct Args {
    /// JSON config file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Maximum concurrent connections
    #[arg(short, long)]
    max_connections: Option<usize>,

    /// Let commands from different connections run concurrently
    #[arg(long)]
    concurrent: bool,

    /// Worker threads for file transfers (0 = automatic)
    #[arg(short = 'w', long)]
    transfer_workers: Option<usize>,

    /// Log every line of process output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rdagent=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let base = match &args.config {
        Some(path) => match Config::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // Build config from file and args
    let mut builder = ConfigBuilder::from_config(base);
    if let Some(listen) = &args.listen {
        builder = builder.listen_addr(listen);
    }
    if let Some(max) = args.max_connections {
        builder = builder.max_connections(max);
    }
    if let Some(workers) = args.transfer_workers {
        builder = builder.transfer_workers(workers);
    }
    if args.concurrent {
        builder = builder.exclusive_execution(false);
    }
    if args.verbose {
        builder = builder.verbose(true);
    }
    let config = builder.build();

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    tracing::info!("rdagent Server v{}", rdagent::VERSION);
    tracing::info!("Listen address: {}", config.listen_addr);
    tracing::info!(
        "Exclusive execution: {}, transfer workers: {}",
        config.exclusive_execution,
        config.transfer_workers
    );

    // Start server
    let mut server = Server::new(config);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
