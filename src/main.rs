use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use airprint_proxy::commands;
use airprint_proxy::config::{self, CliOverrides, ProxyConfig};
use airprint_proxy::error::Result;
use airprint_proxy::server::ProxyServer;

#[derive(Parser, Debug)]
#[command(name = "airprint-proxy")]
#[command(about = "Reverse proxy for AirPrint (IPP over HTTP) with client identification and wire transcripts", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML/JSON/YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backend printer as host or host:port
    #[arg(short, long, global = true)]
    target: Option<String>,

    /// Port to listen on
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Address to listen on
    #[arg(long, global = true)]
    host: Option<String>,

    /// Write a wire transcript of every exchange
    #[arg(short, long, global = true)]
    debug: bool,

    /// Directory for transcript files
    #[arg(long, value_name = "DIR", global = true)]
    transcript_dir: Option<PathBuf>,

    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the proxy (default)
    Run,
    /// Validate configuration and probe the backend
    Check,
    /// Summarize a transcript file
    Summarize {
        /// Transcript produced with --debug
        file: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            target: self.target.clone(),
            host: self.host.clone(),
            port: self.port,
            debug: self.debug.then_some(true),
            transcript_dir: self.transcript_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("airprint_proxy={log_level}"))),
        )
        .init();

    let command = args.command.take().unwrap_or(Command::Run);
    if let Command::Summarize { file, json } = &command {
        return commands::run_summarize(file, *json).await;
    }

    let config = match config::load(args.config.as_deref(), &args.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    match command {
        Command::Check => commands::run_config_check(config).await,
        _ => run(config).await,
    }
}

async fn run(config: ProxyConfig) -> Result<()> {
    info!("Starting AirPrint proxy");

    let server = ProxyServer::new(config).await?;
    if let Err(e) = server.start().await {
        error!("Failed to start: {}", e);
        return Err(e);
    }

    shutdown_signal().await;

    server.shutdown().await?;
    info!("Graceful shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
