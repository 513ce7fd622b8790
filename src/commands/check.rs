use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{validate, BackendTarget, ProxyConfig};
use crate::error::Result;
use crate::identity::IdentityResolver;

pub async fn run_config_check(config: ProxyConfig) -> Result<()> {
    info!("Running configuration check...");

    validate(&config)?;
    info!("✓ Configuration is valid");

    let backend = config.backend()?;
    info!("Listen address: {}", config.listen_addr()?);
    info!("Backend: {}", backend);
    if config.debug {
        info!(
            "Transcript: enabled (directory {})",
            config.transcript_dir.display()
        );
    } else {
        info!("Transcript: disabled");
    }
    info!("Shutdown grace: {} seconds", config.shutdown_grace_secs);
    info!("Connect timeout: {} ms", config.connect_timeout_ms);
    match config.request_timeout_ms {
        Some(ms) => info!("Request timeout: {} ms", ms),
        None => info!("Request timeout: none"),
    }

    let resolver = IdentityResolver::detect();
    info!("Neighbor table lookup: {}", resolver.strategy());

    match probe_backend(&backend, config.connect_timeout()).await {
        Ok(addr) => info!("✓ Backend reachable at {}", addr),
        Err(e) => warn!("✗ Backend {} not reachable: {}", backend, e),
    }

    Ok(())
}

/// Open and drop a TCP connection to the backend.
pub async fn probe_backend(backend: &BackendTarget, limit: Duration) -> io::Result<SocketAddr> {
    let stream = timeout(limit, TcpStream::connect(backend.socket_authority()))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.peer_addr()
}
