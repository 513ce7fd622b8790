use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Immutable process configuration, built once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Backend printer as `host` or `host:port`.
    pub target: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables the wire transcript.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: PathBuf,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    631
}

fn default_transcript_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl ProxyConfig {
    /// Config with every optional field at its default.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            host: default_host(),
            port: default_port(),
            debug: false,
            transcript_dir: default_transcript_dir(),
            shutdown_grace_secs: default_shutdown_grace(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: None,
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .or_else(|_| format!("[{}]:{}", self.host, self.port).parse())
            .map_err(|e| {
                ConfigError::Parse(format!("Invalid listen address {}: {}", self.host, e))
            })
    }

    pub fn backend(&self) -> Result<BackendTarget, ConfigError> {
        BackendTarget::parse(&self.target)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// The single backend every request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    host: String,
    port: Option<u16>,
}

impl BackendTarget {
    /// Parse `host` or `host:port`. Schemes, paths, queries and credentials
    /// are rejected.
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = target.trim();
        if trimmed.is_empty() {
            return Err(invalid("target is empty"));
        }
        if trimmed.contains("://") {
            return Err(invalid("expected a host or host:port, not a URL"));
        }

        let url = Url::parse(&format!("http://{trimmed}")).map_err(|e| invalid(&e.to_string()))?;

        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("credentials are not supported"));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("paths and queries are not supported"));
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("missing host")),
        };

        Ok(Self {
            host,
            port: url.port(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port used when connecting; plain HTTP defaults to 80.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(80)
    }

    /// Authority used for the outbound `Host` header and request URI.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Address suitable for a raw TCP connect (IPv6 literals stay bracketed).
    pub fn socket_authority(&self) -> String {
        format!("{}:{}", self.host, self.port_or_default())
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}
