//! Neighbor-table (ARP) lookups.
//!
//! Two read-only strategies, neither needing elevated privileges:
//! - [`FileBased`] scans a kernel-maintained table such as `/proc/net/arp`.
//! - [`CommandBased`] runs `arp -a` and scrapes its output.
//!
//! The `arp -a` output format differs between operating systems. The parser
//! only looks for an `at <mac>` token pair on a line mentioning the address,
//! which is a heuristic and not a contract.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Linux kernel neighbor table.
pub const PROC_NET_ARP: &str = "/proc/net/arp";

/// 1-indexed column 4 of `/proc/net/arp` holds the hardware address.
const HW_ADDRESS_FIELD: usize = 3;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("neighbor table unavailable: {0}")]
    TableUnavailable(#[from] std::io::Error),

    #[error("lookup command failed: {0}")]
    CommandFailed(String),

    #[error("no neighbor entry for {0}")]
    NotFound(String),
}

/// A way of mapping a network address to a hardware address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NeighborTableLookup: Send + Sync {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    async fn lookup(&self, ip: &str) -> Result<String, LookupError>;
}

/// Scans a whitespace-delimited table file with a header line.
#[derive(Debug, Clone)]
pub struct FileBased {
    path: PathBuf,
}

impl FileBased {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NeighborTableLookup for FileBased {
    fn name(&self) -> &'static str {
        "table-file"
    }

    async fn lookup(&self, ip: &str) -> Result<String, LookupError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        parse_neighbor_table(&contents, ip).ok_or_else(|| LookupError::NotFound(ip.to_string()))
    }
}

/// Runs a neighbor-table query utility and parses its stdout.
#[derive(Debug, Clone)]
pub struct CommandBased {
    program: String,
    args: Vec<String>,
}

impl CommandBased {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `arp -a`, available on macOS, the BSDs and Windows.
    pub fn arp() -> Self {
        Self::new("arp", vec!["-a".to_string()])
    }
}

#[async_trait]
impl NeighborTableLookup for CommandBased {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn lookup(&self, ip: &str) -> Result<String, LookupError> {
        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| LookupError::CommandFailed(format!("{} timed out", self.program)))?
        .map_err(|e| LookupError::CommandFailed(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(LookupError::CommandFailed(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_arp_output(&stdout, ip).ok_or_else(|| LookupError::NotFound(ip.to_string()))
    }
}

/// Find `ip` in a `/proc/net/arp`-style table. The first line is a header.
pub fn parse_neighbor_table(contents: &str, ip: &str) -> Option<String> {
    contents.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() > HW_ADDRESS_FIELD && fields[0] == ip {
            Some(fields[HW_ADDRESS_FIELD].to_string())
        } else {
            None
        }
    })
}

/// Find `ip` in `arp -a` output, e.g. `? (192.168.1.10) at 00:11:22:33:44:55 on en0`.
///
/// Any line containing `ip` as a substring is considered, so `192.168.1.1`
/// also matches a line for `192.168.1.10`. First match wins.
pub fn parse_arp_output(output: &str, ip: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains(ip))
        .find_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "at")?;
            tokens.next().map(str::to_string)
        })
}

/// Pick a strategy once at startup: the table file when it can be read,
/// otherwise the `arp` command.
pub fn detect() -> Box<dyn NeighborTableLookup> {
    detect_with(Path::new(PROC_NET_ARP))
}

pub fn detect_with(table: &Path) -> Box<dyn NeighborTableLookup> {
    match std::fs::File::open(table) {
        Ok(_) => Box::new(FileBased::new(table)),
        Err(_) => Box::new(CommandBased::arp()),
    }
}
