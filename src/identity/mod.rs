//! Client identification: network address plus best-effort hardware address.
//!
//! Identity is advisory. Resolution never fails outward; anything that goes
//! wrong yields the [`UNKNOWN_MAC`] placeholder.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

pub mod neighbor;

pub use neighbor::{CommandBased, FileBased, LookupError, NeighborTableLookup};

/// Placeholder used whenever the hardware address cannot be determined.
pub const UNKNOWN_MAC: &str = "unknown";

/// Who sent a request. Computed per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub network_address: String,
    pub hardware_address: String,
}

impl ClientIdentity {
    pub fn unresolved(network_address: impl Into<String>) -> Self {
        Self {
            network_address: network_address.into(),
            hardware_address: UNKNOWN_MAC.to_string(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.hardware_address != UNKNOWN_MAC
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Client IP: {} | MAC: {}",
            self.network_address, self.hardware_address
        )
    }
}

/// Strip the port from a reported peer address (`ip:port` or `[v6]:port`).
/// IPv4 clients seen through a dual-stack listener come back as plain IPv4.
pub fn split_peer_address(peer: &str) -> Option<String> {
    peer.parse::<SocketAddr>()
        .ok()
        .map(|addr| addr.ip().to_canonical().to_string())
}

/// Resolves hardware addresses through a strategy chosen once at startup.
#[derive(Clone)]
pub struct IdentityResolver {
    lookup: Arc<dyn NeighborTableLookup>,
}

impl IdentityResolver {
    /// Probe the host and pick the table-file or command strategy.
    pub fn detect() -> Self {
        Self {
            lookup: Arc::from(neighbor::detect()),
        }
    }

    pub fn with_lookup(lookup: Arc<dyn NeighborTableLookup>) -> Self {
        Self { lookup }
    }

    pub fn strategy(&self) -> &'static str {
        self.lookup.name()
    }

    /// Hardware address for a bare network address, or [`UNKNOWN_MAC`].
    pub async fn resolve(&self, ip: &str) -> String {
        match self.lookup.lookup(ip).await {
            Ok(mac) => mac,
            Err(e) => {
                tracing::debug!(
                    ip = %ip,
                    strategy = self.lookup.name(),
                    error = %e,
                    "MAC lookup failed"
                );
                UNKNOWN_MAC.to_string()
            }
        }
    }

    /// Identify the client behind a reported peer address. An unparseable
    /// address is used verbatim and left unresolved.
    pub async fn identify(&self, peer: &str) -> ClientIdentity {
        match split_peer_address(peer) {
            Some(ip) => {
                let mac = self.resolve(&ip).await;
                ClientIdentity {
                    network_address: ip,
                    hardware_address: mac,
                }
            }
            None => ClientIdentity::unresolved(peer),
        }
    }
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("strategy", &self.lookup.name())
            .finish()
    }
}
