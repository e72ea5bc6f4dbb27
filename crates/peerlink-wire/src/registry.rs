//! Peer registry: tracks peers we have successfully connected to.
//!
//! The [`PeerRegistry`] is a thread-safe map from [`PeerId`] to the address
//! the peer was reached at. It is written by the connection manager and read
//! by every send and broadcast. Entries are never removed.

use crate::error::{WireError, WireResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Opaque peer identity issued by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One network location a peer can be dialed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A TCP host (IP literal or DNS name) and port.
    Tcp { host: String, port: u16 },
    /// A named listener on a [`crate::MemoryNetwork`].
    Memory(String),
}

impl Endpoint {
    /// Parse an endpoint in multiaddr form, e.g. `/ip4/127.0.0.1/tcp/4001`
    /// or `/memory/node-a`.
    pub fn parse(s: &str) -> WireResult<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let (endpoint, rest) = parse_endpoint(s, &parts)?;
        if !rest.is_empty() {
            return Err(address_error(s, "unexpected trailing components"));
        }
        Ok(endpoint)
    }

    /// `host:port` form for socket APIs; `None` for non-TCP endpoints.
    pub fn socket_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => Some(format!("[{host}]:{port}")),
            Endpoint::Tcp { host, port } => Some(format!("{host}:{port}")),
            Endpoint::Memory(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => {
                let proto = if host.parse::<std::net::Ipv4Addr>().is_ok() {
                    "ip4"
                } else if host.parse::<std::net::Ipv6Addr>().is_ok() {
                    "ip6"
                } else {
                    "dns"
                };
                write!(f, "/{proto}/{host}/tcp/{port}")
            }
            Endpoint::Memory(name) => write!(f, "/memory/{name}"),
        }
    }
}

/// A parsed peer address: who the peer is and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub peer_id: PeerId,
    pub endpoints: Vec<Endpoint>,
}

impl PeerAddress {
    /// Parse `<endpoint>/p2p/<peer-id>`.
    pub fn parse(s: &str) -> WireResult<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let (endpoint, rest) = parse_endpoint(s, &parts)?;
        match rest {
            ["p2p", id] if !id.is_empty() => Ok(Self {
                peer_id: PeerId::new(*id),
                endpoints: vec![endpoint],
            }),
            [] => Err(address_error(s, "missing /p2p/<peer-id> component")),
            _ => Err(address_error(s, "expected /p2p/<peer-id> after the endpoint")),
        }
    }
}

fn address_error(address: &str, reason: &str) -> WireError {
    WireError::AddressParse {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse the endpoint prefix of `parts` (the `/`-split address) and return
/// it with the unconsumed components.
fn parse_endpoint<'a>(s: &str, parts: &'a [&'a str]) -> WireResult<(Endpoint, &'a [&'a str])> {
    // Leading '/' yields an empty first component.
    let parts = match parts {
        ["", rest @ ..] => rest,
        _ => return Err(address_error(s, "must start with '/'")),
    };

    match parts {
        [proto @ ("ip4" | "ip6" | "dns" | "dns4" | "dns6"), host, "tcp", port, rest @ ..] => {
            if host.is_empty() {
                return Err(address_error(s, "empty host"));
            }
            match *proto {
                "ip4" if host.parse::<std::net::Ipv4Addr>().is_err() => {
                    return Err(address_error(s, "invalid IPv4 address"));
                }
                "ip6" if host.parse::<std::net::Ipv6Addr>().is_err() => {
                    return Err(address_error(s, "invalid IPv6 address"));
                }
                _ => {}
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| address_error(s, "invalid TCP port"))?;
            Ok((
                Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                },
                rest,
            ))
        }
        ["memory", name, rest @ ..] if !name.is_empty() => {
            Ok((Endpoint::Memory(name.to_string()), rest))
        }
        _ => Err(address_error(s, "unsupported or incomplete endpoint")),
    }
}

/// A peer we have connected to at least once.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub peer_id: PeerId,
    /// The address string the peer was connected through.
    pub address: String,
    pub endpoints: Vec<Endpoint>,
    /// When the connection attempt first succeeded.
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe registry of all known peers.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<PeerId, PeerEntry>>>,
}

impl PeerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or update a peer.
    pub fn insert(&self, entry: PeerEntry) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(entry.peer_id.clone(), entry);
    }

    /// Get a snapshot of a specific peer.
    pub fn get_peer(&self, peer_id: &PeerId) -> Option<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.contains_key(peer_id)
    }

    /// Visit every peer while holding the read lock.
    ///
    /// `f` must not block or call back into the registry for writing.
    pub fn for_each(&self, mut f: impl FnMut(&PeerEntry)) {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        for entry in peers.values() {
            f(entry);
        }
    }

    /// Snapshot of all peers.
    pub fn all_peers(&self) -> Vec<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.values().cloned().collect()
    }

    /// Snapshot of all peer IDs, sorted.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<PeerId> = peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
