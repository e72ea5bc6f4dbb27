//! The byte-stream transport the wire protocol runs on.
//!
//! The protocol only needs four things from a transport: its own identity,
//! a routing table it can be told about, `dial(peer) -> stream` and
//! `accept() -> stream`. Everything else (sockets, handshakes, address
//! resolution) stays behind the [`Transport`] trait.

mod identity;
mod memory;
mod tcp;

pub use identity::Keypair;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

use crate::error::WireResult;
use crate::registry::{Endpoint, PeerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional ordered byte channel to one peer.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Type-erased stream handed out by every transport.
pub type PeerStream = Box<dyn ByteStream>;

/// What the wire protocol needs from the network.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This node's identity.
    fn local_peer_id(&self) -> &PeerId;

    /// Teach the transport where `peer` can be reached. Endpoints accumulate.
    fn add_route(&self, peer: &PeerId, endpoints: &[Endpoint]);

    /// Open a new stream to `peer`.
    async fn dial(&self, peer: &PeerId) -> WireResult<PeerStream>;

    /// Wait for the next incoming stream. `ConnectionClosed` means the
    /// transport has stopped listening and will not produce more.
    async fn accept(&self) -> WireResult<PeerStream>;
}

/// Peer → endpoints map shared by the bundled transports.
#[derive(Debug, Default)]
pub(crate) struct RoutingTable {
    routes: RwLock<HashMap<PeerId, Vec<Endpoint>>>,
}

impl RoutingTable {
    pub(crate) fn add(&self, peer: &PeerId, endpoints: &[Endpoint]) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let known = routes.entry(peer.clone()).or_default();
        for endpoint in endpoints {
            if !known.contains(endpoint) {
                known.push(endpoint.clone());
            }
        }
    }

    pub(crate) fn get(&self, peer: &PeerId) -> Vec<Endpoint> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.get(peer).cloned().unwrap_or_default()
    }
}
