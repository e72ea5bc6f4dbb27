//! In-process transport over `tokio::io::duplex` pipes.
//!
//! A [`MemoryNetwork`] is a namespace of named listeners. Each
//! [`MemoryTransport`] bound on it is reachable at `/memory/<name>` and is
//! unregistered again when dropped, so tests can make peers appear and
//! disappear.

use super::{PeerStream, RoutingTable, Transport};
use crate::error::{WireError, WireResult};
use crate::registry::{Endpoint, PeerId};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};

/// Buffer size of each direction of a pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Streams queued for a listener before `dial` starts waiting.
const ACCEPT_BACKLOG: usize = 64;

struct Listener {
    peer_id: PeerId,
    tx: mpsc::Sender<DuplexStream>,
}

/// A shared namespace of in-memory listeners.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    listeners: Arc<RwLock<HashMap<String, Listener>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener called `name` owned by `peer_id`.
    pub fn bind(&self, name: &str, peer_id: PeerId) -> WireResult<MemoryTransport> {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if listeners.contains_key(name) {
            return Err(WireError::Connection(format!(
                "memory endpoint {name} is already bound"
            )));
        }
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        listeners.insert(
            name.to_string(),
            Listener {
                peer_id: peer_id.clone(),
                tx,
            },
        );

        Ok(MemoryTransport {
            network: self.clone(),
            name: name.to_string(),
            peer_id,
            routes: RoutingTable::default(),
            incoming: Mutex::new(rx),
            dials: AtomicUsize::new(0),
        })
    }

    fn connect(&self, name: &str, expected: &PeerId) -> WireResult<mpsc::Sender<DuplexStream>> {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        let listener = listeners
            .get(name)
            .ok_or_else(|| WireError::Connection(format!("connection refused: /memory/{name}")))?;
        if &listener.peer_id != expected {
            return Err(WireError::HandshakeFailed(format!(
                "expected peer {expected}, remote presented {}",
                listener.peer_id
            )));
        }
        Ok(listener.tx.clone())
    }

    fn unbind(&self, name: &str) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.remove(name);
    }
}

/// A [`Transport`] bound to one name on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    name: String,
    peer_id: PeerId,
    routes: RoutingTable,
    incoming: Mutex<mpsc::Receiver<DuplexStream>>,
    dials: AtomicUsize,
}

impl MemoryTransport {
    /// The endpoint this transport listens on.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::Memory(self.name.clone())
    }

    /// The address other peers dial to reach this transport.
    pub fn listen_address(&self) -> String {
        format!("{}/p2p/{}", self.endpoint(), self.peer_id)
    }

    /// Number of `dial` calls made so far, successful or not.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.unbind(&self.name);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn add_route(&self, peer: &PeerId, endpoints: &[Endpoint]) {
        self.routes.add(peer, endpoints);
    }

    async fn dial(&self, peer: &PeerId) -> WireResult<PeerStream> {
        self.dials.fetch_add(1, Ordering::Relaxed);
        let mut last_error = None;

        for endpoint in self.routes.get(peer) {
            let Endpoint::Memory(name) = &endpoint else {
                last_error = Some(WireError::Connection(format!(
                    "unsupported endpoint {endpoint}"
                )));
                continue;
            };
            match self.network.connect(name, peer) {
                Ok(tx) => {
                    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
                    if tx.send(remote).await.is_ok() {
                        return Ok(Box::new(local));
                    }
                    last_error = Some(WireError::Connection(format!(
                        "connection refused: {endpoint}"
                    )));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| WireError::Connection(format!("no route to peer {peer}"))))
    }

    async fn accept(&self) -> WireResult<PeerStream> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(WireError::ConnectionClosed),
        }
    }
}
