//! TCP transport with an ed25519 identity handshake.
//!
//! Every new TCP connection starts with a challenge: the dialer sends a
//! 32-byte random nonce, the listener answers with its public key and a
//! signature over the nonce. The dialer checks that the key matches the peer
//! ID it meant to reach. After that the socket is a plain byte stream.
//!
//! The handshake only proves the listener holds the key. It is not bound to
//! the rest of the connection and the traffic is not encrypted, so it does
//! not protect against an active man-in-the-middle relaying the nonce to the
//! real peer.

use super::identity::{verify_challenge, Keypair};
use super::{PeerStream, RoutingTable, Transport};
use crate::error::{WireError, WireResult};
use crate::registry::{Endpoint, PeerId};

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const NONCE_LEN: usize = 32;
const PUBLIC_KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

/// Completed inbound handshakes waiting for `accept()`.
const ACCEPT_BACKLOG: usize = 128;

/// A [`Transport`] over tokio TCP sockets.
pub struct TcpTransport {
    keypair: Keypair,
    peer_id: PeerId,
    local_addr: SocketAddr,
    routes: RoutingTable,
    handshake_timeout: Duration,
    incoming: Mutex<mpsc::Receiver<TcpStream>>,
    accept_task: JoinHandle<()>,
}

impl TcpTransport {
    /// Bind a listener on `listen` and start accepting connections.
    pub async fn bind(
        listen: &Endpoint,
        keypair: Keypair,
        handshake_timeout: Duration,
    ) -> WireResult<Self> {
        let addr = listen.socket_addr().ok_or_else(|| {
            WireError::Connection(format!("TCP transport cannot listen on {listen}"))
        })?;
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let peer_id = keypair.peer_id();

        info!(
            "peerlink: listening on {} (peer_id={})",
            local_addr, peer_id
        );

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            keypair.clone(),
            handshake_timeout,
            tx,
        ));

        Ok(Self {
            keypair,
            peer_id,
            local_addr,
            routes: RoutingTable::default(),
            handshake_timeout,
            incoming: Mutex::new(rx),
            accept_task,
        })
    }

    /// Get the actual bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address other peers dial to reach this node.
    pub fn listen_address(&self) -> String {
        let endpoint = Endpoint::Tcp {
            host: self.local_addr.ip().to_string(),
            port: self.local_addr.port(),
        };
        format!("{endpoint}/p2p/{}", self.peer_id)
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    async fn connect_endpoint(&self, addr: &str, peer: &PeerId) -> WireResult<TcpStream> {
        let attempt = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            client_handshake(&mut stream, peer).await?;
            Ok::<_, WireError>(stream)
        };
        tokio::time::timeout(self.handshake_timeout, attempt)
            .await
            .map_err(|_| WireError::Timeout(self.handshake_timeout))?
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn add_route(&self, peer: &PeerId, endpoints: &[Endpoint]) {
        self.routes.add(peer, endpoints);
    }

    async fn dial(&self, peer: &PeerId) -> WireResult<PeerStream> {
        let endpoints = self.routes.get(peer);
        let mut last_error = None;

        for endpoint in &endpoints {
            let Some(addr) = endpoint.socket_addr() else {
                last_error = Some(WireError::Connection(format!(
                    "unsupported endpoint {endpoint}"
                )));
                continue;
            };
            match self.connect_endpoint(&addr, peer).await {
                Ok(stream) => return Ok(Box::new(stream)),
                Err(e) => {
                    debug!("peerlink: dial {} at {} failed: {}", peer, addr, e);
                    last_error = Some(e);
                }
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

/// Accept sockets and run the listener side of the handshake on each one in
/// its own task, forwarding the ones that complete.
async fn accept_loop(
    listener: TcpListener,
    keypair: Keypair,
    handshake_timeout: Duration,
    tx: mpsc::Sender<TcpStream>,
) {
    loop {
        match listener.accept().await {
            Ok((mut stream, addr)) => {
                debug!("peerlink: accepted connection from {}", addr);
                let keypair = keypair.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let handshake = server_handshake(&mut stream, &keypair);
                    match tokio::time::timeout(handshake_timeout, handshake).await {
                        Ok(Ok(())) => {
                            let _ = stream.set_nodelay(true);
                            if tx.send(stream).await.is_err() {
                                debug!("peerlink: transport closed, dropping {}", addr);
                            }
                        }
                        Ok(Err(e)) => debug!("peerlink: handshake with {} failed: {}", addr, e),
                        Err(_) => debug!("peerlink: handshake with {} timed out", addr),
                    }
                });
            }
            Err(e) => {
                error!("peerlink: accept error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn client_handshake(stream: &mut TcpStream, expected: &PeerId) -> WireResult<()> {
    let nonce: [u8; NONCE_LEN] = rand::random();
    stream.write_all(&nonce).await?;
    stream.flush().await?;

    let mut reply = [0u8; PUBLIC_KEY_LEN + SIGNATURE_LEN];
    stream.read_exact(&mut reply).await?;

    let mut public_key = [0u8; PUBLIC_KEY_LEN];
    public_key.copy_from_slice(&reply[..PUBLIC_KEY_LEN]);
    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&reply[PUBLIC_KEY_LEN..]);

    verify_challenge(expected, &public_key, &nonce, &signature)
}

async fn server_handshake(stream: &mut TcpStream, keypair: &Keypair) -> WireResult<()> {
    let mut nonce = [0u8; NONCE_LEN];
    stream.read_exact(&mut nonce).await?;

    let mut reply = Vec::with_capacity(PUBLIC_KEY_LEN + SIGNATURE_LEN);
    reply.extend_from_slice(&keypair.public_key());
    reply.extend_from_slice(&keypair.sign_challenge(&nonce));
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}
