//! PeerNode: the local endpoint of the wire protocol.
//!
//! A [`PeerNode`] owns a [`Transport`] and a [`PeerRegistry`]. Outbound it
//! connects to peers, sends correlated requests and broadcasts; inbound,
//! [`PeerNode::serve`] runs the accept loop and hands every stream to the
//! application's [`MessageHandler`] in its own task.
//!
//! Every exchange uses a fresh stream: one request frame out, one response
//! frame back, then the stream is closed.

use crate::connect::connect_to_peer;
use crate::error::{WireError, WireResult};
use crate::frame::{read_frame, write_frame};
use crate::header::{Message, MessageType, SUCCESS_CODE};
use crate::inbound::{handle_stream, MessageHandler};
use crate::registry::{PeerId, PeerRegistry};
use crate::transport::{PeerStream, Transport};

use futures::stream::{self, StreamExt};
use peerlink_types::config::{P2pConfig, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Behaviour knobs for a [`PeerNode`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Policy for `connect`.
    pub retry: RetryConfig,
    /// Peers contacted at once by `broadcast`. `1` is sequential.
    pub broadcast_concurrency: usize,
    /// Default deadline callers use for one request/response exchange.
    pub request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            broadcast_concurrency: 8,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&P2pConfig> for NodeConfig {
    fn from(p2p: &P2pConfig) -> Self {
        Self {
            retry: p2p.retry.clone(),
            broadcast_concurrency: p2p.broadcast_concurrency,
            request_timeout: p2p.request_timeout(),
        }
    }
}

/// The local network node.
pub struct PeerNode {
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    config: NodeConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl PeerNode {
    pub fn new(transport: Arc<dyn Transport>, registry: PeerRegistry, config: NodeConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            registry,
            config,
            shutdown_tx,
        }
    }

    /// This node's identity on the network.
    pub fn peer_id(&self) -> &PeerId {
        self.transport.local_peer_id()
    }

    /// Get a reference to the peer registry.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Connect to a peer address (`<endpoint>/p2p/<peer-id>`) and register it.
    pub async fn connect(&self, address: &str) -> WireResult<PeerId> {
        let mut shutdown = self.shutdown_tx.subscribe();
        connect_to_peer(
            self.transport.as_ref(),
            &self.registry,
            address,
            &self.config.retry,
            &mut shutdown,
        )
        .await
    }

    /// Connect to every address concurrently. Results come back in input order.
    pub async fn connect_all(&self, addresses: &[String]) -> Vec<(String, WireResult<PeerId>)> {
        let attempts = addresses.iter().map(|address| async move {
            let result = self.connect(address).await;
            (address.clone(), result)
        });
        futures::future::join_all(attempts).await
    }

    /// Send `message` to `peer` and wait for its response.
    ///
    /// The header's type, size, status, error message and session are
    /// overwritten here. The whole exchange (dial, write, read) must finish
    /// within `timeout`.
    pub async fn send_request(
        &self,
        session: &str,
        peer: &PeerId,
        mut message: Message,
        timeout: Duration,
    ) -> WireResult<Message> {
        if !self.registry.contains(peer) {
            return Err(WireError::PeerNotFound(peer.clone()));
        }

        message.header.message_type = MessageType::Request;
        message.header.size = message.body.len() as u64;
        message.header.status = SUCCESS_CODE;
        message.header.error_message.clear();
        message.header.session = session.to_string();

        debug!(peer = %peer, session, size = message.header.size, "Sending request");

        let response = tokio::time::timeout(timeout, self.exchange(peer, &message))
            .await
            .map_err(|_| WireError::Timeout(timeout))??;

        if response.header.message_type != MessageType::Response {
            return Err(WireError::Protocol(format!(
                "expected a response from {peer}, got {:?}",
                response.header.message_type
            )));
        }
        if !response.header.is_success() {
            return Err(WireError::Remote {
                status: response.header.status,
                message: response.header.error_message,
            });
        }
        Ok(response)
    }

    /// Send `message` to every registered peer.
    ///
    /// Every peer is attempted even after failures. Succeeds only if all
    /// peers answered successfully; otherwise the error lists each failed
    /// peer with its cause.
    pub async fn broadcast(
        &self,
        session: &str,
        mut message: Message,
        timeout: Duration,
    ) -> WireResult<()> {
        message.header.is_broadcast = true;
        let peers = self.registry.peer_ids();
        let total = peers.len();
        let concurrency = self.config.broadcast_concurrency.max(1);

        let mut failures: Vec<(PeerId, WireError)> = stream::iter(peers)
            .map(|peer| {
                let message = message.clone();
                async move {
                    let result = self.send_request(session, &peer, message, timeout).await;
                    (peer, result)
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(|(peer, result)| async move { result.err().map(|e| (peer, e)) })
            .collect()
            .await;

        if failures.is_empty() {
            debug!(session, peers = total, "Broadcast delivered");
            return Ok(());
        }

        failures.sort_by(|a, b| a.0.cmp(&b.0));
        warn!(
            session,
            failed = failures.len(),
            peers = total,
            "Broadcast failed for some peers"
        );
        Err(WireError::Broadcast { failures })
    }

    /// Start the accept loop. Each inbound stream is handled in its own task.
    ///
    /// The loop ends when [`PeerNode::shutdown`] is called, the node is
    /// dropped, or the transport stops listening.
    pub fn serve(&self, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let mut shutdown = self.shutdown_tx.subscribe();
        info!(peer_id = %transport.local_peer_id(), "Accepting inbound streams");

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let accepted = tokio::select! {
                    accepted = transport.accept() => accepted,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                match accepted {
                    Ok(stream) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            match handle_stream(stream, handler.as_ref()).await {
                                Ok(()) => {}
                                Err(WireError::ConnectionClosed) => {
                                    debug!("Inbound stream closed before a request arrived");
                                }
                                Err(e) => warn!(error = %e, "Inbound stream failed"),
                            }
                        });
                    }
                    Err(WireError::ConnectionClosed) => {
                        info!("Transport closed, stopping accept loop");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("Accept loop stopped");
        })
    }

    /// Stop the accept loop and abort pending connect backoffs.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn exchange(&self, peer: &PeerId, message: &Message) -> WireResult<Message> {
        let mut stream = self.transport.dial(peer).await?;
        let result = write_and_read(&mut stream, message).await;
        let _ = stream.shutdown().await;
        result
    }
}

async fn write_and_read(stream: &mut PeerStream, message: &Message) -> WireResult<Message> {
    write_frame(stream, &message.header, &message.body).await?;
    read_frame(stream).await
}
