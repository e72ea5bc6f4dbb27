//! Connection manager: dial a peer address until it answers.
//!
//! A successful connection is proven by opening (and closing) a
//! stream; only then is the peer added to the [`PeerRegistry`]. Failed
//! attempts are retried with a fixed backoff, bounded by the
//! [`RetryConfig`] and cut short by the node's shutdown signal.

use crate::error::{WireError, WireResult};
use crate::registry::{PeerAddress, PeerEntry, PeerId, PeerRegistry};
use crate::transport::Transport;

use peerlink_types::config::RetryConfig;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

/// Connect to `address` and register the peer.
///
/// Malformed addresses fail immediately with [`WireError::AddressParse`].
/// Dial failures are retried until the policy gives up
/// ([`WireError::RetriesExhausted`]) or `shutdown` turns true
/// ([`WireError::Cancelled`]).
pub async fn connect_to_peer(
    transport: &dyn Transport,
    registry: &PeerRegistry,
    address: &str,
    retry: &RetryConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> WireResult<PeerId> {
    let parsed = PeerAddress::parse(address)?;
    let peer_id = parsed.peer_id.clone();
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return Err(WireError::Cancelled);
        }

        transport.add_route(&peer_id, &parsed.endpoints);
        attempts += 1;

        let error = match transport.dial(&peer_id).await {
            Ok(mut stream) => {
                let _ = stream.shutdown().await;
                registry.insert(PeerEntry {
                    peer_id: peer_id.clone(),
                    address: address.to_string(),
                    endpoints: parsed.endpoints.clone(),
                    connected_at: chrono::Utc::now(),
                });
                info!(peer = %peer_id, attempts, "Connected to peer");
                return Ok(peer_id);
            }
            Err(e) => e,
        };

        let out_of_attempts = retry.max_attempts.is_some_and(|max| attempts >= max);
        let out_of_time = retry
            .max_elapsed()
            .is_some_and(|max| started.elapsed() + retry.backoff() > max);
        if out_of_attempts || out_of_time {
            warn!(peer = %peer_id, attempts, error = %error, "Giving up on peer");
            return Err(WireError::RetriesExhausted {
                peer: peer_id,
                attempts,
                last_error: error.to_string(),
            });
        }

        warn!(
            peer = %peer_id,
            attempt = attempts,
            error = %error,
            "Error creating stream, retrying in {:?}",
            retry.backoff()
        );

        tokio::select! {
            _ = tokio::time::sleep(retry.backoff()) => {}
            changed = shutdown.changed() => {
                // A dropped sender can never signal shutdown again; keep
                // retrying on the backoff alone.
                if changed.is_ok() && *shutdown.borrow() {
                    return Err(WireError::Cancelled);
                }
                if changed.is_err() {
                    tokio::time::sleep(retry.backoff()).await;
                }
            }
        }
    }
}
