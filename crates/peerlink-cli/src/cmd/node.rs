//! Node subcommands: `start`, `send` and `broadcast`.

use super::runtime;
use crate::ui;

use async_trait::async_trait;
use peerlink_types::config::PeerlinkConfig;
use peerlink_wire::{
    Endpoint, Keypair, Message, MessageHandler, NodeConfig, PeerId, PeerNode, PeerRegistry,
    Responder, TcpTransport, WireError, WireResult,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Logs every inbound message and acknowledges it.
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle_message(&self, message: Message, responder: Responder) {
        info!(
            session = %message.header.session,
            size = message.header.size,
            broadcast = message.header.is_broadcast,
            body = %message.body_lossy(),
            "Received message"
        );
        if let Err(e) = responder.success().await {
            warn!(error = %e, "Failed to send response");
        }
    }
}

/// Bind a TCP transport from the config and wrap it in a node.
///
/// With `ephemeral` the configured port is replaced by 0, so one-shot
/// commands can run next to a `peerlink start` using the same config.
pub(crate) async fn boot_node(
    config: &PeerlinkConfig,
    ephemeral: bool,
) -> WireResult<(PeerNode, String)> {
    let keypair = Keypair::from_hex(&config.p2p.secret)?;
    let mut listen = Endpoint::parse(&config.p2p.addr)?;
    if ephemeral {
        if let Endpoint::Tcp { port, .. } = &mut listen {
            *port = 0;
        }
    }

    let transport = TcpTransport::bind(&listen, keypair, config.p2p.handshake_timeout()).await?;
    let address = transport.listen_address();
    let node = PeerNode::new(
        Arc::new(transport),
        PeerRegistry::new(),
        NodeConfig::from(&config.p2p),
    );
    Ok((node, address))
}

/// Dial every configured destination; returns how many answered.
async fn connect_destinations(node: &PeerNode, config: &PeerlinkConfig) -> usize {
    let destinations = config.p2p.destinations();
    let mut connected = 0;
    for (address, result) in node.connect_all(&destinations).await {
        match result {
            Ok(_) => connected += 1,
            Err(e) => warn!(address = %address, error = %e, "Failed to connect to destination"),
        }
    }
    connected
}

pub fn cmd_start(config: PeerlinkConfig) {
    let rt = runtime();
    rt.block_on(async {
        let (node, address) = boot_node(&config, false)
            .await
            .unwrap_or_else(|e| ui::fail(&format!("Failed to start node: {e}")));
        let node = Arc::new(node);

        ui::success("Node started");
        ui::kv("Peer ID", node.peer_id().as_str());
        ui::kv("Address", &address);
        ui::hint("Press Ctrl+C to stop");

        let serving = node.serve(Arc::new(LoggingHandler));
        let connector = {
            let node = Arc::clone(&node);
            let config = config.clone();
            tokio::spawn(async move {
                let connected = connect_destinations(&node, &config).await;
                info!(connected, "Finished connecting to destinations");
            })
        };

        if let Err(e) = tokio::signal::ctrl_c().await {
            ui::error(&format!("Failed to listen for Ctrl+C: {e}"));
        }
        info!("Shutting down");
        node.shutdown();
        let _ = connector.await;
        let _ = serving.await;
    });
}

pub fn cmd_send(config: PeerlinkConfig, peer: String, session: Option<String>, body: String) {
    let rt = runtime();
    rt.block_on(async {
        let (node, _) = boot_node(&config, true)
            .await
            .unwrap_or_else(|e| ui::fail(&format!("Failed to start node: {e}")));
        connect_destinations(&node, &config).await;

        let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timeout = node.config().request_timeout;
        let result = node
            .send_request(&session, &PeerId::new(peer), Message::request(body), timeout)
            .await;
        node.shutdown();

        match result {
            Ok(response) => println!("{}", response.body_lossy()),
            Err(WireError::PeerNotFound(peer)) => {
                ui::error(&format!("Peer {peer} is not connected"));
                ui::hint("Add its address to `dests` under [p2p] in the config file");
                std::process::exit(1);
            }
            Err(e) => ui::fail(&format!("Request failed: {e}")),
        }
    });
}

pub fn cmd_broadcast(config: PeerlinkConfig, session: Option<String>, body: String) {
    let rt = runtime();
    rt.block_on(async {
        let (node, _) = boot_node(&config, true)
            .await
            .unwrap_or_else(|e| ui::fail(&format!("Failed to start node: {e}")));
        let connected = connect_destinations(&node, &config).await;
        if connected == 0 {
            ui::hint("No destinations connected; nothing to broadcast to");
        }

        let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timeout = node.config().request_timeout;
        let result = node
            .broadcast(&session, Message::request(body), timeout)
            .await;
        node.shutdown();

        match result {
            Ok(()) => ui::success(&format!("Broadcast delivered to {connected} peer(s)")),
            Err(e) => ui::fail(&e.to_string()),
        }
    });
}
