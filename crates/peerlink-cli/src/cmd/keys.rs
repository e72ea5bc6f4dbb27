//! Key management: `peerlink keygen` and `peerlink id`.

use crate::ui;
use peerlink_types::config::PeerlinkConfig;
use peerlink_wire::Keypair;

pub fn cmd_keygen() {
    let keypair = Keypair::generate();
    ui::kv("Secret", &keypair.secret_hex());
    ui::kv("Peer ID", keypair.peer_id().as_str());
    ui::hint("Set `secret` under [p2p] in ~/.peerlink/config.toml");
}

pub fn cmd_id(config: &PeerlinkConfig) {
    let keypair = Keypair::from_hex(&config.p2p.secret)
        .unwrap_or_else(|e| ui::fail(&format!("Bad secret: {e}")));
    let peer_id = keypair.peer_id();
    ui::kv("Peer ID", peer_id.as_str());
    ui::kv("Address", &format!("{}/p2p/{}", config.p2p.addr, peer_id));
}
