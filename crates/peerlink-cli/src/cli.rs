//! Clap CLI definitions for peerlink.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  peerlink keygen                          Generate a node secret
  peerlink start                           Run a node until Ctrl+C
  peerlink send --peer <id> hello          Send one request to a peer
  peerlink broadcast hello                 Send to every configured peer";

/// peerlink: framed request/response messaging between peers.
#[derive(Parser, Debug)]
#[command(name = "peerlink", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.peerlink/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen for requests and connect to the configured destinations.
    Start,
    /// Send one request to a peer and print its response.
    Send {
        /// Peer ID of the recipient.
        #[arg(long)]
        peer: String,
        /// Session token (default: a random UUID).
        #[arg(long)]
        session: Option<String>,
        /// Message body.
        body: String,
    },
    /// Send a message to every configured destination.
    Broadcast {
        /// Session token (default: a random UUID).
        #[arg(long)]
        session: Option<String>,
        /// Message body.
        body: String,
    },
    /// Generate a new secret key and print it with its peer ID.
    Keygen,
    /// Print the peer ID of the configured secret.
    Id,
}

impl Commands {
    /// Whether the command reads the config file.
    pub fn needs_config(&self) -> bool {
        !matches!(self, Commands::Keygen)
    }
}
