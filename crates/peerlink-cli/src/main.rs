//! peerlink CLI: run a node, send requests and broadcasts to peers.
//!
//! Every command except `keygen` reads `~/.peerlink/config.toml` (or the file
//! given with `--config`). `start` runs until Ctrl+C; `send` and `broadcast`
//! bind an ephemeral port, connect to the configured destinations, do their
//! one exchange and exit.

mod cli;
mod cmd;
mod config;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;
use peerlink_types::config::PeerlinkConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Trace to stderr, filtered by `RUST_LOG` or else `default_level`.
fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config_or_exit(path: Option<&Path>) -> PeerlinkConfig {
    match config::load_config(path) {
        Ok(config) => config,
        Err(e) => {
            ui::error(&e.to_string());
            if path.is_none() {
                ui::hint(&format!(
                    "Create {} or pass --config <path>",
                    config::default_config_path().display()
                ));
            }
            std::process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = cli
        .command
        .needs_config()
        .then(|| load_config_or_exit(cli.config.as_deref()));
    init_tracing_stderr(config.as_ref().map_or("info", |c| c.log_level.as_str()));

    match (cli.command, config) {
        (Commands::Keygen, _) => cmd::keys::cmd_keygen(),
        (Commands::Id, Some(config)) => cmd::keys::cmd_id(&config),
        (Commands::Start, Some(config)) => cmd::node::cmd_start(config),
        (
            Commands::Send {
                peer,
                session,
                body,
            },
            Some(config),
        ) => cmd::node::cmd_send(config, peer, session, body),
        (Commands::Broadcast { session, body }, Some(config)) => {
            cmd::node::cmd_broadcast(config, session, body)
        }
        (_, None) => ui::fail("No configuration loaded"),
    }
}
