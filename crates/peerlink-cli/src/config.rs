//! Configuration loading from `~/.peerlink/config.toml`.

use peerlink_types::config::PeerlinkConfig;
use peerlink_types::error::{ConfigError, ConfigResult};
use peerlink_wire::{Endpoint, PeerAddress};
use std::path::{Path, PathBuf};

/// Directory holding the default config file.
pub fn peerlink_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".peerlink")
}

/// Default config file path.
pub fn default_config_path() -> PathBuf {
    peerlink_home().join("config.toml")
}

/// Load and validate the config at `path`, or at the default location.
///
/// A missing file is an error: a node cannot run without a secret.
pub fn load_config(path: Option<&Path>) -> ConfigResult<PeerlinkConfig> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.display().to_string(),
        source,
    })?;
    let config: PeerlinkConfig = toml::from_str(&contents)?;
    config.validate()?;
    validate_addresses(&config)?;
    Ok(config)
}

/// Parse the listen address and every destination so a typo fails at load
/// time instead of when the node binds or dials.
fn validate_addresses(config: &PeerlinkConfig) -> ConfigResult<()> {
    Endpoint::parse(&config.p2p.addr).map_err(|e| ConfigError::Invalid {
        field: "p2p.addr".to_string(),
        reason: e.to_string(),
    })?;
    for dest in config.p2p.destinations() {
        PeerAddress::parse(&dest).map_err(|e| ConfigError::Invalid {
            field: "p2p.dests".to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
