//! Node configuration types.
//!
//! A node is configured from a TOML file (see `peerlink-cli`) with a `[p2p]`
//! table holding the listen address, the node's secret key, the destination
//! peers to dial at startup and the retry/timeout knobs of the wire layer.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Length in hex characters of an ed25519 secret key.
pub const SECRET_HEX_LEN: usize = 64;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/4001";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerlinkConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Wire protocol settings.
    pub p2p: P2pConfig,
}

impl Default for PeerlinkConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            p2p: P2pConfig::default(),
        }
    }
}

/// Settings for the peer-to-peer layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Listen endpoint, e.g. `/ip4/0.0.0.0/tcp/4001`.
    pub addr: String,
    /// Hex-encoded ed25519 secret key.
    pub secret: String,
    /// Peer addresses to connect to at startup.
    pub dests: Vec<String>,
    /// Comma-separated peer addresses (legacy form, merged into `dests`).
    pub dest: Option<String>,
    /// Deadline for a single request/response exchange.
    pub request_timeout_secs: u64,
    /// Maximum number of peers a broadcast talks to at once.
    pub broadcast_concurrency: usize,
    /// Deadline for the transport identity handshake.
    pub handshake_timeout_secs: u64,
    /// Reconnect policy used when dialing destinations.
    pub retry: RetryConfig,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_LISTEN_ADDR.to_string(),
            secret: String::new(),
            dests: Vec::new(),
            dest: None,
            request_timeout_secs: 30,
            broadcast_concurrency: 8,
            handshake_timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl P2pConfig {
    /// All destination addresses: `dests` followed by the comma-split `dest`,
    /// blanks and duplicates removed, order preserved.
    pub fn destinations(&self) -> Vec<String> {
        let legacy = self
            .dest
            .as_deref()
            .into_iter()
            .flat_map(|d| d.split(','));

        let mut out: Vec<String> = Vec::new();
        for addr in self.dests.iter().map(String::as_str).chain(legacy) {
            let addr = addr.trim();
            if !addr.is_empty() && !out.iter().any(|a| a == addr) {
                out.push(addr.to_string());
            }
        }
        out
    }

    /// Request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Handshake deadline as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Reconnect policy for the connection manager.
///
/// Both bounds set to `None` means the manager retries until it succeeds or
/// the node shuts down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Fixed wait between attempts, in milliseconds.
    pub backoff_ms: u64,
    /// Give up after this many failed attempts.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 2000,
            max_attempts: Some(30),
            max_elapsed_secs: None,
        }
    }
}

impl RetryConfig {
    /// A policy that never gives up.
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            backoff_ms: backoff.as_millis() as u64,
            max_attempts: None,
            max_elapsed_secs: None,
        }
    }

    /// Wait between attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Total time budget, if bounded.
    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_secs.map(Duration::from_secs)
    }
}

impl PeerlinkConfig {
    /// Check every field that the node relies on before starting.
    ///
    /// Address syntax is not checked here; the loader parses `p2p.addr` and
    /// the destinations with the wire crate's grammar right after this.
    pub fn validate(&self) -> ConfigResult<()> {
        let p2p = &self.p2p;

        if p2p.addr.trim().is_empty() {
            return Err(ConfigError::invalid("p2p.addr", "must not be empty"));
        }
        if p2p.secret.len() != SECRET_HEX_LEN {
            return Err(ConfigError::invalid(
                "p2p.secret",
                format!(
                    "expected {SECRET_HEX_LEN} hex characters, got {}",
                    p2p.secret.len()
                ),
            ));
        }
        if hex::decode(&p2p.secret).is_err() {
            return Err(ConfigError::invalid("p2p.secret", "not valid hex"));
        }
        if p2p.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "p2p.request_timeout_secs",
                "must be greater than zero",
            ));
        }
        if p2p.handshake_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "p2p.handshake_timeout_secs",
                "must be greater than zero",
            ));
        }
        if p2p.broadcast_concurrency == 0 {
            return Err(ConfigError::invalid(
                "p2p.broadcast_concurrency",
                "must be at least 1",
            ));
        }
        if p2p.retry.backoff_ms == 0 {
            return Err(ConfigError::invalid(
                "p2p.retry.backoff_ms",
                "must be greater than zero",
            ));
        }
        if p2p.retry.max_attempts == Some(0) {
            return Err(ConfigError::invalid(
                "p2p.retry.max_attempts",
                "must be at least 1 (omit it for no limit)",
            ));
        }
        Ok(())
    }
}
