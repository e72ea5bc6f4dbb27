//! Subcommand implementations.

pub mod keys;
pub mod node;

use crate::ui;

/// Every async subcommand runs on its own multi-threaded runtime.
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new()
        .unwrap_or_else(|e| ui::fail(&format!("Failed to create Tokio runtime: {e}")))
}
