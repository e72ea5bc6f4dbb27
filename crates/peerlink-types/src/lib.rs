//! Shared types for peerlink.
//!
//! This crate defines the configuration structures consumed by the wire
//! protocol and the command-line node. It contains no networking logic.

pub mod config;
pub mod error;
