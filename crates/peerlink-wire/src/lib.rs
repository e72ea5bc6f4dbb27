//! peerlink wire protocol: framed request/response messaging between peers.
//!
//! Every exchange happens on a fresh stream obtained from a [`Transport`]:
//! the sender writes one frame (length-prefixed JSON header + raw body) and
//! waits for one response frame on the same stream.
//!
//! ## Architecture
//!
//! - **header**: the [`MessageHeader`] codec
//! - **frame**: reading and writing header+body frames over a byte stream
//! - **registry**: [`PeerRegistry`], the shared record of reachable peers
//! - **connect**: dialing a peer address with bounded, cancellable retry
//! - **node**: [`PeerNode`], request/response, broadcast and the accept loop
//! - **inbound**: per-stream server entry point and the [`Responder`]
//! - **transport**: the [`Transport`] trait with TCP and in-memory backends

pub mod connect;
pub mod error;
pub mod frame;
pub mod header;
pub mod inbound;
pub mod node;
pub mod registry;
pub mod transport;

pub use error::{WireError, WireResult};
pub use header::{Message, MessageHeader, MessageType, INTERNAL_ERROR_CODE, SUCCESS_CODE};
pub use inbound::{InboundRequest, MessageHandler, Responder};
pub use node::{NodeConfig, PeerNode};
pub use registry::{Endpoint, PeerAddress, PeerEntry, PeerId, PeerRegistry};
pub use transport::{Keypair, MemoryNetwork, MemoryTransport, PeerStream, TcpTransport, Transport};
