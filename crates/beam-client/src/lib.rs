//! # beam-client
//!
//! The Beam node: contact handshakes, per-contact ratchet sessions, message
//! delivery with offline queueing, and the glue that feeds mesh transport
//! events into them. The `beam-node` binary wraps this in a stdin daemon.

pub mod commands;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod events;
pub mod handshake;
pub mod node;
pub mod sessions;

pub use config::NodeConfig;
pub use delivery::{DeliveryCoordinator, OfflineQueue, QueuedPacket};
pub use error::{ClientError, Result};
pub use events::{EventReceiver, NodeEvent};
pub use handshake::{HandshakeProtocol, PeerState, PendingRequest};
pub use node::BeamNode;
pub use sessions::SessionManager;
