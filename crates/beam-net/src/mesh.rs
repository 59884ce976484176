//! The transport seam between the node and whatever carries its packets.

use async_trait::async_trait;
use beam_shared::BeamId;
use bytes::Bytes;
use thiserror::Error;

/// Everything a transport reports upward. Peers are always named by Beam ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer became reachable (e.g. seen via mDNS) but is not connected yet.
    PeerFound(BeamId),
    PeerLost(BeamId),
    /// A connection is up and the peer's identity is known.
    Connected(BeamId),
    Disconnected(BeamId),
    Received { from: BeamId, data: Bytes },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer {0} is not connected")]
    NotConnected(BeamId),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport is closed")]
    Closed,
}

/// Reliable, addressed delivery of opaque packets to connected peers.
///
/// Inbound traffic and connectivity changes arrive on the
/// `mpsc::Receiver<TransportEvent>` handed out when the transport is created.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    async fn send(&self, peer: &BeamId, data: Bytes) -> Result<(), TransportError>;

    fn is_connected(&self, peer: &BeamId) -> bool;

    fn connected_peers(&self) -> Vec<BeamId>;
}
