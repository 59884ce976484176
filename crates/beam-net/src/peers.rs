//! Peer connection tracking.
//!
//! Maps libp2p connections to Beam IDs. A peer only counts as connected to
//! the rest of the node once identify has told us who it is and it listens
//! on its inbox topic.

use std::collections::HashMap;

use beam_shared::BeamId;
use libp2p::{identity::PublicKey, Multiaddr, PeerId};
use tracing::debug;

/// Information about a connected peer.
#[derive(Debug, Clone)]
struct ConnectionInfo {
    peer_id: PeerId,
    /// The multiaddr through which we are connected.
    address: Multiaddr,
    /// Set once identify has completed.
    beam_id: Option<BeamId>,
    /// The peer has subscribed to its own inbox topic, so publishes to it
    /// have somewhere to go.
    inbox_subscribed: bool,
    /// Unix epoch millis.
    connected_at: u64,
}

impl ConnectionInfo {
    fn ready(&self) -> Option<&BeamId> {
        self.beam_id.as_ref().filter(|_| self.inbox_subscribed)
    }
}

/// Tracks all currently connected peers.
///
/// A peer becomes reachable once it is both identified and subscribed to its
/// inbox, in either order.
#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
    reachable: HashMap<BeamId, PeerId>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) {
        let now = now_millis();
        self.peers.entry(peer_id).or_insert(ConnectionInfo {
            peer_id,
            address,
            beam_id: None,
            inbox_subscribed: false,
            connected_at: now,
        });
        debug!(peer = %peer_id, total = self.peer_count(), "Tracking peer connection");
    }

    /// Attach the Beam ID learned from identify. Returns the Beam ID the
    /// first time this makes the peer reachable.
    pub fn on_identified(&mut self, peer_id: &PeerId, beam_id: BeamId) -> Option<BeamId> {
        let info = self.peers.get_mut(peer_id)?;
        if info.beam_id.is_some() {
            return None;
        }
        info.beam_id = Some(beam_id);
        self.promote(peer_id)
    }

    /// Record that the peer subscribed to its inbox. Returns the Beam ID the
    /// first time this makes the peer reachable.
    pub fn on_inbox_subscribed(&mut self, peer_id: &PeerId) -> Option<BeamId> {
        let info = self.peers.get_mut(peer_id)?;
        if info.inbox_subscribed {
            return None;
        }
        info.inbox_subscribed = true;
        self.promote(peer_id)
    }

    fn promote(&mut self, peer_id: &PeerId) -> Option<BeamId> {
        let beam_id = self.peers.get(peer_id)?.ready()?.clone();
        self.reachable.insert(beam_id.clone(), *peer_id);
        Some(beam_id)
    }

    /// Remove a peer that has fully disconnected, returning its Beam ID if
    /// it had been reachable.
    pub fn on_disconnected(&mut self, peer_id: &PeerId) -> Option<BeamId> {
        let info = self.peers.remove(peer_id)?;
        debug!(
            peer = %info.peer_id,
            addr = %info.address,
            connected_ms = now_millis().saturating_sub(info.connected_at),
            remaining = self.peer_count(),
            "Removed peer from tracker"
        );
        let beam_id = info.ready()?.clone();
        self.reachable.remove(&beam_id);
        Some(beam_id)
    }

    /// Reachable peers only.
    pub fn connected_beam_ids(&self) -> Vec<BeamId> {
        self.reachable.keys().cloned().collect()
    }

    pub fn is_connected(&self, beam_id: &BeamId) -> bool {
        self.reachable.contains_key(beam_id)
    }

    /// All tracked connections, reachable or not.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Beam ID bound to an Ed25519 libp2p public key.
pub fn beam_id_for_key(key: &PublicKey) -> Option<BeamId> {
    let ed25519 = key.clone().try_into_ed25519().ok()?;
    Some(BeamId::derive(&ed25519.to_bytes()))
}

/// Ed25519 peer ids inline the public key, so the Beam ID can be recovered
/// without waiting for identify.
pub fn beam_id_for_peer(peer_id: &PeerId) -> Option<BeamId> {
    let multihash = peer_id.as_ref();
    // identity multihash
    if multihash.code() != 0 {
        return None;
    }
    let key = PublicKey::try_decode_protobuf(multihash.digest()).ok()?;
    beam_id_for_key(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    fn test_addr() -> Multiaddr {
        "/ip4/127.0.0.1/udp/4011/quic-v1".parse().unwrap()
    }

    #[test]
    fn test_reachable_after_identify_and_subscribe() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();
        let beam_id = BeamId::derive(&[9u8; 32]);

        tracker.on_connected(peer, test_addr());
        assert_eq!(tracker.peer_count(), 1);

        assert_eq!(tracker.on_identified(&peer, beam_id.clone()), None);
        assert!(!tracker.is_connected(&beam_id));

        assert_eq!(tracker.on_inbox_subscribed(&peer), Some(beam_id.clone()));
        assert_eq!(tracker.on_inbox_subscribed(&peer), None);
        assert!(tracker.is_connected(&beam_id));
        assert_eq!(tracker.connected_beam_ids(), vec![beam_id.clone()]);

        assert_eq!(tracker.on_disconnected(&peer), Some(beam_id.clone()));
        assert!(!tracker.is_connected(&beam_id));
        assert_eq!(tracker.peer_count(), 0);
    }

    #[test]
    fn test_subscription_before_identify() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();
        let beam_id = BeamId::derive(&[4u8; 32]);

        tracker.on_connected(peer, test_addr());
        assert_eq!(tracker.on_inbox_subscribed(&peer), None);
        assert!(!tracker.is_connected(&beam_id));
        assert_eq!(tracker.on_identified(&peer, beam_id.clone()), Some(beam_id.clone()));
        assert_eq!(tracker.on_identified(&peer, beam_id.clone()), None);
        assert!(tracker.is_connected(&beam_id));
    }

    #[test]
    fn test_unready_disconnect() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();
        tracker.on_connected(peer, test_addr());
        assert_eq!(tracker.on_identified(&peer, BeamId::derive(&[1u8; 32])), None);
        assert_eq!(tracker.on_disconnected(&peer), None);
        assert_eq!(tracker.on_inbox_subscribed(&peer), None);
    }

    #[test]
    fn test_beam_id_matches_signing_key() {
        let secret = [42u8; 32];
        let keypair = Keypair::ed25519_from_bytes(secret).unwrap();
        let identity = beam_shared::Identity::from_secret_bytes(&secret, &[7u8; 32]);

        let from_key = beam_id_for_key(&keypair.public()).unwrap();
        let from_peer = beam_id_for_peer(&keypair.public().to_peer_id()).unwrap();
        assert_eq!(&from_key, identity.beam_id());
        assert_eq!(from_peer, from_key);
    }
}
