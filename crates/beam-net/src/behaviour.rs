//! Composed libp2p `NetworkBehaviour` for a Beam node.
//!
//! Combines GossipSub (one inbox topic per device), mDNS (LAN discovery) and
//! Identify (which tells us the peer's Ed25519 key, hence its Beam ID).

use libp2p::{gossipsub, identify, mdns, swarm::NetworkBehaviour};

/// Composed network behaviour for Beam nodes.
///
/// Construction is handled by [`super::transport::build_swarm`] via
/// `SwarmBuilder`.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "BeamEvent")]
pub struct BeamBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
    pub identify: identify::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum BeamEvent {
    Gossipsub(gossipsub::Event),
    Mdns(mdns::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for BeamEvent {
    fn from(event: gossipsub::Event) -> Self {
        BeamEvent::Gossipsub(event)
    }
}

impl From<mdns::Event> for BeamEvent {
    fn from(event: mdns::Event) -> Self {
        BeamEvent::Mdns(event)
    }
}

impl From<identify::Event> for BeamEvent {
    fn from(event: identify::Event) -> Self {
        BeamEvent::Identify(event)
    }
}
