use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::{identify, mdns, SwarmBuilder};
use tracing::info;

use beam_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_PACKET_SIZE, PROTOCOL_VERSION};

use crate::behaviour::BeamBehaviour;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Build a QUIC swarm carrying [`BeamBehaviour`].
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<libp2p::Swarm<BeamBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> Result<BeamBehaviour, BoxError> {
            let local_peer_id = key.public().to_peer_id();

            // Sequence numbers keep identical retransmissions distinct.
            let message_id_fn = |message: &gossipsub::Message| {
                let mut hasher = DefaultHasher::new();
                message.data.hash(&mut hasher);
                message.source.hash(&mut hasher);
                message.sequence_number.hash(&mut hasher);
                MessageId::from(hasher.finish().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_PACKET_SIZE)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| -> BoxError { format!("GossipSub config: {e}").into() })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> BoxError { format!("GossipSub init: {e}").into() })?;

            let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

            let identify_config =
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60));
            let identify = identify::Behaviour::new(identify_config);

            Ok(BeamBehaviour {
                gossipsub,
                mdns,
                identify,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        "Built Beam swarm with QUIC + mDNS"
    );

    Ok(swarm)
}
