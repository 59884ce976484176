//! libp2p-backed [`MeshTransport`].
//!
//! The swarm runs in a dedicated tokio task. [`Libp2pMesh`] talks to it over
//! a command channel and reads connection state from a shared
//! [`PeerTracker`]; everything the swarm observes is translated into
//! [`TransportEvent`]s keyed by Beam ID.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use libp2p::identity::Keypair;
use libp2p::{gossipsub, identify, mdns, swarm::SwarmEvent, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use beam_shared::constants::{DEFAULT_QUIC_PORT, INBOX_TOPIC_PREFIX};
use beam_shared::{BeamId, Identity};

use crate::behaviour::{BeamBehaviour, BeamEvent};
use crate::mesh::{MeshTransport, TransportError, TransportEvent};
use crate::peers::{beam_id_for_key, beam_id_for_peer, PeerTracker};
use crate::transport::build_swarm;

const COMMAND_QUEUE_DEPTH: usize = 256;
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Commands sent *into* the swarm task.
#[derive(Debug)]
enum SwarmCommand {
    Dial(Multiaddr),
    /// Publish on the recipient's inbox topic.
    Publish {
        to: BeamId,
        data: Bytes,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown,
}

pub struct MeshConfig {
    /// UDP port for QUIC (defaults to `DEFAULT_QUIC_PORT`).
    pub listen_port: u16,
    /// Additional multiaddrs to dial on startup.
    pub extra_dials: Vec<Multiaddr>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            extra_dials: Vec::new(),
        }
    }
}

/// Gossipsub topic a device listens on for packets addressed to it.
pub fn inbox_topic(beam_id: &BeamId) -> gossipsub::IdentTopic {
    gossipsub::IdentTopic::new(format!("{INBOX_TOPIC_PREFIX}{beam_id}"))
}

/// Handle to the running swarm.
#[derive(Clone)]
pub struct Libp2pMesh {
    commands: mpsc::Sender<SwarmCommand>,
    tracker: Arc<RwLock<PeerTracker>>,
    local_peer_id: PeerId,
}

impl Libp2pMesh {
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub async fn dial(&self, addr: Multiaddr) -> Result<(), TransportError> {
        self.commands
            .send(SwarmCommand::Dial(addr))
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SwarmCommand::Shutdown).await;
    }

    fn tracker(&self) -> RwLockReadGuard<'_, PeerTracker> {
        self.tracker.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MeshTransport for Libp2pMesh {
    async fn send(&self, peer: &BeamId, data: Bytes) -> Result<(), TransportError> {
        if !self.is_connected(peer) {
            return Err(TransportError::NotConnected(peer.clone()));
        }
        let (reply, result) = oneshot::channel();
        self.commands
            .send(SwarmCommand::Publish {
                to: peer.clone(),
                data,
                reply,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        result.await.map_err(|_| TransportError::Closed)?
    }

    fn is_connected(&self, peer: &BeamId) -> bool {
        self.tracker().is_connected(peer)
    }

    fn connected_peers(&self) -> Vec<BeamId> {
        self.tracker().connected_beam_ids()
    }
}

/// Start the swarm for `identity` in a background task.
///
/// The libp2p keypair is the identity's Ed25519 signing key, so a peer's
/// Beam ID follows from its `PeerId`.
pub async fn spawn_mesh(
    identity: &Identity,
    config: MeshConfig,
) -> anyhow::Result<(Libp2pMesh, mpsc::Receiver<TransportEvent>)> {
    // ed25519_from_bytes zeroizes the buffer it is given
    let mut secret = *identity.signing_secret_bytes();
    let keypair = Keypair::ed25519_from_bytes(&mut secret)?;

    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_v4: Multiaddr = format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port).parse()?;
    let listen_v6: Multiaddr = format!("/ip6/::/udp/{}/quic-v1", config.listen_port).parse()?;
    swarm.listen_on(listen_v4)?;
    if let Err(e) = swarm.listen_on(listen_v6) {
        warn!(error = %e, "IPv6 listen unavailable");
    }

    let inbox = inbox_topic(identity.beam_id());
    swarm.behaviour_mut().gossipsub.subscribe(&inbox)?;

    info!(
        peer_id = %local_peer_id,
        beam_id = %identity.beam_id(),
        port = config.listen_port,
        "Mesh listening"
    );

    for addr in &config.extra_dials {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial extra address");
        }
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let tracker = Arc::new(RwLock::new(PeerTracker::new()));

    let event_loop = EventLoop {
        swarm,
        tracker: tracker.clone(),
        events: event_tx,
        inbox_hash: inbox.hash(),
    };
    tokio::spawn(event_loop.run(cmd_rx));

    let mesh = Libp2pMesh {
        commands: cmd_tx,
        tracker,
        local_peer_id,
    };
    Ok((mesh, event_rx))
}

struct EventLoop {
    swarm: libp2p::Swarm<BeamBehaviour>,
    tracker: Arc<RwLock<PeerTracker>>,
    events: mpsc::Sender<TransportEvent>,
    inbox_hash: gossipsub::TopicHash,
}

impl EventLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<SwarmCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(SwarmCommand::Dial(addr)) => {
                        if let Err(e) = self.swarm.dial(addr.clone()) {
                            error!(addr = %addr, error = %e, "Dial failed");
                        }
                    }
                    Some(SwarmCommand::Publish { to, data, reply }) => {
                        let result = self
                            .swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(inbox_topic(&to), data.to_vec())
                            .map(|_| ())
                            .map_err(|e| TransportError::SendFailed(e.to_string()));
                        if let Err(e) = &result {
                            debug!(peer = %to, error = %e, "Publish failed");
                        }
                        let _ = reply.send(result);
                    }
                    Some(SwarmCommand::Shutdown) => {
                        info!("Mesh shutdown requested");
                        break;
                    }
                    None => {
                        info!("Command channel closed, shutting down mesh");
                        break;
                    }
                },
                event = self.swarm.select_next_some() => self.handle(event).await,
            }
        }
        info!("Mesh event loop terminated");
    }

    fn tracker_mut(&self) -> std::sync::RwLockWriteGuard<'_, PeerTracker> {
        self.tracker.write().unwrap_or_else(PoisonError::into_inner)
    }

    // The swarm is not `Sync`, so no `&self` may live across this await.
    async fn emit(&mut self, event: TransportEvent) {
        let events = self.events.clone();
        if events.send(event).await.is_err() {
            debug!("Transport event receiver dropped");
        }
    }

    fn announce_reachable(&self, beam_id: Option<BeamId>) -> Option<TransportEvent> {
        let beam_id = beam_id?;
        info!(beam_id = %beam_id, "Peer connected");
        Some(TransportEvent::Connected(beam_id))
    }

    async fn handle(&mut self, event: SwarmEvent<BeamEvent>) {
        match event {
            SwarmEvent::Behaviour(BeamEvent::Mdns(mdns::Event::Discovered(found))) => {
                let mut seen = HashSet::new();
                for (peer_id, addr) in found {
                    let Some(beam_id) = beam_id_for_peer(&peer_id) else {
                        debug!(peer = %peer_id, "Ignoring non-Ed25519 peer");
                        continue;
                    };
                    self.swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    if !self.swarm.is_connected(&peer_id) {
                        if let Err(e) = self.swarm.dial(addr.clone()) {
                            debug!(addr = %addr, error = %e, "mDNS dial failed");
                        }
                    }
                    if seen.insert(peer_id) {
                        debug!(peer = %peer_id, beam_id = %beam_id, "mDNS discovered peer");
                        self.emit(TransportEvent::PeerFound(beam_id)).await;
                    }
                }
            }

            SwarmEvent::Behaviour(BeamEvent::Mdns(mdns::Event::Expired(expired))) => {
                let mut seen = HashSet::new();
                for (peer_id, _) in expired {
                    if !seen.insert(peer_id) {
                        continue;
                    }
                    self.swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                    if let Some(beam_id) = beam_id_for_peer(&peer_id) {
                        self.emit(TransportEvent::PeerLost(beam_id)).await;
                    }
                }
            }

            SwarmEvent::Behaviour(BeamEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                let Some(beam_id) = beam_id_for_key(&info.public_key) else {
                    warn!(peer = %peer_id, "Peer identified with a non-Ed25519 key");
                    return;
                };
                debug!(
                    peer = %peer_id,
                    beam_id = %beam_id,
                    protocol = %info.protocol_version,
                    "Identify: received info from peer"
                );
                let ready = self.tracker_mut().on_identified(&peer_id, beam_id);
                if let Some(event) = self.announce_reachable(ready) {
                    self.emit(event).await;
                }
            }

            SwarmEvent::Behaviour(BeamEvent::Gossipsub(gossipsub::Event::Subscribed {
                peer_id,
                topic,
            })) => {
                // publishes to a peer only succeed once it listens on its inbox
                let Some(beam_id) = beam_id_for_peer(&peer_id) else {
                    return;
                };
                if topic != inbox_topic(&beam_id).hash() {
                    return;
                }
                debug!(peer = %peer_id, beam_id = %beam_id, "Peer subscribed to its inbox");
                let ready = self.tracker_mut().on_inbox_subscribed(&peer_id);
                if let Some(event) = self.announce_reachable(ready) {
                    self.emit(event).await;
                }
            }

            SwarmEvent::Behaviour(BeamEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                if message.topic != self.inbox_hash {
                    return;
                }
                let Some(from) = message.source.as_ref().and_then(beam_id_for_peer) else {
                    warn!("Dropping inbox message without an Ed25519 source");
                    return;
                };
                debug!(from = %from, len = message.data.len(), "Inbox message received");
                self.emit(TransportEvent::Received {
                    from,
                    data: Bytes::from(message.data),
                })
                .await;
            }

            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                let addr = endpoint.get_remote_address().clone();
                debug!(peer = %peer_id, addr = %addr, "Connection established");
                self.tracker_mut().on_connected(peer_id, addr);
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    let beam_id = self.tracker_mut().on_disconnected(&peer_id);
                    if let Some(beam_id) = beam_id {
                        info!(beam_id = %beam_id, "Peer disconnected");
                        self.emit(TransportEvent::Disconnected(beam_id)).await;
                    }
                }
            }

            SwarmEvent::NewListenAddr { address, .. } => {
                info!(addr = %address, "Listening on new address");
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
            }

            SwarmEvent::IncomingConnectionError { error, .. } => {
                warn!(error = %error, "Incoming connection error");
            }

            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_topic_is_per_device() {
        let a = BeamId::derive(&[1u8; 32]);
        let b = BeamId::derive(&[2u8; 32]);
        assert_eq!(inbox_topic(&a).to_string(), format!("beam/inbox/{a}"));
        assert_ne!(inbox_topic(&a).hash(), inbox_topic(&b).hash());
    }

    #[tokio::test]
    async fn event_loop_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}

        let swarm = build_swarm(Keypair::generate_ed25519()).unwrap();
        let (events, _events_rx) = mpsc::channel(1);
        let (_commands, commands_rx) = mpsc::channel(1);
        let event_loop = EventLoop {
            swarm,
            tracker: Arc::default(),
            events,
            inbox_hash: inbox_topic(&BeamId::derive(&[1u8; 32])).hash(),
        };
        let run = event_loop.run(commands_rx);
        assert_send(&run);
    }

    #[tokio::test]
    async fn unconnected_send_is_rejected() {
        let identity = Identity::generate();
        let (mesh, _events) = spawn_mesh(
            &identity,
            MeshConfig {
                listen_port: 0,
                extra_dials: Vec::new(),
            },
        )
        .await
        .unwrap();

        let stranger = BeamId::derive(&[3u8; 32]);
        assert_eq!(
            mesh.send(&stranger, Bytes::from_static(b"x")).await,
            Err(TransportError::NotConnected(stranger))
        );
        assert!(mesh.connected_peers().is_empty());
        mesh.shutdown().await;
    }
}
