//! The node context: identity, storage, sessions, transport and the two
//! protocol halves wired together, plus the loop that feeds transport
//! events into them.

use std::sync::Arc;

use beam_net::{MeshTransport, TransportEvent};
use beam_shared::{BeamId, Contact, ContactCard, Identity, Packet};
use beam_store::{Database, IdentityStatus, IdentityStore, Message, SecretStore, SessionStore};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::context::NodeContext;
use crate::delivery::DeliveryCoordinator;
use crate::error::Result;
use crate::events::{EventReceiver, NodeEvent};
use crate::handshake::{HandshakeProtocol, PendingRequest};
use crate::sessions::SessionManager;

pub struct BeamNode {
    ctx: Arc<NodeContext>,
    handshake: HandshakeProtocol,
    delivery: DeliveryCoordinator,
}

impl BeamNode {
    /// Wire a node together. `identity` and `status` come from
    /// [`IdentityStore::open`] over the same `secrets`.
    pub fn new(
        config: NodeConfig,
        identity: IdentityStore,
        status: IdentityStatus,
        secrets: Arc<dyn SecretStore>,
        database: Database,
        transport: Arc<dyn MeshTransport>,
    ) -> (Arc<Self>, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sessions = SessionManager::new(SessionStore::new(secrets));
        let ctx = Arc::new(NodeContext::new(
            config, identity, sessions, database, transport, events_tx,
        ));

        if status == IdentityStatus::Regenerated {
            warn!("Identity was regenerated, contacts must re-pair");
            ctx.emit(NodeEvent::IdentityRegenerated {
                beam_id: ctx.beam_id(),
            });
        }

        let node = Arc::new(Self {
            handshake: HandshakeProtocol::new(ctx.clone()),
            delivery: DeliveryCoordinator::new(ctx.clone()),
            ctx,
        });
        (node, events_rx)
    }

    pub fn beam_id(&self) -> BeamId {
        self.ctx.beam_id()
    }

    pub fn identity(&self) -> Arc<Identity> {
        self.ctx.identity()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.ctx.config
    }

    pub fn handshake(&self) -> &HandshakeProtocol {
        &self.handshake
    }

    pub fn delivery(&self) -> &DeliveryCoordinator {
        &self.delivery
    }

    // -- Profile and identity --

    pub fn my_card(&self) -> Result<ContactCard> {
        self.ctx.my_card()
    }

    pub fn my_card_json(&self) -> Result<String> {
        Ok(self.my_card()?.to_json()?)
    }

    pub fn set_display_name(&self, name: &str) -> Result<()> {
        self.ctx.with_db(|db| db.set_display_name(name))?;
        Ok(())
    }

    /// Replace this device's identity. Every session is dropped and every
    /// contact has to re-pair with the new card.
    pub fn rekey(&self) -> BeamId {
        let identity = self.ctx.identity.rekey();
        self.ctx.sessions.forget_all();
        identity.beam_id().clone()
    }

    // -- Contacts --

    pub fn import_card(&self, json: &str) -> Result<Contact> {
        self.handshake.import_card(json)
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.handshake.pending_requests()
    }

    pub async fn accept_request(&self, peer: &BeamId) -> Result<Contact> {
        self.handshake.accept_request(peer).await
    }

    pub async fn reject_request(&self, peer: &BeamId) -> Result<()> {
        self.handshake.reject_request(peer).await
    }

    pub fn contacts(&self) -> Result<Vec<Contact>> {
        self.ctx.with_db(|db| db.list_contacts())
    }

    pub fn rename_contact(&self, id: &BeamId, name: &str) -> Result<()> {
        self.ctx.with_db(|db| db.rename_contact(id, name))
    }

    pub fn set_contact_muted(&self, id: &BeamId, muted: bool) -> Result<()> {
        self.ctx.with_db(|db| db.set_contact_muted(id, muted))
    }

    /// Delete a contact together with its session, history and queue.
    pub async fn delete_contact(&self, id: &BeamId) -> Result<bool> {
        self.ctx.sessions.remove(id).await?;
        let dropped = self.delivery.forget(id);
        self.handshake.forget(id);
        let existed = self.ctx.with_db(|db| {
            db.delete_messages_for_contact(id)?;
            db.delete_contact(id)
        })?;
        info!(contact = %id, dropped, "Contact deleted");
        Ok(existed)
    }

    // -- Messages --

    pub async fn send_message(&self, to: &BeamId, text: &str) -> Result<Message> {
        self.delivery.send(to, text).await
    }

    pub async fn send_stateless(&self, to: &BeamId, text: &str) -> Result<Message> {
        self.delivery.send_stateless(to, text).await
    }

    pub async fn send_plaintext(&self, to: &BeamId, text: &str) -> Result<Message> {
        self.delivery.send_plaintext(to, text).await
    }

    pub fn messages(&self, contact: &BeamId, limit: u32, offset: u32) -> Result<Vec<Message>> {
        self.ctx
            .with_db(|db| db.get_messages_for_contact(contact, limit, offset))
    }

    pub fn mark_read(&self, contact: &BeamId) -> Result<usize> {
        self.ctx.with_db(|db| db.mark_conversation_read(contact))
    }

    pub fn unread_count(&self, contact: &BeamId) -> Result<usize> {
        self.ctx.with_db(|db| db.unread_count(contact))
    }

    pub fn last_message(&self, contact: &BeamId) -> Result<Option<Message>> {
        self.ctx.with_db(|db| db.last_message(contact))
    }

    /// Delete one message. A queued outbound copy is dropped too, so it is
    /// never sent.
    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let Some(message) = self.ctx.with_db(|db| db.get_message(id))? else {
            return Ok(false);
        };
        if self.delivery.queue().discard(&message.contact_id, id) {
            debug!(id = %id, "Dropped queued copy of deleted message");
        }
        self.ctx.with_db(|db| db.delete_message(id))
    }

    pub async fn reset_session(&self, contact: &BeamId) -> Result<()> {
        self.ctx.sessions.reset(contact).await
    }

    pub fn connected_peers(&self) -> Vec<BeamId> {
        self.ctx.transport.connected_peers()
    }

    pub fn queued_for(&self, contact: &BeamId) -> usize {
        self.delivery.queue().len(contact)
    }

    // -- Transport events --

    /// Consume transport events until the transport goes away.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        info!(beam_id = %self.beam_id(), "Node event loop started");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Transport closed, node event loop terminated");
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerFound(peer) => self.handshake.on_peer_found(&peer),
            TransportEvent::PeerLost(peer) => self.handshake.on_peer_lost(&peer),
            TransportEvent::Connected(peer) => {
                self.ctx.emit(NodeEvent::PeerConnected {
                    beam_id: peer.clone(),
                });
                if let Err(e) = self.handshake.on_connected(&peer).await {
                    warn!(peer = %peer, error = %e, "Handshake request failed");
                }
                let delivered = self.delivery.flush(&peer).await;
                if delivered > 0 {
                    info!(peer = %peer, delivered, "Offline queue flushed");
                }
            }
            TransportEvent::Disconnected(peer) => {
                self.handshake.on_disconnected(&peer);
                self.ctx.emit(NodeEvent::PeerDisconnected { beam_id: peer });
            }
            TransportEvent::Received { from, data } => {
                if let Err(e) = self.handle_packet(&from, &data).await {
                    warn!(peer = %from, error = %e, "Failed to handle packet");
                }
            }
        }
    }

    async fn handle_packet(&self, from: &BeamId, data: &[u8]) -> Result<()> {
        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(peer = %from, error = %e, "Dropping unparsable packet");
                return Ok(());
            }
        };
        debug!(peer = %from, kind = packet.kind(), "Packet received");

        match &packet {
            Packet::HandshakeRequest { contact_card } => {
                self.handshake.handle_request(from, contact_card).await
            }
            Packet::HandshakeAccept { contact_card } => {
                self.handshake.handle_accept(from, contact_card).await
            }
            Packet::HandshakeReject => {
                self.handshake.handle_reject(from);
                Ok(())
            }
            Packet::Message { .. } => self.delivery.handle_message(from, &packet).await.map(drop),
            Packet::PlaintextMessage { .. } => {
                self.delivery.handle_plaintext(from, &packet).map(drop)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use beam_net::{MemoryMesh, MemoryTransport};
    use beam_store::MemorySecretStore;

    pub struct TestNode {
        pub node: Arc<BeamNode>,
        pub events: EventReceiver,
        pub transport_events: mpsc::Receiver<TransportEvent>,
    }

    impl TestNode {
        pub fn new(name: &str) -> Self {
            Self::on(&MemoryMesh::new(), name, NodeConfig::default())
        }

        pub fn on(mesh: &MemoryMesh, name: &str, mut config: NodeConfig) -> Self {
            config.display_name = name.to_string();
            let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
            let (identity, status) = IdentityStore::open(secrets.clone());
            let (transport, transport_events): (MemoryTransport, _) =
                mesh.join(identity.public_id());
            let database = Database::open_in_memory().unwrap();
            let (node, events) = BeamNode::new(
                config,
                identity,
                status,
                secrets,
                database,
                Arc::new(transport),
            );
            Self {
                node,
                events,
                transport_events,
            }
        }

        pub fn drain_events(&mut self) -> Vec<NodeEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// Feed every transport event queued so far into the node.
        pub async fn pump(&mut self) -> usize {
            let mut handled = 0;
            while let Ok(event) = self.transport_events.try_recv() {
                self.node.handle_event(event).await;
                handled += 1;
            }
            handled
        }
    }
}
