//! Contact negotiation over the mesh.
//!
//! On connect each side sends its signed card in a `handshake_request`.
//! Known contacts are accepted automatically; anyone else waits for the user
//! to accept or reject.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beam_shared::{BeamId, Contact, ContactCard, Packet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::error::{ClientError, Result};
use crate::events::NodeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Discovered,
    Connected,
    HandshakeSent,
    Accepted,
    Rejected,
    PendingUserDecision,
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub beam_id: BeamId,
    pub card: ContactCard,
    pub received_at: DateTime<Utc>,
}

pub struct HandshakeProtocol {
    ctx: Arc<NodeContext>,
    peers: Mutex<HashMap<BeamId, PeerState>>,
    /// In arrival order, at most one per peer.
    pending: Mutex<Vec<PendingRequest>>,
}

impl HandshakeProtocol {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            peers: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<BeamId, PeerState>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, peer: &BeamId, state: PeerState) {
        debug!(peer = %peer, ?state, "Handshake state");
        self.peers().insert(peer.clone(), state);
    }

    pub fn peer_state(&self, peer: &BeamId) -> Option<PeerState> {
        self.peers().get(peer).copied()
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.pending().clone()
    }

    fn take_pending(&self, peer: &BeamId) -> Option<PendingRequest> {
        let mut pending = self.pending();
        let pos = pending.iter().position(|p| &p.beam_id == peer)?;
        Some(pending.remove(pos))
    }

    pub fn on_peer_found(&self, peer: &BeamId) {
        self.peers()
            .entry(peer.clone())
            .or_insert(PeerState::Discovered);
    }

    pub fn on_peer_lost(&self, peer: &BeamId) {
        let mut peers = self.peers();
        if peers.get(peer) == Some(&PeerState::Discovered) {
            peers.remove(peer);
        }
    }

    /// A transport connection came up: introduce ourselves.
    pub async fn on_connected(&self, peer: &BeamId) -> Result<()> {
        self.set_state(peer, PeerState::Connected);
        let request = Packet::HandshakeRequest {
            contact_card: self.ctx.my_card()?,
        };
        self.ctx.send_packet(peer, &request).await?;
        self.set_state(peer, PeerState::HandshakeSent);
        Ok(())
    }

    pub fn on_disconnected(&self, peer: &BeamId) {
        self.set_state(peer, PeerState::Discovered);
    }

    /// Checks shared by requests and accepts. `None` means drop the packet.
    fn admit_card(&self, from: &BeamId, card: &ContactCard) -> Option<Contact> {
        let me = self.ctx.beam_id();
        if card.beam_id == me.as_ref() || from == &me {
            debug!(peer = %from, "Ignoring our own handshake echo");
            return None;
        }
        let contact = match Contact::from_card(card) {
            Ok(contact) => contact,
            Err(e) => {
                warn!(peer = %from, error = %e, "Discarding handshake with invalid card");
                return None;
            }
        };
        if &contact.id != from {
            warn!(peer = %from, card = %contact.id, "Handshake card does not match sender");
            return None;
        }
        Some(contact)
    }

    pub async fn handle_request(&self, from: &BeamId, card: &ContactCard) -> Result<()> {
        let Some(contact) = self.admit_card(from, card) else {
            return Ok(());
        };

        if self.ctx.contact(&contact.id)?.is_some() {
            info!(peer = %from, "Handshake from known contact, accepting");
            self.set_state(from, PeerState::Accepted);
            let accept = Packet::HandshakeAccept {
                contact_card: self.ctx.my_card()?,
            };
            return self.ctx.send_packet(from, &accept).await;
        }

        let is_new = {
            let mut pending = self.pending();
            if pending.iter().any(|p| &p.beam_id == from) {
                false
            } else {
                pending.push(PendingRequest {
                    beam_id: contact.id.clone(),
                    card: card.clone(),
                    received_at: Utc::now(),
                });
                true
            }
        };
        self.set_state(from, PeerState::PendingUserDecision);

        if is_new {
            info!(peer = %from, name = %contact.name, "New contact request");
            self.ctx.emit(NodeEvent::ContactRequest {
                beam_id: contact.id,
                display_name: contact.name,
            });
        } else {
            debug!(peer = %from, "Duplicate contact request suppressed");
        }
        Ok(())
    }

    pub async fn handle_accept(&self, from: &BeamId, card: &ContactCard) -> Result<()> {
        let Some(contact) = self.admit_card(from, card) else {
            return Ok(());
        };
        self.set_state(from, PeerState::Accepted);
        // they accepted us, so their own request no longer needs a decision
        self.take_pending(from);

        if self.ctx.contact(&contact.id)?.is_none() {
            self.add_contact(contact)?;
        }
        Ok(())
    }

    pub fn handle_reject(&self, from: &BeamId) {
        info!(peer = %from, "Peer rejected our contact request");
        self.set_state(from, PeerState::Rejected);
        self.ctx.emit(NodeEvent::HandshakeRejected {
            beam_id: from.clone(),
        });
    }

    fn add_contact(&self, contact: Contact) -> Result<Contact> {
        self.ctx.with_db(|db| db.upsert_contact(&contact))?;
        info!(contact = %contact.id, name = %contact.name, "Contact added");
        self.ctx.emit(NodeEvent::ContactAdded {
            beam_id: contact.id.clone(),
            display_name: contact.name.clone(),
        });
        Ok(contact)
    }

    /// User accepted a pending request.
    pub async fn accept_request(&self, peer: &BeamId) -> Result<Contact> {
        let request = self
            .take_pending(peer)
            .ok_or_else(|| ClientError::NoPendingRequest(peer.clone()))?;
        let contact = self.add_contact(Contact::from_card(&request.card)?)?;
        self.set_state(peer, PeerState::Accepted);

        if self.ctx.transport.is_connected(peer) {
            let accept = Packet::HandshakeAccept {
                contact_card: self.ctx.my_card()?,
            };
            if let Err(e) = self.ctx.send_packet(peer, &accept).await {
                warn!(peer = %peer, error = %e, "Failed to send handshake accept");
            }
        }
        Ok(contact)
    }

    pub async fn reject_request(&self, peer: &BeamId) -> Result<()> {
        self.take_pending(peer)
            .ok_or_else(|| ClientError::NoPendingRequest(peer.clone()))?;
        self.set_state(peer, PeerState::Rejected);

        if self.ctx.transport.is_connected(peer) {
            if let Err(e) = self.ctx.send_packet(peer, &Packet::HandshakeReject).await {
                warn!(peer = %peer, error = %e, "Failed to send handshake reject");
            }
        }
        Ok(())
    }

    /// Out-of-band (QR) import of a card string.
    pub fn import_card(&self, json: &str) -> Result<Contact> {
        let card = ContactCard::from_json(json)?;
        let contact = Contact::from_card(&card)?;
        if contact.id == self.ctx.beam_id() {
            return Err(ClientError::OwnCard);
        }
        self.take_pending(&contact.id);
        self.add_contact(contact)
    }

    pub fn forget(&self, peer: &BeamId) {
        self.take_pending(peer);
        self.peers().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::TestNode;

    #[tokio::test]
    async fn test_echo_is_discarded() {
        let mut node = TestNode::new("alice");
        let own_card = node.node.my_card().unwrap();
        let me = node.node.beam_id();

        node.node
            .handshake()
            .handle_request(&me, &own_card)
            .await
            .unwrap();
        assert!(node.node.pending_requests().is_empty());
        assert!(node.node.contacts().unwrap().is_empty());
        assert!(node.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_or_mismatched_card_is_discarded() {
        let mut node = TestNode::new("alice");
        let bob = TestNode::new("bob");
        let carol = TestNode::new("carol");

        let mut forged = bob.node.my_card().unwrap();
        forged.display_name = "mallory".into();
        node.node
            .handshake()
            .handle_request(&bob.node.beam_id(), &forged)
            .await
            .unwrap();

        // valid card, but not the sender's
        node.node
            .handshake()
            .handle_request(&bob.node.beam_id(), &carol.node.my_card().unwrap())
            .await
            .unwrap();

        assert!(node.node.pending_requests().is_empty());
        assert!(node.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_request_suppressed() {
        let mut node = TestNode::new("alice");
        let bob = TestNode::new("bob");
        let card = bob.node.my_card().unwrap();
        let bob_id = bob.node.beam_id();

        for _ in 0..2 {
            node.node
                .handshake()
                .handle_request(&bob_id, &card)
                .await
                .unwrap();
        }

        assert_eq!(node.node.pending_requests().len(), 1);
        assert_eq!(
            node.drain_events(),
            vec![NodeEvent::ContactRequest {
                beam_id: bob_id.clone(),
                display_name: "bob".into(),
            }]
        );
        assert_eq!(
            node.node.handshake().peer_state(&bob_id),
            Some(PeerState::PendingUserDecision)
        );
    }

    #[tokio::test]
    async fn test_accept_and_reject_requests() {
        let mut node = TestNode::new("alice");
        let bob = TestNode::new("bob");
        let carol = TestNode::new("carol");
        let hs = node.node.handshake();

        hs.handle_request(&bob.node.beam_id(), &bob.node.my_card().unwrap())
            .await
            .unwrap();
        hs.handle_request(&carol.node.beam_id(), &carol.node.my_card().unwrap())
            .await
            .unwrap();

        let contact = node.node.accept_request(&bob.node.beam_id()).await.unwrap();
        assert_eq!(contact.name, "bob");
        node.node.reject_request(&carol.node.beam_id()).await.unwrap();

        assert!(node.node.pending_requests().is_empty());
        let contacts = node.node.contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, bob.node.beam_id());
        assert_eq!(
            hs.peer_state(&carol.node.beam_id()),
            Some(PeerState::Rejected)
        );
        assert!(matches!(
            node.node.accept_request(&carol.node.beam_id()).await,
            Err(ClientError::NoPendingRequest(_))
        ));
        assert!(node
            .drain_events()
            .contains(&NodeEvent::ContactAdded {
                beam_id: bob.node.beam_id(),
                display_name: "bob".into(),
            }));
    }

    #[tokio::test]
    async fn test_accept_materializes_contact_once() {
        let mut node = TestNode::new("alice");
        let bob = TestNode::new("bob");
        let card = bob.node.my_card().unwrap();

        node.node
            .handshake()
            .handle_accept(&bob.node.beam_id(), &card)
            .await
            .unwrap();
        node.node
            .handshake()
            .handle_accept(&bob.node.beam_id(), &card)
            .await
            .unwrap();

        assert_eq!(node.node.contacts().unwrap().len(), 1);
        let added = node
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, NodeEvent::ContactAdded { .. }))
            .count();
        assert_eq!(added, 1);
    }

    #[test]
    fn test_import_own_card_refused() {
        let node = TestNode::new("alice");
        let json = node.node.my_card().unwrap().to_json().unwrap();
        assert!(matches!(node.node.import_card(&json), Err(ClientError::OwnCard)));
        assert!(node.node.import_card("{not json").is_err());
    }
}
