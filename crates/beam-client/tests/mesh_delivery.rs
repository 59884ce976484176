//! Two nodes talking over an in-process mesh.

use std::sync::Arc;

use beam_client::{BeamNode, EventReceiver, NodeConfig, NodeEvent, PeerState};
use beam_net::{MemoryMesh, TransportEvent};
use beam_shared::BeamId;
use beam_store::{Database, Direction, IdentityStore, MemorySecretStore, MessageStatus, SecretStore};
use tokio::sync::mpsc;

struct TestNode {
    node: Arc<BeamNode>,
    events: EventReceiver,
    inbox: mpsc::Receiver<TransportEvent>,
}

impl TestNode {
    fn join(mesh: &MemoryMesh, name: &str) -> Self {
        let config = NodeConfig {
            display_name: name.to_string(),
            ..NodeConfig::default()
        };
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let (identity, status) = IdentityStore::open(secrets.clone());
        let (transport, inbox) = mesh.join(identity.public_id());
        let (node, events) = BeamNode::new(
            config,
            identity,
            status,
            secrets,
            Database::open_in_memory().unwrap(),
            Arc::new(transport),
        );
        Self {
            node,
            events,
            inbox,
        }
    }

    fn id(&self) -> BeamId {
        self.node.beam_id()
    }

    async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.node.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Raw transport events waiting for this node, without handling them.
    fn take_inbox(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.inbox.try_recv() {
            out.push(event);
        }
        out
    }

    fn drain_events(&mut self) -> Vec<NodeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn received_texts(&mut self) -> Vec<String> {
        self.drain_events()
            .into_iter()
            .filter_map(|e| match e {
                NodeEvent::MessageReceived { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn statuses(&self, peer: &BeamId) -> Vec<(String, MessageStatus)> {
        let mut messages = self.node.messages(peer, 100, 0).unwrap();
        messages.reverse();
        messages
            .into_iter()
            .filter(|m| m.direction == Direction::Sent)
            .map(|m| (m.plaintext, m.status))
            .collect()
    }
}

async fn settle(a: &mut TestNode, b: &mut TestNode) {
    while a.pump().await + b.pump().await > 0 {}
}

/// Two nodes that already hold each other's cards, connected and idle.
async fn paired(mesh: &MemoryMesh) -> (TestNode, TestNode) {
    let mut a = TestNode::join(mesh, "alice");
    let mut b = TestNode::join(mesh, "bob");
    a.node.import_card(&b.node.my_card_json().unwrap()).unwrap();
    b.node.import_card(&a.node.my_card_json().unwrap()).unwrap();

    mesh.connect(&a.id(), &b.id());
    settle(&mut a, &mut b).await;
    a.drain_events();
    b.drain_events();
    (a, b)
}

#[tokio::test]
async fn out_of_order_messages_all_decrypt() {
    let mesh = MemoryMesh::new();
    let (mut a, mut b) = paired(&mesh).await;
    assert_eq!(a.node.handshake().peer_state(&b.id()), Some(PeerState::Accepted));
    assert_eq!(b.node.handshake().peer_state(&a.id()), Some(PeerState::Accepted));

    let hi = a.node.send_message(&b.id(), "hi").await.unwrap();
    let there = a.node.send_message(&b.id(), "there").await.unwrap();
    assert_eq!(hi.status, MessageStatus::Delivered);
    assert_eq!(there.status, MessageStatus::Delivered);

    let status_changes: Vec<_> = a
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            NodeEvent::MessageStatusChanged { message_id, status, .. } => Some((message_id, status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        status_changes,
        vec![(hi.id, MessageStatus::Delivered), (there.id, MessageStatus::Delivered)]
    );

    // deliver index 1 before index 0
    let mut packets = b.take_inbox();
    assert_eq!(packets.len(), 2);
    packets.reverse();
    let replayed = packets[1].clone();
    for event in packets {
        b.node.handle_event(event).await;
    }
    assert_eq!(b.received_texts(), vec!["there", "hi"]);

    // the same packet again is a replay and is dropped
    b.node.handle_event(replayed).await;
    assert!(b.received_texts().is_empty());

    let history = b.node.messages(&a.id(), 10, 0).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|m| m.direction == Direction::Received && m.encrypted && !m.read));
}

#[tokio::test]
async fn offline_queue_flushes_in_order_and_requeues_on_failure() {
    let mesh = MemoryMesh::new();
    let (mut a, mut b) = paired(&mesh).await;

    mesh.disconnect(&a.id(), &b.id());
    settle(&mut a, &mut b).await;

    for text in ["one", "two", "three"] {
        let message = a.node.send_message(&b.id(), text).await.unwrap();
        assert_eq!(message.status, MessageStatus::Sending);
    }
    assert_eq!(a.node.queued_for(&b.id()), 3);

    // the handshake request and "one" get through, then sends fail
    mesh.fail_sends_after(&b.id(), 2);
    mesh.connect(&a.id(), &b.id());
    settle(&mut a, &mut b).await;

    assert_eq!(a.node.queued_for(&b.id()), 2);
    assert_eq!(b.received_texts(), vec!["one"]);
    assert_eq!(
        a.statuses(&b.id()),
        vec![
            ("one".to_string(), MessageStatus::Delivered),
            ("two".to_string(), MessageStatus::Sending),
            ("three".to_string(), MessageStatus::Sending),
        ]
    );

    mesh.clear_send_failures(&b.id());
    mesh.disconnect(&a.id(), &b.id());
    mesh.connect(&a.id(), &b.id());
    settle(&mut a, &mut b).await;

    assert_eq!(a.node.queued_for(&b.id()), 0);
    assert_eq!(b.received_texts(), vec!["two", "three"]);
    assert!(a
        .statuses(&b.id())
        .iter()
        .all(|(_, status)| *status == MessageStatus::Delivered));
}

#[tokio::test]
async fn new_message_does_not_overtake_queued_ones() {
    let mesh = MemoryMesh::new();
    let (mut a, mut b) = paired(&mesh).await;

    // connected, but the first send fails and stays queued
    mesh.fail_sends_after(&b.id(), 0);
    let one = a.node.send_message(&b.id(), "one").await.unwrap();
    assert_eq!(one.status, MessageStatus::Sending);
    assert_eq!(a.node.queued_for(&b.id()), 1);

    mesh.clear_send_failures(&b.id());
    let two = a.node.send_message(&b.id(), "two").await.unwrap();
    assert_eq!(two.status, MessageStatus::Delivered);
    assert_eq!(a.node.queued_for(&b.id()), 0);

    settle(&mut a, &mut b).await;
    assert_eq!(b.received_texts(), vec!["one", "two"]);
    assert_eq!(
        a.statuses(&b.id()),
        vec![
            ("one".to_string(), MessageStatus::Delivered),
            ("two".to_string(), MessageStatus::Delivered),
        ]
    );
}

#[tokio::test]
async fn known_contact_is_auto_accepted() {
    let mesh = MemoryMesh::new();
    let mut a = TestNode::join(&mesh, "alice");
    let mut b = TestNode::join(&mesh, "bob");
    // only alice has bob's card
    a.node.import_card(&b.node.my_card_json().unwrap()).unwrap();

    mesh.connect(&a.id(), &b.id());
    settle(&mut a, &mut b).await;

    // bob saw alice's request, then her automatic accept added her
    assert_eq!(a.node.handshake().peer_state(&b.id()), Some(PeerState::Accepted));
    assert!(b.node.pending_requests().is_empty());
    let bob_contacts = b.node.contacts().unwrap();
    assert_eq!(bob_contacts.len(), 1);
    assert_eq!(bob_contacts[0].id, a.id());
    assert_eq!(bob_contacts[0].name, "alice");

    let events = b.drain_events();
    assert!(events.contains(&NodeEvent::ContactRequest {
        beam_id: a.id(),
        display_name: "alice".into(),
    }));
    assert!(events.contains(&NodeEvent::ContactAdded {
        beam_id: a.id(),
        display_name: "alice".into(),
    }));

    // and the pair can talk straight away
    a.node.send_message(&b.id(), "welcome").await.unwrap();
    settle(&mut a, &mut b).await;
    assert_eq!(b.received_texts(), vec!["welcome"]);
}

#[tokio::test]
async fn messages_from_strangers_are_dropped() {
    let mesh = MemoryMesh::new();
    let mut a = TestNode::join(&mesh, "alice");
    let mut b = TestNode::join(&mesh, "bob");
    // bob trusts alice, alice never accepted bob
    b.node.import_card(&a.node.my_card_json().unwrap()).unwrap();

    mesh.connect(&a.id(), &b.id());
    settle(&mut a, &mut b).await;
    a.drain_events();

    // bob's accept made alice add him; remove him again before he writes
    a.node.delete_contact(&b.id()).await.unwrap();

    b.node.send_message(&a.id(), "psst").await.unwrap();
    settle(&mut a, &mut b).await;
    assert!(a.received_texts().is_empty());
    assert!(a.node.messages(&b.id(), 10, 0).unwrap().is_empty());
}
