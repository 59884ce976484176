//! Events the node reports to whatever sits on top of it (the stdin daemon,
//! a GUI, tests).

use beam_shared::BeamId;
use beam_store::MessageStatus;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    /// Stored keys were lost or replaced; every contact must re-pair.
    IdentityRegenerated { beam_id: BeamId },
    PeerConnected { beam_id: BeamId },
    PeerDisconnected { beam_id: BeamId },
    /// An unknown peer wants to become a contact.
    ContactRequest { beam_id: BeamId, display_name: String },
    ContactAdded { beam_id: BeamId, display_name: String },
    HandshakeRejected { beam_id: BeamId },
    MessageReceived {
        contact_id: BeamId,
        message_id: Uuid,
        text: String,
        encrypted: bool,
    },
    MessageStatusChanged {
        contact_id: BeamId,
        message_id: Uuid,
        status: MessageStatus,
    },
}

pub type EventSender = mpsc::UnboundedSender<NodeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<NodeEvent>;

pub fn emit_event(events: &EventSender, event: NodeEvent) {
    if let Err(e) = events.send(event) {
        tracing::debug!(event = ?e.0, "No listener for node event");
    }
}
