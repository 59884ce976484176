//! Outbound routing, offline buffering and inbound message handling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beam_shared::envelope;
use beam_shared::protocol::seconds_to_millis;
use beam_shared::{BeamId, EncryptionMode, Packet};
use beam_store::{Direction, Message, MessageStatus, StoreError};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::NodeContext;
use crate::error::{ClientError, Result};
use crate::events::NodeEvent;

/// A serialized packet waiting for its recipient to come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    pub message_id: Uuid,
    pub data: Bytes,
}

/// Per-recipient FIFO of undelivered packets.
#[derive(Default)]
pub struct OfflineQueue {
    queues: Mutex<HashMap<BeamId, VecDeque<QueuedPacket>>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<BeamId, VecDeque<QueuedPacket>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, peer: &BeamId, packet: QueuedPacket) {
        self.queues()
            .entry(peer.clone())
            .or_default()
            .push_back(packet);
    }

    /// Take everything queued for `peer`, leaving its queue empty.
    pub fn drain(&self, peer: &BeamId) -> Vec<QueuedPacket> {
        self.queues()
            .remove(peer)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Put `packets` back ahead of anything queued since the drain.
    pub fn requeue_front(&self, peer: &BeamId, packets: Vec<QueuedPacket>) {
        if packets.is_empty() {
            return;
        }
        let mut queues = self.queues();
        let queue = queues.entry(peer.clone()).or_default();
        for packet in packets.into_iter().rev() {
            queue.push_front(packet);
        }
    }

    pub fn contains(&self, peer: &BeamId, message_id: Uuid) -> bool {
        self.queues()
            .get(peer)
            .is_some_and(|q| q.iter().any(|p| p.message_id == message_id))
    }

    /// Drop one packet that has not gone out yet.
    pub fn discard(&self, peer: &BeamId, message_id: Uuid) -> bool {
        let mut queues = self.queues();
        let Some(queue) = queues.get_mut(peer) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|p| p.message_id != message_id);
        before != queue.len()
    }

    pub fn len(&self, peer: &BeamId) -> usize {
        self.queues().get(peer).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, peer: &BeamId) -> bool {
        self.len(peer) == 0
    }

    pub fn remove(&self, peer: &BeamId) -> usize {
        self.queues().remove(peer).map_or(0, |q| q.len())
    }
}

/// Outbound sends to one peer, queued or direct, happen one at a time.
type OutboundSlot = Arc<AsyncMutex<()>>;

pub struct DeliveryCoordinator {
    ctx: Arc<NodeContext>,
    queue: OfflineQueue,
    outbound: Mutex<HashMap<BeamId, OutboundSlot>>,
}

impl DeliveryCoordinator {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            queue: OfflineQueue::new(),
            outbound: Mutex::new(HashMap::new()),
        }
    }

    fn outbound_slot(&self, peer: &BeamId) -> OutboundSlot {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(peer.clone())
            .or_default()
            .clone()
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    fn set_status(&self, message: &mut Message, status: MessageStatus) -> Result<()> {
        self.ctx
            .with_db(|db| db.update_message_status(message.id, status))?;
        message.status = status;
        self.ctx.emit(NodeEvent::MessageStatusChanged {
            contact_id: message.contact_id.clone(),
            message_id: message.id,
            status,
        });
        Ok(())
    }

    /// Encrypt `text` for `contact_id` and deliver it now or queue it.
    pub async fn send(&self, contact_id: &BeamId, text: &str) -> Result<Message> {
        self.send_encrypted(contact_id, text, EncryptionMode::Ratchet)
            .await
    }

    /// Bootstrap path without a ratchet; only when the node allows it.
    pub async fn send_stateless(&self, contact_id: &BeamId, text: &str) -> Result<Message> {
        if !self.ctx.config.allow_stateless {
            return Err(ClientError::StatelessDisabled);
        }
        self.send_encrypted(contact_id, text, EncryptionMode::Stateless)
            .await
    }

    async fn send_encrypted(
        &self,
        contact_id: &BeamId,
        text: &str,
        mode: EncryptionMode,
    ) -> Result<Message> {
        let contact = self
            .ctx
            .contact(contact_id)?
            .ok_or_else(|| ClientError::UnknownContact(contact_id.clone()))?;

        let mut message = Message::outgoing(contact.id.clone(), text);
        self.ctx.with_db(|db| db.insert_message(&message))?;

        let identity = self.ctx.identity();
        let sealed = match mode {
            EncryptionMode::Ratchet => {
                self.ctx
                    .sessions
                    .seal(&identity, &contact, text.as_bytes())
                    .await
            }
            EncryptionMode::Stateless => {
                envelope::seal_stateless(text.as_bytes(), &identity, &contact).map_err(Into::into)
            }
        };
        let sealed = match sealed {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(contact = %contact.id, error = %e, "Encryption failed");
                self.set_status(&mut message, MessageStatus::Failed)?;
                return Err(e);
            }
        };

        let blob = serde_json::to_string(&sealed)
            .map_err(|e| beam_shared::BeamError::Serialization(e.to_string()))?;
        self.ctx
            .with_db(|db| db.update_message_cipher(message.id, &blob, true))?;
        message.cipher_blob = blob;
        message.encrypted = true;

        let packet = Packet::message(&message.id.to_string(), &sealed, mode);
        self.deliver(&mut message, &packet).await?;
        Ok(message)
    }

    /// Unencrypted send; only when the node allows it.
    pub async fn send_plaintext(&self, contact_id: &BeamId, text: &str) -> Result<Message> {
        if !self.ctx.config.allow_plaintext {
            return Err(ClientError::PlaintextDisabled);
        }
        let contact = self
            .ctx
            .contact(contact_id)?
            .ok_or_else(|| ClientError::UnknownContact(contact_id.clone()))?;

        let mut message = Message::outgoing(contact.id.clone(), text);
        message.cipher_blob = text.to_string();
        self.ctx.with_db(|db| db.insert_message(&message))?;

        let packet = Packet::PlaintextMessage {
            message_id: message.id.to_string(),
            from: self.ctx.beam_id().to_string(),
            to: contact.id.to_string(),
            content: text.to_string(),
            timestamp: message.timestamp.timestamp_millis() as f64 / 1000.0,
        };
        self.deliver(&mut message, &packet).await?;
        Ok(message)
    }

    /// Append to the peer's queue and, when connected, flush it. Anything
    /// still waiting for this peer therefore goes out first.
    async fn deliver(&self, message: &mut Message, packet: &Packet) -> Result<()> {
        let peer = message.contact_id.clone();
        let queued = QueuedPacket {
            message_id: message.id,
            data: Bytes::from(packet.to_bytes()?),
        };

        let slot = self.outbound_slot(&peer);
        let _turn = slot.lock().await;

        self.queue.enqueue(&peer, queued);
        if !self.ctx.transport.is_connected(&peer) {
            info!(peer = %peer, queued = self.queue.len(&peer), "Message queued for offline peer");
            return Ok(());
        }

        self.flush_queue(&peer).await;
        if !self.queue.contains(&peer, message.id) {
            message.status = MessageStatus::Delivered;
        }
        Ok(())
    }

    /// Resend everything queued for `peer`, in order. Stops at the first
    /// failure and puts the remainder back. Returns how many were delivered.
    pub async fn flush(&self, peer: &BeamId) -> usize {
        let slot = self.outbound_slot(peer);
        let _turn = slot.lock().await;
        self.flush_queue(peer).await
    }

    async fn flush_queue(&self, peer: &BeamId) -> usize {
        let mut pending = VecDeque::from(self.queue.drain(peer));
        if pending.is_empty() {
            return 0;
        }
        debug!(peer = %peer, count = pending.len(), "Flushing offline queue");

        let mut delivered = 0;
        while let Some(packet) = pending.front() {
            if let Err(e) = self.ctx.transport.send(peer, packet.data.clone()).await {
                warn!(peer = %peer, error = %e, remaining = pending.len(), "Flush interrupted");
                self.queue.requeue_front(peer, pending.into());
                return delivered;
            }
            let message_id = packet.message_id;
            pending.pop_front();
            delivered += 1;

            // the packet is out; a failed status write must not strand the rest
            if let Err(e) = self
                .ctx
                .with_db(|db| db.update_message_status(message_id, MessageStatus::Delivered))
            {
                warn!(peer = %peer, id = %message_id, error = %e, "Could not record delivery");
            }
            self.ctx.emit(NodeEvent::MessageStatusChanged {
                contact_id: peer.clone(),
                message_id,
                status: MessageStatus::Delivered,
            });
        }

        debug!(peer = %peer, delivered, "Queue flushed");
        delivered
    }

    /// Checks common to every inbound chat packet. Returns the sender's
    /// contact when the packet should be processed.
    fn admit(&self, source: &BeamId, from: &str, to: &str) -> Result<Option<beam_shared::Contact>> {
        let me = self.ctx.beam_id();

        // a contact carrying our own id can only come from corruption
        if self.ctx.with_db(|db| db.delete_contact(&me))? {
            warn!("Removed contact entry carrying this device's own id");
        }

        if from == me.as_ref() {
            debug!("Dropping echo of our own message");
            return Ok(None);
        }
        if to != me.as_ref() {
            debug!(to, "Dropping message addressed to another device");
            return Ok(None);
        }
        if from != source.as_ref() {
            warn!(source = %source, from, "Dropping message whose sender does not match its origin");
            return Ok(None);
        }

        let contact = self.ctx.contact(source)?;
        if contact.is_none() {
            debug!(from, "Dropping message from unknown sender");
        }
        Ok(contact)
    }

    /// Inbound `message` packet. Returns the stored record, or `None` when
    /// the packet was dropped.
    pub async fn handle_message(&self, source: &BeamId, packet: &Packet) -> Result<Option<Message>> {
        let Packet::Message {
            message_id, mode, ..
        } = packet
        else {
            return Ok(None);
        };
        let Some(sealed) = packet.envelope() else {
            debug!(from = %source, "Dropping message with an unrepresentable timestamp");
            return Ok(None);
        };
        let Some(contact) = self.admit(source, &sealed.from, &sealed.to)? else {
            return Ok(None);
        };

        let identity = self.ctx.identity();
        let now_ms = Utc::now().timestamp_millis();
        let opened = match mode {
            EncryptionMode::Ratchet => {
                self.ctx
                    .sessions
                    .open(&identity, &contact, &sealed, now_ms)
                    .await
            }
            EncryptionMode::Stateless if self.ctx.config.allow_stateless => {
                envelope::open_stateless(&sealed, &identity, &contact, now_ms).map_err(Into::into)
            }
            EncryptionMode::Stateless => {
                debug!(from = %contact.id, "Dropping stateless message, mode disabled");
                return Ok(None);
            }
        };
        let plaintext = match opened {
            Ok(bytes) => bytes,
            Err(ClientError::Open(e)) => {
                warn!(from = %contact.id, error = %e, "Rejected inbound envelope");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Ok(text) = String::from_utf8(plaintext) else {
            warn!(from = %contact.id, "Dropping message with non-UTF-8 body");
            return Ok(None);
        };

        let blob = serde_json::to_string(&sealed)
            .map_err(|e| beam_shared::BeamError::Serialization(e.to_string()))?;
        let timestamp = Utc
            .timestamp_millis_opt(sealed.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now);
        let message = Message {
            id: Uuid::parse_str(message_id).unwrap_or_else(|_| Uuid::new_v4()),
            contact_id: contact.id.clone(),
            plaintext: text,
            cipher_blob: blob,
            direction: Direction::Received,
            timestamp,
            status: MessageStatus::Delivered,
            read: false,
            encrypted: true,
        };
        self.record_inbound(message).map(Some)
    }

    /// Inbound `plaintext_message`, honoured only when the node allows it.
    pub fn handle_plaintext(&self, source: &BeamId, packet: &Packet) -> Result<Option<Message>> {
        let Packet::PlaintextMessage {
            message_id,
            from,
            to,
            content,
            timestamp,
        } = packet
        else {
            return Ok(None);
        };
        if !self.ctx.config.allow_plaintext {
            debug!(from = %source, "Dropping plaintext message, mode disabled");
            return Ok(None);
        }
        let Some(contact) = self.admit(source, from, to)? else {
            return Ok(None);
        };

        let timestamp = seconds_to_millis(*timestamp)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        let message = Message {
            id: Uuid::parse_str(message_id).unwrap_or_else(|_| Uuid::new_v4()),
            contact_id: contact.id,
            plaintext: content.clone(),
            cipher_blob: content.clone(),
            direction: Direction::Received,
            timestamp,
            status: MessageStatus::Delivered,
            read: false,
            encrypted: false,
        };
        self.record_inbound(message).map(Some)
    }

    fn record_inbound(&self, mut message: Message) -> Result<Message> {
        let stored = self.ctx.with_db(|db| db.insert_message(&message));
        if let Err(ClientError::Store(StoreError::DuplicateMessage(id))) = stored {
            // the content was authenticated; only the sender's id collides
            message.id = Uuid::new_v4();
            warn!(
                from = %message.contact_id,
                id = %id,
                new_id = %message.id,
                "Inbound message id already in use, storing under a fresh id"
            );
            self.ctx.with_db(|db| db.insert_message(&message))?;
        } else {
            stored?;
        }
        self.ctx
            .with_db(|db| db.touch_contact_last_seen(&message.contact_id, Utc::now()))?;
        info!(from = %message.contact_id, id = %message.id, "Message received");
        self.ctx.emit(NodeEvent::MessageReceived {
            contact_id: message.contact_id.clone(),
            message_id: message.id,
            text: message.plaintext.clone(),
            encrypted: message.encrypted,
        });
        Ok(message)
    }

    pub fn forget(&self, peer: &BeamId) -> usize {
        self.queue.remove(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(n: u8) -> QueuedPacket {
        QueuedPacket {
            message_id: Uuid::from_bytes([n; 16]),
            data: Bytes::from(vec![n]),
        }
    }

    fn ids(packets: &[QueuedPacket]) -> Vec<u8> {
        packets.iter().map(|p| p.data[0]).collect()
    }

    #[test]
    fn test_queue_fifo_and_drain() {
        let queue = OfflineQueue::new();
        let peer = BeamId::derive(&[1u8; 32]);
        for n in 1..=3 {
            queue.enqueue(&peer, packet(n));
        }
        assert_eq!(queue.len(&peer), 3);

        let drained = queue.drain(&peer);
        assert_eq!(ids(&drained), vec![1, 2, 3]);
        assert!(queue.is_empty(&peer));
    }

    #[test]
    fn test_requeue_goes_ahead_of_newer_packets() {
        let queue = OfflineQueue::new();
        let peer = BeamId::derive(&[1u8; 32]);
        queue.enqueue(&peer, packet(1));
        queue.enqueue(&peer, packet(2));
        queue.enqueue(&peer, packet(3));

        let mut drained = queue.drain(&peer);
        drained.remove(0);
        // queued while the flush was in progress
        queue.enqueue(&peer, packet(4));
        queue.requeue_front(&peer, drained);

        assert_eq!(ids(&queue.drain(&peer)), vec![2, 3, 4]);
    }

    #[test]
    fn test_discard_and_contains() {
        let queue = OfflineQueue::new();
        let peer = BeamId::derive(&[1u8; 32]);
        for n in 1..=3 {
            queue.enqueue(&peer, packet(n));
        }
        assert!(queue.contains(&peer, packet(2).message_id));
        assert!(queue.discard(&peer, packet(2).message_id));
        assert!(!queue.discard(&peer, packet(2).message_id));
        assert!(!queue.contains(&peer, packet(2).message_id));
        assert_eq!(ids(&queue.drain(&peer)), vec![1, 3]);
    }

    #[test]
    fn test_queues_are_per_peer() {
        let queue = OfflineQueue::new();
        let a = BeamId::derive(&[1u8; 32]);
        let b = BeamId::derive(&[2u8; 32]);
        queue.enqueue(&a, packet(1));
        queue.enqueue(&b, packet(2));

        assert_eq!(queue.remove(&a), 1);
        assert_eq!(queue.len(&a), 0);
        assert_eq!(ids(&queue.drain(&b)), vec![2]);
    }
}
