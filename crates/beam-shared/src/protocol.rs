use serde::{Deserialize, Serialize};

use crate::card::ContactCard;
use crate::constants::MAX_PACKET_SIZE;
use crate::envelope::EncryptedMessage;
use crate::error::BeamError;

/// How the ciphertext of a `message` packet was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    #[default]
    Ratchet,
    Stateless,
}

/// Every packet exchanged between peers. JSON, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Packet {
    #[serde(rename_all = "camelCase")]
    HandshakeRequest { contact_card: ContactCard },

    #[serde(rename_all = "camelCase")]
    HandshakeAccept { contact_card: ContactCard },

    HandshakeReject,

    /// Encrypted chat message. `timestamp` is in fractional seconds.
    #[serde(rename_all = "camelCase")]
    Message {
        message_id: String,
        from: String,
        to: String,
        ciphertext: String,
        nonce: String,
        signature: String,
        timestamp: f64,
        ratchet_index: u64,
        version: u32,
        #[serde(default)]
        mode: EncryptionMode,
    },

    #[serde(rename_all = "camelCase")]
    PlaintextMessage {
        message_id: String,
        from: String,
        to: String,
        content: String,
        timestamp: f64,
    },
}

/// Fractional wire seconds to whole milliseconds. `None` for values that are
/// not finite or do not fit an `i64`.
pub fn seconds_to_millis(seconds: f64) -> Option<i64> {
    let millis = (seconds * 1000.0).round();
    (millis.is_finite() && millis.abs() < i64::MAX as f64).then_some(millis as i64)
}

impl Packet {
    pub fn message(message_id: &str, envelope: &EncryptedMessage, mode: EncryptionMode) -> Self {
        Packet::Message {
            message_id: message_id.to_string(),
            from: envelope.from.clone(),
            to: envelope.to.clone(),
            ciphertext: envelope.ciphertext.clone(),
            nonce: envelope.nonce.clone(),
            signature: envelope.signature.clone(),
            timestamp: envelope.timestamp_ms as f64 / 1000.0,
            ratchet_index: envelope.ratchet_index,
            version: envelope.version,
            mode,
        }
    }

    /// Rebuild the signed envelope carried by a `message` packet. `None` for
    /// other packets and for timestamps that cannot be represented.
    pub fn envelope(&self) -> Option<EncryptedMessage> {
        match self {
            Packet::Message {
                from,
                to,
                ciphertext,
                nonce,
                signature,
                timestamp,
                ratchet_index,
                version,
                ..
            } => Some(EncryptedMessage {
                version: *version,
                from: from.clone(),
                to: to.clone(),
                timestamp_ms: seconds_to_millis(*timestamp)?,
                ratchet_index: *ratchet_index,
                nonce: nonce.clone(),
                ciphertext: ciphertext.clone(),
                signature: signature.clone(),
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::HandshakeRequest { .. } => "handshake_request",
            Packet::HandshakeAccept { .. } => "handshake_accept",
            Packet::HandshakeReject => "handshake_reject",
            Packet::Message { .. } => "message",
            Packet::PlaintextMessage { .. } => "plaintext_message",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BeamError> {
        serde_json::to_vec(self).map_err(|e| BeamError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, BeamError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(BeamError::Protocol(format!(
                "packet of {} bytes exceeds limit",
                data.len()
            )));
        }
        serde_json::from_slice(data).map_err(|e| BeamError::Serialization(e.to_string()))
    }
}
