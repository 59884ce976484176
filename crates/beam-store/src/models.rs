//! Domain model structs persisted in the local database.
//!
//! Contacts themselves are [`beam_shared::Contact`]; this module adds the
//! application-side records.

use std::fmt;
use std::str::FromStr;

use beam_shared::BeamId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// A chat message as the user sees it, plus the wire form it travelled in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub contact_id: BeamId,
    pub plaintext: String,
    /// Envelope JSON for encrypted messages, the plaintext otherwise.
    pub cipher_blob: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub read: bool,
    pub encrypted: bool,
}

impl Message {
    /// A new outbound message in the `sending` state.
    pub fn outgoing(contact_id: BeamId, plaintext: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id,
            plaintext: plaintext.to_string(),
            cipher_blob: String::new(),
            direction: Direction::Sent,
            timestamp: Utc::now(),
            status: MessageStatus::Sending,
            read: true,
            encrypted: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Local profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalProfile {
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Text encodings used in SQLite columns
// ---------------------------------------------------------------------------

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

impl FromStr for Direction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Direction::Sent),
            "received" => Ok(Direction::Received),
            other => Err(StoreError::Serialization(format!("unknown direction {other}"))),
        }
    }
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(StoreError::Serialization(format!("unknown status {other}"))),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
