use beam_shared::BeamId;
use chrono::SecondsFormat;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::contacts::{conversion_error, parse_timestamp};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageStatus};

const MESSAGE_COLUMNS: &str =
    "id, contact_id, plaintext, cipher_blob, direction, timestamp, status, is_read, is_encrypted";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let inserted = self.conn().execute(
            "INSERT INTO messages (id, contact_id, plaintext, cipher_blob, direction, timestamp, status, is_read, is_encrypted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.contact_id.as_str(),
                message.plaintext,
                message.cipher_blob,
                message.direction.as_str(),
                message.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                message.status.as_str(),
                message.read,
                message.encrypted,
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_primary_key_violation(&e) => Err(StoreError::DuplicateMessage(message.id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_message_status(&self, id: Uuid, status: MessageStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Record the wire form after a successful seal.
    pub fn update_message_cipher(&self, id: Uuid, cipher_blob: &str, encrypted: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET cipher_blob = ?2, is_encrypted = ?3 WHERE id = ?1",
            params![id.to_string(), cipher_blob, encrypted],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Newest first.
    pub fn get_messages_for_contact(
        &self,
        contact_id: &BeamId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE contact_id = ?1
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![contact_id.as_str(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Mark every received message from `contact_id` as read. Returns how
    /// many changed.
    pub fn mark_conversation_read(&self, contact_id: &BeamId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1
             WHERE contact_id = ?1 AND direction = 'received' AND is_read = 0",
            params![contact_id.as_str()],
        )?;
        Ok(affected)
    }

    pub fn unread_count(&self, contact_id: &BeamId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE contact_id = ?1 AND direction = 'received' AND is_read = 0",
            params![contact_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Newest message in the conversation, for list previews.
    pub fn last_message(&self, contact_id: &BeamId) -> Result<Option<Message>> {
        Ok(self.get_messages_for_contact(contact_id, 1, 0)?.pop())
    }

    /// Returns false when no such message exists.
    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_messages_for_contact(&self, contact_id: &BeamId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE contact_id = ?1",
            params![contact_id.as_str()],
        )?;
        Ok(affected)
    }
}

fn is_primary_key_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let contact_id: String = row.get(1)?;
    let direction: String = row.get(4)?;
    let timestamp: String = row.get(5)?;
    let status: String = row.get(6)?;

    Ok(Message {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        contact_id: BeamId::parse(&contact_id).map_err(|e| conversion_error(1, e))?,
        plaintext: row.get(2)?,
        cipher_blob: row.get(3)?,
        direction: direction.parse().map_err(|e| conversion_error(4, e))?,
        timestamp: parse_timestamp(5, &timestamp)?,
        status: status.parse().map_err(|e| conversion_error(6, e))?,
        read: row.get(7)?,
        encrypted: row.get(8)?,
    })
}
