use beam_shared::{BeamId, Contact};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};

const CONTACT_COLUMNS: &str =
    "id, name, signing_key, agreement_key, avatar, last_seen, created_at, muted";

impl Database {
    /// Insert a contact, or refresh name and keys if it already exists.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (id, name, signing_key, agreement_key, avatar, last_seen, created_at, muted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                signing_key = excluded.signing_key,
                agreement_key = excluded.agreement_key",
            params![
                contact.id.as_str(),
                contact.name,
                hex::encode(contact.signing_public_key),
                hex::encode(contact.agreement_public_key),
                contact.avatar,
                contact.last_seen.map(|t| t.to_rfc3339()),
                contact.created_at.to_rfc3339(),
                contact.muted,
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, id: &BeamId) -> Result<Option<Contact>> {
        self.conn()
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id.as_str()],
                row_to_contact,
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY name COLLATE NOCASE"
        ))?;
        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    /// Delete a contact. Its messages go with it (`ON DELETE CASCADE`).
    pub fn delete_contact(&self, id: &BeamId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM contacts WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    pub fn rename_contact(&self, id: &BeamId, name: &str) -> Result<()> {
        self.update_contact("UPDATE contacts SET name = ?2 WHERE id = ?1", id, name)
    }

    pub fn set_contact_muted(&self, id: &BeamId, muted: bool) -> Result<()> {
        self.update_contact("UPDATE contacts SET muted = ?2 WHERE id = ?1", id, muted)
    }

    pub fn touch_contact_last_seen(&self, id: &BeamId, at: DateTime<Utc>) -> Result<()> {
        self.update_contact(
            "UPDATE contacts SET last_seen = ?2 WHERE id = ?1",
            id,
            at.to_rfc3339(),
        )
    }

    fn update_contact<T: rusqlite::ToSql>(&self, sql: &str, id: &BeamId, value: T) -> Result<()> {
        match self.conn().execute(sql, params![id.as_str(), value])? {
            0 => Err(StoreError::NotFound),
            _ => Ok(()),
        }
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let id: String = row.get(0)?;
    let signing_hex: String = row.get(2)?;
    let agreement_hex: String = row.get(3)?;
    let last_seen: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(Contact {
        id: BeamId::parse(&id).map_err(|e| conversion_error(0, e))?,
        name: row.get(1)?,
        signing_public_key: decode_key(2, &signing_hex)?,
        agreement_public_key: decode_key(3, &agreement_hex)?,
        avatar: row.get(4)?,
        last_seen: last_seen.map(|ts| parse_timestamp(5, &ts)).transpose()?,
        created_at: parse_timestamp(6, &created_at)?,
        muted: row.get(7)?,
    })
}

fn decode_key(idx: usize, hex_str: &str) -> rusqlite::Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).map_err(|e| conversion_error(idx, e))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| conversion_error(idx, StoreError::Serialization("key length".into())))
}

pub(crate) fn parse_timestamp(idx: usize, ts: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_shared::{ContactCard, Identity};

    fn contact(name: &str) -> Contact {
        let identity = Identity::generate();
        Contact::from_card(&ContactCard::build(&identity, name).unwrap()).unwrap()
    }

    #[test]
    fn contact_crud() {
        let db = Database::open_in_memory().unwrap();
        let bob = contact("Bob");
        assert!(db.get_contact(&bob.id).unwrap().is_none());

        db.upsert_contact(&bob).unwrap();
        let loaded = db.get_contact(&bob.id).unwrap().unwrap();
        assert_eq!(loaded.signing_public_key, bob.signing_public_key);
        assert_eq!(loaded.agreement_public_key, bob.agreement_public_key);
        assert_eq!(loaded.created_at.timestamp(), bob.created_at.timestamp());

        db.rename_contact(&bob.id, "Robert").unwrap();
        db.set_contact_muted(&bob.id, true).unwrap();
        let now = Utc::now();
        db.touch_contact_last_seen(&bob.id, now).unwrap();

        let loaded = db.get_contact(&bob.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Robert");
        assert!(loaded.muted);
        assert_eq!(loaded.last_seen.map(|t| t.timestamp()), Some(now.timestamp()));

        assert!(db.delete_contact(&bob.id).unwrap());
        assert!(!db.delete_contact(&bob.id).unwrap());
    }

    #[test]
    fn upsert_keeps_local_flags() {
        let db = Database::open_in_memory().unwrap();
        let mut bob = contact("Bob");
        db.upsert_contact(&bob).unwrap();
        db.set_contact_muted(&bob.id, true).unwrap();

        bob.name = "Bobby".to_string();
        db.upsert_contact(&bob).unwrap();
        let loaded = db.get_contact(&bob.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Bobby");
        assert!(loaded.muted);
        assert_eq!(db.list_contacts().unwrap().len(), 1);
    }

    #[test]
    fn updating_missing_contact_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let ghost = contact("Ghost");
        assert!(matches!(
            db.rename_contact(&ghost.id, "x"),
            Err(StoreError::NotFound)
        ));
    }
}
