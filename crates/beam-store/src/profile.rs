use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::contacts::parse_timestamp;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::LocalProfile;

impl Database {
    pub fn get_profile(&self) -> Result<Option<LocalProfile>> {
        self.conn()
            .query_row(
                "SELECT display_name, updated_at FROM local_profile WHERE id = 1",
                [],
                |row| {
                    let updated_at: String = row.get(1)?;
                    Ok(LocalProfile {
                        display_name: row.get(0)?,
                        updated_at: parse_timestamp(1, &updated_at)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn set_display_name(&self, display_name: &str) -> Result<LocalProfile> {
        let profile = LocalProfile {
            display_name: display_name.to_string(),
            updated_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO local_profile (id, display_name, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = excluded.updated_at",
            params![profile.display_name, profile.updated_at.to_rfc3339()],
        )?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_upsert() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_profile().unwrap().is_none());

        db.set_display_name("Alice").unwrap();
        db.set_display_name("Alice B.").unwrap();
        assert_eq!(db.get_profile().unwrap().unwrap().display_name, "Alice B.");
    }
}
