//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Key material never lands
//! here; it lives in the [`crate::SecretStore`].

use std::path::{Path, PathBuf};

use beam_shared::constants::APP_NAME;
use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

const DB_FILE_NAME: &str = "beam.db";

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Platform data directory for the node:
    /// - Linux:   `~/.local/share/beam`
    /// - macOS:   `~/Library/Application Support/app.beam.Beam`
    /// - Windows: `{FOLDERID_RoamingAppData}\beam\Beam\data`
    pub fn default_data_dir() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("app", "beam", APP_NAME).ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().to_path_buf())
    }

    /// Open (or create) `beam.db` inside `data_dir`.
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DB_FILE_NAME);
        tracing::info!(path = %db_path.display(), "opening database");
        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and ephemeral nodes.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).expect("should open");
        assert!(db.path().is_some());
        drop(db);

        // reopening runs no migration twice
        let db = Database::open_in(dir.path()).expect("should reopen");
        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn in_memory_has_schema() {
        let db = Database::open_in_memory().unwrap();
        let tables: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('contacts', 'messages', 'local_profile')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
