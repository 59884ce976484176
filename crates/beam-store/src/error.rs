use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A message with this id is already stored.
    #[error("Message {0} already exists")]
    DuplicateMessage(uuid::Uuid),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A persisted value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Secret store error: {0}")]
    Secret(#[from] SecretStoreError),

    #[error("Invalid Beam ID: {0}")]
    Identity(#[from] beam_shared::IdentityError),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Hex decoding error.
    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Failures of the platform secret storage.
#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("No secret stored under {0}")]
    NotFound(String),

    #[error("Access to secret storage denied: {0}")]
    AccessDenied(String),

    /// Stored bytes exist but cannot be decrypted or decoded.
    #[error("Secret {0} is corrupt")]
    Corrupt(String),

    #[error("Secret storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
