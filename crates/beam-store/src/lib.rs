//! # beam-store
//!
//! Local storage for a Beam node. Key material and ratchet state go through
//! the [`SecretStore`] seam; contacts, message history and the local profile
//! live in a synchronous SQLite [`Database`].

pub mod contacts;
pub mod database;
pub mod identity;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profile;
pub mod secrets;
pub mod sessions;

mod error;

pub use database::Database;
pub use error::{Result, SecretStoreError, StoreError};
pub use identity::{IdentityStatus, IdentityStore};
pub use models::*;
pub use secrets::{FileSecretStore, MemorySecretStore, SecretStore};
pub use sessions::SessionStore;
