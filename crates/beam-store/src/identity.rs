//! Long-term device identity, persisted in a [`SecretStore`].

use std::sync::{Arc, PoisonError, RwLock};

use beam_shared::constants::{
    SECRET_ID_AGREEMENT_KEY, SECRET_ID_SESSION_PREFIX, SECRET_ID_SIGNING_KEY,
};
use beam_shared::{BeamId, Identity};

use crate::error::SecretStoreError;
use crate::secrets::SecretStore;

/// How [`IdentityStore::open`] obtained the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus {
    /// Both keys were read back from secret storage.
    Loaded,
    /// No identity existed yet; a new one was generated.
    Created,
    /// Stored keys were unreadable or corrupt and were replaced. Contacts
    /// must re-pair.
    Regenerated,
}

pub struct IdentityStore {
    secrets: Arc<dyn SecretStore>,
    current: RwLock<Arc<Identity>>,
}

impl IdentityStore {
    pub fn open(secrets: Arc<dyn SecretStore>) -> (Self, IdentityStatus) {
        let (identity, status) = match load_identity(secrets.as_ref()) {
            Ok(Some(identity)) => (identity, IdentityStatus::Loaded),
            Ok(None) => {
                tracing::info!("no stored identity, generating one");
                (Identity::generate(), IdentityStatus::Created)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored identity unusable, regenerating");
                (Identity::generate(), IdentityStatus::Regenerated)
            }
        };

        if status != IdentityStatus::Loaded {
            if let Err(e) = persist_identity(secrets.as_ref(), &identity) {
                tracing::error!(error = %e, "failed to persist identity, continuing in memory");
            }
        }

        tracing::info!(beam_id = %identity.beam_id(), ?status, "identity ready");

        let store = Self {
            secrets,
            current: RwLock::new(Arc::new(identity)),
        };
        (store, status)
    }

    pub fn current(&self) -> Arc<Identity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn public_id(&self) -> BeamId {
        self.current().beam_id().clone()
    }

    /// Replace the identity with a fresh one and drop every persisted session,
    /// since none of them can be re-derived.
    pub fn rekey(&self) -> Arc<Identity> {
        let identity = Arc::new(Identity::generate());
        if let Err(e) = persist_identity(self.secrets.as_ref(), &identity) {
            tracing::error!(error = %e, "failed to persist new identity");
        }

        match self.secrets.list(SECRET_ID_SESSION_PREFIX) {
            Ok(ids) => {
                for id in ids {
                    if let Err(e) = self.secrets.delete(&id) {
                        tracing::warn!(secret = %id, error = %e, "failed to delete session");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not enumerate sessions"),
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = identity.clone();
        tracing::info!(beam_id = %identity.beam_id(), "identity re-keyed");
        identity
    }
}

/// `Ok(None)` only when neither key exists.
fn load_identity(secrets: &dyn SecretStore) -> Result<Option<Identity>, SecretStoreError> {
    let signing = match secrets.load(SECRET_ID_SIGNING_KEY) {
        Ok(bytes) => bytes,
        Err(SecretStoreError::NotFound(_)) => {
            return match secrets.load(SECRET_ID_AGREEMENT_KEY) {
                Err(SecretStoreError::NotFound(_)) => Ok(None),
                _ => Err(SecretStoreError::NotFound(SECRET_ID_SIGNING_KEY.to_string())),
            };
        }
        Err(e) => return Err(e),
    };
    let agreement = secrets.load(SECRET_ID_AGREEMENT_KEY)?;

    let signing: [u8; 32] = signing
        .as_slice()
        .try_into()
        .map_err(|_| SecretStoreError::Corrupt(SECRET_ID_SIGNING_KEY.to_string()))?;
    let agreement: [u8; 32] = agreement
        .as_slice()
        .try_into()
        .map_err(|_| SecretStoreError::Corrupt(SECRET_ID_AGREEMENT_KEY.to_string()))?;

    Ok(Some(Identity::from_secret_bytes(&signing, &agreement)))
}

fn persist_identity(secrets: &dyn SecretStore, identity: &Identity) -> Result<(), SecretStoreError> {
    let export = identity.to_export();
    secrets.save(SECRET_ID_SIGNING_KEY, &export.signing_secret)?;
    secrets.save(SECRET_ID_AGREEMENT_KEY, &export.agreement_secret)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;

    #[test]
    fn first_open_creates_then_loads() {
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let (first, status) = IdentityStore::open(secrets.clone());
        assert_eq!(status, IdentityStatus::Created);

        let (second, status) = IdentityStore::open(secrets);
        assert_eq!(status, IdentityStatus::Loaded);
        assert_eq!(first.public_id(), second.public_id());
    }

    #[test]
    fn corrupt_key_regenerates() {
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let (original, _) = IdentityStore::open(secrets.clone());
        secrets.save(SECRET_ID_SIGNING_KEY, b"short").unwrap();

        let (replaced, status) = IdentityStore::open(secrets.clone());
        assert_eq!(status, IdentityStatus::Regenerated);
        assert_ne!(original.public_id(), replaced.public_id());

        // the replacement was persisted
        let (_, status) = IdentityStore::open(secrets);
        assert_eq!(status, IdentityStatus::Loaded);
    }

    #[test]
    fn half_present_identity_regenerates() {
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        secrets.save(SECRET_ID_AGREEMENT_KEY, &[3u8; 32]).unwrap();
        let (_, status) = IdentityStore::open(secrets);
        assert_eq!(status, IdentityStatus::Regenerated);
    }

    #[test]
    fn rekey_replaces_identity_and_drops_sessions() {
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let (store, _) = IdentityStore::open(secrets.clone());
        let before = store.public_id();
        secrets.save("beam.session.beam_0011223344556677", b"state").unwrap();

        let after = store.rekey();
        assert_ne!(&before, after.beam_id());
        assert_eq!(&store.public_id(), after.beam_id());
        assert!(secrets.list(SECRET_ID_SESSION_PREFIX).unwrap().is_empty());

        let (reopened, _) = IdentityStore::open(secrets);
        assert_eq!(reopened.public_id(), store.public_id());
    }
}
