use std::sync::Arc;

use beam_shared::constants::SECRET_ID_SESSION_PREFIX;
use beam_shared::{BeamId, SessionState};

use crate::error::{Result, SecretStoreError, StoreError};
use crate::secrets::SecretStore;

/// Opaque per-contact session persistence (bincode inside the secret store).
#[derive(Clone)]
pub struct SessionStore {
    secrets: Arc<dyn SecretStore>,
}

impl SessionStore {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    fn secret_id(contact: &BeamId) -> String {
        format!("{SECRET_ID_SESSION_PREFIX}{contact}")
    }

    pub fn load(&self, contact: &BeamId) -> Result<Option<SessionState>> {
        let bytes = match self.secrets.load(&Self::secret_id(contact)) {
            Ok(bytes) => bytes,
            Err(SecretStoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = bincode::deserialize(&bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(state))
    }

    pub fn save(&self, contact: &BeamId, state: &SessionState) -> Result<()> {
        let bytes = zeroize::Zeroizing::new(
            bincode::serialize(state).map_err(|e| StoreError::Serialization(e.to_string()))?,
        );
        self.secrets.save(&Self::secret_id(contact), &bytes)?;
        Ok(())
    }

    pub fn delete(&self, contact: &BeamId) -> Result<()> {
        self.secrets.delete(&Self::secret_id(contact))?;
        Ok(())
    }
}
