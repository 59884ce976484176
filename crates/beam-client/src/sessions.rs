//! Per-contact ratchet sessions with serialized access.
//!
//! Each contact id gets its own async mutex, so seals and opens for one
//! contact never interleave while different contacts proceed in parallel.
//! Sessions are created lazily and written back to the secret store after
//! every operation, including failed opens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use beam_shared::envelope;
use beam_shared::{BeamId, Contact, EncryptedMessage, Identity, SessionState};
use beam_store::SessionStore;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;

type Slot = Arc<AsyncMutex<Option<SessionState>>>;

pub struct SessionManager {
    store: SessionStore,
    slots: Mutex<HashMap<BeamId, Slot>>,
}

impl SessionManager {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, contact_id: &BeamId) -> Slot {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(contact_id.clone())
            .or_default()
            .clone()
    }

    async fn with_session<T>(
        &self,
        identity: &Identity,
        contact: &Contact,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Result<T> {
        let slot = self.slot(&contact.id);
        let mut guard = slot.lock().await;

        let state = match guard.take() {
            Some(state) => state,
            None => match self.store.load(&contact.id)? {
                Some(state) => state,
                None => {
                    tracing::debug!(contact = %contact.id, "Establishing new session");
                    SessionState::establish(identity, contact)?
                }
            },
        };
        let state = guard.insert(state);

        let out = f(state);
        self.store.save(&contact.id, state)?;
        Ok(out)
    }

    /// Encrypt for `contact` with the next send-chain key.
    pub async fn seal(
        &self,
        identity: &Identity,
        contact: &Contact,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage> {
        let sealed = self
            .with_session(identity, contact, |state| {
                envelope::seal(plaintext, state, identity, contact)
            })
            .await?;
        Ok(sealed?)
    }

    pub async fn open(
        &self,
        identity: &Identity,
        contact: &Contact,
        message: &EncryptedMessage,
        now_ms: i64,
    ) -> Result<Vec<u8>> {
        let opened = self
            .with_session(identity, contact, |state| {
                envelope::open(message, state, contact, now_ms)
            })
            .await?;
        Ok(opened?)
    }

    /// Forget the session with `contact_id`; the next message re-derives it.
    pub async fn reset(&self, contact_id: &BeamId) -> Result<()> {
        let slot = self.slot(contact_id);
        let mut guard = slot.lock().await;
        *guard = None;
        self.store.delete(contact_id)?;
        tracing::info!(contact = %contact_id, "Session reset");
        Ok(())
    }

    pub async fn remove(&self, contact_id: &BeamId) -> Result<()> {
        self.reset(contact_id).await?;
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(contact_id);
        Ok(())
    }

    /// Drop every cached session. Used after a re-key, which has already
    /// deleted the persisted ones.
    pub fn forget_all(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
