//! Services shared by the handshake and delivery halves of a node.

use std::sync::{Arc, Mutex, PoisonError};

use beam_net::MeshTransport;
use beam_shared::{BeamId, Contact, ContactCard, Identity, Packet};
use beam_store::{Database, IdentityStore};
use bytes::Bytes;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::events::{emit_event, EventSender, NodeEvent};
use crate::sessions::SessionManager;

pub struct NodeContext {
    pub config: NodeConfig,
    pub identity: IdentityStore,
    pub sessions: SessionManager,
    pub transport: Arc<dyn MeshTransport>,
    database: Mutex<Database>,
    events: EventSender,
}

impl NodeContext {
    pub fn new(
        config: NodeConfig,
        identity: IdentityStore,
        sessions: SessionManager,
        database: Database,
        transport: Arc<dyn MeshTransport>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            identity,
            sessions,
            transport,
            database: Mutex::new(database),
            events,
        }
    }

    pub fn identity(&self) -> Arc<Identity> {
        self.identity.current()
    }

    pub fn beam_id(&self) -> BeamId {
        self.identity.public_id()
    }

    /// Run `f` against the database. The lock is released before returning,
    /// so callers never hold it across an await.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> beam_store::Result<T>) -> Result<T> {
        let db = self.database.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&db)?)
    }

    pub fn emit(&self, event: NodeEvent) {
        emit_event(&self.events, event);
    }

    pub fn contact(&self, id: &BeamId) -> Result<Option<Contact>> {
        self.with_db(|db| db.get_contact(id))
    }

    /// Name used on this device's card: the stored profile, else the
    /// configured default.
    pub fn display_name(&self) -> Result<String> {
        let profile = self.with_db(|db| db.get_profile())?;
        Ok(profile
            .map(|p| p.display_name)
            .unwrap_or_else(|| self.config.display_name.clone()))
    }

    pub fn my_card(&self) -> Result<ContactCard> {
        Ok(ContactCard::build(&self.identity(), &self.display_name()?)?)
    }

    pub async fn send_packet(&self, peer: &BeamId, packet: &Packet) -> Result<()> {
        let data = Bytes::from(packet.to_bytes()?);
        self.transport.send(peer, data).await?;
        tracing::debug!(peer = %peer, kind = packet.kind(), "Packet sent");
        Ok(())
    }
}
