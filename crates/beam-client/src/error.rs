use beam_net::TransportError;
use beam_shared::{BeamError, BeamId, CardError, CryptoError, OpenError};
use beam_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Contact card error: {0}")]
    Card(#[from] CardError),

    #[error("Envelope rejected: {0}")]
    Open(#[from] OpenError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] BeamError),

    #[error("Unknown contact: {0}")]
    UnknownContact(BeamId),

    #[error("No pending contact request from {0}")]
    NoPendingRequest(BeamId),

    #[error("Refusing to add this device as its own contact")]
    OwnCard,

    #[error("Plaintext messaging is disabled")]
    PlaintextDisabled,

    #[error("Stateless encryption is disabled")]
    StatelessDisabled,
}

pub type Result<T> = std::result::Result<T, ClientError>;
