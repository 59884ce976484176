use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeamError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Contact card error: {0}")]
    Card(#[from] CardError),

    #[error("Envelope rejected: {0}")]
    Open(#[from] OpenError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Key agreement produced a non-contributory shared secret")]
    KeyAgreementFailed,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Signing failed")]
    SigningFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed Beam ID: {0}")]
    MalformedBeamId(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CardError {
    #[error("Unsupported card type or version")]
    UnsupportedVersion,

    #[error("Invalid base64 in field {0}")]
    InvalidEncoding(&'static str),

    #[error("Invalid key in field {0}")]
    InvalidKey(&'static str),

    #[error("Beam ID does not match signing key")]
    IdMismatch,

    #[error("Invalid card signature")]
    InvalidSignature,

    #[error("Invalid card JSON: {0}")]
    InvalidFormat(String),
}

/// Reasons an inbound envelope is rejected. Variants are ordered the way
/// the checks run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("Envelope timestamp outside the accepted window")]
    Stale,

    #[error("Replayed nonce or ratchet index")]
    Replay,

    #[error("Envelope signature does not verify")]
    BadSignature,

    #[error("Authenticated decryption failed")]
    DecryptFailed,

    #[error("Key agreement failed")]
    KeyAgreementFailed,
}
