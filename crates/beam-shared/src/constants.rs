/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/beam-mesh/1.0.0";

/// Application name
pub const APP_NAME: &str = "Beam";

/// Prefix of every Beam ID
pub const BEAM_ID_PREFIX: &str = "beam_";

/// Number of SHA-256 bytes (hex-encoded) that make up a Beam ID
pub const BEAM_ID_HASH_BYTES: usize = 8;

/// Contact card type tag and version
pub const CARD_TYPE: &str = "beam_contact";
pub const CARD_VERSION: &str = "1.0";

/// Envelope wire version
pub const ENVELOPE_VERSION: u32 = 1;

/// ChaCha20-Poly1305 nonce size in bytes (message envelopes)
pub const NONCE_SIZE: usize = 12;

/// XChaCha20-Poly1305 nonce size in bytes (secret storage at rest)
pub const STORAGE_NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Ed25519 / X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Symmetric key size in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum accepted clock skew between sender and receiver (1 hour)
pub const MAX_MESSAGE_AGE_MILLIS: i64 = 3_600_000;

/// Replay-protection window sizes
pub const SEEN_INDEX_CAPACITY: usize = 1_000;
pub const SEEN_NONCE_CAPACITY: usize = 10_000;

/// How far ahead of the receive counter a ratchet index may jump
pub const MAX_SKIPPED_KEYS: u64 = 1_000;

/// Separator used in AAD, context binding and signing payloads
pub const FIELD_SEPARATOR: &str = "|";

/// HKDF parameters
pub const SESSION_INFO: &[u8] = b"beam:session:v1";
pub const STATELESS_SALT: &[u8] = b"beam-simple-encryption";
pub const STATELESS_INFO: &[u8] = b"message-key";

/// Chain-key HMAC labels
pub const CHAIN_LABEL_MESSAGE: &str = "msg";
pub const CHAIN_LABEL_NEXT: &[u8] = b"next";

/// Secret store identifiers
pub const SECRET_ID_SIGNING_KEY: &str = "beam.identity.ed25519.private";
pub const SECRET_ID_AGREEMENT_KEY: &str = "beam.keyagreement.x25519.private";
pub const SECRET_ID_SESSION_PREFIX: &str = "beam.session.";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SECRET_STORE: &str = "beam-secret-store-v1";

/// Maximum wire packet size in bytes (256 KiB)
pub const MAX_PACKET_SIZE: usize = 262_144;

/// Gossipsub inbox topic prefix; each device listens on `<prefix><beam id>`
pub const INBOX_TOPIC_PREFIX: &str = "beam/inbox/";

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4011;
