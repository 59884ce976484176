//! # beam-shared
//!
//! Protocol core shared by every Beam crate: identities and Beam IDs,
//! signed contact cards, the per-contact ratchet, the encrypted envelope and
//! the JSON wire packets. Nothing in here does I/O.

pub mod card;
pub mod constants;
pub mod contact;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod types;

pub use card::ContactCard;
pub use contact::Contact;
pub use envelope::EncryptedMessage;
pub use error::{BeamError, CardError, CryptoError, IdentityError, OpenError};
pub use identity::Identity;
pub use protocol::{EncryptionMode, Packet};
pub use session::SessionState;
pub use types::BeamId;
