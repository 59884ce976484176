use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{BEAM_ID_HASH_BYTES, BEAM_ID_PREFIX};
use crate::error::IdentityError;

// Beam ID = "beam_" + hex(first 8 bytes of SHA-256(Ed25519 public key))
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct BeamId(String);

impl BeamId {
    /// Derive the Beam ID bound to an Ed25519 signing public key.
    pub fn derive(signing_public_key: &[u8]) -> Self {
        let hash = Sha256::digest(signing_public_key);
        Self(format!(
            "{BEAM_ID_PREFIX}{}",
            hex::encode(&hash[..BEAM_ID_HASH_BYTES])
        ))
    }

    /// Parse and validate a Beam ID string.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let digest = s
            .strip_prefix(BEAM_ID_PREFIX)
            .ok_or_else(|| IdentityError::MalformedBeamId(s.to_string()))?;
        let well_formed = digest.len() == BEAM_ID_HASH_BYTES * 2
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(IdentityError::MalformedBeamId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = (BEAM_ID_PREFIX.len() + 6).min(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for BeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BeamId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BeamId> for String {
    fn from(id: BeamId) -> Self {
        id.0
    }
}

impl AsRef<str> for BeamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_format() {
        let id = BeamId::derive(&[7u8; 32]);
        assert!(id.as_str().starts_with("beam_"));
        assert_eq!(id.as_str().len(), 5 + 16);
        assert!(BeamId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_derive_deterministic() {
        assert_eq!(BeamId::derive(&[1u8; 32]), BeamId::derive(&[1u8; 32]));
        assert_ne!(BeamId::derive(&[1u8; 32]), BeamId::derive(&[2u8; 32]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BeamId::parse("beam_").is_err());
        assert!(BeamId::parse("peer_0011223344556677").is_err());
        assert!(BeamId::parse("beam_00112233445566ZZ").is_err());
        assert!(BeamId::parse("beam_00112233445566778").is_err());
        assert!(BeamId::parse("beam_0011223344556677").is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<BeamId, _> = serde_json::from_str("\"beam_aaaaaaaaaaaaaaaa\"");
        assert!(ok.is_ok());
        let bad: Result<BeamId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(bad.is_err());
    }
}
