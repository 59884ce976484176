use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as AgreementPublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, IdentityError};
use crate::types::BeamId;

/// A device's long-term cryptographic identity: an Ed25519 signing key
/// (which the Beam ID is derived from) and an X25519 key agreement key.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    agreement_key: StaticSecret,
    beam_id: BeamId,
}

/// Raw secret material, as persisted in the secret store.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct IdentityExport {
    pub signing_secret: [u8; 32],
    pub agreement_secret: [u8; 32],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let agreement_key = StaticSecret::random_from_rng(OsRng);
        Self::from_keys(signing_key, agreement_key)
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(signing_secret: &[u8; 32], agreement_secret: &[u8; 32]) -> Self {
        Self::from_keys(
            SigningKey::from_bytes(signing_secret),
            StaticSecret::from(*agreement_secret),
        )
    }

    pub fn from_export(export: &IdentityExport) -> Self {
        Self::from_secret_bytes(&export.signing_secret, &export.agreement_secret)
    }

    fn from_keys(signing_key: SigningKey, agreement_key: StaticSecret) -> Self {
        let beam_id = BeamId::derive(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            agreement_key,
            beam_id,
        }
    }

    pub fn beam_id(&self) -> &BeamId {
        &self.beam_id
    }

    /// Raw Ed25519 public key bytes
    pub fn signing_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Raw X25519 public key bytes
    pub fn agreement_public_key(&self) -> [u8; 32] {
        AgreementPublicKey::from(&self.agreement_key).to_bytes()
    }

    pub fn signing_secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Static X25519 agreement with a peer's public key.
    ///
    /// Rejects low-order peer keys that would yield an all-zero secret.
    pub fn agree(&self, their_public: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = self
            .agreement_key
            .diffie_hellman(&AgreementPublicKey::from(*their_public));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementFailed);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            signing_secret: *self.signing_key.as_bytes(),
            agreement_secret: self.agreement_key.to_bytes(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("beam_id", &self.beam_id)
            .finish_non_exhaustive()
    }
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::InvalidSignature)
}

/// Parse a 64-byte signature slice
pub fn signature_from_slice(bytes: &[u8]) -> Result<Signature, IdentityError> {
    Signature::from_slice(bytes).map_err(|_| IdentityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generation() {
        let id = Identity::generate();
        assert_eq!(id.beam_id(), &BeamId::derive(&id.signing_public_key()));
        assert_ne!(id.signing_public_key(), id.agreement_public_key());
    }

    #[test]
    fn test_identity_roundtrip() {
        let id = Identity::generate();
        let export = id.to_export();
        let restored = Identity::from_export(&export);
        assert_eq!(id.beam_id(), restored.beam_id());
        assert_eq!(id.agreement_public_key(), restored.agreement_public_key());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"Hello, Beam!";
        let signature = id.sign(message);

        assert!(verify_signature(&id.signing_public_key(), message, &signature).is_ok());
        assert_eq!(
            verify_signature(&id.signing_public_key(), b"wrong", &signature),
            Err(IdentityError::InvalidSignature)
        );
    }

    #[test]
    fn test_agreement_symmetric() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let ab = alice.agree(&bob.agreement_public_key()).unwrap();
        let ba = bob.agree(&alice.agreement_public_key()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn test_agreement_rejects_low_order_point() {
        let alice = Identity::generate();
        assert_eq!(
            alice.agree(&[0u8; 32]).unwrap_err(),
            CryptoError::KeyAgreementFailed
        );
    }
}
