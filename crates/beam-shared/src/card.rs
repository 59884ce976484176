use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{CARD_TYPE, CARD_VERSION, PUBKEY_SIZE};
use crate::error::CardError;
use crate::identity::{signature_from_slice, verify_signature, Identity};
use crate::types::BeamId;

/// A signed assertion binding a display name and two public keys to a Beam ID.
///
/// This is what travels in QR codes and in handshake packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContactCard {
    #[serde(rename = "type")]
    pub card_type: String,
    pub version: String,
    pub display_name: String,
    pub beam_id: String,
    pub signing_key_ed25519: String,
    pub key_agreement_x25519: String,
    pub created_at: String,
    pub signature: String,
}

/// Public keys decoded out of a verified card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedKeys {
    pub beam_id: BeamId,
    pub signing_key: [u8; 32],
    pub agreement_key: [u8; 32],
}

impl ContactCard {
    /// Build and sign this device's card.
    pub fn build(identity: &Identity, display_name: &str) -> Result<Self, CardError> {
        let mut card = Self {
            card_type: CARD_TYPE.to_string(),
            version: CARD_VERSION.to_string(),
            display_name: display_name.to_string(),
            beam_id: identity.beam_id().to_string(),
            signing_key_ed25519: BASE64.encode(identity.signing_public_key()),
            key_agreement_x25519: BASE64.encode(identity.agreement_public_key()),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            signature: String::new(),
        };
        let signature = identity.sign(&card.unsigned_bytes()?);
        card.signature = BASE64.encode(signature.to_bytes());
        Ok(card)
    }

    /// Canonical encoding the signature covers: every field except
    /// `signature`, keys sorted, compact JSON.
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>, CardError> {
        let value =
            serde_json::to_value(self).map_err(|e| CardError::InvalidFormat(e.to_string()))?;
        let mut fields: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(value).map_err(|e| CardError::InvalidFormat(e.to_string()))?;
        fields.remove("signature");
        serde_json::to_vec(&fields).map_err(|e| CardError::InvalidFormat(e.to_string()))
    }

    /// Check type/version, key encodings, the Beam ID binding and the
    /// signature, returning the decoded keys.
    pub fn verify(&self) -> Result<VerifiedKeys, CardError> {
        if self.card_type != CARD_TYPE || self.version != CARD_VERSION {
            return Err(CardError::UnsupportedVersion);
        }

        let signing_key = decode_key(&self.signing_key_ed25519, "signingKeyEd25519")?;
        let agreement_key = decode_key(&self.key_agreement_x25519, "keyAgreementX25519")?;

        let beam_id = BeamId::derive(&signing_key);
        if beam_id.as_str() != self.beam_id {
            return Err(CardError::IdMismatch);
        }

        let sig_bytes = BASE64
            .decode(&self.signature)
            .map_err(|_| CardError::InvalidEncoding("signature"))?;
        let signature =
            signature_from_slice(&sig_bytes).map_err(|_| CardError::InvalidSignature)?;
        verify_signature(&signing_key, &self.unsigned_bytes()?, &signature)
            .map_err(|_| CardError::InvalidSignature)?;

        Ok(VerifiedKeys {
            beam_id,
            signing_key,
            agreement_key,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    pub fn to_json(&self) -> Result<String, CardError> {
        serde_json::to_string_pretty(self).map_err(|e| CardError::InvalidFormat(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CardError> {
        serde_json::from_str(json.trim()).map_err(|e| CardError::InvalidFormat(e.to_string()))
    }
}

fn decode_key(encoded: &str, field: &'static str) -> Result<[u8; 32], CardError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| CardError::InvalidEncoding(field))?;
    if bytes.len() != PUBKEY_SIZE {
        return Err(CardError::InvalidKey(field));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
