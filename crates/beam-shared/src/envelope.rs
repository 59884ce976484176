//! The signed, encrypted wire envelope and the two ways of producing it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::constants::{
    ENVELOPE_VERSION, FIELD_SEPARATOR, MAX_MESSAGE_AGE_MILLIS, NONCE_SIZE, SIGNATURE_SIZE,
    STATELESS_INFO, STATELESS_SALT, TAG_SIZE,
};
use crate::contact::Contact;
use crate::crypto::{self, SymmetricKey};
use crate::error::{CryptoError, OpenError};
use crate::identity::{verify_signature, Identity};
use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    #[serde(rename = "v")]
    pub version: u32,
    pub from: String,
    pub to: String,
    /// Unix time in milliseconds
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    #[serde(rename = "rIdx")]
    pub ratchet_index: u64,
    pub nonce: String,
    /// Ciphertext with the Poly1305 tag appended
    pub ciphertext: String,
    #[serde(rename = "sig")]
    pub signature: String,
}

/// Binary fields of an envelope that passed structural validation.
pub struct DecodedEnvelope {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub signature: Signature,
}

impl EncryptedMessage {
    /// `v|from|to|t|rIdx|nonce|ciphertext`, with the binary fields in base64.
    pub fn signing_payload(&self) -> Vec<u8> {
        [
            self.version.to_string(),
            self.from.clone(),
            self.to.clone(),
            self.timestamp_ms.to_string(),
            self.ratchet_index.to_string(),
            self.nonce.clone(),
            self.ciphertext.clone(),
        ]
        .join(FIELD_SEPARATOR)
        .into_bytes()
    }

    pub fn validate(&self) -> Result<DecodedEnvelope, OpenError> {
        if self.version != ENVELOPE_VERSION {
            return Err(OpenError::MalformedEnvelope("unsupported version"));
        }
        if self.from.is_empty() || self.to.is_empty() {
            return Err(OpenError::MalformedEnvelope("missing sender or recipient"));
        }

        let nonce_bytes = BASE64
            .decode(&self.nonce)
            .map_err(|_| OpenError::MalformedEnvelope("nonce is not base64"))?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes
            .as_slice()
            .try_into()
            .map_err(|_| OpenError::MalformedEnvelope("nonce length"))?;

        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|_| OpenError::MalformedEnvelope("ciphertext is not base64"))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(OpenError::MalformedEnvelope("ciphertext shorter than tag"));
        }

        let sig_bytes = BASE64
            .decode(&self.signature)
            .map_err(|_| OpenError::MalformedEnvelope("signature is not base64"))?;
        if sig_bytes.len() != SIGNATURE_SIZE {
            return Err(OpenError::MalformedEnvelope("signature length"));
        }
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|_| OpenError::MalformedEnvelope("signature length"))?;

        Ok(DecodedEnvelope {
            nonce,
            ciphertext,
            signature,
        })
    }

    pub fn is_timely(&self, now_ms: i64) -> bool {
        now_ms.abs_diff(self.timestamp_ms) <= MAX_MESSAGE_AGE_MILLIS.unsigned_abs()
    }

    fn aad(&self) -> Vec<u8> {
        associated_data(&self.from, &self.to)
    }
}

fn associated_data(from: &str, to: &str) -> Vec<u8> {
    format!("{from}{FIELD_SEPARATOR}{to}").into_bytes()
}

/// Encrypt `plaintext` for `contact` with the next send-chain key.
pub fn seal(
    plaintext: &[u8],
    session: &mut SessionState,
    identity: &Identity,
    contact: &Contact,
) -> Result<EncryptedMessage, CryptoError> {
    let message_key = session.advance_send_chain()?;
    let from = identity.beam_id().to_string();
    let to = contact.id.to_string();

    let nonce = crypto::generate_nonce();
    let sealed = crypto::seal(
        message_key.key(),
        &nonce,
        plaintext,
        &associated_data(&from, &to),
    )?;

    let mut envelope = EncryptedMessage {
        version: ENVELOPE_VERSION,
        from,
        to,
        timestamp_ms: Utc::now().timestamp_millis(),
        ratchet_index: message_key.index,
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(sealed),
        signature: String::new(),
    };
    envelope.signature = BASE64.encode(identity.sign(&envelope.signing_payload()).to_bytes());
    Ok(envelope)
}

/// Verify and decrypt an envelope from `contact`.
///
/// Checks run in a fixed order and state touched by an earlier step (the
/// nonce window, the receive chain) is kept even if a later step fails.
pub fn open(
    envelope: &EncryptedMessage,
    session: &mut SessionState,
    contact: &Contact,
    now_ms: i64,
) -> Result<Vec<u8>, OpenError> {
    let decoded = envelope.validate()?;

    if !envelope.is_timely(now_ms) {
        return Err(OpenError::Stale);
    }

    if !session.record_nonce(&decoded.nonce) {
        return Err(OpenError::Replay);
    }

    verify_signature(
        &contact.signing_public_key,
        &envelope.signing_payload(),
        &decoded.signature,
    )
    .map_err(|_| OpenError::BadSignature)?;

    let message_key = session
        .advance_receive_chain(envelope.ratchet_index)
        .map_err(|_| OpenError::DecryptFailed)?
        .ok_or(OpenError::Replay)?;

    crypto::open(
        message_key.key(),
        &decoded.nonce,
        &decoded.ciphertext,
        &envelope.aad(),
    )
    .map_err(|_| OpenError::DecryptFailed)
}

fn stateless_key(identity: &Identity, contact: &Contact) -> Result<SymmetricKey, CryptoError> {
    let shared = identity.agree(&contact.agreement_public_key)?;
    let mut key = [0u8; 32];
    crypto::hkdf_sha256(&shared[..], STATELESS_SALT, STATELESS_INFO, &mut key)?;
    Ok(key)
}

fn stateless_signing_payload(ciphertext: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ciphertext.len() + nonce.len());
    payload.extend_from_slice(ciphertext);
    payload.extend_from_slice(nonce);
    payload
}

/// Single-key encryption straight from the static agreement. No ratchet
/// index and no replay window.
pub fn seal_stateless(
    plaintext: &[u8],
    identity: &Identity,
    contact: &Contact,
) -> Result<EncryptedMessage, CryptoError> {
    let from = identity.beam_id().to_string();
    let to = contact.id.to_string();

    let mut key = stateless_key(identity, contact)?;
    let nonce = crypto::generate_nonce();
    let sealed = crypto::seal(&key, &nonce, plaintext, &associated_data(&from, &to));
    key.zeroize();
    let sealed = sealed?;

    let signature = identity.sign(&stateless_signing_payload(&sealed, &nonce));

    Ok(EncryptedMessage {
        version: ENVELOPE_VERSION,
        from,
        to,
        timestamp_ms: Utc::now().timestamp_millis(),
        ratchet_index: 0,
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(sealed),
        signature: BASE64.encode(signature.to_bytes()),
    })
}

pub fn open_stateless(
    envelope: &EncryptedMessage,
    identity: &Identity,
    contact: &Contact,
    now_ms: i64,
) -> Result<Vec<u8>, OpenError> {
    let decoded = envelope.validate()?;

    if !envelope.is_timely(now_ms) {
        return Err(OpenError::Stale);
    }

    verify_signature(
        &contact.signing_public_key,
        &stateless_signing_payload(&decoded.ciphertext, &decoded.nonce),
        &decoded.signature,
    )
    .map_err(|_| OpenError::BadSignature)?;

    let mut key = stateless_key(identity, contact).map_err(|_| OpenError::KeyAgreementFailed)?;
    let plaintext = crypto::open(&key, &decoded.nonce, &decoded.ciphertext, &envelope.aad());
    key.zeroize();
    plaintext.map_err(|_| OpenError::DecryptFailed)
}
