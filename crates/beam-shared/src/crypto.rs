use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::constants::{NONCE_SIZE, STORAGE_NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

type HmacSha256 = Hmac<Sha256>;

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// HKDF-SHA256 extract-and-expand into `output`.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, output)
        .map_err(|_| CryptoError::KeyDerivationFailed)
}

// ChaCha20-Poly1305 with an explicit 12-byte nonce. Output is ciphertext || tag.
pub fn seal(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)
}

pub fn open(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

// Returns nonce || ciphertext (24 bytes nonce prepended). Used for data at rest.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let mut nonce_bytes = [0u8; STORAGE_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(STORAGE_NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < STORAGE_NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(STORAGE_NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

pub fn derive_key_from_passphrase(passphrase: &[u8], context: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(passphrase);
    let hash = hasher.finalize();
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&hash.as_bytes()[..SYMMETRIC_KEY_SIZE]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_symmetric_key();
        let nonce = generate_nonce();
        let sealed = seal(&key, &nonce, b"hello beam", b"a|b").unwrap();
        // ciphertext + 16-byte tag
        assert_eq!(sealed.len(), 10 + 16);
        let opened = open(&key, &nonce, &sealed, b"a|b").unwrap();
        assert_eq!(opened, b"hello beam");
    }

    #[test]
    fn test_open_wrong_aad_fails() {
        let key = generate_symmetric_key();
        let nonce = generate_nonce();
        let sealed = seal(&key, &nonce, b"hello", b"a|b").unwrap();
        assert_eq!(
            open(&key, &nonce, &sealed, b"b|a"),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_storage_encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key();
        let encrypted = encrypt(&key, b"secret material").unwrap();
        assert!(encrypted.len() >= STORAGE_NONCE_SIZE + 15 + 16);
        assert_eq!(decrypt(&key, &encrypted).unwrap(), b"secret material");
    }

    #[test]
    fn test_storage_tampered_fails() {
        let key = generate_symmetric_key();
        let mut encrypted = encrypt(&key, b"data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;
        assert!(decrypt(&key, &encrypted).is_err());
        assert!(decrypt(&key, &[]).is_err());
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hkdf_lengths() {
        let mut out = [0u8; 96];
        hkdf_sha256(b"ikm", b"salt", b"info", &mut out).unwrap();
        assert_ne!(out, [0u8; 96]);

        let mut too_long = vec![0u8; 255 * 32 + 1];
        assert_eq!(
            hkdf_sha256(b"ikm", b"salt", b"info", &mut too_long),
            Err(CryptoError::KeyDerivationFailed)
        );
    }

    #[test]
    fn test_passphrase_key_deterministic() {
        let a = derive_key_from_passphrase(b"pw", "ctx");
        let b = derive_key_from_passphrase(b"pw", "ctx");
        let c = derive_key_from_passphrase(b"pw", "other-ctx");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
