//! Per-contact symmetric ratchet.
//!
//! Both sides derive the same root key and two chain keys from their static
//! X25519 shared secret. Each message consumes one step of the sender's chain;
//! the receiver keeps the matching chain and caches keys for skipped indices so
//! out-of-order delivery still decrypts.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{
    CHAIN_LABEL_MESSAGE, CHAIN_LABEL_NEXT, FIELD_SEPARATOR, MAX_SKIPPED_KEYS,
    SEEN_INDEX_CAPACITY, SEEN_NONCE_CAPACITY, NONCE_SIZE, SESSION_INFO, SYMMETRIC_KEY_SIZE,
};
use crate::contact::Contact;
use crate::crypto::{hkdf_sha256, hmac_sha256, sha256, SymmetricKey};
use crate::error::CryptoError;
use crate::identity::Identity;
use crate::types::BeamId;

/// Bounded set that forgets its oldest entries first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "WindowRepr<T>", into = "WindowRepr<T>")]
pub struct ReplayWindow<T: Eq + Hash + Clone> {
    seen: HashSet<T>,
    order: VecDeque<T>,
    capacity: usize,
}

#[derive(Serialize, Deserialize)]
struct WindowRepr<T> {
    capacity: usize,
    entries: Vec<T>,
}

impl<T: Eq + Hash + Clone> ReplayWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.seen.contains(value)
    }

    /// Returns false if `value` was already present.
    pub fn insert(&mut self, value: T) -> bool {
        if self.seen.contains(&value) {
            return false;
        }
        if self.seen.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(value.clone());
        self.order.push_back(value);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<T: Eq + Hash + Clone> From<WindowRepr<T>> for ReplayWindow<T> {
    fn from(repr: WindowRepr<T>) -> Self {
        let mut window = Self::new(repr.capacity);
        for entry in repr.entries {
            window.insert(entry);
        }
        window
    }
}

impl<T: Eq + Hash + Clone> From<ReplayWindow<T>> for WindowRepr<T> {
    fn from(window: ReplayWindow<T>) -> Self {
        Self {
            capacity: window.capacity,
            entries: window.order.into_iter().collect(),
        }
    }
}

/// A single-use message key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey {
    pub index: u64,
    key: SymmetricKey,
}

impl MessageKey {
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageKey")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    root_key: SymmetricKey,
    send_chain_key: SymmetricKey,
    pub send_counter: u64,
    receive_chain_key: SymmetricKey,
    pub receive_counter: u64,
    skipped_keys: VecDeque<(u64, SymmetricKey)>,
    seen_indices: ReplayWindow<u64>,
    seen_nonces: ReplayWindow<[u8; NONCE_SIZE]>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl SessionState {
    /// Derive the session shared with `contact` from the static key agreement.
    pub fn establish(identity: &Identity, contact: &Contact) -> Result<Self, CryptoError> {
        let shared = identity.agree(&contact.agreement_public_key)?;
        let context = binding_context(identity.beam_id(), &contact.id);

        const K: usize = SYMMETRIC_KEY_SIZE;
        let mut okm = [0u8; 3 * K];
        hkdf_sha256(&shared[..], &context, SESSION_INFO, &mut okm)?;

        let mut root_key = [0u8; K];
        let mut chain_a = [0u8; K];
        let mut chain_b = [0u8; K];
        root_key.copy_from_slice(&okm[..K]);
        chain_a.copy_from_slice(&okm[K..2 * K]);
        chain_b.copy_from_slice(&okm[2 * K..]);
        okm.zeroize();

        let (send_chain_key, receive_chain_key) = if identity.beam_id() < &contact.id {
            (chain_a, chain_b)
        } else {
            (chain_b, chain_a)
        };

        let now = Utc::now();
        Ok(Self {
            root_key,
            send_chain_key,
            send_counter: 0,
            receive_chain_key,
            receive_counter: 0,
            skipped_keys: VecDeque::new(),
            seen_indices: ReplayWindow::new(SEEN_INDEX_CAPACITY),
            seen_nonces: ReplayWindow::new(SEEN_NONCE_CAPACITY),
            created_at: now,
            last_used: now,
        })
    }

    /// Key for the next outbound message; moves the send chain one step.
    pub fn advance_send_chain(&mut self) -> Result<MessageKey, CryptoError> {
        let index = self.send_counter;
        let key = derive_message_key(&self.send_chain_key, index)?;
        self.send_chain_key = advance_chain_key(&self.send_chain_key)?;
        self.send_counter += 1;
        self.last_used = Utc::now();
        Ok(MessageKey { index, key })
    }

    /// Key for inbound message `target`, or `None` if it was already consumed,
    /// is too far ahead, or fell out of the skipped-key cache.
    pub fn advance_receive_chain(
        &mut self,
        target: u64,
    ) -> Result<Option<MessageKey>, CryptoError> {
        if self.seen_indices.contains(&target) {
            return Ok(None);
        }

        let key = if target >= self.receive_counter {
            if target - self.receive_counter > MAX_SKIPPED_KEYS {
                return Ok(None);
            }
            while self.receive_counter < target {
                let skipped = derive_message_key(&self.receive_chain_key, self.receive_counter)?;
                self.cache_skipped(self.receive_counter, skipped);
                self.receive_chain_key = advance_chain_key(&self.receive_chain_key)?;
                self.receive_counter += 1;
            }
            let key = derive_message_key(&self.receive_chain_key, target)?;
            self.receive_chain_key = advance_chain_key(&self.receive_chain_key)?;
            self.receive_counter = target + 1;
            key
        } else {
            match self.take_skipped(target) {
                Some(key) => key,
                None => return Ok(None),
            }
        };

        self.seen_indices.insert(target);
        self.last_used = Utc::now();
        Ok(Some(MessageKey { index: target, key }))
    }

    /// Record an inbound nonce. Returns false on replay.
    pub fn record_nonce(&mut self, nonce: &[u8; NONCE_SIZE]) -> bool {
        self.seen_nonces.insert(*nonce)
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    pub fn root_key(&self) -> &SymmetricKey {
        &self.root_key
    }

    fn cache_skipped(&mut self, index: u64, key: SymmetricKey) {
        if self.skipped_keys.len() as u64 >= MAX_SKIPPED_KEYS {
            if let Some((_, mut evicted)) = self.skipped_keys.pop_front() {
                evicted.zeroize();
            }
        }
        self.skipped_keys.push_back((index, key));
    }

    fn take_skipped(&mut self, index: u64) -> Option<SymmetricKey> {
        let pos = self.skipped_keys.iter().position(|(i, _)| *i == index)?;
        self.skipped_keys.remove(pos).map(|(_, key)| key)
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.send_chain_key.zeroize();
        self.receive_chain_key.zeroize();
        for (_, key) in self.skipped_keys.iter_mut() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("send_counter", &self.send_counter)
            .field("receive_counter", &self.receive_counter)
            .field("skipped_keys", &self.skipped_keys.len())
            .field("last_used", &self.last_used)
            .finish_non_exhaustive()
    }
}

/// SHA-256 over both ids, sorted, joined by `|`. Identical on both sides.
pub fn binding_context(a: &BeamId, b: &BeamId) -> [u8; 32] {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    sha256(format!("{low}{FIELD_SEPARATOR}{high}").as_bytes())
}

pub fn derive_message_key(
    chain_key: &SymmetricKey,
    counter: u64,
) -> Result<SymmetricKey, CryptoError> {
    hmac_sha256(chain_key, format!("{CHAIN_LABEL_MESSAGE}{counter}").as_bytes())
}

pub fn advance_chain_key(chain_key: &SymmetricKey) -> Result<SymmetricKey, CryptoError> {
    hmac_sha256(chain_key, CHAIN_LABEL_NEXT)
}
