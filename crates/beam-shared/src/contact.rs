use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::card::ContactCard;
use crate::error::CardError;
use crate::types::BeamId;

/// A peer this device trusts, materialized from a verified contact card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: BeamId,
    pub name: String,
    pub signing_public_key: [u8; 32],
    pub agreement_public_key: [u8; 32],
    pub avatar: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub muted: bool,
}

impl Contact {
    /// Verify `card` and turn it into a contact. An unparsable `createdAt`
    /// falls back to the current time.
    pub fn from_card(card: &ContactCard) -> Result<Self, CardError> {
        let keys = card.verify()?;
        let created_at = DateTime::parse_from_rfc3339(&card.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            id: keys.beam_id,
            name: card.display_name.clone(),
            signing_public_key: keys.signing_key,
            agreement_public_key: keys.agreement_key,
            avatar: None,
            last_seen: None,
            created_at,
            muted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn test_from_card() {
        let identity = Identity::generate();
        let card = ContactCard::build(&identity, "Bob").unwrap();
        let contact = Contact::from_card(&card).unwrap();

        assert_eq!(&contact.id, identity.beam_id());
        assert_eq!(contact.name, "Bob");
        assert_eq!(contact.agreement_public_key, identity.agreement_public_key());
        assert!(!contact.muted);
        assert!(contact.last_seen.is_none());
    }

    #[test]
    fn test_from_unverified_card_fails() {
        let identity = Identity::generate();
        let mut card = ContactCard::build(&identity, "Bob").unwrap();
        card.signature = String::new();
        assert!(Contact::from_card(&card).is_err());
    }
}
