//! Shielded Notes
//!
//! A Note represents value held privately by one owner.
//!
//! ```text
//! Note = {
//!     amount: u64,                    // Amount in the smallest unit
//!     tokenId: Field,                 // Asset identifier
//!     ownerKey: Field,                // Owner's shielded public key
//!     randomness: { r: Field, s?: Field },
//!     memo?: Field,
//! }
//! ```
//!
//! The JSON form above is also the plaintext carried inside an envelope.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::FieldElement;

/// Blinding factors are drawn from 31 bytes so they stay below any
/// ~254-bit proving field modulus.
const BLINDING_BYTES: usize = 31;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("malformed note payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid nullifier: {0:?}")]
    InvalidNullifier(String),
}

/// A shielded note representing privately held value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// The value (amount) held in this note
    #[serde(with = "amount_serde")]
    pub amount: u64,
    pub token_id: FieldElement,
    /// Owner's shielded public key (who can spend this note)
    pub owner_key: FieldElement,
    pub randomness: NoteRandomness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<FieldElement>,
}

/// Commitment blinding factors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteRandomness {
    pub r: FieldElement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<FieldElement>,
}

impl NoteRandomness {
    /// Fresh `r` and `s` blinding factors
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            r: random_field(rng),
            s: Some(random_field(rng)),
        }
    }
}

fn random_field<R: Rng + ?Sized>(rng: &mut R) -> FieldElement {
    let mut bytes = [0u8; BLINDING_BYTES];
    rng.fill_bytes(&mut bytes);
    FieldElement::from_le_bytes(&bytes)
}

impl Note {
    /// Create a new note with random blinding
    pub fn new<R: Rng + ?Sized>(
        amount: u64,
        token_id: FieldElement,
        owner_key: FieldElement,
        memo: Option<FieldElement>,
        rng: &mut R,
    ) -> Self {
        Self {
            amount,
            token_id,
            owner_key,
            randomness: NoteRandomness::random(rng),
            memo,
        }
    }

    /// Create a note with explicit randomness (for testing/recovery)
    pub fn with_randomness(
        amount: u64,
        token_id: FieldElement,
        owner_key: FieldElement,
        randomness: NoteRandomness,
    ) -> Self {
        Self {
            amount,
            token_id,
            owner_key,
            randomness,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: FieldElement) -> Self {
        self.memo = Some(memo);
        self
    }

    /// Serialize to the JSON plaintext placed inside an envelope
    pub fn to_payload(&self) -> Result<Vec<u8>, NoteError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a decrypted plaintext.
    ///
    /// Missing `amount`, `tokenId`, `ownerKey` or `randomness.r`, or any
    /// non-numeric value in those fields, is a malformed note.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, NoteError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// `amount` is written as a decimal string and accepted as a string or number.
mod amount_serde {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(amount: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(u64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Amount::deserialize(deserializer)? {
            Amount::Number(n) => Ok(n),
            Amount::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid note amount: {s:?}"))),
        }
    }
}
