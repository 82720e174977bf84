//! Nullifiers
//!
//! Derived externally from a spent note. The ledger only compares them, so a
//! nullifier is kept as normalized lowercase hex without a `0x` prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::note::NoteError;

/// A nullifier - unique tag for a spent note
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nullifier(String);

impl Nullifier {
    /// Parse a hex nullifier, with or without `0x`
    pub fn from_hex(s: &str) -> Result<Self, NoteError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(NoteError::InvalidNullifier(s.to_string()));
        }
        let padded = pad_even(digits);
        if hex::decode(&padded).is_err() {
            return Err(NoteError::InvalidNullifier(s.to_string()));
        }
        Ok(Self(padded.to_ascii_lowercase()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Field elements rendered as hex may drop a leading zero nibble
fn pad_even(digits: &str) -> String {
    if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    }
}

impl TryFrom<String> for Nullifier {
    type Error = NoteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Nullifier> for String {
    fn from(value: Nullifier) -> Self {
        value.0
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0)
    }
}
