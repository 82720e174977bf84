//! Relay messages
//!
//! An encrypted note in transit: produced by a sender, stored by the relay and
//! fetched only by the holder of the matching secret key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What created the note inside the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Deposit,
    Transfer,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Deposit => "deposit",
            MessageKind::Transfer => "transfer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    pub id: String,
    /// Recipient's encryption public key (base64)
    pub recipient_key: String,
    /// Opaque envelope string
    #[serde(alias = "ciphertext")]
    pub ciphertext_envelope: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}
