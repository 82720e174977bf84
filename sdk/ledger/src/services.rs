//! External collaborators
//!
//! The relay stores envelopes, the overview service knows which nullifiers
//! are spent, and the settlement system proves and submits transfers. The
//! ledger only talks to them through these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nocta_note::{EncryptedMessage, FieldElement, MessageKind, Note, Nullifier};

use crate::error::UpstreamError;
use crate::plan::TransferStep;

// ============================================================================
// Messaging relay
// ============================================================================

/// Query for `fetchMessages`; also the deduplication key for in-flight fetches
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_key: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl MessageFilter {
    /// All messages addressed to `recipient_key`, one page at a time
    pub fn for_recipient(recipient_key: impl Into<String>, limit: u32) -> Self {
        Self {
            recipient_key: Some(recipient_key.into()),
            limit,
            ..Default::default()
        }
    }

    pub fn with_offset(&self, offset: u32) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<EncryptedMessage>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAck {
    pub id: String,
}

#[async_trait]
pub trait MessagingRelay: Send + Sync {
    async fn fetch_messages(&self, filter: &MessageFilter) -> Result<MessagePage, UpstreamError>;

    /// `recipient_key` is the base64 encryption public key of the note owner
    async fn post_message(
        &self,
        recipient_key: &str,
        envelope: &str,
        kind: MessageKind,
    ) -> Result<PostAck, UpstreamError>;
}

// ============================================================================
// Overview service
// ============================================================================

/// A note annotated with its externally derived nullifier and spent status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteStatus {
    pub note: Note,
    #[serde(rename = "nullifierHex")]
    pub nullifier: Nullifier,
    pub is_spent: bool,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewResponse {
    /// Balance as reported by the service; the ledger recomputes its own
    pub balance: FieldElement,
    pub notes: Vec<NoteStatus>,
}

#[async_trait]
pub trait OverviewService: Send + Sync {
    async fn compute_overview(
        &self,
        notes: &[Note],
        check_on_chain: bool,
    ) -> Result<OverviewResponse, UpstreamError>;
}

// ============================================================================
// Proving / settlement
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub tx_id: String,
    /// Commitments of the produced outputs, in output order
    #[serde(default)]
    pub commitments: Vec<String>,
}

#[async_trait]
pub trait ProvingSettlementSystem: Send + Sync {
    /// Prove and submit a single-input, two-output transfer
    async fn submit_transfer(
        &self,
        step: &TransferStep,
    ) -> Result<SettlementReceipt, UpstreamError>;
}
