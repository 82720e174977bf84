//! Ledger reconciliation
//!
//! Rebuilds "what do I own and what can I spend" from scratch out of the
//! relay's encrypted messages. Nothing is persisted between runs; feeding
//! the same messages in twice gives the same overview.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use nocta_keypair::EncryptionKeypair;
use nocta_note::{EncryptedMessage, FieldElement, MessageKind, Note};
use nocta_privacy::decrypt_note_payload;

use crate::error::LedgerError;
use crate::services::{MessageFilter, MessagingRelay, NoteStatus, OverviewService};

/// A note recovered from a relay message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedNote {
    pub message_id: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub note: Note,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOverview {
    /// Sum of unspent note amounts
    pub balance: u128,
    pub notes: Vec<NoteStatus>,
}

impl AccountOverview {
    pub fn spendable(&self) -> Vec<NoteStatus> {
        self.notes.iter().filter(|n| !n.is_spent).cloned().collect()
    }

    pub fn spent_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_spent).count()
    }
}

/// Decrypt every message addressed to `keypair`.
///
/// Runs in parallel and keeps message order. Messages that fail to decrypt
/// or do not hold a note are skipped.
pub fn decrypt_messages(
    messages: &[EncryptedMessage],
    keypair: &EncryptionKeypair,
) -> Vec<DecryptedNote> {
    let secret_key = keypair.secret_key();
    let notes: Vec<DecryptedNote> = messages
        .par_iter()
        .filter_map(|message| match decrypt_note_payload(&message.ciphertext_envelope, secret_key) {
            Some(note) => Some(DecryptedNote {
                message_id: message.id.clone(),
                kind: message.kind,
                created_at: message.created_at,
                note,
            }),
            None => {
                warn!("Skipping message {}: could not decrypt note", message.id);
                None
            }
        })
        .collect();

    debug!("Decrypted {} of {} messages", notes.len(), messages.len());
    notes
}

/// Annotate notes with spent status and total the unspent ones.
///
/// Nullifiers and spent flags come from the service; the balance is always
/// recomputed here.
pub async fn compute_overview<O: OverviewService + ?Sized>(
    notes: &[Note],
    check_on_chain: bool,
    service: &O,
) -> Result<AccountOverview, LedgerError> {
    let mut seen = HashSet::new();
    let unique: Vec<Note> = notes.iter().filter(|n| seen.insert(*n)).cloned().collect();
    if unique.len() < notes.len() {
        debug!("Dropped {} duplicate notes", notes.len() - unique.len());
    }
    if unique.is_empty() {
        return Ok(AccountOverview::default());
    }

    let response = service.compute_overview(&unique, check_on_chain).await?;
    let reported = response.notes.len();
    let notes: Vec<NoteStatus> = response
        .notes
        .into_iter()
        .filter(|status| {
            if status.amount != status.note.amount {
                warn!(
                    "Dropping note {}: service reported amount {} but the note holds {}",
                    status.nullifier, status.amount, status.note.amount
                );
                return false;
            }
            true
        })
        .collect();
    if notes.len() < reported {
        debug!("Kept {} of {} note statuses", notes.len(), reported);
    }

    let balance: u128 = notes
        .iter()
        .filter(|n| !n.is_spent)
        .map(|n| n.note.amount as u128)
        .sum();

    if response.balance != FieldElement::from_biguint(balance.into()) {
        warn!(
            "Overview service reported balance {} but unspent notes sum to {}",
            response.balance, balance
        );
    }

    Ok(AccountOverview { balance, notes })
}

pub struct Reconciler<O> {
    keypair: EncryptionKeypair,
    overview: O,
}

impl<O: OverviewService> Reconciler<O> {
    pub fn new(keypair: EncryptionKeypair, overview: O) -> Self {
        Self { keypair, overview }
    }

    pub fn keypair(&self) -> &EncryptionKeypair {
        &self.keypair
    }

    /// Decrypt `messages` and compute the overview of the recovered notes
    pub async fn reconcile(
        &self,
        messages: &[EncryptedMessage],
        check_on_chain: bool,
    ) -> Result<AccountOverview, LedgerError> {
        let decrypted = decrypt_messages(messages, &self.keypair);
        let notes: Vec<Note> = decrypted.into_iter().map(|d| d.note).collect();
        compute_overview(&notes, check_on_chain, &self.overview).await
    }

    /// Fetch every page matching `filter`, then reconcile
    pub async fn sync<R: MessagingRelay + ?Sized>(
        &self,
        relay: &R,
        filter: &MessageFilter,
        check_on_chain: bool,
    ) -> Result<AccountOverview, LedgerError> {
        let mut messages = Vec::new();
        let mut offset = filter.offset;
        loop {
            let page = relay.fetch_messages(&filter.with_offset(offset)).await?;
            let fetched = page.messages.len();
            messages.extend(page.messages);
            offset = offset.saturating_add(fetched as u32);

            if fetched == 0 || messages.len() as u64 >= page.total {
                break;
            }
        }

        info!("Fetched {} messages from relay", messages.len());
        self.reconcile(&messages, check_on_chain).await
    }
}
