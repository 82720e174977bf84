//! Transfer plans
//!
//! A transfer that needs several input notes becomes a sequence of
//! single-input, two-output steps. The plan tracks which steps have settled
//! and which outputs have been published so an interrupted transfer can be
//! resumed without repeating work.
//!
//! ```text
//! Pending ──begin──▶ StepInFlight(0) ──complete──▶ StepCompleted(0) ──begin──▶ ...
//!                         │
//!                         └──fail──▶ Failed{0} ──resume──▶ StepInFlight(0)
//!
//! StepInFlight(last) ──complete──▶ Completed
//! ```

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use nocta_keypair::KEY_SIZE;
use nocta_note::{FieldElement, Note, Nullifier};

use crate::error::{LedgerError, PlanError};
use crate::selector::select_notes;
use crate::services::{NoteStatus, PostAck, SettlementReceipt};
use crate::splitter::{OutputRole, OutputSplitter, Split};

/// One side of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    /// Owner key placed in notes
    pub owner_key: FieldElement,
    /// X25519 public key notes are sealed to
    #[serde(with = "hex::serde")]
    pub encryption_key: [u8; KEY_SIZE],
}

impl Party {
    pub fn new(owner_key: FieldElement, encryption_key: [u8; KEY_SIZE]) -> Self {
        Self {
            owner_key,
            encryption_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStep {
    pub index: usize,
    pub input: NoteStatus,
    /// Amount asked of this step
    pub requested: u64,
    pub split: Split,
    /// Output notes in split order, blinding included
    pub outputs: [Note; 2],
    pub owed_before: u64,
    pub owed_after: u64,
}

impl TransferStep {
    pub fn nullifier(&self) -> &Nullifier {
        &self.input.nullifier
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub settlement: Option<SettlementReceipt>,
    pub published: [Option<PostAck>; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanState {
    Pending,
    StepInFlight(usize),
    StepCompleted(usize),
    Completed,
    Failed { step: usize, reason: String },
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanState::Pending => write!(f, "pending"),
            PlanState::StepInFlight(i) => write!(f, "step {} in flight", i),
            PlanState::StepCompleted(i) => write!(f, "step {} completed", i),
            PlanState::Completed => write!(f, "completed"),
            PlanState::Failed { step, reason } => write!(f, "failed at step {}: {}", step, reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    amount: u64,
    recipient: Party,
    sender: Party,
    steps: Vec<TransferStep>,
    progress: Vec<StepProgress>,
    state: PlanState,
}

impl TransferPlan {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn recipient(&self) -> &Party {
        &self.recipient
    }

    pub fn sender(&self) -> &Party {
        &self.sender
    }

    pub fn state(&self) -> &PlanState {
        &self.state
    }

    pub fn steps(&self) -> &[TransferStep] {
        &self.steps
    }

    pub fn progress(&self) -> &[StepProgress] {
        &self.progress
    }

    /// Total the recipient receives once every step settles
    pub fn delivered(&self) -> u64 {
        self.steps.iter().map(|s| s.split.delivered).sum()
    }

    /// Shortfall left after the last step. Non-zero only when an exact-match
    /// random split delivered less than the full note.
    pub fn outstanding(&self) -> u64 {
        self.steps.last().map_or(self.amount, |s| s.owed_after)
    }

    pub fn is_finished(&self) -> bool {
        self.state == PlanState::Completed
    }

    /// Step that `begin_step` would start, if any
    pub fn next_step_index(&self) -> Option<usize> {
        match &self.state {
            PlanState::Pending => Some(0),
            PlanState::StepCompleted(i) if i + 1 < self.steps.len() => Some(i + 1),
            PlanState::StepInFlight(i) | PlanState::Failed { step: i, .. } => Some(*i),
            _ => None,
        }
    }

    /// Encryption key output `output` of step `step` is sealed to
    pub fn output_key(&self, step: usize, output: usize) -> Result<[u8; KEY_SIZE], PlanError> {
        let split_output = self
            .steps
            .get(step)
            .and_then(|s| s.split.outputs.get(output))
            .ok_or(PlanError::NoSuchOutput { step, output })?;
        Ok(match split_output.role {
            OutputRole::Recipient => self.recipient.encryption_key,
            OutputRole::Change => self.sender.encryption_key,
        })
    }

    /// Zero-amount outputs are never published
    pub fn needs_publication(&self, step: usize, output: usize) -> Result<bool, PlanError> {
        let note = self
            .steps
            .get(step)
            .and_then(|s| s.outputs.get(output))
            .ok_or(PlanError::NoSuchOutput { step, output })?;
        Ok(note.amount > 0 && self.progress[step].published[output].is_none())
    }

    pub fn begin_step(&mut self) -> Result<usize, PlanError> {
        let next = match &self.state {
            PlanState::Pending => 0,
            PlanState::StepCompleted(i) if i + 1 < self.steps.len() => i + 1,
            _ => return Err(self.invalid("begin a step")),
        };
        debug!("Plan step {} of {} in flight", next + 1, self.steps.len());
        self.state = PlanState::StepInFlight(next);
        Ok(next)
    }

    pub fn record_settlement(&mut self, receipt: SettlementReceipt) -> Result<(), PlanError> {
        let step = self.in_flight("record settlement")?;
        self.progress[step].settlement = Some(receipt);
        Ok(())
    }

    pub fn record_publication(&mut self, output: usize, ack: PostAck) -> Result<(), PlanError> {
        let step = self.in_flight("record publication")?;
        let slot = self.progress[step]
            .published
            .get_mut(output)
            .ok_or(PlanError::NoSuchOutput { step, output })?;
        *slot = Some(ack);
        Ok(())
    }

    pub fn complete_step(&mut self) -> Result<(), PlanError> {
        let step = self.in_flight("complete a step")?;
        if self.progress[step].settlement.is_none()
            || self.needs_publication(step, 0)?
            || self.needs_publication(step, 1)?
        {
            return Err(PlanError::StepIncomplete(step));
        }

        if step + 1 == self.steps.len() {
            info!("Transfer plan completed ({} steps)", self.steps.len());
            self.state = PlanState::Completed;
        } else {
            self.state = PlanState::StepCompleted(step);
        }
        Ok(())
    }

    pub fn fail_step(&mut self, reason: impl Into<String>) -> Result<(), PlanError> {
        let step = self.in_flight("fail a step")?;
        self.state = PlanState::Failed {
            step,
            reason: reason.into(),
        };
        Ok(())
    }

    /// Re-arm the failed step. Settlement receipts and publications already
    /// recorded are kept.
    pub fn resume(&mut self) -> Result<usize, PlanError> {
        match &self.state {
            PlanState::Failed { step, .. } => {
                let step = *step;
                self.state = PlanState::StepInFlight(step);
                Ok(step)
            }
            _ => Err(self.invalid("resume")),
        }
    }

    /// Nullifiers of inputs whose step has settled
    pub fn spent_inputs(&self) -> Vec<&Nullifier> {
        self.steps
            .iter()
            .zip(&self.progress)
            .filter(|(_, p)| p.settlement.is_some())
            .map(|(s, _)| s.nullifier())
            .collect()
    }

    fn in_flight(&self, action: &'static str) -> Result<usize, PlanError> {
        match self.state {
            PlanState::StepInFlight(step) => Ok(step),
            _ => Err(self.invalid(action)),
        }
    }

    fn invalid(&self, action: &'static str) -> PlanError {
        PlanError::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }
}

/// Select inputs among unspent `spendable` notes and split each of them.
///
/// Every step asks for `min(owed, input amount)` and `owed` goes down by what
/// the step actually delivers.
pub fn select_and_split<R: Rng + ?Sized>(
    spendable: &[NoteStatus],
    amount: u64,
    recipient: &Party,
    sender: &Party,
    splitter: &OutputSplitter,
    memo: Option<FieldElement>,
    rng: &mut R,
) -> Result<TransferPlan, LedgerError> {
    let unspent: Vec<NoteStatus> = spendable
        .iter()
        .filter(|n| !n.is_spent)
        .filter(|n| {
            let consistent = n.amount == n.note.amount;
            if !consistent {
                warn!(
                    "Not spending note {}: status amount {} differs from note amount {}",
                    n.nullifier, n.amount, n.note.amount
                );
            }
            consistent
        })
        .cloned()
        .collect();
    let selection = select_notes(&unspent, amount)?;

    let mut steps = Vec::with_capacity(selection.notes.len());
    let mut owed = amount;
    for input in selection.notes {
        if owed == 0 {
            break;
        }
        let requested = owed.min(input.note.amount);
        let split = splitter.split(
            &input.note,
            requested,
            &recipient.owner_key,
            memo.clone(),
            rng,
        )?;
        let outputs = [split.outputs[0].to_note(rng), split.outputs[1].to_note(rng)];
        let owed_after = owed - split.delivered;

        debug!(
            "Step {}: input {} requested {} delivered {} change {}",
            steps.len(),
            input.amount,
            requested,
            split.delivered,
            split.returned
        );

        steps.push(TransferStep {
            index: steps.len(),
            input,
            requested,
            split,
            outputs,
            owed_before: owed,
            owed_after,
        });
        owed = owed_after;
    }

    let progress = vec![StepProgress::default(); steps.len()];
    Ok(TransferPlan {
        amount,
        recipient: recipient.clone(),
        sender: sender.clone(),
        steps,
        progress,
        state: PlanState::Pending,
    })
}
