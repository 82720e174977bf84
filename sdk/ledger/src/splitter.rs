//! Output splitting
//!
//! Every transfer step spends one input note and produces exactly two
//! outputs.
//!
//! ```text
//! partial (T < N):   out1 = T      → recipient
//!                    out2 = N - T  → sender (change)
//!
//! exact   (T == N):  out1 ~ U[minDust, N - minDust]   (N < 2·minDust: ⌊N/2⌋)
//!                    out2 = N - out1
//!                    fair coin picks which of out1/out2 the recipient gets
//! ```
//!
//! In the exact case the recipient therefore receives a random share, not
//! `T`. [`ExactMatchPolicy::DeliverWhole`] opts out of that behavior.

use nocta_note::{FieldElement, Note};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

pub const DEFAULT_MIN_DUST: u64 = 1;

/// What to do when the transfer consumes the whole input note
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExactMatchPolicy {
    /// Randomly split the note and randomly assign the shares
    #[default]
    RandomSplit,
    /// Deliver the full note; the change output carries zero
    DeliverWhole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputRole {
    Recipient,
    Change,
}

/// One of the two outputs of a split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOutput {
    pub amount: u64,
    pub owner_key: FieldElement,
    pub token_id: FieldElement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<FieldElement>,
    pub role: OutputRole,
}

impl SplitOutput {
    /// Materialize as a note with fresh blinding
    pub fn to_note<R: Rng + ?Sized>(&self, rng: &mut R) -> Note {
        Note::new(
            self.amount,
            self.token_id.clone(),
            self.owner_key.clone(),
            self.memo.clone(),
            rng,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    /// `[out1, out2]`
    pub outputs: [SplitOutput; 2],
    /// Amount assigned to the recipient
    pub delivered: u64,
    /// Amount returned to the sender as change
    pub returned: u64,
    pub exact_match: bool,
}

impl Split {
    pub fn recipient_output(&self) -> &SplitOutput {
        self.output(OutputRole::Recipient)
    }

    pub fn change_output(&self) -> &SplitOutput {
        self.output(OutputRole::Change)
    }

    fn output(&self, role: OutputRole) -> &SplitOutput {
        if self.outputs[0].role == role {
            &self.outputs[0]
        } else {
            &self.outputs[1]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSplitter {
    min_dust: u64,
    policy: ExactMatchPolicy,
}

impl Default for OutputSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DUST)
    }
}

impl OutputSplitter {
    pub fn new(min_dust: u64) -> Self {
        Self {
            min_dust,
            policy: ExactMatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExactMatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn min_dust(&self) -> u64 {
        self.min_dust
    }

    pub fn policy(&self) -> ExactMatchPolicy {
        self.policy
    }

    /// Split `input` into a recipient output and a change output.
    ///
    /// Change always goes back to the input note's owner, in the input's
    /// token. The memo is attached to the recipient's output only.
    pub fn split<R: Rng + ?Sized>(
        &self,
        input: &Note,
        transfer: u64,
        recipient_key: &FieldElement,
        memo: Option<FieldElement>,
        rng: &mut R,
    ) -> Result<Split, LedgerError> {
        let n = input.amount;
        if transfer == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if transfer > n {
            return Err(LedgerError::TransferExceedsNote {
                transfer,
                note: n,
            });
        }

        let output = |amount: u64, role: OutputRole| SplitOutput {
            amount,
            owner_key: match role {
                OutputRole::Recipient => recipient_key.clone(),
                OutputRole::Change => input.owner_key.clone(),
            },
            token_id: input.token_id.clone(),
            memo: match role {
                OutputRole::Recipient => memo.clone(),
                OutputRole::Change => None,
            },
            role,
        };

        if transfer < n {
            return Ok(Split {
                outputs: [
                    output(transfer, OutputRole::Recipient),
                    output(n - transfer, OutputRole::Change),
                ],
                delivered: transfer,
                returned: n - transfer,
                exact_match: false,
            });
        }

        if self.policy == ExactMatchPolicy::DeliverWhole {
            return Ok(Split {
                outputs: [output(n, OutputRole::Recipient), output(0, OutputRole::Change)],
                delivered: n,
                returned: 0,
                exact_match: true,
            });
        }

        let out1 = if n < self.min_dust.saturating_mul(2) {
            n / 2
        } else {
            rng.gen_range(self.min_dust..=n - self.min_dust)
        };
        let out2 = n - out1;

        let (first, second) = if rng.gen_bool(0.5) {
            (OutputRole::Recipient, OutputRole::Change)
        } else {
            (OutputRole::Change, OutputRole::Recipient)
        };

        let (delivered, returned) = match first {
            OutputRole::Recipient => (out1, out2),
            OutputRole::Change => (out2, out1),
        };

        Ok(Split {
            outputs: [output(out1, first), output(out2, second)],
            delivered,
            returned,
            exact_match: true,
        })
    }
}
