use nocta_privacy::EnvelopeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transfer amount must be greater than zero")]
    ZeroAmount,

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: u128, required: u64 },

    #[error("transfer of {transfer} exceeds input note of {note}")]
    TransferExceedsNote { transfer: u64, note: u64 },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Failure reported by the relay, overview service or settlement layer.
///
/// Propagated unmodified; `Clone` so a deduplicated fetch can hand the same
/// failure to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("cannot {action} while plan is {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("step {0} has unfinished settlement or publication")]
    StepIncomplete(usize),

    #[error("step {step} has no output {output}")]
    NoSuchOutput { step: usize, output: usize },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not seal note for publication: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("note publication failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: UpstreamError },
}
