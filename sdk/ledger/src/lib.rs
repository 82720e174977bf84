//! Nocta Ledger
//!
//! Everything between "which notes do I own" and "what does the settlement
//! layer need to move value".
//!
//! ```text
//!  relay ──fetch──▶ Reconciler ──spendable notes──▶ select_notes
//!                        ▲                              │
//!                        │                              ▼
//!                   re-sync after                 OutputSplitter
//!                        │                              │
//!  relay ◀──publish── PlanExecutor ◀── TransferPlan ◀───┘
//!                        │
//!                        ▼
//!              ProvingSettlementSystem
//! ```
//!
//! Commitments, nullifiers, proofs and on-chain submission belong to the
//! external collaborators in [`services`].

pub mod dedup;
pub mod error;
pub mod executor;
pub mod http;
pub mod plan;
pub mod publish;
pub mod reconciler;
pub mod selector;
pub mod services;
pub mod splitter;

pub use dedup::DedupRelay;
pub use error::{LedgerError, PlanError, PublishError, UpstreamError};
pub use executor::PlanExecutor;
pub use http::{HttpClientConfig, HttpOverviewService, HttpRelay};
pub use plan::{Party, PlanState, StepProgress, TransferPlan, TransferStep, select_and_split};
pub use publish::{NotePublisher, PublishPolicy};
pub use reconciler::{
    AccountOverview, DecryptedNote, Reconciler, compute_overview, decrypt_messages,
};
pub use selector::{Selection, Spendable, select_notes};
pub use services::{
    MessageFilter, MessagePage, MessagingRelay, NoteStatus, OverviewResponse, OverviewService,
    PostAck, ProvingSettlementSystem, SettlementReceipt,
};
pub use splitter::{ExactMatchPolicy, OutputRole, OutputSplitter, Split, SplitOutput};
