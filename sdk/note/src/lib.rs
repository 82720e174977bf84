//! Nocta Note Types
//!
//! Plain data carried through the shielded-note ledger.
//!
//! ```text
//! EncryptedMessage ──decrypt──▶ Note ──(external)──▶ Nullifier
//!        │                        │
//!   relay payload           amount / tokenId / ownerKey / randomness / memo
//! ```
//!
//! Commitments and nullifiers are computed by the proving system; this crate
//! only carries their values around.

pub mod field;
pub mod message;
pub mod note;
pub mod nullifier;

pub use field::{FieldElement, FieldError};
pub use message::{EncryptedMessage, MessageKind};
pub use note::{Note, NoteError, NoteRandomness};
pub use nullifier::Nullifier;
