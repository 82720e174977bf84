//! Nocta Privacy
//!
//! Note contents travel between parties as self-describing envelopes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Sender                                        Recipient     │
//! │  (esk, epk) fresh ─┐                                         │
//! │  nonce (24B) fresh ├─ box(pt, n, recipient_pk, esk) ──▶ ct   │
//! │                    │                                         │
//! │  base64(JSON{v:1, epk, n, ct}) ───────relay──────▶ open(sk)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Opening never raises: "not for me" and "corrupted" both come back as `None`.

pub mod envelope;
pub mod payload;

pub use envelope::{ENVELOPE_VERSION, EnvelopeError, NONCE_SIZE, SealedEnvelope, decrypt, encrypt};
pub use payload::{decrypt_note_payload, encrypt_note_payload};
