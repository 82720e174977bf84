//! Note payloads
//!
//! A note's JSON form sealed into an envelope for its owner.

use tracing::debug;

use nocta_keypair::KEY_SIZE;
use nocta_note::Note;

use crate::envelope::{EnvelopeError, decrypt, encrypt};

/// Encrypt a note for the holder of `recipient_pk`
pub fn encrypt_note_payload(
    recipient_pk: &[u8; KEY_SIZE],
    note: &Note,
) -> Result<String, EnvelopeError> {
    let plaintext = note.to_payload()?;
    encrypt(recipient_pk, &plaintext)
}

/// Decrypt and parse a note.
///
/// A payload that authenticates but does not parse as a note is treated the
/// same as one that fails to decrypt.
pub fn decrypt_note_payload(envelope: &str, secret_key: &[u8; KEY_SIZE]) -> Option<Note> {
    let plaintext = decrypt(envelope, secret_key)?;
    match Note::from_payload(&plaintext) {
        Ok(note) => Some(note),
        Err(e) => {
            debug!("Decrypted payload is not a note: {}", e);
            None
        }
    }
}
