//! Envelope encryption
//!
//! ```text
//! Flow:
//! 1. Sender generates ephemeral keypair (epk, esk)
//! 2. Sender draws a random 24-byte nonce
//! 3. ct = XSalsa20-Poly1305(HSalsa20(X25519(esk, recipient_pk)), nonce, pt)
//! 4. Output = base64(JSON { v: 1, epk, n, ct })   (each field base64)
//! ```
//!
//! Step 3 is NaCl `crypto_box`, so envelopes are byte-compatible with any
//! other NaCl/libsodium/tweetnacl client.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use crypto_box::{
    PublicKey, SalsaBox, SecretKey,
    aead::{Aead, generic_array::GenericArray},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use x25519_dalek::StaticSecret;

use nocta_keypair::KEY_SIZE;
use nocta_note::NoteError;

pub const ENVELOPE_VERSION: u32 = 1;
pub const NONCE_SIZE: usize = 24;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope sealing failed")]
    SealFailed,

    #[error("envelope is not valid base64")]
    Base64,

    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    #[error("envelope field {field} has the wrong length")]
    FieldLength { field: &'static str },

    #[error("note payload: {0}")]
    Payload(#[from] NoteError),
}

/// JSON form inside the outer base64. Field order is part of the wire format.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    v: u32,
    epk: String,
    n: String,
    ct: String,
}

/// A parsed envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub ephemeral_pk: [u8; KEY_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    /// Poly1305 tag followed by the XSalsa20 ciphertext
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Size added on top of the plaintext inside `ct`
    pub const TAG_SIZE: usize = 16;

    /// Decode the outer base64 and JSON layers.
    pub fn parse(envelope: &str) -> Result<Self, EnvelopeError> {
        let json = STANDARD
            .decode(envelope.trim())
            .map_err(|_| EnvelopeError::Base64)?;
        let wire: WireEnvelope = serde_json::from_slice(&json)?;

        if wire.v != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(wire.v));
        }

        Ok(Self {
            ephemeral_pk: decode_fixed("epk", &wire.epk)?,
            nonce: decode_fixed("n", &wire.n)?,
            ciphertext: STANDARD
                .decode(&wire.ct)
                .map_err(|_| EnvelopeError::Base64)?,
        })
    }

    /// Encode to the opaque string stored by the relay
    pub fn to_wire(&self) -> Result<String, EnvelopeError> {
        let wire = WireEnvelope {
            v: ENVELOPE_VERSION,
            epk: STANDARD.encode(self.ephemeral_pk),
            n: STANDARD.encode(self.nonce),
            ct: STANDARD.encode(&self.ciphertext),
        };
        Ok(STANDARD.encode(serde_json::to_vec(&wire)?))
    }

    /// Authenticate and decrypt with the recipient's secret key
    pub fn open(&self, secret_key: &[u8; KEY_SIZE]) -> Option<Vec<u8>> {
        salsa_box(&self.ephemeral_pk, secret_key)
            .decrypt(GenericArray::from_slice(&self.nonce), self.ciphertext.as_slice())
            .ok()
    }
}

fn decode_fixed<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[u8; N], EnvelopeError> {
    let bytes = STANDARD.decode(value).map_err(|_| EnvelopeError::Base64)?;
    bytes
        .try_into()
        .map_err(|_| EnvelopeError::FieldLength { field })
}

fn salsa_box(their_pk: &[u8; KEY_SIZE], our_sk: &[u8; KEY_SIZE]) -> SalsaBox {
    SalsaBox::new(&PublicKey::from(*their_pk), &SecretKey::from(*our_sk))
}

/// Seal `plaintext` for the holder of `recipient_pk`.
///
/// Every call uses a fresh ephemeral keypair and nonce.
pub fn encrypt(recipient_pk: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<String, EnvelopeError> {
    let mut rng = rand::thread_rng();
    let ephemeral_secret = StaticSecret::random_from_rng(&mut rng);
    let ephemeral_pk = x25519_dalek::PublicKey::from(&ephemeral_secret);

    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let ciphertext = salsa_box(recipient_pk, &ephemeral_secret.to_bytes())
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| EnvelopeError::SealFailed)?;

    SealedEnvelope {
        ephemeral_pk: ephemeral_pk.to_bytes(),
        nonce,
        ciphertext,
    }
    .to_wire()
}

/// Open an envelope with the local secret key.
///
/// Parse failures, unknown versions and authentication failures all return
/// `None`; callers skip and continue.
pub fn decrypt(envelope: &str, secret_key: &[u8; KEY_SIZE]) -> Option<Vec<u8>> {
    let sealed = match SealedEnvelope::parse(envelope) {
        Ok(sealed) => sealed,
        Err(e) => {
            debug!("Unreadable envelope: {}", e);
            return None;
        }
    };

    let opened = sealed.open(secret_key);
    if opened.is_none() {
        debug!("Envelope did not authenticate under the local key");
    }
    opened
}
