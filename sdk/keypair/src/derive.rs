//! Key derivation
//!
//! The identity scalar is wallet-signature derived. Turning it into an
//! encryption key happens in exactly one place, [`seed_from_scalar`], so the
//! reuse of key material stays auditable.

use std::fmt;

use hkdf::Hkdf;
use nocta_note::FieldElement;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_SIZE: usize = 32;

const HKDF_SALT: &[u8] = b"nocta-encryption-seed";
const HKDF_INFO: &[u8] = b"x25519-box-v1";

/// How the identity scalar becomes the X25519 secret key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivationMode {
    /// Seed bytes are the secret key verbatim (NaCl `box.keyPair.fromSecretKey`).
    /// Interoperable with every other client of the protocol.
    #[default]
    Direct,
    /// Seed is expanded through HKDF-SHA256 first. Not interoperable with
    /// `Direct` peers.
    Hkdf,
}

/// Where a keypair came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyProvenance {
    Deterministic,
    /// Seed was unavailable. Other parties cannot recompute this public key.
    Random,
}

/// X25519 keypair used to open envelopes addressed to one identity
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKeypair {
    public_key: [u8; KEY_SIZE],
    secret_key: [u8; KEY_SIZE],
}

impl EncryptionKeypair {
    /// Build from secret key bytes; the public key is recomputed.
    pub fn from_secret_bytes(secret_key: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(secret_key);
        let public = PublicKey::from(&secret);
        Self {
            public_key: public.to_bytes(),
            secret_key: secret.to_bytes(),
        }
    }

    /// Reassemble a stored pair without recomputing anything.
    ///
    /// Use [`EncryptionKeypair::is_consistent`] before trusting it.
    pub fn from_parts(public_key: [u8; KEY_SIZE], secret_key: [u8; KEY_SIZE]) -> Self {
        Self {
            public_key,
            secret_key,
        }
    }

    /// Generates a fresh random keypair.
    pub fn random() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        Self::from_secret_bytes(secret.to_bytes())
    }

    pub fn public_key(&self) -> &[u8; KEY_SIZE] {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8; KEY_SIZE] {
        &self.secret_key
    }

    /// Whether the public half really belongs to the secret half
    pub fn is_consistent(&self) -> bool {
        let secret = StaticSecret::from(self.secret_key);
        PublicKey::from(&secret).as_bytes() == &self.public_key
    }
}

impl fmt::Debug for EncryptionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeypair")
            .field("public_key", &hex::encode(self.public_key))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Turn the identity scalar into X25519 seed bytes.
///
/// The scalar is reduced modulo 2^256 and serialized little-endian. In
/// [`DerivationMode::Hkdf`] the result is additionally expanded with
/// HKDF-SHA256 so the curve never sees the raw identity scalar.
pub fn seed_from_scalar(scalar: &FieldElement, mode: DerivationMode) -> [u8; KEY_SIZE] {
    let seed = scalar.to_le_bytes_32();
    match mode {
        DerivationMode::Direct => seed,
        DerivationMode::Hkdf => {
            let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &seed);
            let mut okm = [0u8; KEY_SIZE];
            hk.expand(HKDF_INFO, &mut okm)
                .expect("HKDF expansion of 32 bytes cannot fail");
            okm
        }
    }
}

/// Deterministic keypair for a scalar
pub fn derive_keypair(scalar: &FieldElement, mode: DerivationMode) -> EncryptionKeypair {
    EncryptionKeypair::from_secret_bytes(seed_from_scalar(scalar, mode))
}

/// A keypair together with how it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeypair {
    pub keypair: EncryptionKeypair,
    pub provenance: KeyProvenance,
}

impl DerivedKeypair {
    /// True when the keypair is random and peers cannot re-derive it
    pub fn is_degraded(&self) -> bool {
        self.provenance == KeyProvenance::Random
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDerivation {
    mode: DerivationMode,
}

impl KeyDerivation {
    pub fn new(mode: DerivationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DerivationMode {
        self.mode
    }

    /// Derive the identity keypair, falling back to a random one when the
    /// scalar is unavailable.
    pub fn derive(&self, scalar: Option<&FieldElement>) -> DerivedKeypair {
        match scalar {
            Some(scalar) => {
                debug!("Deriving encryption keypair ({:?} mode)", self.mode);
                DerivedKeypair {
                    keypair: derive_keypair(scalar, self.mode),
                    provenance: KeyProvenance::Deterministic,
                }
            }
            None => {
                warn!(
                    "Identity seed unavailable, using a random encryption keypair. \
                     Senders cannot recompute this public key (degraded privacy)"
                );
                DerivedKeypair {
                    keypair: EncryptionKeypair::random(),
                    provenance: KeyProvenance::Random,
                }
            }
        }
    }
}
