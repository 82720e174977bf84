//! Nocta Keypair
//!
//! Per-identity X25519 encryption keypairs.
//!
//! ```text
//! identity scalar ──mod 2^256, LE──▶ seed ──X25519──▶ (publicKey, secretKey)
//!        │                                                 │
//!   (missing) ──▶ random keypair, flagged degraded    cached in a KeyStore
//! ```
//!
//! Anyone holding the same scalar recomputes the same public key, so no
//! private key ever crosses the wire.

pub mod derive;
pub mod store;

pub use derive::{
    DerivationMode, DerivedKeypair, EncryptionKeypair, KEY_SIZE, KeyDerivation, KeyProvenance,
    derive_keypair, seed_from_scalar,
};
pub use store::{FileKeyStore, KeyManager, KeyStore, KeyStoreError, MemoryKeyStore, StoredKeypair};
