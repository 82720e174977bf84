//! Local key store
//!
//! The encryption keypair is cached per identity. [`KeyManager`] owns the
//! lifecycle: create if absent, reuse if valid, regenerate on corruption or
//! when a random keypair can be replaced by the deterministic one.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use nocta_note::FieldElement;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use crate::derive::{
    DerivationMode, DerivedKeypair, EncryptionKeypair, KEY_SIZE, KeyDerivation, KeyProvenance,
    derive_keypair,
};

const STORE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("key store encoding: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("stored keypair is corrupted: {0}")]
    Corrupted(String),

    #[error("key store lock poisoned")]
    Poisoned,
}

/// A cached keypair plus the metadata needed to validate it later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKeypair {
    pub keypair: EncryptionKeypair,
    pub provenance: KeyProvenance,
    pub mode: DerivationMode,
}

impl StoredKeypair {
    pub fn new(derived: &DerivedKeypair, mode: DerivationMode) -> Self {
        Self {
            keypair: derived.keypair.clone(),
            provenance: derived.provenance,
            mode,
        }
    }

    fn into_derived(self) -> DerivedKeypair {
        DerivedKeypair {
            keypair: self.keypair,
            provenance: self.provenance,
        }
    }

    fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new_derive_key("nocta-keystore-v1");
        hasher.update(self.keypair.public_key());
        hasher.update(self.keypair.secret_key());
        hasher.update(&[self.provenance as u8, self.mode as u8]);
        hasher.finalize().to_hex().to_string()
    }
}

/// Persistence for per-identity keypairs
pub trait KeyStore: Send + Sync {
    /// `Ok(None)` when nothing is stored, `Err(Corrupted)` when what is stored
    /// cannot be trusted.
    fn load(&self, identity: &str) -> Result<Option<StoredKeypair>, KeyStoreError>;

    fn save(&self, identity: &str, stored: &StoredKeypair) -> Result<(), KeyStoreError>;
}

// ============================================================================
// File store
// ============================================================================

/// On-disk layout of one keypair file
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyFile {
    version: u8,
    public_key: String,
    secret_key: String,
    provenance: KeyProvenance,
    mode: DerivationMode,
    checksum: String,
}

/// One JSON file per identity, named by a hash of the identity string
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, identity: &str) -> PathBuf {
        let digest = blake3::hash(identity.as_bytes());
        self.dir
            .join(format!("{}.json", &digest.to_hex().as_str()[..32]))
    }

    fn ensure_dir(&self) -> Result<(), KeyStoreError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;

            #[cfg(unix)]
            {
                let mut perms = fs::metadata(&self.dir)?.permissions();
                perms.set_mode(0o700);
                fs::set_permissions(&self.dir, perms)?;
            }
        }
        Ok(())
    }
}

fn decode_key(field: &str, value: &str) -> Result<[u8; KEY_SIZE], KeyStoreError> {
    STANDARD
        .decode(value)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| KeyStoreError::Corrupted(format!("{field} is not a 32-byte base64 key")))
}

impl KeyStore for FileKeyStore {
    fn load(&self, identity: &str) -> Result<Option<StoredKeypair>, KeyStoreError> {
        let path = self.path_for(identity);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: KeyFile = serde_json::from_str(&contents)
            .map_err(|e| KeyStoreError::Corrupted(format!("{}: {}", path.display(), e)))?;

        if file.version != STORE_VERSION {
            return Err(KeyStoreError::Corrupted(format!(
                "unsupported key file version {}",
                file.version
            )));
        }

        let stored = StoredKeypair {
            keypair: EncryptionKeypair::from_parts(
                decode_key("publicKey", &file.public_key)?,
                decode_key("secretKey", &file.secret_key)?,
            ),
            provenance: file.provenance,
            mode: file.mode,
        };

        if stored.checksum() != file.checksum {
            return Err(KeyStoreError::Corrupted("checksum mismatch".into()));
        }

        Ok(Some(stored))
    }

    fn save(&self, identity: &str, stored: &StoredKeypair) -> Result<(), KeyStoreError> {
        self.ensure_dir()?;
        let path = self.path_for(identity);

        let file = KeyFile {
            version: STORE_VERSION,
            public_key: STANDARD.encode(stored.keypair.public_key()),
            secret_key: STANDARD.encode(stored.keypair.secret_key()),
            provenance: stored.provenance,
            mode: stored.mode,
            checksum: stored.checksum(),
        };

        // Write a private temp file, then rename it over the old entry so a
        // reader never sees a partial key file
        let tmp = path.with_extension("json.tmp");
        match fs::remove_file(&tmp) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut out = options.open(&tmp)?;
        out.write_all(&serde_json::to_vec_pretty(&file)?)?;
        out.sync_all()?;
        drop(out);

        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: RwLock<HashMap<String, StoredKeypair>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self, identity: &str) -> Result<Option<StoredKeypair>, KeyStoreError> {
        let entries = self.entries.read().map_err(|_| KeyStoreError::Poisoned)?;
        Ok(entries.get(identity).cloned())
    }

    fn save(&self, identity: &str, stored: &StoredKeypair) -> Result<(), KeyStoreError> {
        let mut entries = self.entries.write().map_err(|_| KeyStoreError::Poisoned)?;
        entries.insert(identity.to_string(), stored.clone());
        Ok(())
    }
}

// ============================================================================
// Manager
// ============================================================================

pub struct KeyManager<S> {
    store: S,
    derivation: KeyDerivation,
}

impl<S: KeyStore> KeyManager<S> {
    pub fn new(store: S, mode: DerivationMode) -> Self {
        Self {
            store,
            derivation: KeyDerivation::new(mode),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the cached keypair for `identity`, creating or regenerating it
    /// when needed.
    ///
    /// Only a corrupted or stale entry is overwritten; store I/O failures are
    /// returned as-is.
    pub fn load_or_create(
        &self,
        identity: &str,
        scalar: Option<&FieldElement>,
    ) -> Result<DerivedKeypair, KeyStoreError> {
        let existing = match self.store.load(identity) {
            Ok(existing) => existing,
            Err(KeyStoreError::Corrupted(reason)) => {
                warn!("Cached keypair for {} is corrupted ({}), regenerating", identity, reason);
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(stored) = existing {
            match self.validate(&stored, scalar) {
                Ok(()) => {
                    let derived = stored.into_derived();
                    if derived.is_degraded() {
                        warn!(
                            "Reusing random encryption keypair for {} (degraded privacy)",
                            identity
                        );
                    }
                    return Ok(derived);
                }
                Err(reason) => {
                    info!("Replacing cached keypair for {}: {}", identity, reason);
                }
            }
        }

        let derived = self.derivation.derive(scalar);
        self.store
            .save(identity, &StoredKeypair::new(&derived, self.derivation.mode()))?;
        Ok(derived)
    }

    fn validate(
        &self,
        stored: &StoredKeypair,
        scalar: Option<&FieldElement>,
    ) -> Result<(), &'static str> {
        if !stored.keypair.is_consistent() {
            return Err("public key does not match secret key");
        }

        match (scalar, stored.provenance) {
            (Some(_), KeyProvenance::Random) => Err("deterministic seed is now available"),
            (Some(scalar), KeyProvenance::Deterministic) => {
                let mode = self.derivation.mode();
                if stored.mode != mode || derive_keypair(scalar, mode) != stored.keypair {
                    Err("cached keypair does not match the identity seed")
                } else {
                    Ok(())
                }
            }
            (None, _) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct CorruptStore {
        saved: MemoryKeyStore,
    }

    impl KeyStore for CorruptStore {
        fn load(&self, identity: &str) -> Result<Option<StoredKeypair>, KeyStoreError> {
            match self.saved.load(identity)? {
                Some(stored) => Ok(Some(stored)),
                None => Err(KeyStoreError::Corrupted("garbage".into())),
            }
        }

        fn save(&self, identity: &str, stored: &StoredKeypair) -> Result<(), KeyStoreError> {
            self.saved.save(identity, stored)
        }
    }

    fn scalar() -> FieldElement {
        "987654321987654321".parse().unwrap()
    }

    #[test]
    fn test_create_then_reuse() {
        let manager = KeyManager::new(MemoryKeyStore::new(), DerivationMode::Direct);
        let first = manager.load_or_create("alice", Some(&scalar())).unwrap();
        let second = manager.load_or_create("alice", Some(&scalar())).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.keypair, derive_keypair(&scalar(), DerivationMode::Direct));
    }

    #[test]
    fn test_random_keypair_upgraded_when_seed_appears() {
        let manager = KeyManager::new(MemoryKeyStore::new(), DerivationMode::Direct);
        let degraded = manager.load_or_create("bob", None).unwrap();
        assert!(degraded.is_degraded());

        // Still no seed: the random keypair is reused, not rotated
        let again = manager.load_or_create("bob", None).unwrap();
        assert_eq!(degraded.keypair, again.keypair);

        let upgraded = manager.load_or_create("bob", Some(&scalar())).unwrap();
        assert!(!upgraded.is_degraded());
        assert_ne!(upgraded.keypair, degraded.keypair);
    }

    #[test]
    fn test_mismatched_cache_regenerated() {
        let store = MemoryKeyStore::new();
        let wrong = DerivedKeypair {
            keypair: EncryptionKeypair::random(),
            provenance: KeyProvenance::Deterministic,
        };
        store
            .save("carol", &StoredKeypair::new(&wrong, DerivationMode::Direct))
            .unwrap();

        let manager = KeyManager::new(store, DerivationMode::Direct);
        let fixed = manager.load_or_create("carol", Some(&scalar())).unwrap();
        assert_eq!(fixed.keypair, derive_keypair(&scalar(), DerivationMode::Direct));
    }

    #[test]
    fn test_corrupted_entry_regenerated() {
        let manager = KeyManager::new(
            CorruptStore {
                saved: MemoryKeyStore::new(),
            },
            DerivationMode::Direct,
        );
        let derived = manager.load_or_create("dave", Some(&scalar())).unwrap();
        assert_eq!(derived.keypair, derive_keypair(&scalar(), DerivationMode::Direct));
        assert!(manager.store().saved.load("dave").unwrap().is_some());
    }

    #[test]
    fn test_file_store_roundtrip_and_tamper() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys"));
        let manager = KeyManager::new(store.clone(), DerivationMode::Direct);

        let created = manager.load_or_create("erin", Some(&scalar())).unwrap();
        let loaded = store.load("erin").unwrap().unwrap();
        assert_eq!(loaded.keypair, created.keypair);

        // Flip the provenance without updating the checksum
        let path = store.path_for("erin");
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("deterministic", "random")).unwrap();
        assert!(matches!(store.load("erin"), Err(KeyStoreError::Corrupted(_))));

        // The manager repairs it
        let repaired = manager.load_or_create("erin", Some(&scalar())).unwrap();
        assert_eq!(repaired.keypair, created.keypair);
        assert!(store.load("erin").unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_key_file_is_private() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());
        let path = store.path_for("grace");

        // A world-readable leftover gets replaced, not reused
        fs::write(&path, b"{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let manager = KeyManager::new(store.clone(), DerivationMode::Direct);
        manager.load_or_create("grace", Some(&scalar())).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("json.tmp").exists());
        assert!(store.load("grace").unwrap().is_some());
    }

    #[test]
    fn test_file_store_garbage_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());
        fs::write(store.path_for("frank"), b"not json").unwrap();
        assert!(matches!(store.load("frank"), Err(KeyStoreError::Corrupted(_))));
        assert!(store.load("nobody").unwrap().is_none());
    }
}
