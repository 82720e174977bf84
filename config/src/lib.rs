//! Nocta Configuration
//!
//! Shared configuration for the Nocta CLI and anything embedding the ledger.
//!
//! Handles loading configuration from:
//! 1. NOCTA_CONFIG env var (explicit path)
//! 2. ./nocta.toml (current directory)
//! 3. ~/.nocta/nocta.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use std::{env, fs};

/// Global config instance for convenience access
pub static GLOBAL_CONFIG: OnceLock<NoctaConfig> = OnceLock::new();

const CONFIG_FILE_NAME: &str = "nocta.toml";
const CONFIG_DIR_NAME: &str = ".nocta";
const KEYSTORE_DIR_NAME: &str = "keys";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080/api";
const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_MIN_DUST: u64 = 1;
const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;
const DEFAULT_PUBLISH_BACKOFF_MS: u64 = 500;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoctaConfig {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub overview: OverviewConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

/// Messaging relay connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Bearer token, passed through untouched
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,
    /// Messages requested per page during sync
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.into(),
            token: None,
            timeout_secs: DEFAULT_RELAY_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.into()
}
fn default_relay_timeout() -> u64 {
    DEFAULT_RELAY_TIMEOUT_SECS
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Overview service (nullifier derivation and spent status)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewConfig {
    /// Defaults to the relay URL when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub check_on_chain: bool,
}

/// Key derivation mode for TOML config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivationModeToml {
    #[default]
    Direct,
    Hkdf,
}

impl DerivationModeToml {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "hkdf" => Some(Self::Hkdf),
            _ => None,
        }
    }
}

/// Encryption key storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Defaults to ~/.nocta/keys
    #[serde(default)]
    pub keystore_dir: Option<String>,
    #[serde(default)]
    pub derivation: DerivationModeToml,
}

/// Exact-match handling for TOML config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExactMatchToml {
    #[default]
    RandomSplit,
    DeliverWhole,
}

impl ExactMatchToml {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('_', "-").as_str() {
            "random-split" | "random" => Some(Self::RandomSplit),
            "deliver-whole" | "whole" => Some(Self::DeliverWhole),
            _ => None,
        }
    }
}

/// Output splitting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_min_dust")]
    pub min_dust: u64,
    #[serde(default)]
    pub exact_match: ExactMatchToml,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_dust: DEFAULT_MIN_DUST,
            exact_match: ExactMatchToml::RandomSplit,
        }
    }
}

fn default_min_dust() -> u64 {
    DEFAULT_MIN_DUST
}

/// Note publication retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_publish_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_publish_backoff")]
    pub backoff_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            backoff_ms: DEFAULT_PUBLISH_BACKOFF_MS,
        }
    }
}

impl PublishConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn default_publish_attempts() -> u32 {
    DEFAULT_PUBLISH_ATTEMPTS
}
fn default_publish_backoff() -> u64 {
    DEFAULT_PUBLISH_BACKOFF_MS
}

// ============================================================================
// Override Helpers
// ============================================================================

/// Variable lookup; the process environment outside of tests
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Set field from variable if present
fn env_string(vars: Lookup, key: &str, field: &mut String) {
    if let Some(v) = vars(key) {
        *field = v;
    }
}

/// Set Option<String> from variable if present
fn env_option_string(vars: Lookup, key: &str, field: &mut Option<String>) {
    if let Some(v) = vars(key) {
        *field = Some(v);
    }
}

/// Set field from variable if present and parseable
fn env_parse<T: std::str::FromStr>(vars: Lookup, key: &str, field: &mut T) {
    if let Some(v) = vars(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring {}={:?}: not a valid value", key, v),
        }
    }
}

/// Truthy is "1" or "true"
fn env_bool(vars: Lookup, key: &str) -> Option<bool> {
    vars(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ============================================================================
// Implementation
// ============================================================================

impl NoctaConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::read(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    pub fn find_config_file() -> Option<PathBuf> {
        // 1. Check NOCTA_CONFIG env var
        if let Ok(path) = env::var("NOCTA_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            log::warn!("NOCTA_CONFIG points to missing file: {}", path.display());
        }

        // 2. Check ./nocta.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.nocta/nocta.toml
        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(&process_env);
    }

    fn apply_overrides(&mut self, vars: Lookup) {
        // Relay
        env_string(vars, "NOCTA_RELAY_URL", &mut self.relay.url);
        env_option_string(vars, "NOCTA_RELAY_TOKEN", &mut self.relay.token);
        env_parse(vars, "NOCTA_RELAY_TIMEOUT_SECS", &mut self.relay.timeout_secs);
        env_parse(vars, "NOCTA_PAGE_SIZE", &mut self.relay.page_size);

        // Overview
        env_option_string(vars, "NOCTA_OVERVIEW_URL", &mut self.overview.url);
        if let Some(v) = env_bool(vars, "NOCTA_CHECK_ON_CHAIN") {
            self.overview.check_on_chain = v;
        }

        // Keys
        env_option_string(vars, "NOCTA_KEYSTORE_DIR", &mut self.keys.keystore_dir);
        if let Some(v) = vars("NOCTA_KEY_DERIVATION") {
            match DerivationModeToml::parse(&v) {
                Some(mode) => self.keys.derivation = mode,
                None => log::warn!("Ignoring NOCTA_KEY_DERIVATION={:?}", v),
            }
        }

        // Transfer
        env_parse(vars, "NOCTA_MIN_DUST", &mut self.transfer.min_dust);
        if let Some(v) = vars("NOCTA_EXACT_MATCH") {
            match ExactMatchToml::parse(&v) {
                Some(policy) => self.transfer.exact_match = policy,
                None => log::warn!("Ignoring NOCTA_EXACT_MATCH={:?}", v),
            }
        }

        // Publish
        env_parse(vars, "NOCTA_PUBLISH_RETRIES", &mut self.publish.max_attempts);
        env_parse(vars, "NOCTA_PUBLISH_BACKOFF_MS", &mut self.publish.backoff_ms);
    }

    /// URL of the overview service, falling back to the relay
    pub fn overview_url(&self) -> &str {
        self.overview.url.as_deref().unwrap_or(&self.relay.url)
    }

    /// Directory holding the encryption key store. A leading `~` is the
    /// home directory.
    pub fn keystore_dir(&self) -> PathBuf {
        match &self.keys.keystore_dir {
            Some(dir) => expand_home(dir),
            None => dirs::home_dir()
                .map(|h| h.join(CONFIG_DIR_NAME).join(KEYSTORE_DIR_NAME))
                .unwrap_or_else(|| PathBuf::from(CONFIG_DIR_NAME).join(KEYSTORE_DIR_NAME)),
        }
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.relay.token = Some("replace-me".into());
        sample.overview.url = Some(DEFAULT_RELAY_URL.into());
        sample.keys.keystore_dir = Some(format!("~/{}/{}", CONFIG_DIR_NAME, KEYSTORE_DIR_NAME));
        toml::to_string_pretty(&sample).unwrap_or_default()
    }

    /// Get the global config instance, initializing it if necessary.
    ///
    /// Falls back to defaults if loading fails.
    pub fn global() -> &'static NoctaConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            })
        })
    }

    /// Initialize the global config with a specific instance.
    ///
    /// Returns `Err(config)` if already initialized.
    pub fn set_global(config: NoctaConfig) -> Result<(), NoctaConfig> {
        GLOBAL_CONFIG.set(config)
    }
}

/// Shorthand for `NoctaConfig::global()`.
#[inline]
pub fn global_config() -> &'static NoctaConfig {
    NoctaConfig::global()
}

// ============================================================================
// Tests
// ============================================================================

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => {
            log::warn!("No home directory to expand {:?}", path);
            PathBuf::from(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> NoctaConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = NoctaConfig::default();
        config.apply_overrides(&|key: &str| vars.get(key).cloned());
        config
    }

    #[test]
    fn test_default_config() {
        let config = NoctaConfig::default();
        assert_eq!(config.relay.url, DEFAULT_RELAY_URL);
        assert_eq!(config.transfer.min_dust, DEFAULT_MIN_DUST);
        assert_eq!(config.transfer.exact_match, ExactMatchToml::RandomSplit);
        assert_eq!(config.keys.derivation, DerivationModeToml::Direct);
        assert!(!config.overview.check_on_chain);
        assert_eq!(config.overview_url(), DEFAULT_RELAY_URL);
    }

    #[test]
    fn test_generate_sample() {
        let sample = NoctaConfig::generate_sample();
        assert!(sample.contains("[relay]"));
        assert!(sample.contains("[keys]"));
        assert!(sample.contains("[transfer]"));
        assert!(sample.contains("[publish]"));
    }

    #[test]
    fn test_parse_sample() {
        let sample = NoctaConfig::generate_sample();
        let parsed: NoctaConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.relay.url, DEFAULT_RELAY_URL);
        assert_eq!(parsed.relay.token.as_deref(), Some("replace-me"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: NoctaConfig = toml::from_str(
            r#"
            [transfer]
            exact_match = "deliver-whole"

            [keys]
            derivation = "hkdf"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.transfer.exact_match, ExactMatchToml::DeliverWhole);
        assert_eq!(parsed.transfer.min_dust, DEFAULT_MIN_DUST);
        assert_eq!(parsed.keys.derivation, DerivationModeToml::Hkdf);
        assert_eq!(parsed.publish, PublishConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = overrides(&[
            ("NOCTA_RELAY_URL", "https://relay.example/api"),
            ("NOCTA_RELAY_TOKEN", "t0ken"),
            ("NOCTA_MIN_DUST", "5"),
            ("NOCTA_EXACT_MATCH", "DELIVER_WHOLE"),
            ("NOCTA_PUBLISH_RETRIES", "7"),
            ("NOCTA_PUBLISH_BACKOFF_MS", "0"),
            ("NOCTA_CHECK_ON_CHAIN", "true"),
            ("NOCTA_PAGE_SIZE", "20"),
            ("NOCTA_KEYSTORE_DIR", "/tmp/nocta-keys"),
        ]);
        assert_eq!(config.relay.url, "https://relay.example/api");
        assert_eq!(config.relay.token.as_deref(), Some("t0ken"));
        assert_eq!(config.transfer.min_dust, 5);
        assert_eq!(config.transfer.exact_match, ExactMatchToml::DeliverWhole);
        assert_eq!(config.publish.max_attempts, 7);
        assert_eq!(config.publish.backoff(), Duration::ZERO);
        assert!(config.overview.check_on_chain);
        assert_eq!(config.relay.page_size, 20);
        assert_eq!(config.keystore_dir(), PathBuf::from("/tmp/nocta-keys"));
        assert_eq!(config.overview_url(), "https://relay.example/api");
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let config = overrides(&[("NOCTA_MIN_DUST", "lots"), ("NOCTA_EXACT_MATCH", "sometimes")]);
        assert_eq!(config.transfer.min_dust, DEFAULT_MIN_DUST);
        assert_eq!(config.transfer.exact_match, ExactMatchToml::RandomSplit);
    }

    #[test]
    fn test_sample_keystore_dir_is_under_home() {
        let parsed: NoctaConfig = toml::from_str(&NoctaConfig::generate_sample()).unwrap();
        if let Some(home) = dirs::home_dir() {
            let dir = parsed.keystore_dir();
            assert!(dir.is_absolute());
            assert_eq!(dir, home.join(CONFIG_DIR_NAME).join(KEYSTORE_DIR_NAME));
        }
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/keys"), PathBuf::from("/var/keys"));
        assert_eq!(expand_home("keys"), PathBuf::from("keys"));
        assert_eq!(expand_home("~other/keys"), PathBuf::from("~other/keys"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~"), home);
            assert_eq!(expand_home("~/a/b"), home.join("a/b"));
        }
    }

    #[test]
    fn test_unknown_derivation_override_is_ignored() {
        let mut config = NoctaConfig::default();
        config.keys.derivation = DerivationModeToml::Hkdf;
        config.apply_overrides(&|key: &str| {
            (key == "NOCTA_KEY_DERIVATION").then(|| "sha3".to_string())
        });
        assert_eq!(config.keys.derivation, DerivationModeToml::Hkdf);

        let config = overrides(&[("NOCTA_KEY_DERIVATION", "HKDF")]);
        assert_eq!(config.keys.derivation, DerivationModeToml::Hkdf);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[relay]\nurl = \"http://file.local\"\npage_size = 10\n").unwrap();

        let config = NoctaConfig::read(&path).unwrap();
        assert_eq!(config.relay.url, "http://file.local");
        assert_eq!(config.relay.page_size, 10);
        assert_eq!(config.relay.timeout(), Duration::from_secs(DEFAULT_RELAY_TIMEOUT_SECS));

        fs::write(&path, "[relay\nurl = ").unwrap();
        assert!(NoctaConfig::read(&path).is_err());
    }
}
