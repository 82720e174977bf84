use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use log::info;

use nocta_config::{DerivationModeToml, ExactMatchToml, NoctaConfig};
use nocta_keypair::{DerivationMode, DerivedKeypair, FileKeyStore, KEY_SIZE, KeyManager};
use nocta_ledger::{
    AccountOverview, DedupRelay, ExactMatchPolicy, HttpClientConfig, HttpOverviewService, HttpRelay,
    MessageFilter, OutputSplitter, Party, Reconciler, select_and_split,
};
use nocta_note::{FieldElement, Note};
use nocta_privacy::encrypt_note_payload;

use crate::IdentityArgs;

pub struct PlanRequest {
    pub amount: u64,
    pub owner: FieldElement,
    pub to_owner: FieldElement,
    pub to_key: String,
    pub memo: Option<FieldElement>,
}

// ============================================================================
// Config translation
// ============================================================================

fn derivation_mode(config: &NoctaConfig) -> DerivationMode {
    match config.keys.derivation {
        DerivationModeToml::Direct => DerivationMode::Direct,
        DerivationModeToml::Hkdf => DerivationMode::Hkdf,
    }
}

fn splitter(config: &NoctaConfig) -> OutputSplitter {
    let policy = match config.transfer.exact_match {
        ExactMatchToml::RandomSplit => ExactMatchPolicy::RandomSplit,
        ExactMatchToml::DeliverWhole => ExactMatchPolicy::DeliverWhole,
    };
    OutputSplitter::new(config.transfer.min_dust).with_policy(policy)
}

fn http_config(config: &NoctaConfig, base_url: &str) -> HttpClientConfig {
    HttpClientConfig {
        base_url: base_url.to_string(),
        token: config.relay.token.clone(),
        timeout: config.relay.timeout(),
    }
}

fn parse_public_key(encoded: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .context("Public key is not valid base64")?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("Public key must be {} bytes, got {}", KEY_SIZE, b.len()))
}

fn load_identity(config: &NoctaConfig, args: &IdentityArgs) -> Result<DerivedKeypair> {
    let dir = config.keystore_dir();
    let manager = KeyManager::new(FileKeyStore::new(&dir), derivation_mode(config));
    manager
        .load_or_create(&args.identity, args.scalar.as_ref())
        .with_context(|| format!("Failed to load keypair from {}", dir.display()))
}

// ============================================================================
// Commands
// ============================================================================

pub fn keys(config: &NoctaConfig, args: &IdentityArgs) -> Result<()> {
    let derived = load_identity(config, args)?;

    println!("🔑 Identity:    {}", args.identity);
    println!("   Public key:  {}", BASE64.encode(derived.keypair.public_key()));
    println!("   Provenance:  {:?}", derived.provenance);
    if derived.is_degraded() {
        println!("⚠️  Random keypair: senders cannot derive this key. Pass --scalar to fix.");
    }
    Ok(())
}

pub fn encrypt(to: &str, note: Option<&Path>, text: Option<&str>) -> Result<()> {
    let recipient = parse_public_key(to)?;

    let envelope = match (note, text) {
        (Some(path), _) => {
            let contents = fs::read(path)
                .with_context(|| format!("Failed to read note file: {}", path.display()))?;
            let note = Note::from_payload(&contents).context("Note file is not a valid note")?;
            encrypt_note_payload(&recipient, &note)?
        }
        (None, Some(text)) => nocta_privacy::encrypt(&recipient, text.as_bytes())?,
        (None, None) => bail!("Pass --note <file> or --text <plaintext>"),
    };

    println!("{}", envelope);
    Ok(())
}

pub fn decrypt(config: &NoctaConfig, args: &IdentityArgs, envelope: &str) -> Result<()> {
    let derived = load_identity(config, args)?;
    let plaintext = nocta_privacy::decrypt(envelope.trim(), derived.keypair.secret_key())
        .ok_or_else(|| anyhow!("Envelope could not be opened with this identity's key"))?;

    match Note::from_payload(&plaintext) {
        Ok(note) => println!("{}", serde_json::to_string_pretty(&note)?),
        Err(_) => println!("{}", String::from_utf8_lossy(&plaintext)),
    }
    Ok(())
}

async fn fetch_overview(
    config: &NoctaConfig,
    derived: DerivedKeypair,
    check_on_chain: bool,
) -> Result<AccountOverview> {
    let recipient_key = BASE64.encode(derived.keypair.public_key());
    let relay = DedupRelay::new(Arc::new(HttpRelay::new(http_config(config, &config.relay.url))?));
    let overview = HttpOverviewService::new(http_config(config, config.overview_url()))?;
    let reconciler = Reconciler::new(derived.keypair, overview);

    info!("Syncing notes for {}", recipient_key);
    let filter = MessageFilter::for_recipient(recipient_key, config.relay.page_size);
    let overview = reconciler
        .sync(&relay, &filter, check_on_chain || config.overview.check_on_chain)
        .await?;
    Ok(overview)
}

pub async fn sync(config: &NoctaConfig, args: &IdentityArgs, check_on_chain: bool) -> Result<()> {
    let derived = load_identity(config, args)?;
    let overview = fetch_overview(config, derived, check_on_chain).await?;

    println!("💰 Balance: {}", overview.balance);
    println!("   Notes:   {} ({} spent)", overview.notes.len(), overview.spent_count());
    for status in &overview.notes {
        println!(
            "   {} {:>12}  token {}  nullifier {}",
            if status.is_spent { "✗" } else { "✓" },
            status.amount,
            status.note.token_id,
            status.nullifier
        );
    }
    Ok(())
}

pub async fn plan(config: &NoctaConfig, args: &IdentityArgs, request: PlanRequest) -> Result<()> {
    let derived = load_identity(config, args)?;
    let sender = Party::new(request.owner, *derived.keypair.public_key());
    let recipient = Party::new(request.to_owner, parse_public_key(&request.to_key)?);

    let overview = fetch_overview(config, derived, false).await?;
    let plan = select_and_split(
        &overview.spendable(),
        request.amount,
        &recipient,
        &sender,
        &splitter(config),
        request.memo,
        &mut rand::thread_rng(),
    )?;

    println!("📋 Transfer of {} in {} step(s)", plan.amount(), plan.steps().len());
    for step in plan.steps() {
        println!(
            "   step {}: input {} → recipient {}, change {}",
            step.index, step.input.amount, step.split.delivered, step.split.returned
        );
    }
    if plan.outstanding() > 0 {
        println!(
            "⚠️  {} remains undelivered after random exact-match splits",
            plan.outstanding()
        );
    }
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

pub fn show_config(config: &NoctaConfig, sample: bool) -> Result<()> {
    if sample {
        print!("{}", NoctaConfig::generate_sample());
        return Ok(());
    }
    if let Some(path) = NoctaConfig::find_config_file() {
        println!("# Loaded from {}", path.display());
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_public_key() {
        let key = [7u8; KEY_SIZE];
        assert_eq!(parse_public_key(&BASE64.encode(key)).unwrap(), key);
        assert!(parse_public_key("AAAA").is_err());
        assert!(parse_public_key("not base64!").is_err());
    }

    #[test]
    fn test_config_translation() {
        let mut config = NoctaConfig::default();
        config.transfer.min_dust = 9;
        config.transfer.exact_match = ExactMatchToml::DeliverWhole;
        config.keys.derivation = DerivationModeToml::Hkdf;

        let splitter = splitter(&config);
        assert_eq!(splitter.min_dust(), 9);
        assert_eq!(splitter.policy(), ExactMatchPolicy::DeliverWhole);
        assert_eq!(derivation_mode(&config), DerivationMode::Hkdf);
    }

    #[test]
    fn test_keys_are_cached_per_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NoctaConfig::default();
        config.keys.keystore_dir = Some(dir.path().display().to_string());
        let args = IdentityArgs {
            identity: "alice".to_string(),
            scalar: Some(FieldElement::from_u64(12345)),
        };

        let first = load_identity(&config, &args).unwrap();
        let second = load_identity(&config, &args).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_degraded());
    }
}
