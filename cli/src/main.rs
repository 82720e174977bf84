mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nocta_config::{NoctaConfig, global_config};
use nocta_note::FieldElement;

/// Nocta shielded-note wallet tool
#[derive(Parser, Debug)]
#[command(name = "nocta")]
#[command(about = "Client-side shielded-note ledger", long_about = None)]
struct Cli {
    /// Config file (default: NOCTA_CONFIG, ./nocta.toml, ~/.nocta/nocta.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Which identity's encryption key to use
#[derive(clap::Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Name the keypair is cached under
    #[arg(long, default_value = "default", env = "NOCTA_IDENTITY")]
    pub identity: String,

    /// Identity scalar (decimal or 0x hex). Without it the key is random.
    #[arg(long, env = "NOCTA_IDENTITY_SCALAR", hide_env_values = true)]
    pub scalar: Option<FieldElement>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show (and create if missing) the encryption keypair for an identity
    Keys {
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Seal a note or raw text to a recipient's public key
    Encrypt {
        /// Recipient encryption public key (base64)
        #[arg(long)]
        to: String,
        /// Note JSON file; plaintext is read from --text otherwise
        #[arg(long, conflicts_with = "text")]
        note: Option<PathBuf>,
        #[arg(long)]
        text: Option<String>,
    },
    /// Open an envelope with an identity's secret key
    Decrypt {
        #[command(flatten)]
        identity: IdentityArgs,
        envelope: String,
    },
    /// Fetch and decrypt all notes, then print balance and spent status
    Sync {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Ask the overview service to confirm spent status on chain
        #[arg(long)]
        check_on_chain: bool,
    },
    /// Select inputs and compute outputs for a transfer (dry run)
    Plan {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Amount to send
        #[arg(long)]
        amount: u64,
        /// Own owner key, receives change
        #[arg(long)]
        owner: FieldElement,
        /// Recipient owner key
        #[arg(long)]
        to_owner: FieldElement,
        /// Recipient encryption public key (base64)
        #[arg(long)]
        to_key: String,
        #[arg(long)]
        memo: Option<FieldElement>,
    },
    /// Print the effective configuration
    Config {
        /// Print a sample config file instead
        #[arg(long)]
        sample: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NoctaConfig::load_from(path),
        None => NoctaConfig::load(),
    };
    match config {
        Ok(config) => {
            let _ = NoctaConfig::set_global(config);
        }
        Err(e) => {
            eprintln!("❌ Error loading config: {:#}", e);
            std::process::exit(1);
        }
    }
    let config = global_config();

    let result = match cli.command {
        Command::Keys { identity } => commands::keys(config, &identity),
        Command::Encrypt { to, note, text } => {
            commands::encrypt(&to, note.as_deref(), text.as_deref())
        }
        Command::Decrypt { identity, envelope } => commands::decrypt(config, &identity, &envelope),
        Command::Sync {
            identity,
            check_on_chain,
        } => commands::sync(config, &identity, check_on_chain).await,
        Command::Plan {
            identity,
            amount,
            owner,
            to_owner,
            to_key,
            memo,
        } => {
            let request = commands::PlanRequest {
                amount,
                owner,
                to_owner,
                to_key,
                memo,
            };
            commands::plan(config, &identity, request).await
        }
        Command::Config { sample } => commands::show_config(config, sample),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_plan() {
        let cli = Cli::try_parse_from([
            "nocta",
            "plan",
            "--amount",
            "40",
            "--owner",
            "100",
            "--to-owner",
            "0xc8",
            "--to-key",
            "AAAA",
        ])
        .unwrap();
        match cli.command {
            Command::Plan {
                amount,
                to_owner,
                identity,
                ..
            } => {
                assert_eq!(amount, 40);
                assert_eq!(to_owner, FieldElement::from_u64(200));
                assert_eq!(identity.identity, "default");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_encrypt_note_and_text_conflict() {
        let parsed = Cli::try_parse_from([
            "nocta", "encrypt", "--to", "AAAA", "--note", "n.json", "--text", "hi",
        ]);
        assert!(parsed.is_err());
    }
}
