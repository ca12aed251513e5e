use std::path::PathBuf;
use std::sync::{Arc, Once};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::security::AuditLog;
use encryption::{
    asymmetric, FieldProtector, InitOutcome, KeyLifecycleManager, KeyStatus, ProtectionConfig,
    RecordSignature,
};
use keystore::FileKeyStore;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE_PATH: &str = "vault.keys.json";
const DEFAULT_AUDIT_PATH: &str = "vault.audit.log";

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = std::env::var("VAULT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "vaultctl")]
#[command(about = "Key vault and field protection utility", long_about = None)]
struct Cli {
    /// Key store document
    #[arg(long, global = true, env = "VAULT_KEYSTORE", default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    /// Hash-chained audit log
    #[arg(long, global = true, env = "VAULT_AUDIT_LOG", default_value = DEFAULT_AUDIT_PATH)]
    audit_log: PathBuf,

    /// TOML protection config; VAULT_* variables apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Actor recorded in the audit trail
    #[arg(long, global = true, default_value = "vaultctl")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the key pair if the slot has none
    Init {
        /// Only reserve the slot with a placeholder record
        #[arg(long)]
        placeholder: bool,
    },
    /// Show the key slot state
    Status,
    /// Replace the active key pair
    Rotate {
        /// Reason recorded in the audit trail
        #[arg(short, long)]
        reason: String,
    },
    /// Encrypt text under the active public key
    Encrypt { text: String },
    /// Decrypt an envelope with the active private key
    Decrypt { envelope: String },
    /// Sign data with the active private key
    Sign {
        data: String,
        /// Print the signature as JSON with key name and preview
        #[arg(long)]
        json: bool,
    },
    /// Verify a base64 signature against the active public key
    Verify { data: String, signature: String },
    /// Hash a password with a fresh (or given) salt
    HashPassword {
        password: String,
        #[arg(long)]
        salt: Option<String>,
    },
    /// Check a password against a stored salt and hash
    VerifyPassword {
        password: String,
        #[arg(long)]
        salt: String,
        #[arg(long)]
        hash: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ProtectionConfig> {
    let config = match path {
        Some(path) => ProtectionConfig::from_file(path)?,
        None => ProtectionConfig::from_env()?,
    };
    Ok(config)
}

fn open_manager(cli: &Cli, config: &ProtectionConfig) -> Result<Arc<KeyLifecycleManager>> {
    let store = FileKeyStore::open(&cli.store)
        .with_context(|| format!("opening key store {}", cli.store.display()))?;
    let audit = AuditLog::builder(&cli.audit_log)
        .build()
        .with_context(|| format!("opening audit log {}", cli.audit_log.display()))?;

    Ok(Arc::new(KeyLifecycleManager::new(
        config.key_name.clone(),
        Arc::new(store),
        Arc::new(audit),
    )))
}

fn format_ts(ts: Option<u64>) -> String {
    ts.and_then(|ts| i64::try_from(ts).ok())
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}

fn print_status(status: &KeyStatus) {
    println!("Key: {}", status.name);
    println!("State: {}", status.state.as_str());
    println!(
        "Fingerprint: {}",
        status.fingerprint.as_deref().unwrap_or("-")
    );
    println!("Algorithm: {}", status.algorithm.as_deref().unwrap_or("-"));
    println!("Created: {}", format_ts(status.created_at));
    println!("Last used: {}", format_ts(status.last_used_at));
    println!("Retired keys: {}", status.retired_count);
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match &cli.command {
        Commands::Init { placeholder } => {
            let manager = open_manager(&cli, &config)?;
            if *placeholder {
                if manager.provision_placeholder(&cli.actor)? {
                    println!("Placeholder provisioned: {}", manager.name());
                } else {
                    println!("Slot already exists: {}", manager.name());
                }
                return Ok(());
            }
            match manager.initialize_as(&cli.actor)? {
                InitOutcome::Generated { fingerprint } => {
                    println!("Key generated: {} ({fingerprint})", manager.name());
                }
                InitOutcome::AlreadyInitialized { fingerprint } => {
                    println!("Key already initialized: {} ({fingerprint})", manager.name());
                }
            }
        }
        Commands::Status => {
            let manager = open_manager(&cli, &config)?;
            print_status(&manager.status()?);
        }
        Commands::Rotate { reason } => {
            let manager = open_manager(&cli, &config)?;
            let outcome = manager.rotate(&cli.actor, reason)?;
            info!(
                key = %manager.name(),
                previous = %outcome.previous_fingerprint,
                new = %outcome.new_fingerprint,
                "rotation complete"
            );
            println!(
                "Rotated {}: {} -> {} at {}",
                manager.name(),
                outcome.previous_fingerprint,
                outcome.new_fingerprint,
                format_ts(Some(outcome.rotated_at))
            );
        }
        Commands::Encrypt { text } => {
            let protector = FieldProtector::new(open_manager(&cli, &config)?, &config)?;
            println!("{}", protector.protect(text)?);
        }
        Commands::Decrypt { envelope } => {
            let protector = FieldProtector::new(open_manager(&cli, &config)?, &config)?;
            println!("{}", protector.reveal(envelope, &cli.actor)?);
        }
        Commands::Sign { data, json } => {
            let manager = open_manager(&cli, &config)?;
            let private_key = manager.private_key(&cli.actor)?;
            let signature = asymmetric::sign(data.as_bytes(), &private_key)?;
            manager.record_usage();

            let signed = RecordSignature::new(signature, manager.name());
            if *json {
                println!("{}", signed.to_json()?);
            } else {
                println!("{}", signed.signature);
            }
        }
        Commands::Verify { data, signature } => {
            let manager = open_manager(&cli, &config)?;
            let public_key = manager.public_key()?;
            if !asymmetric::verify(data.as_bytes(), signature, &public_key) {
                bail!("signature invalid for key {}", manager.name());
            }
            println!("Signature valid ({})", asymmetric::fingerprint(&public_key));
        }
        Commands::HashPassword { password, salt } => {
            let hasher = config.credential_hasher()?;
            let salt = salt.clone().unwrap_or_else(|| hasher.generate_salt());
            println!("salt: {salt}");
            println!("hash: {}", hasher.hash(password, &salt));
        }
        Commands::VerifyPassword {
            password,
            salt,
            hash,
        } => {
            let hasher = config.credential_hasher()?;
            if !hasher.verify(password, salt, hash) {
                bail!("password does not match");
            }
            println!("Password matches");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vaultctl",
            "rotate",
            "--reason",
            "compromise",
            "--actor",
            "admin",
            "--store",
            "/tmp/k.json",
        ])
        .unwrap();
        assert_eq!(cli.actor, "admin");
        assert_eq!(cli.store, PathBuf::from("/tmp/k.json"));
        assert!(matches!(cli.command, Commands::Rotate { ref reason } if reason == "compromise"));
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(None), "-");
        assert_eq!(format_ts(Some(0)), "1970-01-01T00:00:00Z");
    }
}
