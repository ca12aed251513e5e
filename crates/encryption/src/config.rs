//! Data-protection configuration
//!
//! Loaded from environment variables or a TOML document. Every construction
//! path ends in `validate`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use common::SYSTEM_MAIN_KEY;

use crate::credential::{CredentialHasher, DEFAULT_ROUNDS, DEFAULT_SALT_LEN, MIN_ROUNDS, MIN_SALT_LEN};
use crate::envelope::{ChunkedCipher, DEFAULT_CHUNK_THRESHOLD};
use crate::error::{CryptoError, Result};

pub const ENV_KEY_NAME: &str = "VAULT_KEY_NAME";
pub const ENV_CHUNK_THRESHOLD: &str = "VAULT_CHUNK_THRESHOLD";
pub const ENV_CREDENTIAL_ROUNDS: &str = "VAULT_CREDENTIAL_ROUNDS";
pub const ENV_SALT_LEN: &str = "VAULT_SALT_LEN";
pub const ENV_DISPLAY_PLACEHOLDER: &str = "VAULT_DISPLAY_PLACEHOLDER";

/// Shown to end users in place of content that failed to decrypt
pub const DEFAULT_DISPLAY_PLACEHOLDER: &str = "[encrypted]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtectionConfig {
    /// Key slot used for field protection and signing
    pub key_name: String,
    /// Plaintext bytes per chunk in multi-block envelopes
    pub chunk_threshold: usize,
    pub credential_rounds: u32,
    pub salt_len: usize,
    pub display_placeholder: String,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            key_name: SYSTEM_MAIN_KEY.to_string(),
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            credential_rounds: DEFAULT_ROUNDS,
            salt_len: DEFAULT_SALT_LEN,
            display_placeholder: DEFAULT_DISPLAY_PLACEHOLDER.to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            CryptoError::InvalidConfiguration(format!("Invalid value in {var}: {e}"))
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(CryptoError::InvalidConfiguration(format!("{var}: {e}"))),
    }
}

impl ProtectionConfig {
    /// Defaults overridden by any `VAULT_*` variables that are set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(name) = parse_env::<String>(ENV_KEY_NAME)? {
            config.key_name = name;
        }
        if let Some(threshold) = parse_env::<usize>(ENV_CHUNK_THRESHOLD)? {
            config.chunk_threshold = threshold;
        }
        if let Some(rounds) = parse_env::<u32>(ENV_CREDENTIAL_ROUNDS)? {
            config.credential_rounds = rounds;
        }
        if let Some(len) = parse_env::<usize>(ENV_SALT_LEN)? {
            config.salt_len = len;
        }
        if let Some(placeholder) = parse_env::<String>(ENV_DISPLAY_PLACEHOLDER)? {
            config.display_placeholder = placeholder;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            CryptoError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&document)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_name.trim().is_empty() {
            return Err(CryptoError::InvalidConfiguration(
                "key_name must not be empty".into(),
            ));
        }
        ChunkedCipher::new(self.chunk_threshold)?;
        if self.credential_rounds < MIN_ROUNDS {
            return Err(CryptoError::InvalidConfiguration(format!(
                "credential_rounds must be at least {MIN_ROUNDS}"
            )));
        }
        if self.salt_len < MIN_SALT_LEN {
            return Err(CryptoError::InvalidConfiguration(format!(
                "salt_len must be at least {MIN_SALT_LEN}"
            )));
        }
        Ok(())
    }

    pub fn chunked_cipher(&self) -> Result<ChunkedCipher> {
        ChunkedCipher::new(self.chunk_threshold)
    }

    pub fn credential_hasher(&self) -> Result<CredentialHasher> {
        CredentialHasher::new(self.credential_rounds, self.salt_len)
    }
}
