use common::StoreError;
use thiserror::Error;

/// Data-protection errors
///
/// Messages name the failure class only. `DecryptionFailed` deliberately
/// carries no cause so wrong keys, corrupted ciphertext, and bad padding are
/// indistinguishable to callers.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Wrong key length or unparseable key material
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Plaintext exceeds single-block capacity where chunking does not apply
    #[error("Payload too large: {len} bytes exceeds {max}-byte block capacity")]
    PayloadTooLarge { len: usize, max: usize },

    /// Structurally invalid ciphertext container
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Key not found: {name}")]
    KeyNotFound { name: String },

    /// Verification returned false
    #[error("Signature invalid")]
    SignatureInvalid,

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Key rotation requires a reason")]
    RotationReasonRequired,

    #[error("Key store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for data-protection operations
pub type Result<T> = std::result::Result<T, CryptoError>;

impl From<toml::de::Error> for CryptoError {
    fn from(err: toml::de::Error) -> Self {
        CryptoError::InvalidConfiguration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CryptoError::KeyNotFound {
            name: "SYSTEM_MAIN_KEY".into(),
        };
        assert_eq!(err.to_string(), "Key not found: SYSTEM_MAIN_KEY");

        let err = CryptoError::PayloadTooLarge { len: 191, max: 190 };
        assert_eq!(
            err.to_string(),
            "Payload too large: 191 bytes exceeds 190-byte block capacity"
        );
    }

    #[test]
    fn test_decryption_failed_has_no_detail() {
        assert_eq!(CryptoError::DecryptionFailed.to_string(), "Decryption failed");
    }

    #[test]
    fn test_error_from_store() {
        let err: CryptoError = StoreError::Conflict {
            name: "k".into(),
        }
        .into();
        assert!(matches!(err, CryptoError::Store(StoreError::Conflict { .. })));
    }

    #[test]
    fn test_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: CryptoError = toml_err.into();
        assert!(matches!(err, CryptoError::InvalidConfiguration(_)));
    }
}
