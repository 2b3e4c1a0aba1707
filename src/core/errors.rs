//! Keystore error kinds.
//!
//! One closed enum, matched exhaustively by callers. Payloads are plain strings
//! so the error can be cloned onto the notification channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity attached to a notification, a host UI decides how to render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    /// Not shown to the user.
    Silent,
    /// Normal user mistake, e.g. a mistyped password.
    Expected,
    Minor,
    Major,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeystoreError {
    #[error("keystore: no secrets yet")]
    NotConfigured,

    #[error("keystore: {0} not found")]
    NotFound(String),

    #[error("keystore: wrong secret")]
    WrongSecret,

    #[error("keystore: unsupported cipher type {0}")]
    UnsupportedCipher(String),

    #[error("keystore: secret {0} already exists")]
    DuplicateSecret(String),

    #[error("keystore: not unlocked")]
    MasterKeyRequired,

    #[error("keystore: action {0} already in progress")]
    ActionInProgress(String),

    #[error("keystore: storage failure: {0}")]
    StorageFailure(String),

    #[error("keystore: invalid seed phrase")]
    InvalidSeedPhrase,

    #[error("keystore: invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("keystore: unsupported signer type {0}")]
    UnsupportedSignerType(String),

    #[error("keystore: invalid private key")]
    InvalidPrivateKey,

    #[error("keystore: invalid input: {0}")]
    InvalidInput(String),

    #[error("keystore: invalid kdf parameters: {0}")]
    Kdf(String),

    #[error("keystore: crypto error: {0}")]
    Crypto(String),

    #[error("keystore: serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;

impl KeystoreError {
    /// Stable code for hosts that branch on the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::NotFound(_) => "not_found",
            Self::WrongSecret => "wrong_secret",
            Self::UnsupportedCipher(_) => "unsupported_cipher",
            Self::DuplicateSecret(_) => "duplicate_secret",
            Self::MasterKeyRequired => "master_key_required",
            Self::ActionInProgress(_) => "action_in_progress",
            Self::StorageFailure(_) => "storage_failure",
            Self::InvalidSeedPhrase => "invalid_seed_phrase",
            Self::InvalidDerivationPath(_) => "invalid_derivation_path",
            Self::UnsupportedSignerType(_) => "unsupported_signer_type",
            Self::InvalidPrivateKey => "invalid_private_key",
            Self::InvalidInput(_) => "invalid_input",
            Self::Kdf(_) => "kdf_error",
            Self::Crypto(_) => "crypto_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Text a host UI shows next to the failed action.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotConfigured => "The keystore has not been set up yet.",
            Self::NotFound(_) => "The requested item could not be found.",
            Self::WrongSecret => "Invalid password",
            Self::UnsupportedCipher(_) => "The stored data uses an unsupported cipher.",
            Self::DuplicateSecret(_) => "This secret is already set.",
            Self::MasterKeyRequired => "Unlock the keystore first.",
            Self::ActionInProgress(_) => "Please wait for the current action to complete.",
            Self::StorageFailure(_) => "Failed to access the keystore storage.",
            Self::InvalidSeedPhrase => "The recovery phrase is not valid.",
            Self::InvalidDerivationPath(_) => "The derivation path is not supported.",
            Self::UnsupportedSignerType(_) => "This key type cannot sign.",
            Self::InvalidPrivateKey => "The private key is not valid.",
            Self::InvalidInput(_) => "Invalid input.",
            Self::Kdf(_) | Self::Crypto(_) | Self::Serialization(_) => {
                "Something went wrong in the keystore. Please try again."
            }
        }
    }

    /// Severity used when the error is surfaced on the notification channel.
    pub fn level(&self) -> ErrorLevel {
        match self {
            Self::ActionInProgress(_) => ErrorLevel::Silent,
            Self::WrongSecret
            | Self::InvalidSeedPhrase
            | Self::InvalidDerivationPath(_)
            | Self::InvalidPrivateKey
            | Self::InvalidInput(_) => ErrorLevel::Expected,
            Self::NotFound(_) | Self::DuplicateSecret(_) | Self::MasterKeyRequired => {
                ErrorLevel::Minor
            }
            Self::NotConfigured
            | Self::UnsupportedCipher(_)
            | Self::StorageFailure(_)
            | Self::UnsupportedSignerType(_)
            | Self::Kdf(_)
            | Self::Crypto(_)
            | Self::Serialization(_) => ErrorLevel::Major,
        }
    }
}

impl From<serde_json::Error> for KeystoreError {
    fn from(err: serde_json::Error) -> Self {
        KeystoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for KeystoreError {
    fn from(err: sqlx::Error) -> Self {
        KeystoreError::StorageFailure(err.to_string())
    }
}

impl From<hex::FromHexError> for KeystoreError {
    fn from(err: hex::FromHexError) -> Self {
        KeystoreError::Serialization(format!("invalid hex: {}", err))
    }
}
