//! Error types for the credential subsystem.
//!
//! The five categories mirror how failures are allowed to propagate:
//! configuration problems are fatal, integrity and security rejections are
//! surfaced per-operation, source and validation failures are absorbed by
//! their callers and logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    /// Missing or too-short master passphrase, unwritable storage
    /// directory, iteration count below the floor. Fatal; there is no
    /// insecure fallback.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Auth-tag mismatch or malformed on-disk record. Carries the provider
    /// name only, never secret material.
    #[error("integrity failure for provider '{provider}': {reason}")]
    Integrity { provider: String, reason: String },

    /// A single discovery source failed. The discoverer logs and skips it;
    /// discovery as a whole still succeeds.
    #[error("discovery source '{source_name}' failed: {reason}")]
    Source { source_name: String, reason: String },

    /// Network or timeout failure during a validation probe. The validator
    /// converts these into `is_valid = false`, never an `Err` to callers.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Policy rejection: command absent from the allow-list, service name
    /// failing its pattern, path escaping the allowed roots. Not bypassable
    /// by caller input.
    #[error("security policy rejection: {0}")]
    SecurityRejection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CredentialError {
    /// Whether this error should abort the process (CLI exit with
    /// remediation text) rather than be handled as a recoverable outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CredentialError::Configuration(_))
    }

    pub fn integrity(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        CredentialError::Integrity {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn source(source: impl Into<String>, reason: impl Into<String>) -> Self {
        CredentialError::Source {
            source_name: source.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
