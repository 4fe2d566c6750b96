//! Configuration for the credential subsystem.
//!
//! Configuration can be set via environment variables:
//! - `KEYWARDEN_MASTER_PASSPHRASE` - Master passphrase for the encrypted store (min 16 chars).
//! - `KEYWARDEN_PASSPHRASE` - Legacy alias, consulted after the primary variable.
//! - `KEYWARDEN_STORAGE_DIR` - Optional. Store directory. Defaults to `~/.keywarden/credentials`.
//! - `KEYWARDEN_PBKDF2_ITERATIONS` - Optional. Key-derivation iterations. Defaults to `600000`;
//!   values below the floor are rejected.
//! - `KEYWARDEN_AUTO_ENCRYPT` - Optional. Persist validated discoveries automatically. Defaults to `true`.
//! - `KEYWARDEN_BACKUP` - Optional. Refresh a backup copy after writes. Defaults to `true`.
//! - `KEYWARDEN_BACKUP_PATH` - Optional. Backup location. Defaults to a sibling of the store file.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{CredentialError, Result};
use crate::providers::Provider;
use crate::util::{env_var_bool, home_dir};

/// Primary environment variable for the master passphrase.
pub const PASSPHRASE_ENV: &str = "KEYWARDEN_MASTER_PASSPHRASE";

/// Legacy passphrase variable, consulted after [`PASSPHRASE_ENV`].
pub const PASSPHRASE_ENV_LEGACY: &str = "KEYWARDEN_PASSPHRASE";

/// Floor for PBKDF2 iteration counts. Configuration below this is rejected.
pub const MIN_KEY_DERIVATION_ITERATIONS: u32 = 600_000;

/// Minimum master passphrase length in characters.
pub const MIN_PASSPHRASE_LEN: usize = 16;

/// Process-wide configuration for the encrypted store. Loaded once; only
/// [`crate::store::CredentialStore::change_encryption_key`] re-keys the
/// store after initialization.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the store, salt, and backup files.
    pub storage_dir: PathBuf,

    /// PBKDF2-HMAC-SHA256 iteration count (>= 600 000).
    pub key_derivation_iterations: u32,

    /// Whether validated discoveries are persisted into the store.
    pub auto_encrypt: bool,

    /// Whether a backup copy is refreshed after each successful write.
    pub backup_enabled: bool,

    /// Where the verbatim backup copy lives; defaults to a sibling of the
    /// store file when `None`.
    pub backup_path: Option<PathBuf>,

    /// Explicit passphrase; when `None`, the environment variables are
    /// consulted at initialization. There is intentionally no default.
    pub passphrase: Option<String>,
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Configuration` if the iteration count is
    /// unparseable or below [`MIN_KEY_DERIVATION_ITERATIONS`].
    pub fn from_env() -> Result<Self> {
        let storage_dir = std::env::var("KEYWARDEN_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home_dir()).join(".keywarden").join("credentials"));

        let key_derivation_iterations = match std::env::var("KEYWARDEN_PBKDF2_ITERATIONS") {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|e| {
                CredentialError::Configuration(format!(
                    "invalid KEYWARDEN_PBKDF2_ITERATIONS value: {e}"
                ))
            })?,
            Err(_) => MIN_KEY_DERIVATION_ITERATIONS,
        };

        let config = Self {
            storage_dir,
            key_derivation_iterations,
            auto_encrypt: env_var_bool("KEYWARDEN_AUTO_ENCRYPT", true),
            backup_enabled: env_var_bool("KEYWARDEN_BACKUP", true),
            backup_path: std::env::var("KEYWARDEN_BACKUP_PATH").ok().map(PathBuf::from),
            passphrase: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a config rooted at `storage_dir` with defaults elsewhere
    /// (useful for testing).
    pub fn at(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            key_derivation_iterations: MIN_KEY_DERIVATION_ITERATIONS,
            auto_encrypt: true,
            backup_enabled: true,
            backup_path: None,
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Reject iteration counts below the floor. A weak KDF setting is a
    /// configuration error, not a preference.
    pub fn validate(&self) -> Result<()> {
        if self.key_derivation_iterations < MIN_KEY_DERIVATION_ITERATIONS {
            return Err(CredentialError::Configuration(format!(
                "key derivation iterations {} below the minimum of {}",
                self.key_derivation_iterations, MIN_KEY_DERIVATION_ITERATIONS
            )));
        }
        Ok(())
    }

    /// Resolve the master passphrase from config or environment.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Configuration` if no passphrase of at
    /// least [`MIN_PASSPHRASE_LEN`] characters is available. There is no
    /// fallback default.
    pub fn resolve_passphrase(&self) -> Result<String> {
        let candidate = self
            .passphrase
            .clone()
            .or_else(|| std::env::var(PASSPHRASE_ENV).ok())
            .or_else(|| std::env::var(PASSPHRASE_ENV_LEGACY).ok())
            .unwrap_or_default();

        if candidate.is_empty() {
            return Err(CredentialError::Configuration(format!(
                "no master passphrase configured; set {PASSPHRASE_ENV} (min {MIN_PASSPHRASE_LEN} characters)"
            )));
        }
        if candidate.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(CredentialError::Configuration(format!(
                "master passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
            )));
        }
        Ok(candidate)
    }

    /// Path of the persisted store document.
    pub fn store_path(&self) -> PathBuf {
        self.storage_dir.join("credentials.json")
    }

    /// Path of the raw salt file, persisted separately from records.
    pub fn salt_path(&self) -> PathBuf {
        self.storage_dir.join("credentials.salt")
    }

    /// Path of the verbatim backup copy.
    pub fn backup_path(&self) -> PathBuf {
        self.backup_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("credentials.backup.json"))
    }
}

/// Configuration for the manager facade.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Static fallback credentials handed in by the embedding application.
    /// The last tier of `get_credential`'s precedence, after the store,
    /// discovery, and the process environment.
    pub fallback_keys: HashMap<Provider, String>,
}
