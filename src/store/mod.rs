//! Encrypted credential store.
//!
//! Persists validated secrets at rest, one record per provider, encrypted
//! under a passphrase-derived master key. Owns the salt lifecycle, record
//! expiry, backups, and key rotation.
//!
//! ## On-disk layout
//!
//! ```text
//! ~/.keywarden/credentials/
//! ├── credentials.json          # {version, created_at, credentials: [...]} (0600)
//! ├── credentials.salt          # raw 32-byte salt (0600)
//! └── credentials.backup.json   # verbatim copy of credentials.json (0600)
//! ```
//!
//! The master passphrase is provided via:
//! - `KEYWARDEN_MASTER_PASSPHRASE` (or the legacy `KEYWARDEN_PASSPHRASE`)
//! - Or `StoreConfig::passphrase` set by the embedding application

pub mod crypto;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{StoreConfig, MIN_PASSPHRASE_LEN};
use crate::error::{CredentialError, Result};
use crate::providers::Provider;
use crate::sources::CredentialSink;
use crypto::{CryptoError, MasterKey, SALT_LENGTH};

/// Current persisted store format version.
const STORE_VERSION: u32 = 1;

/// One persisted, encrypted secret entry keyed by provider name. The
/// ciphertext is base64; the fixed-width IV and tag are hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub provider: String,
    /// Base64 ciphertext.
    pub ciphertext: String,
    /// 16-byte IV, hex.
    pub iv: String,
    /// 16-byte authentication tag, hex.
    pub auth_tag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EncryptedRecord {
    /// Whether the record has passed its expiry instant.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| t <= Utc::now()).unwrap_or(false)
    }
}

/// The persisted JSON document.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    created_at: DateTime<Utc>,
    credentials: Vec<EncryptedRecord>,
}

/// In-memory record set plus the document metadata persisted with it.
#[derive(Debug)]
struct StoreState {
    created_at: DateTime<Utc>,
    records: HashMap<String, EncryptedRecord>,
}

/// Classification of every record by `validate_all_credentials`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreValidationReport {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    pub expired: Vec<String>,
}

/// Encrypted credential store. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    config: StoreConfig,
    state: Arc<RwLock<StoreState>>,
    /// Session master key; replaced only by `change_encryption_key`.
    master_key: Arc<RwLock<MasterKey>>,
}

impl CredentialStore {
    /// Initialize the store: create the storage directory (owner-only),
    /// obtain or create the salt, derive the master key, and load any
    /// existing records.
    ///
    /// # Errors
    ///
    /// Fails with `CredentialError::Configuration` if no passphrase of at
    /// least 16 characters is available or the iteration count is below
    /// the floor. There is intentionally no insecure fallback.
    pub async fn initialize(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let passphrase = config.resolve_passphrase()?;

        fs::create_dir_all(&config.storage_dir).await?;
        set_mode(&config.storage_dir, 0o700).await?;

        let salt = load_or_create_salt(&config).await?;
        let key = MasterKey::derive(&passphrase, &salt, config.key_derivation_iterations)
            .map_err(|e| CredentialError::Configuration(format!("key derivation failed: {e}")))?;

        let state = load_store_file(&config.store_path()).await?;
        info!(
            records = state.records.len(),
            path = %config.store_path().display(),
            "credential store initialized"
        );

        let store = Self {
            config,
            state: Arc::new(RwLock::new(state)),
            master_key: Arc::new(RwLock::new(key)),
        };

        if store.config.backup_enabled {
            let state = store.state.read().await;
            store.refresh_backup(&state).await;
        }

        Ok(store)
    }

    /// Encrypt `value` with a fresh IV and persist it as the record for
    /// `provider`, replacing any existing record (last write wins).
    pub async fn store_credential(
        &self,
        provider: Provider,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let record = self.encrypt_record(provider, value, expires_at).await?;

        let mut state = self.state.write().await;
        let record = match state.records.get(provider.id()) {
            // Preserve the original creation instant across overwrites.
            Some(existing) => EncryptedRecord {
                created_at: existing.created_at,
                ..record
            },
            None => record,
        };
        state.records.insert(provider.id().to_string(), record);
        self.persist_locked(&state).await?;
        debug!(provider = %provider, "credential stored");
        Ok(())
    }

    /// Retrieve and decrypt the credential for `provider`.
    ///
    /// An expired record is evicted from memory and from the persisted
    /// file, and `Ok(None)` is returned. A tag mismatch or malformed
    /// record surfaces as `CredentialError::Integrity`, never as a wrong
    /// value.
    pub async fn retrieve_credential(&self, provider: Provider) -> Result<Option<String>> {
        let record = {
            let state = self.state.read().await;
            match state.records.get(provider.id()) {
                None => return Ok(None),
                Some(record) => record.clone(),
            }
        };

        if record.is_expired() {
            self.evict_expired(provider).await?;
            return Ok(None);
        }

        let master_key = self.master_key.read().await;
        let value = decrypt_record(&master_key, &record)?;
        Ok(Some(value))
    }

    /// Remove the record for `provider`. Returns whether one existed.
    pub async fn remove_credential(&self, provider: Provider) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.records.remove(provider.id()).is_some();
        if existed {
            self.persist_locked(&state).await?;
            info!(provider = %provider, "credential removed");
        }
        Ok(existed)
    }

    /// Re-store a new value under the same provider key, preserving the
    /// record's creation instant and expiry. Returns `false` if there is
    /// no record to rotate.
    pub async fn rotate_credential(&self, provider: Provider, new_value: &str) -> Result<bool> {
        let existing = {
            let state = self.state.read().await;
            match state.records.get(provider.id()) {
                None => return Ok(false),
                Some(record) => record.clone(),
            }
        };

        let rotated = self
            .encrypt_record(provider, new_value, existing.expires_at)
            .await?;
        let mut state = self.state.write().await;
        state.records.insert(
            provider.id().to_string(),
            EncryptedRecord {
                created_at: existing.created_at,
                ..rotated
            },
        );
        self.persist_locked(&state).await?;
        info!(provider = %provider, "credential rotated");
        Ok(true)
    }

    /// Set or clear the expiry of an existing record.
    pub async fn set_expiry(
        &self,
        provider: Provider,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let updated = match state.records.get_mut(provider.id()) {
            None => false,
            Some(record) => {
                record.expires_at = expires_at;
                record.updated_at = Utc::now();
                true
            }
        };
        if updated {
            self.persist_locked(&state).await?;
        }
        Ok(updated)
    }

    /// Providers with a live (non-expired) record, sorted by name.
    pub async fn list_providers(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .records
            .values()
            .filter(|r| !r.is_expired())
            .map(|r| r.provider.clone())
            .collect();
        names.sort();
        names
    }

    /// Attempt decryption of every record and classify the results.
    /// Expired records are evicted; undecryptable records are reported and
    /// left in place so the failure stays visible.
    pub async fn validate_all_credentials(&self) -> Result<StoreValidationReport> {
        let mut report = StoreValidationReport::default();
        let mut state = self.state.write().await;
        let master_key = self.master_key.read().await;

        let mut expired: Vec<String> = Vec::new();
        for (name, record) in state.records.iter() {
            if record.is_expired() {
                expired.push(name.clone());
                continue;
            }
            match decrypt_record(&master_key, record) {
                Ok(_) => report.valid.push(name.clone()),
                Err(e) => {
                    warn!(provider = %name, error = %e, "credential failed integrity check");
                    report.invalid.push(name.clone());
                }
            }
        }
        drop(master_key);

        if !expired.is_empty() {
            for name in &expired {
                state.records.remove(name);
            }
            self.persist_locked(&state).await?;
            info!(count = expired.len(), "evicted expired credentials");
        }
        report.expired = expired;
        report.valid.sort();
        report.invalid.sort();
        report.expired.sort();
        Ok(report)
    }

    /// Re-encrypt the whole store under a key derived from
    /// `new_passphrase` with a fresh salt.
    ///
    /// Every record is decrypted under the old key first; any single
    /// failure aborts the operation without mutating on-disk or in-memory
    /// state. Only after every record re-encrypts is the new record set
    /// committed, followed by the new salt.
    pub async fn change_encryption_key(&self, new_passphrase: &str) -> Result<()> {
        if new_passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(CredentialError::Configuration(format!(
                "new passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
            )));
        }

        let mut state = self.state.write().await;
        let mut master_key = self.master_key.write().await;

        // Decrypt everything under the old key before touching anything.
        let mut plaintexts: Vec<(EncryptedRecord, String)> = Vec::new();
        for record in state.records.values() {
            let value = decrypt_record(&master_key, record)?;
            plaintexts.push((record.clone(), value));
        }

        let new_salt = crypto::generate_salt();
        let new_key = MasterKey::derive(
            new_passphrase,
            &new_salt,
            self.config.key_derivation_iterations,
        )
        .map_err(|e| CredentialError::Configuration(format!("key derivation failed: {e}")))?;

        let now = Utc::now();
        let mut new_records = HashMap::with_capacity(plaintexts.len());
        for (old, value) in plaintexts {
            let payload = crypto::encrypt(&new_key, value.as_bytes())
                .map_err(|e| CredentialError::integrity(old.provider.clone(), e.to_string()))?;
            new_records.insert(
                old.provider.clone(),
                EncryptedRecord {
                    provider: old.provider,
                    ciphertext: BASE64.encode(payload.ciphertext),
                    iv: hex::encode(payload.iv),
                    auth_tag: hex::encode(payload.auth_tag),
                    created_at: old.created_at,
                    updated_at: now,
                    expires_at: old.expires_at,
                },
            );
        }

        let new_state = StoreState {
            created_at: state.created_at,
            records: new_records,
        };
        write_store_file(&self.config, &new_state).await?;
        write_salt_file(&self.config, &new_salt).await?;

        *state = new_state;
        *master_key = new_key;
        drop(master_key);

        if self.config.backup_enabled {
            self.refresh_backup(&state).await;
        }
        info!(records = state.records.len(), "store re-encrypted under new master key");
        Ok(())
    }

    /// Serialize the full encrypted record set verbatim (ciphertext, IV,
    /// tag unchanged) to `path`.
    pub async fn export_store(&self, path: &Path) -> Result<usize> {
        let state = self.state.read().await;
        let contents = serde_json::to_string_pretty(&to_store_file(&state))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, contents).await?;
        set_mode(path, 0o600).await?;
        Ok(state.records.len())
    }

    /// Replace the record set with the one read verbatim from `path`.
    /// Records are not re-encrypted; whether they decrypt under the
    /// current key surfaces on read.
    pub async fn import_store(&self, path: &Path) -> Result<usize> {
        let contents = fs::read_to_string(path).await?;
        let file: StoreFile = serde_json::from_str(&contents)?;
        if file.version != STORE_VERSION {
            return Err(CredentialError::Configuration(format!(
                "unsupported store version {} (expected {STORE_VERSION})",
                file.version
            )));
        }

        let count = file.credentials.len();
        let mut state = self.state.write().await;
        state.created_at = file.created_at;
        state.records = file
            .credentials
            .into_iter()
            .map(|r| (r.provider.clone(), r))
            .collect();
        self.persist_locked(&state).await?;
        info!(records = count, from = %path.display(), "store imported");
        Ok(count)
    }

    /// The configuration the store was initialized with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn encrypt_record(
        &self,
        provider: Provider,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<EncryptedRecord> {
        let master_key = self.master_key.read().await;
        let payload = crypto::encrypt(&master_key, value.as_bytes())
            .map_err(|e| CredentialError::integrity(provider.id(), e.to_string()))?;
        let now = Utc::now();
        Ok(EncryptedRecord {
            provider: provider.id().to_string(),
            ciphertext: BASE64.encode(payload.ciphertext),
            iv: hex::encode(payload.iv),
            auth_tag: hex::encode(payload.auth_tag),
            created_at: now,
            updated_at: now,
            expires_at,
        })
    }

    async fn evict_expired(&self, provider: Provider) -> Result<()> {
        let mut state = self.state.write().await;
        // Re-check under the write lock; a concurrent store may have
        // replaced the record since the read.
        if let Some(record) = state.records.get(provider.id()) {
            if record.is_expired() {
                state.records.remove(provider.id());
                self.persist_locked(&state).await?;
                info!(provider = %provider, "evicted expired credential");
            }
        }
        Ok(())
    }

    /// Persist the record set while the caller still holds the write (or
    /// read, for init-time backup) lock, so concurrent mutations cannot
    /// interleave between serialize and write.
    async fn persist_locked(&self, state: &StoreState) -> Result<()> {
        write_store_file(&self.config, state).await?;
        if self.config.backup_enabled {
            self.refresh_backup(state).await;
        }
        Ok(())
    }

    /// Refresh the verbatim backup copy. Backup failure is logged, never
    /// fatal to the write that triggered it.
    async fn refresh_backup(&self, state: &StoreState) {
        let serialized = match serde_json::to_string_pretty(&to_store_file(state)) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to serialize backup copy");
                return;
            }
        };
        let path = self.config.backup_path();
        if let Err(e) = write_atomic(&path, serialized.as_bytes(), 0o600).await {
            warn!(error = %e, path = %path.display(), "failed to refresh backup copy");
        }
    }
}

#[async_trait]
impl CredentialSink for CredentialStore {
    async fn persist(&self, provider: Provider, value: &str) -> Result<()> {
        self.store_credential(provider, value, None).await
    }
}

fn to_store_file(state: &StoreState) -> StoreFile {
    let mut credentials: Vec<EncryptedRecord> = state.records.values().cloned().collect();
    credentials.sort_by(|a, b| a.provider.cmp(&b.provider));
    StoreFile {
        version: STORE_VERSION,
        created_at: state.created_at,
        credentials,
    }
}

fn decrypt_record(key: &MasterKey, record: &EncryptedRecord) -> Result<String> {
    let ciphertext = BASE64.decode(&record.ciphertext)
        .map_err(|_| CredentialError::integrity(&record.provider, "malformed ciphertext field"))?;
    let iv = hex::decode(&record.iv)
        .map_err(|_| CredentialError::integrity(&record.provider, "malformed iv field"))?;
    let auth_tag = hex::decode(&record.auth_tag)
        .map_err(|_| CredentialError::integrity(&record.provider, "malformed auth_tag field"))?;

    let plaintext = crypto::decrypt(key, &ciphertext, &iv, &auth_tag).map_err(|e| match e {
        CryptoError::Decrypt => {
            CredentialError::integrity(&record.provider, "authentication tag mismatch")
        }
        other => CredentialError::integrity(&record.provider, other.to_string()),
    })?;

    String::from_utf8(plaintext)
        .map_err(|_| CredentialError::integrity(&record.provider, "decrypted value is not UTF-8"))
}

async fn load_store_file(path: &Path) -> Result<StoreState> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(StoreState {
                created_at: Utc::now(),
                records: HashMap::new(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let file: StoreFile = serde_json::from_str(&contents)?;
    if file.version != STORE_VERSION {
        return Err(CredentialError::Configuration(format!(
            "unsupported store version {} (expected {STORE_VERSION})",
            file.version
        )));
    }
    Ok(StoreState {
        created_at: file.created_at,
        records: file
            .credentials
            .into_iter()
            .map(|r| (r.provider.clone(), r))
            .collect(),
    })
}

async fn write_store_file(config: &StoreConfig, state: &StoreState) -> Result<()> {
    let contents = serde_json::to_string_pretty(&to_store_file(state))?;
    write_atomic(&config.store_path(), contents.as_bytes(), 0o600).await?;
    Ok(())
}

async fn load_or_create_salt(config: &StoreConfig) -> Result<[u8; SALT_LENGTH]> {
    let path = config.salt_path();
    match fs::read(&path).await {
        Ok(bytes) => {
            if bytes.len() != SALT_LENGTH {
                return Err(CredentialError::Configuration(format!(
                    "salt file {} is corrupted: expected {SALT_LENGTH} bytes, found {}",
                    path.display(),
                    bytes.len()
                )));
            }
            let mut salt = [0u8; SALT_LENGTH];
            salt.copy_from_slice(&bytes);
            Ok(salt)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let salt = crypto::generate_salt();
            write_salt_file(config, &salt).await?;
            info!(path = %path.display(), "generated new store salt");
            Ok(salt)
        }
        Err(e) => Err(e.into()),
    }
}

async fn write_salt_file(config: &StoreConfig, salt: &[u8; SALT_LENGTH]) -> Result<()> {
    write_atomic(&config.salt_path(), salt, 0o600).await?;
    Ok(())
}

/// Write to a sibling temp file, fix permissions, then rename into place.
async fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, contents).await?;
    set_mode(&tmp, mode).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
