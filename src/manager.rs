//! Credential manager facade.
//!
//! Composes the encrypted store, the discoverer, and the validator behind
//! the interface the rest of the tool consumes. Lookup precedence:
//! store → validated discovery → process environment → configured
//! fallback table. A total miss is `Ok(None)`, never an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ManagerConfig, StoreConfig};
use crate::error::Result;
use crate::providers::Provider;
use crate::sources::{CredentialSink, Discoverer};
use crate::store::CredentialStore;
use crate::validate::{CredentialValidator, ValidationOutcome};

/// Membership and validity of one provider, merged across the store and a
/// fresh discovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    pub has_credential: bool,
    pub is_valid: Option<bool>,
    pub last_checked: Option<DateTime<Utc>>,
}

pub struct CredentialManager {
    store: Arc<CredentialStore>,
    discoverer: Discoverer,
    validator: CredentialValidator,
    config: ManagerConfig,
}

impl CredentialManager {
    /// Initialize the store and wire up the default discoverer and
    /// validator. Discovered secrets self-persist through the store's
    /// sink when the store is configured to auto-encrypt.
    pub async fn initialize(
        store_config: StoreConfig,
        manager_config: ManagerConfig,
    ) -> Result<Self> {
        let auto_encrypt = store_config.auto_encrypt;
        let store = Arc::new(CredentialStore::initialize(store_config).await?);

        let mut discoverer = Discoverer::with_defaults();
        if auto_encrypt {
            let sink: Arc<dyn CredentialSink> = store.clone();
            discoverer = discoverer.with_sink(sink);
        }

        Ok(Self {
            store,
            discoverer,
            validator: CredentialValidator::new(),
            config: manager_config,
        })
    }

    /// Compose from explicit parts (tests; embedders with custom sources).
    pub fn from_parts(
        store: Arc<CredentialStore>,
        discoverer: Discoverer,
        validator: CredentialValidator,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            discoverer,
            validator,
            config,
        }
    }

    /// Get the credential for `provider`, discovering one if the store has
    /// no live record.
    pub async fn get_credential(&self, provider: Provider) -> Result<Option<String>> {
        // 1. Store hit returns immediately; discovery is not invoked.
        match self.store.retrieve_credential(provider).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => {
                // A broken record is a miss for lookup purposes, but the
                // failure must stay visible.
                warn!(provider = %provider, error = %e, "stored credential unreadable; falling back");
            }
        }

        // 2. Full discovery pass, filtered to this provider, validated.
        for candidate in self.discoverer.discover_all().await {
            if candidate.provider != provider {
                continue;
            }
            let outcome = self.validator.validate(provider, &candidate.value).await;
            if !outcome.is_valid {
                debug!(
                    provider = %provider,
                    provenance = %candidate.provenance,
                    reason = %outcome.message,
                    "discovered candidate failed validation"
                );
                continue;
            }
            info!(
                provider = %provider,
                provenance = %candidate.provenance,
                "validated discovered credential"
            );
            if let Err(e) = self.store.store_credential(provider, &candidate.value, None).await {
                warn!(provider = %provider, error = %e, "failed to persist discovered credential");
            }
            return Ok(Some(candidate.value));
        }

        // 3. Raw environment value, unvalidated.
        if let Ok(value) = std::env::var(provider.env_var_name()) {
            if !value.trim().is_empty() {
                debug!(provider = %provider, "returning unvalidated environment credential");
                return Ok(Some(value));
            }
        }

        // 4. Configured fallback table.
        if let Some(value) = self.config.fallback_keys.get(&provider) {
            debug!(provider = %provider, "returning configured fallback credential");
            return Ok(Some(value.clone()));
        }

        Ok(None)
    }

    pub async fn set_credential(
        &self,
        provider: Provider,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.store.store_credential(provider, value, expires_at).await
    }

    pub async fn remove_credential(&self, provider: Provider) -> Result<bool> {
        self.store.remove_credential(provider).await
    }

    pub async fn rotate_credential(&self, provider: Provider, new_value: &str) -> Result<bool> {
        self.store.rotate_credential(provider, new_value).await
    }

    pub async fn validate_credential(&self, provider: Provider, value: &str) -> ValidationOutcome {
        self.validator.validate(provider, value).await
    }

    /// One membership+validity row per provider, merging store-known
    /// records with a fresh discovery pass, deduplicated by provider.
    pub async fn provider_status(&self) -> Result<Vec<ProviderStatus>> {
        let mut rows: BTreeMap<&'static str, ProviderStatus> = BTreeMap::new();

        // Store-known providers: validity = the record still decrypts.
        let report = self.store.validate_all_credentials().await?;
        let now = Utc::now();
        for name in &report.valid {
            if let Some(provider) = Provider::from_id(name) {
                rows.insert(
                    provider.id(),
                    ProviderStatus {
                        provider,
                        has_credential: true,
                        is_valid: Some(true),
                        last_checked: Some(now),
                    },
                );
            }
        }
        for name in &report.invalid {
            if let Some(provider) = Provider::from_id(name) {
                rows.insert(
                    provider.id(),
                    ProviderStatus {
                        provider,
                        has_credential: true,
                        is_valid: Some(false),
                        last_checked: Some(now),
                    },
                );
            }
        }

        // Freshly discovered providers fill in the gaps.
        for candidate in self.discoverer.discover_all().await {
            if rows.contains_key(candidate.provider.id()) {
                continue;
            }
            let outcome = self
                .validator
                .validate(candidate.provider, &candidate.value)
                .await;
            rows.insert(
                candidate.provider.id(),
                ProviderStatus {
                    provider: candidate.provider,
                    has_credential: true,
                    is_valid: Some(outcome.is_valid),
                    last_checked: Some(outcome.checked_at),
                },
            );
        }

        // Everything else is absent.
        for provider in Provider::ALL {
            rows.entry(provider.id()).or_insert_with(|| ProviderStatus {
                provider: *provider,
                has_credential: false,
                is_valid: None,
                last_checked: None,
            });
        }

        Ok(rows.into_values().collect())
    }

    /// The underlying store, for operations the facade does not wrap
    /// (key rotation, import/export).
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }
}
