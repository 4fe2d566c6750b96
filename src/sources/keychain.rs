//! OS keychain secret source (macOS `security` front end).
//!
//! Looks up generic passwords by service name. Service names come from a
//! fixed allow-list and must match `[a-z0-9-]+`; the lookup runs as an
//! argument vector, so the service name is a single argv element and no
//! shell quoting exists to get wrong.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::Result;
use crate::providers::Provider;
use crate::sources::{CommandRunner, DiscoveredSecret, Provenance, SecretSource, SystemRunner};

/// Wall-clock bound on a keychain lookup.
const KEYCHAIN_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE_NAME_PATTERN: &str = r"^[a-z0-9-]+$";

pub struct KeychainSource {
    /// (provider, service) pairs to look up. Each service is re-validated
    /// against the provider registry's allow-list before use.
    services: Vec<(Provider, String)>,
    runner: Arc<dyn CommandRunner>,
    /// When false (tests), the macOS host requirement is waived so the
    /// validation and lookup logic can run against a mock runner anywhere.
    require_macos: bool,
}

impl KeychainSource {
    /// The standard source: every provider with a registered service name.
    pub fn new() -> Self {
        Self {
            services: Provider::ALL
                .iter()
                .filter_map(|p| p.keychain_service().map(|s| (*p, s.to_string())))
                .collect(),
            runner: Arc::new(SystemRunner),
            require_macos: true,
        }
    }

    /// Custom services and runner, with the host check waived.
    pub fn with_services(
        services: Vec<(Provider, String)>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            services,
            runner,
            require_macos: false,
        }
    }

    /// Policy gate: the service must be the provider's registered name and
    /// must match the service-name pattern.
    fn is_permitted(provider: Provider, service: &str) -> bool {
        if provider.keychain_service() != Some(service) {
            return false;
        }
        regex::Regex::new(SERVICE_NAME_PATTERN)
            .map(|re| re.is_match(service))
            .unwrap_or(false)
    }

    async fn lookup(&self, provider: Provider, service: &str) -> Option<String> {
        if !Self::is_permitted(provider, service) {
            warn!(
                provider = %provider,
                service = %service,
                "rejecting keychain service not present in the allow-list"
            );
            return None;
        }

        let args = vec![
            "find-generic-password".to_string(),
            "-s".to_string(),
            service.to_string(),
            "-w".to_string(),
        ];
        let output = match timeout(KEYCHAIN_TIMEOUT, self.runner.run("security", &args)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(service = %service, error = %e, "keychain lookup unavailable");
                return None;
            }
            Err(_) => {
                warn!(service = %service, "keychain lookup timed out");
                return None;
            }
        };

        // Item not found is a normal miss, not a failure.
        if !output.status.success() {
            debug!(service = %service, status = %output.status, "no keychain item");
            return None;
        }

        let candidate = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if candidate.is_empty() {
            return None;
        }
        if !provider.matches_token(&candidate) {
            debug!(provider = %provider, service = %service, "keychain value does not match token shape");
            return None;
        }
        Some(candidate)
    }
}

impl Default for KeychainSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretSource for KeychainSource {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Keychain
    }

    async fn discover(&self) -> Result<Vec<DiscoveredSecret>> {
        if self.require_macos && !cfg!(target_os = "macos") {
            debug!("keychain source skipped: not a macOS host");
            return Ok(Vec::new());
        }

        let mut secrets = Vec::new();
        for (provider, service) in &self.services {
            if let Some(value) = self.lookup(*provider, service).await {
                secrets.push(
                    DiscoveredSecret::new(*provider, value, Provenance::Keychain)
                        .with_detail(service.clone()),
                );
            }
        }
        Ok(secrets)
    }
}
