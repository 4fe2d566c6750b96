//! Credential validation.
//!
//! One liveness decision per (provider, value) pair. Pattern-only
//! providers are checked offline; network providers get one bounded HTTP
//! probe against a low-cost endpoint; local-endpoint providers get a GET
//! against a well-known path. Network failures and timeouts classify as
//! `is_valid = false`; validation never returns an error to the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::providers::{Provider, ValidationClass};

/// Bound on any single validation probe, so one slow or unreachable
/// provider cannot stall a discovery pass.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one validation call.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub provider: Provider,
    pub is_valid: bool,
    pub message: String,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl ValidationOutcome {
    fn new(provider: Provider, is_valid: bool, message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            provider,
            is_valid,
            message: message.into(),
            response_time_ms: elapsed_ms,
            checked_at: Utc::now(),
        }
    }
}

/// Per-provider liveness prober.
pub struct CredentialValidator {
    client: reqwest::Client,
    /// Probe base-URL overrides; how tests point probes at a mock server
    /// and how a nonstandard endpoint would be configured.
    endpoint_overrides: HashMap<Provider, String>,
}

impl CredentialValidator {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .user_agent("keywarden")
            .build()
            // Building with static options cannot fail at runtime; fall
            // back to the default client if it somehow does.
            .unwrap_or_default();
        Self {
            client,
            endpoint_overrides: HashMap::new(),
        }
    }

    /// Override the probe base URL for one provider.
    pub fn with_endpoint(mut self, provider: Provider, base_url: impl Into<String>) -> Self {
        self.endpoint_overrides.insert(provider, base_url.into());
        self
    }

    /// Validate one candidate. Never fails; errors become
    /// `is_valid = false` with an attached message.
    pub async fn validate(&self, provider: Provider, value: &str) -> ValidationOutcome {
        let started = Instant::now();
        if value.trim().is_empty() {
            return ValidationOutcome::new(provider, false, "empty credential", 0);
        }

        match provider.validation_class() {
            ValidationClass::Pattern => {
                let is_valid = provider.matches_token(value);
                let message = if is_valid {
                    "token shape accepted"
                } else {
                    "token shape rejected"
                };
                ValidationOutcome::new(provider, is_valid, message, elapsed_ms(started))
            }
            ValidationClass::NetworkProbe => self.probe(provider, value, started).await,
            ValidationClass::LocalEndpoint => self.probe_local(provider, value, started).await,
        }
    }

    fn base_url(&self, provider: Provider) -> String {
        if let Some(base) = self.endpoint_overrides.get(&provider) {
            return base.trim_end_matches('/').to_string();
        }
        match provider {
            Provider::OpenAi => "https://api.openai.com".to_string(),
            Provider::Anthropic => "https://api.anthropic.com".to_string(),
            Provider::Github => "https://api.github.com".to_string(),
            Provider::Npm => "https://registry.npmjs.org".to_string(),
            // Pattern and local-endpoint providers never reach here with
            // a default base.
            _ => String::new(),
        }
    }

    /// One bounded authenticated GET against the provider's cheapest
    /// endpoint.
    async fn probe(&self, provider: Provider, value: &str, started: Instant) -> ValidationOutcome {
        let base = self.base_url(provider);
        let request = match provider {
            Provider::OpenAi => self
                .client
                .get(format!("{base}/v1/models"))
                .bearer_auth(value),
            Provider::Anthropic => self
                .client
                .get(format!("{base}/v1/models"))
                .header("x-api-key", value)
                .header("anthropic-version", "2023-06-01"),
            Provider::Github => self.client.get(format!("{base}/user")).bearer_auth(value),
            Provider::Npm => self
                .client
                .get(format!("{base}/-/npm/v1/user"))
                .bearer_auth(value),
            other => {
                return ValidationOutcome::new(
                    other,
                    false,
                    "provider has no network probe",
                    elapsed_ms(started),
                );
            }
        };

        match request.send().await {
            Ok(response) => {
                let outcome = classify_status(response.status().as_u16());
                debug!(provider = %provider, status = response.status().as_u16(), "probe complete");
                ValidationOutcome::new(provider, outcome.0, outcome.1, elapsed_ms(started))
            }
            Err(e) => ValidationOutcome::new(
                provider,
                false,
                probe_failure_message(&e),
                elapsed_ms(started),
            ),
        }
    }

    /// Normalize the value to a URL, append the well-known list path if
    /// absent, and expect a plain 200.
    async fn probe_local(
        &self,
        provider: Provider,
        value: &str,
        started: Instant,
    ) -> ValidationOutcome {
        let endpoint = match normalize_local_endpoint(value) {
            Some(endpoint) => endpoint,
            None => {
                return ValidationOutcome::new(
                    provider,
                    false,
                    "not a usable endpoint URL",
                    elapsed_ms(started),
                );
            }
        };

        match self.client.get(endpoint.clone()).send().await {
            Ok(response) if response.status().as_u16() == 200 => ValidationOutcome::new(
                provider,
                true,
                format!("endpoint responded (GET {endpoint})"),
                elapsed_ms(started),
            ),
            Ok(response) => ValidationOutcome::new(
                provider,
                false,
                format!("endpoint returned HTTP {}", response.status().as_u16()),
                elapsed_ms(started),
            ),
            Err(e) => ValidationOutcome::new(
                provider,
                false,
                probe_failure_message(&e),
                elapsed_ms(started),
            ),
        }
    }
}

impl Default for CredentialValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// 2xx means the credential was accepted. 401/403 means it was rejected.
/// Anything else (eg 400 on a deliberately minimal request) still proves
/// the credential got past authentication, so it counts as valid evidence.
fn classify_status(status: u16) -> (bool, String) {
    match status {
        200..=299 => (true, format!("credential accepted (HTTP {status})")),
        401 | 403 => (false, format!("credential rejected (HTTP {status})")),
        other => (
            true,
            format!("endpoint reachable, credential not rejected (HTTP {other})"),
        ),
    }
}

fn probe_failure_message(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "probe timed out".to_string()
    } else if error.is_connect() {
        "endpoint unreachable".to_string()
    } else {
        format!("probe failed: {error}")
    }
}

/// Turn an `OLLAMA_HOST`-style value into a probe URL, appending the
/// well-known list path when the value has no path of its own.
fn normalize_local_endpoint(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let parsed = url::Url::parse(&with_scheme).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let base = with_scheme.trim_end_matches('/').to_string();
    if parsed.path() == "/" || parsed.path().is_empty() {
        Some(format!("{base}/api/tags"))
    } else {
        Some(base)
    }
}
