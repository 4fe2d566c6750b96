//! Environment variable secret source.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::providers::Provider;
use crate::sources::{DiscoveredSecret, Provenance, SecretSource};

/// Variable names must look like ordinary environment identifiers before
/// we read them.
const ENV_NAME_PATTERN: &str = r"^[A-Z_][A-Z0-9_]*$";

/// Discovers candidates from a fixed provider→variable table.
pub struct EnvSource {
    table: Vec<(Provider, String)>,
}

impl EnvSource {
    /// The standard table: every provider's registered variable.
    pub fn new() -> Self {
        Self {
            table: Provider::ALL
                .iter()
                .map(|p| (*p, p.env_var_name().to_string()))
                .collect(),
        }
    }

    /// A custom table (used by tests to avoid touching real variables).
    pub fn with_table(table: Vec<(Provider, String)>) -> Self {
        Self { table }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretSource for EnvSource {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Environment
    }

    async fn discover(&self) -> Result<Vec<DiscoveredSecret>> {
        let name_re = regex::Regex::new(ENV_NAME_PATTERN)
            .map_err(|e| crate::error::CredentialError::source("environment", e.to_string()))?;

        let mut secrets = Vec::new();
        for (provider, var_name) in &self.table {
            if !name_re.is_match(var_name) {
                warn!(
                    provider = %provider,
                    variable = %var_name,
                    "rejecting malformed environment variable name"
                );
                continue;
            }

            let value = match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if value.trim().is_empty() {
                debug!(provider = %provider, variable = %var_name, "ignoring blank value");
                continue;
            }

            secrets.push(
                DiscoveredSecret::new(*provider, value, Provenance::Environment)
                    .with_detail(var_name.clone()),
            );
        }
        Ok(secrets)
    }
}
