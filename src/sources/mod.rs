//! Secret discovery.
//!
//! Four sources, one provenance each: process environment, well-known
//! files, allow-listed external commands, and the OS keychain. The
//! [`Discoverer`] fans out across all of them concurrently; a failure in
//! any one source is logged and skipped, never fatal to the pass.

mod command;
mod env;
mod file;
mod keychain;

pub use command::{AllowedCommand, CommandRunner, CommandSource, SystemRunner, COMMAND_ALLOW_LIST};
pub use env::EnvSource;
pub use file::FileSource;
pub use keychain::KeychainSource;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::providers::Provider;

/// The source type a candidate secret was discovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Environment,
    File,
    Command,
    Keychain,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Environment => write!(f, "environment"),
            Self::File => write!(f, "file"),
            Self::Command => write!(f, "command"),
            Self::Keychain => write!(f, "keychain"),
        }
    }
}

/// A candidate secret, in memory only. Never persisted in cleartext;
/// either handed to the encrypted store or discarded at the end of the
/// discovery pass.
#[derive(Clone)]
pub struct DiscoveredSecret {
    pub provider: Provider,
    pub value: String,
    pub provenance: Provenance,
    /// Set by the validator after discovery; sources always start at
    /// `false`.
    pub is_valid: bool,
    pub discovered_at: DateTime<Utc>,
    /// Where exactly the candidate came from (variable name, file path,
    /// command, service name).
    pub source_detail: Option<String>,
}

impl DiscoveredSecret {
    pub fn new(provider: Provider, value: String, provenance: Provenance) -> Self {
        Self {
            provider,
            value,
            provenance,
            is_valid: false,
            discovered_at: Utc::now(),
            source_detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.source_detail = Some(detail.into());
        self
    }
}

// The secret value must never appear in debug output or logs.
impl std::fmt::Debug for DiscoveredSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredSecret")
            .field("provider", &self.provider.id())
            .field("value", &crate::util::mask_secret(&self.value))
            .field("provenance", &self.provenance)
            .field("is_valid", &self.is_valid)
            .field("source_detail", &self.source_detail)
            .finish()
    }
}

/// One discovery source.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Stable name used in logs and per-source error reporting.
    fn name(&self) -> &'static str;

    /// Which provenance this source tags its candidates with.
    fn provenance(&self) -> Provenance;

    /// Produce all candidates this source can currently see.
    async fn discover(&self) -> Result<Vec<DiscoveredSecret>>;
}

/// Persistence hook injected into the discoverer so discovered secrets can
/// self-persist without the sources knowing about the store.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    async fn persist(&self, provider: Provider, value: &str) -> Result<()>;
}

/// Orchestrates all secret sources and concatenates their results.
pub struct Discoverer {
    sources: Vec<Box<dyn SecretSource>>,
    sink: Option<Arc<dyn CredentialSink>>,
}

impl Discoverer {
    /// A discoverer over an explicit source list.
    pub fn new(sources: Vec<Box<dyn SecretSource>>) -> Self {
        Self {
            sources,
            sink: None,
        }
    }

    /// The standard four-source discoverer.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Box::new(EnvSource::new()),
            Box::new(FileSource::new()),
            Box::new(CommandSource::new()),
            Box::new(KeychainSource::new()),
        ])
    }

    /// Attach a persistence sink; every discovered candidate is offered to
    /// it at the end of a pass.
    pub fn with_sink(mut self, sink: Arc<dyn CredentialSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run every source concurrently and concatenate the results.
    ///
    /// Never fails: a source error is logged under the source's name and
    /// that source contributes nothing.
    pub async fn discover_all(&self) -> Vec<DiscoveredSecret> {
        let passes = join_all(self.sources.iter().map(|source| async move {
            (source.name(), source.discover().await)
        }))
        .await;

        let mut secrets = Vec::new();
        for (name, outcome) in passes {
            match outcome {
                Ok(mut found) => {
                    debug!(source = name, count = found.len(), "source discovery complete");
                    secrets.append(&mut found);
                }
                Err(e) => {
                    warn!(source = name, error = %e, "discovery source failed; skipping");
                }
            }
        }

        if let Some(sink) = &self.sink {
            for secret in &secrets {
                if let Err(e) = sink.persist(secret.provider, &secret.value).await {
                    warn!(provider = %secret.provider, error = %e, "failed to persist discovered secret");
                }
            }
        }

        secrets
    }

    /// Run only the sources with the given provenance.
    pub async fn discover_from(&self, provenance: Provenance) -> Vec<DiscoveredSecret> {
        let mut secrets = Vec::new();
        for source in self.sources.iter().filter(|s| s.provenance() == provenance) {
            match source.discover().await {
                Ok(mut found) => secrets.append(&mut found),
                Err(e) => {
                    warn!(source = source.name(), error = %e, "discovery source failed; skipping");
                }
            }
        }
        secrets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        secrets: Vec<(Provider, &'static str)>,
    }

    #[async_trait]
    impl SecretSource for StaticSource {
        fn name(&self) -> &'static str {
            "static"
        }

        fn provenance(&self) -> Provenance {
            Provenance::Environment
        }

        async fn discover(&self) -> Result<Vec<DiscoveredSecret>> {
            Ok(self
                .secrets
                .iter()
                .map(|(p, v)| DiscoveredSecret::new(*p, v.to_string(), Provenance::Environment))
                .collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SecretSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn provenance(&self) -> Provenance {
            Provenance::Command
        }

        async fn discover(&self) -> Result<Vec<DiscoveredSecret>> {
            Err(CredentialError::source("failing", "simulated outage"))
        }
    }

    struct CountingSink {
        persisted: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSink for CountingSink {
        async fn persist(&self, _provider: Provider, _value: &str) -> Result<()> {
            self.persisted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn one_failing_source_does_not_fail_discovery() {
        let discoverer = Discoverer::new(vec![
            Box::new(FailingSource),
            Box::new(StaticSource {
                secrets: vec![(Provider::OpenAi, "sk-one"), (Provider::Github, "ghp_two")],
            }),
        ]);

        let found = discoverer.discover_all().await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn sink_receives_every_discovered_candidate() {
        let sink = Arc::new(CountingSink {
            persisted: AtomicUsize::new(0),
        });
        let discoverer = Discoverer::new(vec![Box::new(StaticSource {
            secrets: vec![(Provider::OpenAi, "sk-one"), (Provider::Npm, "npm_two")],
        })])
        .with_sink(sink.clone());

        discoverer.discover_all().await;
        assert_eq!(sink.persisted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn discover_from_filters_by_provenance() {
        let discoverer = Discoverer::new(vec![
            Box::new(StaticSource {
                secrets: vec![(Provider::OpenAi, "sk-env")],
            }),
            Box::new(FailingSource),
        ]);

        let env_only = discoverer.discover_from(Provenance::Environment).await;
        assert_eq!(env_only.len(), 1);
        let commands_only = discoverer.discover_from(Provenance::Command).await;
        assert!(commands_only.is_empty());
    }

    #[test]
    fn debug_output_masks_the_secret_value() {
        let secret = DiscoveredSecret::new(
            Provider::OpenAi,
            "sk-supersecretvalue0000".to_string(),
            Provenance::Environment,
        );
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("supersecretvalue"));
        assert!(rendered.contains("openai"));
    }
}
