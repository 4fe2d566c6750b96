//! Integration tests for the discovery → validation → persistence flow.
//!
//! Wires a real store (in a temp directory) to file/env/command sources
//! and a validator pointed at a wiremock server, then drives the manager
//! facade end to end.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keywarden::sources::{
    CommandRunner, CommandSource, Discoverer, EnvSource, FileSource,
};
use keywarden::{
    CredentialManager, CredentialStore, CredentialValidator, ManagerConfig, Provider, StoreConfig,
};

const PASSPHRASE: &str = "discovery-test-passphrase-123";

fn openai_key() -> String {
    format!("sk-{}", "d".repeat(48))
}

async fn open_store(dir: &TempDir) -> Arc<CredentialStore> {
    let config = StoreConfig::at(dir.path().join("credentials")).with_passphrase(PASSPHRASE);
    Arc::new(CredentialStore::initialize(config).await.unwrap())
}

fn file_source_for(dir: &TempDir, file: PathBuf) -> FileSource {
    FileSource::with_paths(vec![file], vec![dir.path().to_path_buf()])
}

#[tokio::test]
async fn file_discovery_validates_persists_and_returns() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let env_file = dir.path().join(".env");
    std::fs::write(&env_file, format!("OPENAI_API_KEY={}\n", openai_key())).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = CredentialManager::from_parts(
        store.clone(),
        Discoverer::new(vec![Box::new(file_source_for(&dir, env_file))]),
        CredentialValidator::new().with_endpoint(Provider::OpenAi, server.uri()),
        ManagerConfig::default(),
    );

    let value = manager.get_credential(Provider::OpenAi).await.unwrap();
    assert_eq!(value.as_deref(), Some(openai_key().as_str()));

    // The validated discovery was persisted: the store now answers
    // directly, no probe needed.
    assert_eq!(
        store.retrieve_credential(Provider::OpenAi).await.unwrap().as_deref(),
        Some(openai_key().as_str())
    );
}

#[tokio::test]
async fn rejected_probe_falls_back_to_raw_environment() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    // The discovery source reads a scoped test variable; the manager's
    // raw-environment tier reads the provider's registered variable.
    std::env::set_var("KEYWARDEN_IT_ANTHROPIC", "sk-ant-REDACTED");
    std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-REDACTED");

    let manager = CredentialManager::from_parts(
        store.clone(),
        Discoverer::new(vec![Box::new(EnvSource::with_table(vec![(
            Provider::Anthropic,
            "KEYWARDEN_IT_ANTHROPIC".to_string(),
        )]))]),
        CredentialValidator::new().with_endpoint(Provider::Anthropic, server.uri()),
        ManagerConfig::default(),
    );

    let value = manager.get_credential(Provider::Anthropic).await.unwrap();
    assert_eq!(value.as_deref(), Some("sk-ant-REDACTED"));

    // Rejected candidates are never persisted.
    assert_eq!(store.retrieve_credential(Provider::Anthropic).await.unwrap(), None);

    std::env::remove_var("KEYWARDEN_IT_ANTHROPIC");
    std::env::remove_var("ANTHROPIC_API_KEY");
}

#[tokio::test]
async fn stored_credential_wins_without_touching_sources() {
    struct PanickingRunner;

    #[async_trait::async_trait]
    impl CommandRunner for PanickingRunner {
        async fn run(
            &self,
            _program: &str,
            _args: &[String],
        ) -> std::io::Result<std::process::Output> {
            panic!("discovery must not execute commands on a store hit");
        }
    }

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store
        .store_credential(Provider::Github, "ghp_stored_wins", None)
        .await
        .unwrap();

    let command_source = CommandSource::with_commands(
        vec![(Provider::Github, "gh auth token".to_string())],
        Arc::new(PanickingRunner),
    );
    let manager = CredentialManager::from_parts(
        store,
        Discoverer::new(vec![Box::new(command_source)]),
        CredentialValidator::new(),
        ManagerConfig::default(),
    );

    assert_eq!(
        manager.get_credential(Provider::Github).await.unwrap().as_deref(),
        Some("ghp_stored_wins")
    );
}

#[tokio::test]
async fn pattern_only_provider_validates_offline() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    // No endpoints configured anywhere: any network attempt would surface
    // as is_valid = false with an "unreachable" message, not a pattern
    // verdict.
    let manager = CredentialManager::from_parts(
        store,
        Discoverer::new(vec![]),
        CredentialValidator::new(),
        ManagerConfig::default(),
    );

    let outcome = manager
        .validate_credential(Provider::Cloudflare, "not-40-chars")
        .await;
    assert!(!outcome.is_valid);
    assert_eq!(outcome.message, "token shape rejected");

    let outcome = manager
        .validate_credential(Provider::Cloudflare, &"f".repeat(40))
        .await;
    assert!(outcome.is_valid);
    assert_eq!(outcome.message, "token shape accepted");
}

#[tokio::test]
async fn discovery_survives_a_broken_source_and_merges_status() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store
        .store_credential(Provider::Npm, "npm_stored_for_status", None)
        .await
        .unwrap();

    // A file source whose only candidate escapes the allowed root: the
    // source yields nothing, and must not poison the pass.
    let outside = TempDir::new().unwrap();
    let loot = outside.path().join("loot.env");
    std::fs::write(&loot, format!("OPENAI_API_KEY={}\n", openai_key())).unwrap();
    let escaping_source = FileSource::with_paths(vec![loot], vec![dir.path().to_path_buf()]);

    let keys_file = dir.path().join("keys.json");
    std::fs::write(
        &keys_file,
        serde_json::json!({ "cloudflare": "g".repeat(40) }).to_string(),
    )
    .unwrap();

    let manager = CredentialManager::from_parts(
        store,
        Discoverer::new(vec![
            Box::new(escaping_source),
            Box::new(file_source_for(&dir, keys_file)),
        ]),
        CredentialValidator::new(),
        ManagerConfig::default(),
    );

    let statuses = manager.provider_status().await.unwrap();
    let by_id = |id: &str| statuses.iter().find(|s| s.provider.id() == id).unwrap();

    // Store-known provider, decryptable.
    assert!(by_id("npm").has_credential);
    assert_eq!(by_id("npm").is_valid, Some(true));
    // Discovered provider, validated by pattern.
    assert!(by_id("cloudflare").has_credential);
    assert_eq!(by_id("cloudflare").is_valid, Some(true));
    // The escaping candidate contributed nothing.
    assert!(!by_id("openai").has_credential);
}
