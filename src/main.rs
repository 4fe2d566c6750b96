//! keywarden - CLI entry point.
//!
//! A thin shell over the credential manager: argument handling here is
//! deliberately minimal, the library does the work.

use keywarden::{CredentialError, CredentialManager, ManagerConfig, Provider, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keywarden=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");

    let store_config = StoreConfig::from_env().unwrap_or_else(|e| exit_fatal(&e));
    let manager = match CredentialManager::initialize(store_config, ManagerConfig::default()).await
    {
        Ok(manager) => manager,
        Err(e) => exit_fatal(&e),
    };

    match command {
        "status" => {
            for status in manager.provider_status().await? {
                let validity = match status.is_valid {
                    Some(true) => "valid",
                    Some(false) => "invalid",
                    None => "-",
                };
                println!(
                    "{:<12} credential={:<5} validity={}",
                    status.provider.id(),
                    status.has_credential,
                    validity
                );
            }
        }
        "get" => {
            let provider = provider_arg(&args, 1)?;
            match manager.get_credential(provider).await? {
                Some(value) => println!("{value}"),
                None => println!("no credential found for {}", provider.id()),
            }
        }
        "set" => {
            let provider = provider_arg(&args, 1)?;
            let value = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: keywarden set <provider> <value>"))?;
            manager.set_credential(provider, value, None).await?;
            println!("stored credential for {}", provider.id());
        }
        "remove" => {
            let provider = provider_arg(&args, 1)?;
            if manager.remove_credential(provider).await? {
                println!("removed credential for {}", provider.id());
            } else {
                println!("no credential stored for {}", provider.id());
            }
        }
        "rotate" => {
            let provider = provider_arg(&args, 1)?;
            let value = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: keywarden rotate <provider> <value>"))?;
            if manager.rotate_credential(provider, value).await? {
                println!("rotated credential for {}", provider.id());
            } else {
                println!("no credential stored for {}", provider.id());
            }
        }
        "validate" => {
            let provider = provider_arg(&args, 1)?;
            let value = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: keywarden validate <provider> <value>"))?;
            let outcome = manager.validate_credential(provider, value).await;
            println!(
                "{}: {} ({} ms) - {}",
                provider.id(),
                if outcome.is_valid { "valid" } else { "invalid" },
                outcome.response_time_ms,
                outcome.message
            );
        }
        "discover" => {
            let found = manager.store().list_providers().await;
            let before: std::collections::HashSet<String> = found.into_iter().collect();
            for provider in Provider::ALL {
                if before.contains(provider.id()) {
                    continue;
                }
                if let Some(_value) = manager.get_credential(*provider).await? {
                    println!("discovered credential for {}", provider.id());
                }
            }
            println!("discovery pass complete");
        }
        "change-passphrase" => {
            let new_passphrase = args.get(1).ok_or_else(|| {
                anyhow::anyhow!("usage: keywarden change-passphrase <new-passphrase>")
            })?;
            manager.store().change_encryption_key(new_passphrase).await?;
            println!("store re-encrypted under the new passphrase");
        }
        "export" => {
            let path = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("usage: keywarden export <path>"))?;
            let count = manager.store().export_store(std::path::Path::new(path)).await?;
            println!("exported {count} records to {path}");
        }
        "import" => {
            let path = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("usage: keywarden import <path>"))?;
            let count = manager.store().import_store(std::path::Path::new(path)).await?;
            println!("imported {count} records from {path}");
        }
        other => {
            anyhow::bail!(
                "unknown command '{other}'. Commands: status, get, set, remove, rotate, \
                 validate, discover, change-passphrase, export, import"
            );
        }
    }

    Ok(())
}

fn provider_arg(args: &[String], index: usize) -> anyhow::Result<Provider> {
    let raw = args
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing <provider> argument"))?;
    Provider::from_id(raw).ok_or_else(|| {
        let known: Vec<&str> = Provider::ALL.iter().map(|p| p.id()).collect();
        anyhow::anyhow!("unknown provider '{raw}'. Known providers: {}", known.join(", "))
    })
}

/// Configuration errors are fatal with remediation text; nothing in this
/// subsystem falls back to an insecure default.
fn exit_fatal(error: &CredentialError) -> ! {
    eprintln!("error: {error}");
    if error.is_fatal() {
        eprintln!(
            "hint: set KEYWARDEN_MASTER_PASSPHRASE to a passphrase of at least 16 characters \
             and ensure the storage directory is writable"
        );
    }
    std::process::exit(2)
}
