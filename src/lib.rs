//! # keywarden
//!
//! Credential lifecycle manager for a CLI that talks to several external
//! AI/service providers.
//!
//! This library provides:
//! - Discovery of candidate secrets from the environment, well-known
//!   files, allow-listed commands, and the OS keychain
//! - On-demand per-provider validation (pattern checks and bounded
//!   liveness probes)
//! - An encrypted at-rest store keyed by a passphrase-derived master key
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────┐
//!                │    CredentialManager     │
//!                │ (get-or-discover facade) │
//!                └─────┬──────────┬─────────┘
//!                      │          │
//!            ┌─────────▼───┐  ┌───▼──────────────┐
//!            │ Discoverer  │  │ CredentialStore  │
//!            │ env · file  │  │ AES-256-GCM +    │
//!            │ cmd · chain │  │ PBKDF2 at rest   │
//!            └─────────┬───┘  └──────────────────┘
//!                      │
//!            ┌─────────▼──────────┐
//!            │ CredentialValidator│
//!            │ (liveness probes)  │
//!            └────────────────────┘
//! ```
//!
//! ## Lookup flow
//! 1. `get_credential(provider)` checks the encrypted store
//! 2. On a miss, a full discovery pass runs across all sources
//! 3. Candidates are validated; the first valid one is persisted and
//!    returned
//! 4. A total miss is a normal not-found outcome, never an error
//!
//! ## Modules
//! - `providers`: the fixed provider registry
//! - `sources`: secret sources and the discoverer
//! - `validate`: per-provider liveness probes
//! - `store`: the encrypted store and its crypto layer
//! - `manager`: the facade composing the above

pub mod config;
pub mod error;
pub mod manager;
pub mod providers;
pub mod sources;
pub mod store;
pub mod util;
pub mod validate;

pub use config::{ManagerConfig, StoreConfig};
pub use error::{CredentialError, Result};
pub use manager::{CredentialManager, ProviderStatus};
pub use providers::Provider;
pub use sources::{DiscoveredSecret, Discoverer, Provenance};
pub use store::{CredentialStore, EncryptedRecord, StoreValidationReport};
pub use validate::{CredentialValidator, ValidationOutcome};
