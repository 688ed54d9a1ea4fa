//! # Tokenwarden Core
//!
//! Keeps a Vault-issued OIDC JWT fresh for the lifetime of a process.
//!
//! This crate provides:
//! - A seed reader that turns a provisioned Vault token document into a
//!   [`CredentialIdentity`]
//! - A [`TokenExchanger`] for the `identity/oidc/token` and
//!   `auth/token/renew-self` calls
//! - A [`SecretManager`] that performs the first exchange on `start`, then
//!   renews on its own before the JWT expires, retrying with backoff on failure
//! - A [`SecretRegistry`] so each Vault identity gets exactly one manager
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), tokenwarden_core::SecretError> {
//! use tokenwarden_core::{ManagerConfig, SecretManager, SecretRegistry};
//!
//! let registry = SecretRegistry::new();
//! let config = ManagerConfig::new("vault.internal", "edge-service");
//! let manager = SecretManager::connect(&registry, config, "/run/secrets/vault-seed.json").await?;
//!
//! manager.start().await?;
//! let jwt = manager.jwt()?;
//! # let _ = jwt;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod event;
pub mod exchange;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod secret;
pub mod seed;
pub mod transport;

// Re-export commonly used types at crate root
pub use backoff::BackoffPolicy;

pub use config::ManagerConfig;

pub use error::SecretError;

pub use event::ManagerEvent;

pub use exchange::{ExchangedSecret, TokenExchanger};

pub use manager::{AuthContext, ManagerState, RenewOutcome, SecretManager};

pub use registry::SecretRegistry;

pub use secret::Secret;

pub use seed::{CredentialIdentity, read_seed, read_seed_file};

pub use transport::{
    Method,
    ReqwestTransport,
    Transport,
    VaultRequest,
    VaultResponse,
    VAULT_TOKEN_HEADER,
};
