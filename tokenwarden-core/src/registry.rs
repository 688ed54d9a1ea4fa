//! Deduplication of managers by credential identity.
//!
//! Two managers renewing the same Vault token would race each other's
//! `renew-self` calls, so construction goes through a [`SecretRegistry`] that
//! hands back the live instance for an identity it has already seen.
//!
//! The registry is an ordinary value passed to constructors. Clones share the
//! same map; separate `SecretRegistry::new()` calls are fully isolated.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::SecretError;
use crate::manager::SecretManager;
use crate::seed::CredentialIdentity;

type Entries = Mutex<HashMap<CredentialIdentity, SecretManager>>;

/// Map from credential identity to its live manager.
#[derive(Clone, Default)]
pub struct SecretRegistry {
    entries: Arc<Entries>,
}

impl SecretRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the manager registered for `identity`, or build one with
    /// `factory` and register it.
    ///
    /// Lookup and insertion happen under a single lock, so concurrent callers
    /// with the same identity always end up with the same instance. `factory`
    /// runs while the lock is held and must not touch the registry.
    pub fn register_or_get<F>(
        &self,
        identity: CredentialIdentity,
        factory: F,
    ) -> Result<SecretManager, SecretError>
    where
        F: FnOnce() -> Result<SecretManager, SecretError>,
    {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&identity) {
            tracing::debug!("reusing registered secret manager");
            return Ok(existing.clone());
        }

        let manager = factory()?;
        entries.insert(identity, manager.clone());
        Ok(manager)
    }

    /// The manager registered for `identity`, if any.
    pub fn get(&self, identity: &CredentialIdentity) -> Option<SecretManager> {
        self.entries.lock().get(identity).cloned()
    }

    pub fn contains(&self, identity: &CredentialIdentity) -> bool {
        self.entries.lock().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            entries: Arc::downgrade(&self.entries),
        }
    }
}

impl std::fmt::Debug for SecretRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRegistry")
            .field("managers", &self.len())
            .finish()
    }
}

/// Back-reference held by a manager so `stop` can deregister it without
/// keeping the registry alive.
#[derive(Clone, Default)]
pub(crate) struct WeakRegistry {
    entries: Weak<Entries>,
}

impl WeakRegistry {
    /// Remove `identity` if it still maps to `manager`.
    pub(crate) fn release(&self, identity: &CredentialIdentity, manager: &SecretManager) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = entries.lock();
        if entries
            .get(identity)
            .is_some_and(|registered| registered.same_instance(manager))
        {
            entries.remove(identity);
        }
    }
}
