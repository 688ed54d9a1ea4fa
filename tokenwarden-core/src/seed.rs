//! Seed document parsing.
//!
//! A seed document is the JSON file dropped next to the process by the
//! provisioning system:
//!
//! ```json
//! {"auth": {"client_token": "hvs.CAESI..."}}
//! ```
//!
//! The client token becomes the [`CredentialIdentity`]: the first bootstrap
//! token and the key under which the manager is registered.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::SecretError;
use crate::secret::Secret;

/// `{"auth": {"client_token": ...}}`, shared by seed documents and
/// `renew-self` responses.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthEnvelope {
    pub(crate) auth: ClientTokenAuth,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientTokenAuth {
    pub(crate) client_token: Secret,
}

/// The bootstrap token read from a seed document.
///
/// Never empty. Compares and hashes by token value; formatting is redacted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialIdentity(Secret);

impl CredentialIdentity {
    /// Wrap a token, rejecting empty values.
    pub fn new(token: impl Into<String>) -> Result<Self, SecretError> {
        let secret = Secret::new(token);
        if secret.is_blank() {
            return Err(SecretError::malformed_seed("client token is empty"));
        }
        Ok(Self(secret))
    }

    /// The bootstrap token.
    pub fn token(&self) -> &Secret {
        &self.0
    }
}

impl fmt::Debug for CredentialIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CredentialIdentity").field(&self.0).finish()
    }
}

/// Extract the bootstrap token from raw seed document bytes.
pub fn read_seed(content: &[u8]) -> Result<CredentialIdentity, SecretError> {
    let envelope: AuthEnvelope = serde_json::from_slice(content)
        .map_err(|e| SecretError::malformed_seed(format!("could not decode seed: {e}")))?;
    CredentialIdentity::new(envelope.auth.client_token.expose())
}

/// Read and parse a seed document from disk.
pub async fn read_seed_file(path: impl AsRef<Path>) -> Result<CredentialIdentity, SecretError> {
    let path = path.as_ref();
    let content = tokio::fs::read(path).await.map_err(|e| {
        SecretError::malformed_seed(format!("could not read seed at {}: {e}", path.display()))
    })?;
    read_seed(&content)
}
