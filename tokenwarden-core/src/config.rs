//! Manager configuration.

use std::time::Duration;

use url::Url;

use crate::backoff::BackoffPolicy;
use crate::error::SecretError;

/// Default URL scheme for the Vault endpoint.
pub const DEFAULT_SCHEME: &str = "http";

/// Default Vault port.
pub const DEFAULT_PORT: u16 = 8200;

/// Default fraction of the TTL after which renewal runs.
pub const DEFAULT_RENEWAL_FACTOR: f64 = 0.75;

/// Default timeout for a single Vault request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`SecretManager`](crate::SecretManager).
///
/// Fixed once the manager is constructed.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// URL scheme, `http` or `https`.
    pub scheme: String,
    /// Vault host name or address.
    pub host: String,
    /// Vault port.
    pub port: u16,
    /// Name of the OIDC role the JWT is issued for.
    pub secret_id: String,
    /// Fraction of the TTL, in (0, 1), after which renewal runs.
    pub renewal_factor: f64,
    /// Timeout applied to every Vault request.
    pub request_timeout: Duration,
    /// Upper bound for [`jwt_ready`](crate::SecretManager::jwt_ready); `None` waits forever.
    pub ready_timeout: Option<Duration>,
    /// Retry policy for failed background renewals.
    pub backoff: BackoffPolicy,
}

impl ManagerConfig {
    /// Create a configuration with default scheme, port, and renewal factor.
    pub fn new(host: impl Into<String>, secret_id: impl Into<String>) -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: host.into(),
            port: DEFAULT_PORT,
            secret_id: secret_id.into(),
            renewal_factor: DEFAULT_RENEWAL_FACTOR,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ready_timeout: None,
            backoff: BackoffPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_renewal_factor(mut self, factor: f64) -> Self {
        self.renewal_factor = factor;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<(), SecretError> {
        if self.host.trim().is_empty() {
            return Err(SecretError::config("host must not be empty"));
        }
        if self.secret_id.trim().is_empty() {
            return Err(SecretError::config("secret id must not be empty"));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(SecretError::config(format!(
                "unsupported scheme '{}', expected http or https",
                self.scheme
            )));
        }
        if !(self.renewal_factor > 0.0 && self.renewal_factor < 1.0) {
            return Err(SecretError::config(format!(
                "renewal factor must be in (0, 1), got {}",
                self.renewal_factor
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(SecretError::config("request timeout must be non-zero"));
        }
        self.backoff.validate()?;

        // `host` must come back out of the parsed URL unchanged.
        let url = self.base_url()?;
        let host_matches = url
            .host_str()
            .is_some_and(|parsed| parsed.eq_ignore_ascii_case(&self.host));
        let bare = url.username().is_empty()
            && url.password().is_none()
            && url.path() == "/"
            && url.query().is_none()
            && url.fragment().is_none();
        if !host_matches || !bare || url.port_or_known_default() != Some(self.port) {
            return Err(SecretError::config(format!(
                "host must be a bare host name or address, got '{}'",
                self.host
            )));
        }
        Ok(())
    }

    /// `{scheme}://{host}:{port}` as a parsed URL.
    pub fn base_url(&self) -> Result<Url, SecretError> {
        let raw = format!("{}://{}:{}", self.scheme, self.host, self.port);
        Url::parse(&raw).map_err(|e| SecretError::config(format!("invalid Vault address {raw}: {e}")))
    }
}
