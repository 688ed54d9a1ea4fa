//! HTTP transport abstraction.
//!
//! The manager never talks to the network directly. It hands a
//! [`VaultRequest`] to a [`Transport`] and gets back a [`VaultResponse`] whose
//! body has already been read to the end, so there is no response handle to
//! close and nothing to leak on error paths. Connection-level failures come
//! back as [`SecretError::Transport`] with no response at all.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::SecretError;
use crate::secret::Secret;

/// Header carrying the Vault token on every request.
pub const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// HTTP method of a Vault call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A token-authenticated request to Vault.
#[derive(Debug, Clone)]
pub struct VaultRequest {
    pub method: Method,
    pub url: Url,
    /// Sent as the [`VAULT_TOKEN_HEADER`] header.
    pub token: Secret,
}

/// A fully drained response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl VaultResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 200 OK.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Body as text, lossily decoded, for diagnostics.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs Vault HTTP calls.
///
/// Implementations must read the response body completely before returning.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: VaultRequest) -> Result<VaultResponse, SecretError>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SecretError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SecretError::transport(format!("could not build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Use an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: VaultRequest) -> Result<VaultResponse, SecretError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let response = self
            .client
            .request(method, request.url.clone())
            .header(VAULT_TOKEN_HEADER, request.token.expose())
            .send()
            .await
            .map_err(|e| {
                SecretError::transport(format!(
                    "{} {} failed: {}",
                    request.method.as_str(),
                    request.url.path(),
                    e
                ))
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            SecretError::transport(format!(
                "reading response body from {} failed: {}",
                request.url.path(),
                e
            ))
        })?;

        Ok(VaultResponse::new(status, body.to_vec()))
    }
}
