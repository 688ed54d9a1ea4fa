//! The two Vault calls behind the credential lifecycle.
//!
//! - **Exchange**: `GET /v1/identity/oidc/token/{secret_id}` trades the
//!   current Vault token for a signed OIDC JWT and its TTL.
//! - **Renew**: `POST /v1/auth/token/renew-self` refreshes the Vault token
//!   itself; the returned client token authenticates the next exchange.
//!
//! Responses are decoded into typed schemas. Anything other than a 200 with a
//! matching body is an error that carries the status and raw body.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::config::ManagerConfig;
use crate::error::SecretError;
use crate::secret::Secret;
use crate::seed::AuthEnvelope;
use crate::transport::{Method, Transport, VaultRequest, VaultResponse};

/// Operational secret returned by an exchange.
#[derive(Debug, Clone)]
pub struct ExchangedSecret {
    /// The signed JWT.
    pub token: Secret,
    /// Validity in seconds, always finite and positive.
    pub ttl: f64,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    data: ExchangeData,
}

#[derive(Debug, Deserialize)]
struct ExchangeData {
    token: Secret,
    ttl: f64,
}

/// Which call produced a failure, so the right error variant is built.
#[derive(Debug, Clone, Copy)]
enum Call {
    Exchange,
    Renew,
}

impl Call {
    fn failure(self, status: Option<u16>, body: String, message: String) -> SecretError {
        match self {
            Call::Exchange => SecretError::ExchangeFailed {
                status,
                body,
                message,
            },
            Call::Renew => SecretError::RenewFailed {
                status,
                body,
                message,
            },
        }
    }
}

/// Performs exchange and renew calls against one Vault endpoint.
pub struct TokenExchanger {
    transport: Arc<dyn Transport>,
    exchange_url: Url,
    renew_url: Url,
    timeout: Duration,
}

impl std::fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("exchange_url", &self.exchange_url.as_str())
            .field("renew_url", &self.renew_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TokenExchanger {
    /// Build the endpoint URLs from `config`.
    pub fn new(config: &ManagerConfig, transport: Arc<dyn Transport>) -> Result<Self, SecretError> {
        let base = config.base_url()?;
        let exchange_url = endpoint(
            &base,
            &["v1", "identity", "oidc", "token", config.secret_id.as_str()],
        )?;
        let renew_url = endpoint(&base, &["v1", "auth", "token", "renew-self"])?;

        Ok(Self {
            transport,
            exchange_url,
            renew_url,
            timeout: config.request_timeout,
        })
    }

    pub fn exchange_url(&self) -> &Url {
        &self.exchange_url
    }

    pub fn renew_url(&self) -> &Url {
        &self.renew_url
    }

    /// Trade `token` for the operational secret.
    pub async fn exchange(&self, token: &Secret) -> Result<ExchangedSecret, SecretError> {
        let response = self
            .call(Method::Get, self.exchange_url.clone(), token)
            .await?;
        let body = expect_ok(Call::Exchange, response)?;

        let decoded: ExchangeResponse = serde_json::from_slice(&body.body).map_err(|e| {
            Call::Exchange.failure(
                Some(body.status),
                body.body_text(),
                format!("unexpected response body: {e}"),
            )
        })?;

        let ExchangeData { token, ttl } = decoded.data;
        if token.is_blank() {
            return Err(Call::Exchange.failure(
                Some(body.status),
                body.body_text(),
                "response carried an empty token".to_string(),
            ));
        }
        if !ttl.is_finite() || ttl <= 0.0 {
            return Err(Call::Exchange.failure(
                Some(body.status),
                body.body_text(),
                format!("response carried a non-positive ttl {ttl}"),
            ));
        }

        Ok(ExchangedSecret { token, ttl })
    }

    /// Renew `token`, returning the Vault token to use from now on.
    pub async fn renew(&self, token: &Secret) -> Result<Secret, SecretError> {
        let response = self.call(Method::Post, self.renew_url.clone(), token).await?;
        let body = expect_ok(Call::Renew, response)?;

        let decoded: AuthEnvelope = serde_json::from_slice(&body.body).map_err(|e| {
            Call::Renew.failure(
                Some(body.status),
                body.body_text(),
                format!("unexpected response body: {e}"),
            )
        })?;

        let renewed = decoded.auth.client_token;
        if renewed.is_blank() {
            return Err(Call::Renew.failure(
                Some(body.status),
                body.body_text(),
                "response carried an empty client token".to_string(),
            ));
        }
        Ok(renewed)
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        token: &Secret,
    ) -> Result<VaultResponse, SecretError> {
        tracing::debug!(method = method.as_str(), path = url.path(), "calling Vault");

        let request = VaultRequest {
            method,
            url,
            token: token.clone(),
        };
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(SecretError::transport(format!(
                "request timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

fn expect_ok(call: Call, response: VaultResponse) -> Result<VaultResponse, SecretError> {
    if response.is_ok() {
        Ok(response)
    } else {
        let status = response.status;
        Err(call.failure(
            Some(status),
            response.body_text(),
            format!("unexpected HTTP status {status}"),
        ))
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, SecretError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SecretError::config(format!("{base} cannot carry a path")))?
        .clear()
        .extend(segments);
    Ok(url)
}
