//! Error type for the credential lifecycle.

use thiserror::Error;

/// Errors produced while bootstrapping, exchanging, or renewing a secret.
///
/// The type is `Clone` so the outcome of a single shared start attempt can be
/// handed to every caller that waited on it.
#[derive(Debug, Clone, Error)]
pub enum SecretError {
    /// The seed document could not be read or does not carry a client token.
    #[error("malformed seed document: {message}")]
    MalformedSeed { message: String },

    /// Exchanging the bootstrap token for the operational secret failed.
    #[error("token exchange failed{}: {message}", status_suffix(.status))]
    ExchangeFailed {
        status: Option<u16>,
        body: String,
        message: String,
    },

    /// Renewing the bootstrap token failed.
    #[error("token renewal failed{}: {message}", status_suffix(.status))]
    RenewFailed {
        status: Option<u16>,
        body: String,
        message: String,
    },

    /// Connection-level failure (refused, reset, timed out).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The operational secret was requested before the first successful exchange.
    #[error("secret not ready: no successful exchange yet")]
    NotReady,

    /// The manager has been stopped.
    #[error("secret manager stopped")]
    Stopped,

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config { message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl SecretError {
    /// Create a malformed seed error.
    pub fn malformed_seed(message: impl Into<String>) -> Self {
        Self::MalformedSeed {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// HTTP status attached to the error, if the remote service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ExchangeFailed { status, .. } | Self::RenewFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Transport failures, throttling, and server-side errors are retryable;
    /// client errors and malformed bodies are not. The background renewal loop
    /// retries regardless and uses this only to pick the log level.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::ExchangeFailed { status, .. } | Self::RenewFailed { status, .. } => {
                matches!(status, Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}
