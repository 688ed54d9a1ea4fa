//! The secret manager: one Vault identity, one operational JWT, kept fresh.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start--> Started --exchange ok--> Ready <--> Renewing
//!                       |                       |          |
//!                       +----- error -----> Failed <-------+
//!                                               (retrying)
//! any --stop--> Stopped
//! ```
//!
//! `start` performs the first exchange in the caller's task. Concurrent
//! callers queue behind one start gate and all observe the same attempt's
//! outcome, so a burst of `start` calls produces exactly one exchange. After
//! that, renewal runs on a background task owned by the manager (see
//! [`scheduler`](crate::scheduler)).
//!
//! Background failures leave the last good JWT in place, move the manager to
//! [`ManagerState::Failed`], publish [`ManagerEvent::RenewalFailed`], and are
//! retried with backoff until a cycle succeeds.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, broadcast, watch};
use tokio::time::Instant;

use crate::config::ManagerConfig;
use crate::error::SecretError;
use crate::event::{EventBus, ManagerEvent};
use crate::exchange::{ExchangedSecret, TokenExchanger};
use crate::registry::{SecretRegistry, WeakRegistry};
use crate::scheduler;
use crate::secret::Secret;
use crate::seed::{CredentialIdentity, read_seed, read_seed_file};
use crate::transport::{ReqwestTransport, Transport};

/// Fallback horizon when a TTL is too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    /// First exchange in flight.
    Started,
    Ready,
    /// Background renew→exchange cycle in flight.
    Renewing,
    /// Last exchange or renewal failed; the previous JWT (if any) is still served.
    Failed,
    Stopped,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Created => "created",
            ManagerState::Started => "started",
            ManagerState::Ready => "ready",
            ManagerState::Renewing => "renewing",
            ManagerState::Failed => "failed",
            ManagerState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current operational secret.
///
/// Replaced as a whole on every successful exchange; readers hold an `Arc`
/// to a complete value.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The signed JWT.
    pub token: Secret,
    /// Validity in seconds as reported by Vault.
    pub ttl: f64,
    /// When the exchange completed.
    pub obtained_at: DateTime<Utc>,
}

impl AuthContext {
    /// When the JWT stops being valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let millis = (self.ttl * 1000.0).min(i64::MAX as f64) as i64;
        chrono::Duration::try_milliseconds(millis)
            .and_then(|ttl| self.obtained_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at() <= Utc::now()
    }
}

/// Result of a manual [`SecretManager::renew_now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// The cycle ran and replaced the secret.
    Renewed,
    /// Another cycle was already in flight; nothing was done.
    Coalesced,
}

/// Handle to a managed secret. Cheap to clone; clones share one manager.
#[derive(Clone)]
pub struct SecretManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: ManagerConfig,
    identity: CredentialIdentity,
    exchanger: TokenExchanger,
    /// Vault token used for the next call: the seed token, then each renewed one.
    vault_token: Mutex<Secret>,
    context: RwLock<Option<Arc<AuthContext>>>,
    next_due: Mutex<Option<Instant>>,
    failures: AtomicU32,
    state: watch::Sender<ManagerState>,
    events: EventBus,
    /// Held for the duration of a start attempt; stores that attempt's error.
    start_gate: tokio::sync::Mutex<Option<SecretError>>,
    start_attempts: AtomicU64,
    /// Held for the duration of a renew→exchange cycle.
    renewal: tokio::sync::Mutex<()>,
    rearm: Notify,
    stop: watch::Sender<bool>,
    registry: WeakRegistry,
}

impl SecretManager {
    /// Parse `seed` and return the registry's manager for that identity,
    /// creating it if needed.
    ///
    /// When the identity is already registered the existing manager is
    /// returned and `config` and `transport` are discarded unvalidated.
    /// Otherwise an invalid `config` fails with [`SecretError::Config`].
    pub fn open(
        registry: &SecretRegistry,
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        seed: &[u8],
    ) -> Result<Self, SecretError> {
        let identity = read_seed(seed)?;
        Self::open_with_identity(registry, config, transport, identity)
    }

    /// Like [`open`](Self::open), reading the seed document from `path`.
    pub async fn open_file(
        registry: &SecretRegistry,
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        path: impl AsRef<Path>,
    ) -> Result<Self, SecretError> {
        let identity = read_seed_file(path).await?;
        Self::open_with_identity(registry, config, transport, identity)
    }

    /// Like [`open_file`](Self::open_file) with a `reqwest` transport using
    /// the configured request timeout.
    pub async fn connect(
        registry: &SecretRegistry,
        config: ManagerConfig,
        seed_path: impl AsRef<Path>,
    ) -> Result<Self, SecretError> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Self::open_file(registry, config, transport, seed_path).await
    }

    pub fn open_with_identity(
        registry: &SecretRegistry,
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        identity: CredentialIdentity,
    ) -> Result<Self, SecretError> {
        let weak = registry.downgrade();
        registry.register_or_get(identity.clone(), move || {
            Self::build(config, transport, identity, weak)
        })
    }

    fn build(
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        identity: CredentialIdentity,
        registry: WeakRegistry,
    ) -> Result<Self, SecretError> {
        config.validate()?;
        let exchanger = TokenExchanger::new(&config, transport)?;
        let (state, _) = watch::channel(ManagerState::Created);
        let (stop, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                vault_token: Mutex::new(identity.token().clone()),
                config,
                identity,
                exchanger,
                context: RwLock::new(None),
                next_due: Mutex::new(None),
                failures: AtomicU32::new(0),
                state,
                events: EventBus::new(),
                start_gate: tokio::sync::Mutex::new(None),
                start_attempts: AtomicU64::new(0),
                renewal: tokio::sync::Mutex::new(()),
                rearm: Notify::new(),
                stop,
                registry,
            }),
        })
    }

    /// Perform the first exchange and arm the renewal timer.
    ///
    /// Returns immediately once the manager is ready. Callers arriving while
    /// an attempt is in flight wait for it and receive its outcome. After a
    /// failed attempt has completed, the next call tries again.
    pub async fn start(&self) -> Result<(), SecretError> {
        let seen = self.inner.start_attempts.load(Ordering::Acquire);
        let mut gate = self.inner.start_gate.lock().await;

        if self.inner.is_stopped() {
            return Err(SecretError::Stopped);
        }
        if self.inner.current_context().is_some() {
            return Ok(());
        }
        if self.inner.start_attempts.load(Ordering::Acquire) != seen {
            if let Some(error) = gate.as_ref() {
                return Err(error.clone());
            }
        }

        self.inner.set_state(ManagerState::Started);
        let result = self.inner.first_exchange().await;
        *gate = result.as_ref().err().cloned();
        self.inner.start_attempts.fetch_add(1, Ordering::AcqRel);

        if result.is_ok() {
            tokio::spawn(scheduler::run(Arc::clone(&self.inner)));
        }
        result
    }

    /// The current JWT, or [`SecretError::NotReady`] before the first
    /// successful exchange.
    ///
    /// Never blocks. While a renewal is failing this keeps returning the last
    /// good JWT.
    pub fn jwt(&self) -> Result<String, SecretError> {
        if self.inner.is_stopped() {
            return Err(SecretError::Stopped);
        }
        self.inner
            .current_context()
            .map(|ctx| ctx.token.expose().to_string())
            .ok_or(SecretError::NotReady)
    }

    /// The current JWT, waiting for the first successful exchange if needed.
    ///
    /// Does not trigger `start`. Bounded by
    /// [`ManagerConfig::ready_timeout`]; on timeout returns
    /// [`SecretError::NotReady`].
    pub async fn jwt_ready(&self) -> Result<String, SecretError> {
        let mut states = self.inner.state.subscribe();
        let wait = async {
            loop {
                match self.jwt() {
                    Err(SecretError::NotReady) => {}
                    other => return other,
                }
                if states.changed().await.is_err() {
                    return Err(SecretError::NotReady);
                }
            }
        };

        match self.inner.config.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(SecretError::NotReady)),
            None => wait.await,
        }
    }

    /// Run a renew→exchange cycle now instead of waiting for the timer.
    ///
    /// If a cycle is already in flight this returns
    /// [`RenewOutcome::Coalesced`] without calling Vault.
    pub async fn renew_now(&self) -> Result<RenewOutcome, SecretError> {
        if self.inner.is_stopped() {
            return Err(SecretError::Stopped);
        }
        if self.inner.current_context().is_none() {
            return Err(SecretError::NotReady);
        }

        let outcome = self.inner.renew_cycle().await;
        if !matches!(outcome, Ok(RenewOutcome::Coalesced)) {
            self.inner.rearm.notify_one();
        }
        outcome
    }

    /// Cancel the renewal timer, refuse further use, and leave the registry.
    ///
    /// Idempotent. A cycle already talking to Vault finishes but its result
    /// is discarded.
    pub fn stop(&self) {
        if self.inner.stop.send_replace(true) {
            return;
        }
        self.inner.state.send_replace(ManagerState::Stopped);
        self.inner.registry.release(&self.inner.identity, self);
        self.inner.events.emit(ManagerEvent::Stopped);
        tracing::info!("secret manager stopped");
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    /// Snapshot of the current secret and its timing.
    pub fn auth_context(&self) -> Option<Arc<AuthContext>> {
        self.inner.current_context()
    }

    /// Subscribe to lifecycle events. Only events published after this call
    /// are received.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    pub fn identity(&self) -> &CredentialIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same manager.
    pub fn same_instance(&self, other: &SecretManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManager")
            .field("secret_id", &self.inner.config.secret_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    pub(crate) fn current_context(&self) -> Option<Arc<AuthContext>> {
        self.context.read().clone()
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        *self.next_due.lock()
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub(crate) fn rearmed(&self) -> tokio::sync::futures::Notified<'_> {
        self.rearm.notified()
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Update the state unless the manager has been stopped.
    fn set_state(&self, next: ManagerState) {
        self.state.send_if_modified(|current| {
            if *current == ManagerState::Stopped || *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn first_exchange(&self) -> Result<(), SecretError> {
        let token = self.vault_token.lock().clone();
        match self.exchanger.exchange(&token).await {
            Ok(secret) => {
                if self.is_stopped() {
                    return Err(SecretError::Stopped);
                }
                let ttl = secret.ttl;
                let delay = self.install(secret);
                self.set_state(ManagerState::Ready);
                self.events.emit(ManagerEvent::Ready { ttl });
                self.events.emit(ManagerEvent::RenewalScheduled { delay });
                Ok(())
            }
            Err(error) => {
                self.set_state(ManagerState::Failed);
                tracing::error!(error = %error, "initial token exchange failed");
                Err(error)
            }
        }
    }

    /// Renew the Vault token, exchange it, and record when to run next.
    ///
    /// At most one cycle runs at a time; a concurrent call is coalesced.
    pub(crate) async fn renew_cycle(&self) -> Result<RenewOutcome, SecretError> {
        let Ok(_cycle) = self.renewal.try_lock() else {
            tracing::debug!("renewal already in flight, coalescing");
            return Ok(RenewOutcome::Coalesced);
        };
        if self.is_stopped() {
            return Err(SecretError::Stopped);
        }

        self.set_state(ManagerState::Renewing);
        match self.renew_and_exchange().await {
            Ok(secret) => {
                if self.is_stopped() {
                    return Err(SecretError::Stopped);
                }
                let ttl = secret.ttl;
                let delay = self.install(secret);
                self.failures.store(0, Ordering::Release);
                self.set_state(ManagerState::Ready);
                self.events.emit(ManagerEvent::Renewed { ttl });
                self.events.emit(ManagerEvent::RenewalScheduled { delay });
                Ok(RenewOutcome::Renewed)
            }
            Err(error) => {
                if self.is_stopped() {
                    return Err(SecretError::Stopped);
                }
                let attempt = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                let retry_in = self.config.backoff.delay_for_attempt(attempt);
                *self.next_due.lock() = Some(deadline_after(retry_in));
                self.set_state(ManagerState::Failed);

                if error.is_retryable() {
                    tracing::warn!(error = %error, attempt, ?retry_in, "token renewal failed, retrying");
                } else {
                    tracing::error!(error = %error, attempt, ?retry_in, "token renewal failed, retrying");
                }
                self.events.emit(ManagerEvent::RenewalFailed {
                    error: error.clone(),
                    attempt,
                    retry_in,
                });
                Err(error)
            }
        }
    }

    async fn renew_and_exchange(&self) -> Result<ExchangedSecret, SecretError> {
        let current = self.vault_token.lock().clone();
        let renewed = self.exchanger.renew(&current).await?;
        *self.vault_token.lock() = renewed.clone();
        self.exchanger.exchange(&renewed).await
    }

    /// Publish a new context and arm the next renewal. Returns the delay.
    fn install(&self, secret: ExchangedSecret) -> Duration {
        let delay = scheduler::renewal_delay(secret.ttl, self.config.renewal_factor);
        let context = Arc::new(AuthContext {
            token: secret.token,
            ttl: secret.ttl,
            obtained_at: Utc::now(),
        });

        *self.context.write() = Some(context);
        *self.next_due.lock() = Some(deadline_after(delay));

        tracing::info!(
            ttl_secs = secret.ttl,
            renewal_in = ?delay,
            "vault token exchanged, renewal scheduled"
        );
        delay
    }
}

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
}
