//! Lifecycle events published by a [`SecretManager`](crate::SecretManager).
//!
//! Background renewal never returns errors to a caller, so this channel is
//! where failures surface. Events are fanned out over a
//! `tokio::sync::broadcast` channel; slow subscribers lose the oldest events
//! rather than stalling the renewal loop.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::SecretError;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// The first exchange succeeded.
    Ready { ttl: f64 },
    /// The renewal timer was armed.
    RenewalScheduled { delay: Duration },
    /// A renew→exchange cycle replaced the secret.
    Renewed { ttl: f64 },
    /// A background renewal cycle failed; the previous secret stays in use.
    RenewalFailed {
        error: SecretError,
        /// Consecutive failures so far, starting at 1.
        attempt: u32,
        retry_in: Duration,
    },
    /// The manager was stopped; no further events follow.
    Stopped,
}

/// Broadcast sender wrapper.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: ManagerEvent) {
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }
}
