//! Renewal timing.
//!
//! Each manager owns one background task running [`run`]. The task sleeps
//! until the manager's next due instant, runs a renew→exchange cycle, and
//! loops. Every cycle (background or manual) records the next due instant
//! itself: `ttl * renewal_factor` after a success, the backoff delay after a
//! failure. The loop only has to follow it.
//!
//! The stop signal is raced against every sleep and checked before every
//! cycle, so no timer is armed after [`SecretManager::stop`](crate::SecretManager::stop).

use std::sync::Arc;
use std::time::Duration;

use crate::manager::{Inner, RenewOutcome};

/// Delay between obtaining a secret and renewing it.
pub fn renewal_delay(ttl_secs: f64, renewal_factor: f64) -> Duration {
    let delay = ttl_secs * renewal_factor;
    if delay.is_finite() && delay > 0.0 {
        Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

pub(crate) async fn run(inner: Arc<Inner>) {
    let mut stop = inner.stop_signal();

    loop {
        if *stop.borrow_and_update() {
            break;
        }
        let Some(due) = inner.next_due() else {
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep_until(due) => {}
            _ = inner.rearmed() => continue,
            _ = stop.changed() => break,
        }

        if *stop.borrow() {
            break;
        }

        if matches!(inner.renew_cycle().await, Ok(RenewOutcome::Coalesced)) {
            // A manual renewal holds the cycle; it re-arms us when done.
            tokio::select! {
                _ = inner.rearmed() => {}
                _ = stop.changed() => break,
            }
        }
    }

    tracing::debug!("renewal scheduler exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewal_delay() {
        assert_eq!(renewal_delay(100.0, 0.75), Duration::from_secs(75));
        assert_eq!(renewal_delay(50.0, 0.75), Duration::from_secs_f64(37.5));
        assert_eq!(renewal_delay(3600.0, 0.5), Duration::from_secs(1800));
    }

    #[test]
    fn test_renewal_delay_degenerate_inputs() {
        assert_eq!(renewal_delay(0.0, 0.75), Duration::ZERO);
        assert_eq!(renewal_delay(-10.0, 0.75), Duration::ZERO);
        assert_eq!(renewal_delay(f64::NAN, 0.75), Duration::ZERO);
        assert_eq!(renewal_delay(f64::MAX, 0.75), Duration::MAX);
    }
}
