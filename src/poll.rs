//! Bounded readiness poller
//!
//! Generic retry primitive the condition library is built on: evaluate a
//! readiness predicate at a fixed interval until it reports ready, a hard
//! error occurs, the window elapses, or the caller cancels.
//!
//! The retry-vs-fatal policy is explicit and not configurable: a predicate
//! error stops the poll immediately. A query failure is a fatal outcome for
//! that poll, not a transient to ride out; callers that want retry-on-error
//! must express it inside their predicate.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Interval and window of one bounded poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between predicate evaluations
    pub interval: Duration,
    /// Total window after which the poll fails with a timeout
    pub timeout: Duration,
}

impl PollConfig {
    /// Create a poll config from an interval and a total window
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Tuning used for control-plane readiness: every 2s for up to 5 minutes
    pub const fn control_plane() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300))
    }

    /// Tuning derived from a retry count, `retries` attempts `interval` apart
    pub const fn retries(retries: u32, interval: Duration) -> Self {
        Self::new(
            interval,
            Duration::from_millis(interval.as_millis() as u64 * retries as u64),
        )
    }
}

/// Repeatedly evaluate `predicate` until it reports ready.
///
/// The first evaluation happens immediately; every further one waits
/// `config.interval` first, so the loop never spins. Outcomes:
///
/// * `Ok(())` when the predicate returned `Ok(true)` before the window elapsed
/// * [`Error::Timeout`] when the window elapsed with only `Ok(false)` results
/// * [`Error::Cancelled`] when the token fired, even mid-sleep
/// * any error from the predicate itself, returned as-is on the spot
pub async fn poll_until_ready<F, Fut>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut predicate: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let deadline = Instant::now() + config.timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if predicate().await? {
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(config.interval) => {}
        }

        if Instant::now() >= deadline {
            return Err(Error::Timeout(config.timeout));
        }
    }
}
