//! Time-budgeted retry around devserver calls

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, warn};

use crate::constants::{DEVSERVER_IS_STAGING_RETRY, DEVSERVER_SSH_TIMEOUT, OVERLOAD_COOLDOWN};
use crate::errors::{DevServerError, Result};
use crate::telemetry::{self, MetricsSink};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Retry policy handed to each component at construction
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total budget across all attempts
    pub timeout: Duration,
    pub cooldown: CooldownOptions,
    /// Minimum wait after the devserver signalled overload
    pub overload_cooldown: Duration,
    pub is_retryable: fn(&DevServerError) -> bool,
    /// Maps the last retryable error once the budget is spent
    pub on_give_up: fn(DevServerError) -> DevServerError,
}

fn default_is_retryable(e: &DevServerError) -> bool {
    e.is_retryable()
}

fn default_give_up(e: DevServerError) -> DevServerError {
    DevServerError::Server(e.to_string())
}

impl RetryPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            cooldown: CooldownOptions::default(),
            overload_cooldown: OVERLOAD_COOLDOWN,
            is_retryable: default_is_retryable,
            on_give_up: default_give_up,
        }
    }

    /// 100 minute budget used by staging and most RPCs
    pub fn staging() -> Self {
        Self::with_timeout(DEVSERVER_IS_STAGING_RETRY)
    }

    /// 1 minute budget used by health checks and short listings
    pub fn health_check() -> Self {
        Self::with_timeout(DEVSERVER_SSH_TIMEOUT)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::staging()
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's budget would be exceeded by the next wait.
///
/// Budget exhaustion increments `devserver/call_timeout` tagged with
/// `dev_server` and `label`.
pub async fn retry_call<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    dev_server: &str,
    metrics: &dyn MetricsSink,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempt = 0;
    loop {
        let e = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if (policy.is_retryable)(&e) => e,
            Err(e) => return Err(e),
        };

        let mut delay = calc_exp_backoff(&policy.cooldown, attempt);
        if matches!(e, DevServerError::Overload(_)) {
            delay = delay.max(policy.overload_cooldown);
        }
        if start.elapsed() + delay > policy.timeout {
            error!(
                "RPC call {} on devserver {} gave up after {} attempt(s): {}",
                label,
                dev_server,
                attempt + 1,
                e
            );
            metrics.counter(
                telemetry::CALL_TIMEOUT,
                telemetry::fields([
                    ("dev_server", dev_server.to_string()),
                    ("label", label.to_string()),
                ]),
            );
            return Err((policy.on_give_up)(e));
        }

        warn!("{} on {} failed ({}), retrying in {:?}", label, dev_server, e, delay);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
