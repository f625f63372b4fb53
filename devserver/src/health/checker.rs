//! Health policy evaluation

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::constants::{
    DEVSERVER_SSH_TIMEOUT, MAX_APACHE_CLIENT_COUNT, MAX_CPU_LOAD, MAX_NETWORK_IO,
    MIN_FREE_DISK_SPACE_GB,
};
use crate::endpoint::DevServerEndpoint;
use crate::health::load::LoadSnapshot;
use crate::http::{retry_call, DevServerCall, RetryPolicy};
use crate::telemetry::{self, MetricsSink};

/// Queries `check_health` and applies the lab's load thresholds.
///
/// Fails closed: any RPC or parse error makes the devserver ineligible.
#[derive(Clone)]
pub struct HealthChecker {
    call: DevServerCall,
    metrics: Arc<dyn MetricsSink>,
    skip_health_check: bool,
}

impl HealthChecker {
    pub fn new(call: DevServerCall, metrics: Arc<dyn MetricsSink>, skip_health_check: bool) -> Self {
        Self {
            call,
            metrics,
            skip_health_check,
        }
    }

    /// Default budget for one health probe, retries included
    pub fn default_timeout() -> Duration {
        DEVSERVER_SSH_TIMEOUT
    }

    /// Fetch the devserver's load, or `None` on any failure
    pub async fn get_load(&self, endpoint: &DevServerEndpoint, timeout: Duration) -> Option<LoadSnapshot> {
        let url = endpoint.build_call("check_health", &[]);
        let policy = RetryPolicy::with_timeout(timeout);
        let body = retry_call(&policy, "check_health", endpoint.hostname(), self.metrics.as_ref(), || {
            self.call.run_call(&url, Some(timeout))
        })
        .await;

        let parsed = body.and_then(|b| serde_json::from_str::<LoadSnapshot>(&b).map_err(Into::into));
        match parsed {
            Ok(mut load) => {
                load.devserver = endpoint.url().to_string();
                Some(load)
            }
            Err(e) => {
                error!(
                    "Devserver call failed: \"{}\", timeout: {} seconds, Error: {}",
                    url,
                    timeout.as_secs_f64(),
                    e
                );
                None
            }
        }
    }

    pub fn is_free_disk_ok(&self, load: &LoadSnapshot) -> bool {
        if self.skip_health_check {
            debug!("devserver health check is skipped.");
            return true;
        }
        load.free_disk_gb >= MIN_FREE_DISK_SPACE_GB
    }

    pub fn is_apache_client_count_ok(&self, load: &LoadSnapshot) -> bool {
        if self.skip_health_check {
            debug!("devserver health check is skipped.");
            return true;
        }
        match load.apache_client_count {
            None => {
                debug!("Apache client count is not collected from devserver.");
                true
            }
            Some(count) => count <= MAX_APACHE_CLIENT_COUNT,
        }
    }

    /// CPU and network IO under their thresholds. Missing figures fail.
    pub fn is_load_acceptable(load: &LoadSnapshot) -> bool {
        let (Some(cpu), Some(network)) = (load.cpu_percent, load.network_bytes_per_sec) else {
            return false;
        };
        if cpu > MAX_CPU_LOAD {
            debug!(
                "CPU load of devserver {} is at {}%, which is higher than the threshold of {}%",
                load.devserver, cpu, MAX_CPU_LOAD
            );
            return false;
        }
        if network > MAX_NETWORK_IO {
            debug!(
                "Network IO of devserver {} is at {} Bps, which is higher than the threshold of {} bytes per second.",
                load.devserver, network, MAX_NETWORK_IO
            );
            return false;
        }
        true
    }

    /// Load obtained, Apache client count ok and free disk ok.
    ///
    /// Emits `devserver/devserver_healthy` on every call and
    /// `devserver/devserver_au_count` when the snapshot reports AU processes.
    pub async fn devserver_healthy(&self, endpoint: &DevServerEndpoint, timeout: Duration) -> bool {
        let load = self.get_load(endpoint, timeout).await;
        let (healthy, reason) = match &load {
            None => (false, "(1) Failed to get load."),
            Some(load) => {
                let apache_ok = self.is_apache_client_count_ok(load);
                if !apache_ok {
                    error!(
                        "Devserver check_health failed. Live Apache client count is too high: {}.",
                        load.apache_client_count.unwrap_or_default()
                    );
                }
                let disk_ok = self.is_free_disk_ok(load);
                if !disk_ok {
                    error!(
                        "Devserver check_health failed. Free disk space is low. Only {}GB is available.",
                        load.free_disk_gb
                    );
                }
                match (apache_ok, disk_ok) {
                    (false, _) => (false, "(2) Apache client count too high."),
                    (true, false) => (false, "(3) Disk space too low."),
                    (true, true) => (true, ""),
                }
            }
        };

        self.metrics.counter(
            telemetry::DEVSERVER_HEALTHY,
            telemetry::fields([
                ("dev_server", endpoint.resolved_hostname().to_string()),
                ("healthy", healthy.to_string()),
                ("reason", reason.to_string()),
            ]),
        );
        if let Some(au_count) = load.as_ref().and_then(|l| l.au_process_count).filter(|c| *c > 0) {
            self.metrics.gauge(
                telemetry::DEVSERVER_AU_COUNT,
                au_count as f64,
                telemetry::fields([("dev_server", endpoint.resolved_hostname().to_string())]),
            );
        }
        healthy
    }
}
