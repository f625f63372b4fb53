//! Load-balanced selection with parallel, individually bounded probes

use std::cmp::Ordering;

use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::constants::TIMEOUT_GET_DEVSERVER_LOAD;
use crate::errors::Result;
use crate::health::{HealthChecker, LoadSnapshot};
use crate::select::selector::{DevServerSelector, Selectable};

impl<S: Selectable> DevServerSelector<S> {
    /// Probe every candidate's load concurrently.
    ///
    /// Each probe runs in its own task under a hard timeout, so one hung
    /// devserver only costs its own slot.
    pub async fn probe_loads(&self, candidates: &[String]) -> Vec<LoadSnapshot> {
        let mut handles = Vec::with_capacity(candidates.len());
        for url in candidates {
            let endpoint = match self.context().endpoint(url) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!("Skipping devserver {}: {}", url, e);
                    continue;
                }
            };
            let checker = self.health().clone();
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(
                    TIMEOUT_GET_DEVSERVER_LOAD,
                    checker.get_load(&endpoint, TIMEOUT_GET_DEVSERVER_LOAD),
                )
                .await
                .ok()
                .flatten()
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(load) => load,
                Err(e) => {
                    error!("Load probe task failed: {}", e);
                    None
                }
            })
            .collect()
    }

    /// URL of the least disk-busy healthy devserver, or `None` if no
    /// candidate qualifies.
    pub async fn pick_least_loaded(&self, hostname: Option<&str>) -> Result<Option<String>> {
        let (mut candidates, can_retry) = self.available_devservers(hostname).await?;
        if self.healthy_devserver("", candidates.clone(), &[]).await?.is_none() {
            if !can_retry {
                return Ok(None);
            }
            candidates = self.available_devservers(None).await?.0;
        }

        let loads: Vec<LoadSnapshot> = self
            .probe_loads(&candidates)
            .await
            .into_iter()
            .filter(|load| {
                load.cpu_percent.is_some()
                    && self.health().is_free_disk_ok(load)
                    && self.health().is_apache_client_count_ok(load)
            })
            .collect();
        if loads.is_empty() {
            debug!("Failed to retrieve load stats from any devserver. No load balancing can be applied.");
            return Ok(None);
        }

        let best = loads
            .into_iter()
            .filter(HealthChecker::is_load_acceptable)
            .min_by(|a, b| {
                let a = a.disk_bytes_per_sec.unwrap_or(f64::INFINITY);
                let b = b.disk_bytes_per_sec.unwrap_or(f64::INFINITY);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            });
        match best {
            Some(load) => Ok(Some(load.devserver)),
            None => {
                error!("No devserver has the capacity to be selected.");
                Ok(None)
            }
        }
    }
}
