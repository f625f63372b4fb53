//! Metric sinks for devserver calls, health checks, staging and auto-update

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CALL_TIMEOUT: &str = "devserver/call_timeout";
pub const DEVSERVER_HEALTHY: &str = "devserver/devserver_healthy";
pub const DEVSERVER_AU_COUNT: &str = "devserver/devserver_au_count";
pub const STAGE_ARTIFACT: &str = "devserver/stage_artifact";
pub const STAGE_ARTIFACT_DURATION: &str = "devserver/stage_artifact_duration";
pub const SSH_FAILURE: &str = "devserver/ssh_failure";
pub const CROS_UPDATE_BY_DEVSERVER: &str = "provision/cros_update_by_devserver";
pub const CROS_UPDATE_PER_DUT: &str = "provision/cros_update_per_dut";
pub const SYMBOLICATE_DUMP: &str = "crashserver/symbolicate_dump";
pub const SYMBOLICATE_DUMP_DURATION: &str = "crashserver/symbolicate_dump_duration";

/// Field set attached to a sample
pub type Fields = BTreeMap<String, String>;

/// Build a field set from string pairs
pub fn fields<const N: usize>(pairs: [(&str, String); N]) -> Fields {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Destination for counters and gauges.
///
/// Emitting is infallible: a broken backend must never fail a devserver call.
pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &str, fields: Fields);
    fn gauge(&self, name: &str, value: f64, fields: Fields);
}

/// Discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &str, _fields: Fields) {}
    fn gauge(&self, _name: &str, _value: f64, _fields: Fields) {}
}

/// Emits each sample as a debug event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn counter(&self, name: &str, fields: Fields) {
        debug!(metric = name, ?fields, "counter +1");
    }

    fn gauge(&self, name: &str, value: f64, fields: Fields) {
        debug!(metric = name, value, ?fields, "gauge");
    }
}

/// One recorded sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    /// `None` for counter increments
    pub value: Option<f64>,
    pub fields: Fields,
}

/// Keeps every sample in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    samples: Mutex<Vec<MetricSample>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        match self.samples.lock() {
            Ok(samples) => samples.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Samples recorded under `name`
    pub fn named(&self, name: &str) -> Vec<MetricSample> {
        self.samples().into_iter().filter(|s| s.name == name).collect()
    }

    fn push(&self, sample: MetricSample) {
        match self.samples.lock() {
            Ok(mut samples) => samples.push(sample),
            Err(poisoned) => poisoned.into_inner().push(sample),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn counter(&self, name: &str, fields: Fields) {
        self.push(MetricSample {
            name: name.to_string(),
            value: None,
            fields,
        });
    }

    fn gauge(&self, name: &str, value: f64, fields: Fields) {
        self.push(MetricSample {
            name: name.to_string(),
            value: Some(value),
            fields,
        });
    }
}
