//! `check_health` payload

use serde::{Deserialize, Serialize};

/// One `check_health` answer. Older devservers omit the optional counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    #[serde(default)]
    pub cpu_percent: Option<f64>,

    /// Free disk in GB
    #[serde(rename = "free_disk")]
    pub free_disk_gb: f64,

    #[serde(rename = "network_total_bytes_per_second", default)]
    pub network_bytes_per_sec: Option<f64>,

    #[serde(rename = "disk_total_bytes_per_second", default)]
    pub disk_bytes_per_sec: Option<f64>,

    #[serde(default)]
    pub au_process_count: Option<u64>,

    #[serde(default)]
    pub staging_thread_count: Option<u64>,

    #[serde(default)]
    pub apache_client_count: Option<u64>,

    /// URL of the devserver that produced the snapshot
    #[serde(default)]
    pub devserver: String,
}
