//! Utility functions

use std::cmp::Ordering;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::errors::{DevServerError, Result};

/// Version information for the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Stable 64-bit hash of a string.
///
/// Build affinity must survive process restarts, so this is derived from
/// SHA-256 rather than the randomly seeded `std` hasher.
pub fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Poll `condition` until it returns true.
///
/// The condition is checked first; if the next sleep would overrun `timeout`
/// the poll gives up with `DevServerError::Timeout` carrying `description`.
pub async fn poll_for_condition<F, Fut>(
    mut condition: F,
    timeout: Duration,
    interval: Duration,
    description: &str,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    loop {
        if condition().await? {
            return Ok(());
        }
        if start.elapsed() + interval > timeout {
            return Err(DevServerError::Timeout(format!(
                "{} did not complete within {:?}",
                description, timeout
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Compare two version-like strings the way a loose version compare does:
/// numeric runs compare as numbers, everything else compares lexically.
pub fn compare_loose_versions(a: &str, b: &str) -> Ordering {
    let pa = loose_components(a);
    let pb = loose_components(b);
    for (x, y) in pa.iter().zip(pb.iter()) {
        let ord = match (x, y) {
            (Component::Num(x), Component::Num(y)) => x.cmp(y),
            (Component::Num(_), Component::Text(_)) => Ordering::Less,
            (Component::Text(_), Component::Num(_)) => Ordering::Greater,
            (Component::Text(x), Component::Text(y)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    pa.len().cmp(&pb.len())
}

#[derive(Debug, PartialEq, Eq)]
enum Component {
    Num(u64),
    Text(String),
}

fn loose_components(version: &str) -> Vec<Component> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut numeric = false;

    let flush = |current: &mut String, numeric: bool, parts: &mut Vec<Component>| {
        if current.is_empty() {
            return;
        }
        let part = std::mem::take(current);
        if numeric {
            match part.parse::<u64>() {
                Ok(n) => parts.push(Component::Num(n)),
                Err(_) => parts.push(Component::Text(part)),
            }
        } else {
            parts.push(Component::Text(part));
        }
    };

    for c in version.chars() {
        if c == '.' {
            flush(&mut current, numeric, &mut parts);
            continue;
        }
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != numeric {
            flush(&mut current, numeric, &mut parts);
        }
        numeric = is_digit;
        current.push(c);
    }
    flush(&mut current, numeric, &mut parts);
    parts
}

/// Escape a string for use inside double quotes in a POSIX shell.
pub fn sh_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '$' | '"' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
