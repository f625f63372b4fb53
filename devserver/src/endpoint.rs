//! One concrete devserver address

use crate::config::DevServerConfig;
use crate::errors::{DevServerError, Result};
use crate::http::call::DevServerCall;

/// A devserver, crash server or Android build server base URL.
///
/// `hostname` is always parsed from `base_url`; `resolved_hostname` is the
/// configured name for that address, or `hostname` when none is configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DevServerEndpoint {
    base_url: String,
    hostname: String,
    resolved_hostname: String,
}

/// Hostname portion of a URL
pub fn hostname_of(url: &str) -> Result<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().filter(|h| !h.is_empty()).map(str::to_string))
        .ok_or_else(|| DevServerError::Configuration(format!("no hostname in devserver url: {}", url)))
}

impl DevServerEndpoint {
    pub fn new(url: &str, config: &DevServerConfig) -> Result<Self> {
        let base_url = url.trim_end_matches('/').to_string();
        let hostname = hostname_of(&base_url)?;
        let resolved_hostname = config
            .hostname_for_ip(&hostname)
            .unwrap_or(&hostname)
            .to_string();
        Ok(Self {
            base_url,
            hostname,
            resolved_hostname,
        })
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn resolved_hostname(&self) -> &str {
        &self.resolved_hostname
    }

    /// RPC URL for `method` on this endpoint
    pub fn build_call(&self, method: &str, params: &[(String, String)]) -> String {
        DevServerCall::build_call(&self.base_url, method, params)
    }

    /// `scheme://netloc` of a job repo URL, `None` when it has no host
    pub fn server_url(url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str().filter(|h| !h.is_empty())?;
        Some(match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        })
    }
}

impl std::fmt::Display for DevServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.base_url)
    }
}
