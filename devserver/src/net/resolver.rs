//! Hostname -> IPv4 resolution

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use tracing::error;

/// Resolves a hostname to an IPv4 address. Resolution failure is `None`,
/// never an error.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Option<Ipv4Addr>;
}

/// DNS-backed resolver with a static override map
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    overrides: BTreeMap<String, String>,
}

impl SystemResolver {
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        Self { overrides }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Option<Ipv4Addr> {
        if let Some(addr) = self.overrides.get(hostname) {
            match addr.parse() {
                Ok(ip) => return Some(ip),
                Err(_) => error!("Bad address override for {}: {}", hostname, addr),
            }
        }
        if let Ok(ip) = hostname.parse::<Ipv4Addr>() {
            return Some(ip);
        }

        match tokio::net::lookup_host((hostname, 0)).await {
            Ok(addrs) => {
                let found = addrs.into_iter().find_map(|a| match a.ip() {
                    IpAddr::V4(ip) => Some(ip),
                    IpAddr::V6(_) => None,
                });
                if found.is_none() {
                    error!("No IPv4 address found for {}", hostname);
                }
                found
            }
            Err(e) => {
                error!("Failed to resolve hostname {}: {}", hostname, e);
                None
            }
        }
    }
}
