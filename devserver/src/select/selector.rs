//! Build-affine selection of a healthy devserver

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::app::context::LabContext;
use crate::config::DevServerConfig;
use crate::constants::DEFAULT_SUBNET_MASKBIT;
use crate::endpoint::{hostname_of, DevServerEndpoint};
use crate::errors::{DevServerError, Result};
use crate::health::HealthChecker;
use crate::net::subnet::{ipv4_in_subnet, SubnetMatcher};
use crate::utils::stable_hash;

/// A server kind the selector can pick
pub trait Selectable: Sized {
    /// Configured base URLs for this kind
    fn candidate_urls(config: &DevServerConfig) -> Vec<String>;

    /// Whether the DUT's network location constrains the choice
    fn location_aware() -> bool {
        true
    }

    fn from_endpoint(endpoint: DevServerEndpoint, ctx: &LabContext) -> Self;
}

/// Picks servers of kind `S` for a build and DUT
pub struct DevServerSelector<S> {
    ctx: LabContext,
    health: HealthChecker,
    subnet: SubnetMatcher,
    health_timeout: Duration,
    _kind: PhantomData<fn() -> S>,
}

impl<S: Selectable> DevServerSelector<S> {
    pub fn new(ctx: &LabContext) -> Self {
        Self {
            ctx: ctx.clone(),
            health: ctx.health_checker(),
            subnet: ctx.subnet_matcher(),
            health_timeout: HealthChecker::default_timeout(),
            _kind: PhantomData,
        }
    }

    pub fn context(&self) -> &LabContext {
        &self.ctx
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// All configured servers of this kind
    pub fn servers(&self) -> Vec<String> {
        S::candidate_urls(&self.ctx.config)
    }

    /// Servers outside every restricted subnet
    pub async fn unrestricted_devservers(&self) -> Vec<String> {
        let restricted = &self.ctx.config.restricted_subnets;
        let servers = self.servers();
        if restricted.is_empty() {
            return servers;
        }

        let mut unrestricted = Vec::new();
        for server in servers {
            let Ok(host) = hostname_of(&server) else {
                warn!("Skipping devserver with unparsable url {}", server);
                continue;
            };
            if !self.subnet.in_any_restricted_subnet(&host, restricted).await {
                unrestricted.push(server);
            }
        }
        unrestricted
    }

    /// Servers whose host shares `ip/mask_bits`
    pub async fn devservers_in_same_subnet(
        &self,
        ip: Ipv4Addr,
        mask_bits: u8,
        unrestricted_only: bool,
    ) -> Result<Vec<String>> {
        let servers = if unrestricted_only {
            self.unrestricted_devservers().await
        } else {
            self.servers()
        };
        let named: Vec<(String, String)> = servers
            .into_iter()
            .filter_map(|s| hostname_of(&s).ok().map(|h| (h, s)))
            .collect();
        if named.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = named.iter().map(|(h, _)| h.clone()).collect();
        let matched = self
            .subnet
            .servers_in_same_subnet(&ip.to_string(), mask_bits, Some(&names), None)
            .await?;
        Ok(named
            .into_iter()
            .filter(|(h, _)| matched.contains(h))
            .map(|(_, s)| s)
            .collect())
    }

    /// Candidate servers for `hostname` and whether selection may fall back
    /// to servers outside the DUT's location.
    pub async fn available_devservers(&self, hostname: Option<&str>) -> Result<(Vec<String>, bool)> {
        if !S::location_aware() {
            return Ok((self.servers(), false));
        }

        let host_ip = match hostname {
            Some(hostname) => {
                let ip = self.subnet.resolve_hostname_to_ip(hostname).await;
                if ip.is_none() {
                    error!(
                        "Failed to get IP address of {}. Will pick a devserver without subnet constraint.",
                        hostname
                    );
                }
                ip
            }
            None => None,
        };
        let Some(host_ip) = host_ip else {
            return Ok((self.unrestricted_devservers().await, false));
        };

        for subnet in &self.ctx.config.restricted_subnets {
            if ipv4_in_subnet(host_ip, subnet.ip, subnet.mask_bits)? {
                debug!(
                    "The host {} ({}) is in a restricted subnet. Try to locate a devserver inside subnet {}.",
                    hostname.unwrap_or_default(),
                    host_ip,
                    subnet
                );
                let servers = self
                    .devservers_in_same_subnet(subnet.ip, subnet.mask_bits, false)
                    .await?;
                return Ok((servers, false));
            }
        }

        if self.ctx.config.prefer_local_devserver {
            let servers = self
                .devservers_in_same_subnet(host_ip, DEFAULT_SUBNET_MASKBIT, true)
                .await?;
            return Ok((servers, true));
        }

        Ok((self.unrestricted_devservers().await, false))
    }

    /// Pop `hash(build) % len` until a non-banned healthy server turns up
    pub async fn healthy_devserver(
        &self,
        build: &str,
        mut candidates: Vec<String>,
        ban_list: &[String],
    ) -> Result<Option<S>> {
        let hash = stable_hash(build);
        while !candidates.is_empty() {
            let index = (hash % candidates.len() as u64) as usize;
            let candidate = candidates.remove(index);
            if ban_list.contains(&candidate) {
                continue;
            }
            let endpoint = self.ctx.endpoint(&candidate)?;
            if self.health.devserver_healthy(&endpoint, self.health_timeout).await {
                return Ok(Some(S::from_endpoint(endpoint, &self.ctx)));
            }
        }
        Ok(None)
    }

    /// Resolve `build` to a healthy server near `hostname`
    pub async fn resolve(&self, build: &str, hostname: Option<&str>, ban_list: &[String]) -> Result<S> {
        let mut tried = BTreeSet::new();
        let (candidates, can_retry) = self.available_devservers(hostname).await?;
        tried.extend(candidates.iter().cloned());

        let mut chosen = self.healthy_devserver(build, candidates, ban_list).await?;
        if chosen.is_none() && can_retry {
            let (candidates, _) = self.available_devservers(None).await?;
            tried.extend(candidates.iter().cloned());
            chosen = self.healthy_devserver(build, candidates, ban_list).await?;
        }

        chosen.ok_or_else(|| {
            let err = DevServerError::NoHealthyDevServer {
                tried: tried.into_iter().collect(),
                hostname: hostname.map(str::to_string),
            };
            error!("{}", err);
            err
        })
    }

    /// Any healthy server, via a time-based pseudo build name
    pub async fn random(&self) -> Result<S> {
        let build = chrono::Utc::now().timestamp_micros().to_string();
        self.resolve(&build, None, &[]).await
    }

    /// Every configured server that currently passes the health check
    pub async fn healthy_servers(&self) -> Result<Vec<DevServerEndpoint>> {
        let mut healthy = Vec::new();
        for server in self.servers() {
            let endpoint = self.ctx.endpoint(&server)?;
            if self.health.devserver_healthy(&endpoint, self.health_timeout).await {
                healthy.push(endpoint);
            }
        }
        Ok(healthy)
    }
}
