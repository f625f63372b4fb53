//! Subnet policy helpers

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;

use crate::config::RestrictedSubnet;
use crate::errors::{DevServerError, Result};
use crate::net::resolver::Resolver;

fn parse_ipv4(value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| DevServerError::InvalidAddress(format!("not a dotted-quad IPv4 address: {}", value)))
}

/// Whether `ip` falls inside `subnet_ip/mask_bits`.
pub fn ip_in_subnet(ip: &str, subnet_ip: &str, mask_bits: u8) -> Result<bool> {
    ipv4_in_subnet(parse_ipv4(ip)?, parse_ipv4(subnet_ip)?, mask_bits)
}

pub(crate) fn ipv4_in_subnet(ip: Ipv4Addr, subnet_ip: Ipv4Addr, mask_bits: u8) -> Result<bool> {
    let net = Ipv4Net::new(subnet_ip, mask_bits)
        .map_err(|_| DevServerError::InvalidAddress(format!("mask bits out of range: {}", mask_bits)))?
        .trunc();
    Ok(net.contains(&ip))
}

/// Applies subnet policy on top of a [`Resolver`]
#[derive(Clone)]
pub struct SubnetMatcher {
    resolver: Arc<dyn Resolver>,
}

impl SubnetMatcher {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    pub async fn resolve_hostname_to_ip(&self, hostname: &str) -> Option<Ipv4Addr> {
        self.resolver.resolve(hostname).await
    }

    /// Hostnames whose address shares `target_ip/mask_bits`.
    ///
    /// `candidates` are checked when given, the keys of `ip_map` otherwise.
    /// An address in `ip_map` is used as is; names missing from it are
    /// resolved. Unresolvable hosts are dropped.
    pub async fn servers_in_same_subnet(
        &self,
        target_ip: &str,
        mask_bits: u8,
        candidates: Option<&[String]>,
        ip_map: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<String>> {
        let target = parse_ipv4(target_ip)?;

        let names: Vec<String> = match (candidates, ip_map) {
            (Some(candidates), _) if !candidates.is_empty() => candidates.to_vec(),
            (_, Some(map)) => map.keys().cloned().collect(),
            (Some(_), None) => Vec::new(),
            (None, None) => {
                return Err(DevServerError::Configuration(
                    "either candidate hostnames or a hostname -> ip map must be supplied".to_string(),
                ))
            }
        };

        let mut pairs: Vec<(String, Option<Ipv4Addr>)> = Vec::with_capacity(names.len());
        for name in names {
            let cached: Option<Ipv4Addr> = ip_map
                .and_then(|map| map.get(&name))
                .and_then(|addr| addr.trim().parse().ok());
            let ip = match cached {
                Some(ip) => Some(ip),
                None => self.resolver.resolve(&name).await,
            };
            pairs.push((name, ip));
        }

        let mut matched = Vec::new();
        for (name, ip) in pairs {
            if let Some(ip) = ip {
                if ipv4_in_subnet(ip, target, mask_bits)? {
                    matched.push(name);
                }
            }
        }
        Ok(matched)
    }

    /// First restricted subnet, in declaration order, containing `hostname`
    pub async fn restricted_subnet_for(
        &self,
        hostname: &str,
        restricted_subnets: &[RestrictedSubnet],
    ) -> Option<RestrictedSubnet> {
        let ip = self.resolver.resolve(hostname).await?;
        restricted_subnets
            .iter()
            .find(|s| ipv4_in_subnet(ip, s.ip, s.mask_bits).unwrap_or(false))
            .copied()
    }

    /// Whether `hostname` resolves into any restricted subnet
    pub async fn in_any_restricted_subnet(
        &self,
        hostname: &str,
        restricted_subnets: &[RestrictedSubnet],
    ) -> bool {
        self.restricted_subnet_for(hostname, restricted_subnets)
            .await
            .is_some()
    }
}
