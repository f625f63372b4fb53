//! Shared, read-only dependencies handed to every component

use std::sync::Arc;

use crate::config::DevServerConfig;
use crate::constants::DEVSERVER_SSH_TIMEOUT;
use crate::endpoint::DevServerEndpoint;
use crate::errors::Result;
use crate::health::HealthChecker;
use crate::http::{DevServerCall, HttpTransport, SshTransport, Transport};
use crate::net::{Resolver, SubnetMatcher, SystemResolver};
use crate::telemetry::{MetricsSink, TracingMetrics};

/// Configuration plus the transport, resolver and metrics seams.
///
/// Cloning is cheap; nothing inside is mutated after construction.
#[derive(Clone)]
pub struct LabContext {
    pub config: Arc<DevServerConfig>,
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<dyn Resolver>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl LabContext {
    pub fn new(
        config: DevServerConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn Resolver>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            resolver,
            metrics,
        }
    }

    /// Production wiring: HTTP (or ssh when configured), DNS with the
    /// static override map, metrics as trace events
    pub fn from_config(config: DevServerConfig) -> Self {
        let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new());
        let transport: Arc<dyn Transport> = if config.enable_ssh_connection_for_devserver {
            Arc::new(SshTransport::new(http, metrics.clone()))
        } else {
            http
        };
        let resolver = Arc::new(SystemResolver::new(config.hostname_addr_map.clone()));
        Self::new(config, transport, resolver, metrics)
    }

    pub fn call(&self) -> DevServerCall {
        let call = DevServerCall::new(self.transport.clone());
        if self.config.enable_ssh_connection_for_devserver {
            call.with_default_timeout(DEVSERVER_SSH_TIMEOUT)
        } else {
            call
        }
    }

    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(
            self.call(),
            self.metrics.clone(),
            self.config.skip_devserver_health_check,
        )
    }

    pub fn subnet_matcher(&self) -> SubnetMatcher {
        SubnetMatcher::new(self.resolver.clone())
    }

    pub fn endpoint(&self, url: &str) -> Result<DevServerEndpoint> {
        DevServerEndpoint::new(url, &self.config)
    }
}
