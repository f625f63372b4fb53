//! Stage request plus `is_staged` polling

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::constants::{ARTIFACT_STAGE_POLLING_INTERVAL, DEVSERVER_IS_STAGING_RETRY, SUCCESS};
use crate::endpoint::DevServerEndpoint;
use crate::errors::{DevServerError, Result};
use crate::http::{retry_call, DevServerCall, RetryPolicy};
use crate::staging::request::StagingRequest;
use crate::telemetry::{self, MetricsSink};
use crate::utils::poll_for_condition;

/// Staging timing
#[derive(Debug, Clone)]
pub struct StagingOptions {
    /// Interval between `is_staged` polls
    pub poll_interval: Duration,

    /// Budget for the whole `is_staged` poll
    pub timeout: Duration,

    /// Per-request timeout, `None` for the call layer's default
    pub request_timeout: Option<Duration>,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            poll_interval: ARTIFACT_STAGE_POLLING_INTERVAL,
            timeout: DEVSERVER_IS_STAGING_RETRY,
            request_timeout: None,
        }
    }
}

/// Drives the asynchronous `stage` protocol against one devserver at a time
#[derive(Clone)]
pub struct StagingCoordinator {
    call: DevServerCall,
    retry: RetryPolicy,
    options: StagingOptions,
    metrics: Arc<dyn MetricsSink>,
}

impl StagingCoordinator {
    pub fn new(
        call: DevServerCall,
        retry: RetryPolicy,
        options: StagingOptions,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            call,
            retry,
            options,
            metrics,
        }
    }

    pub fn options(&self) -> &StagingOptions {
        &self.options
    }

    /// Issue `method` asynchronously, require `Success`, then wait until
    /// `is_staged` reports the same request as done.
    pub async fn call_and_wait(
        &self,
        endpoint: &DevServerEndpoint,
        method: &str,
        request: &StagingRequest,
        error_message: &str,
    ) -> Result<String> {
        let url = endpoint.build_call(method, &request.stage_params());
        let response = retry_call(&self.retry, method, endpoint.hostname(), self.metrics.as_ref(), || {
            self.call.run_call(&url, self.options.request_timeout)
        })
        .await?;
        debug!("response for RPC: {:?}", response);

        if response.trim() != SUCCESS {
            return Err(DevServerError::Server(error_message.to_string()));
        }

        self.poll_is_staged(endpoint, request).await?;
        Ok(response)
    }

    /// Poll `is_staged` until it answers `True`.
    ///
    /// Transport and overload errors count as "not yet"; any other error
    /// carries the devserver's own failure and stops the wait.
    pub async fn poll_is_staged(&self, endpoint: &DevServerEndpoint, request: &StagingRequest) -> Result<()> {
        let url = endpoint.build_call("is_staged", &request.is_staged_params());
        poll_for_condition(
            || self.is_staged_once(&url),
            self.options.timeout,
            self.options.poll_interval,
            &format!("is_staged for {}", request.build),
        )
        .await
    }

    async fn is_staged_once(&self, url: &str) -> Result<bool> {
        match self.call.run_call(url, self.options.request_timeout).await {
            Ok(body) => {
                debug!("whether artifact is staged: {:?}", body);
                Ok(body.trim() == "True")
            }
            Err(e) if e.is_retryable() => {
                warn!("Error in is_staged: {}, will retry", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stage `request` and wait for it, emitting the staging metrics
    pub async fn stage_artifacts(&self, endpoint: &DevServerEndpoint, request: &StagingRequest) -> Result<()> {
        let artifacts_arg = request.artifacts_arg();
        let staging_info = request.staging_info();
        let error_message = format!(
            "staging artifacts={} files={}  for {} failed;HTTP OK not accompanied by 'Success'.",
            artifacts_arg,
            request.files_arg(),
            request.build
        );

        info!("Staging artifacts on devserver {}: {}", endpoint.url(), staging_info);
        let start = Instant::now();
        let result = self.call_and_wait(endpoint, "stage", request, &error_message).await;

        let dev_server = endpoint.resolved_hostname().to_string();
        self.metrics.gauge(
            telemetry::STAGE_ARTIFACT_DURATION,
            start.elapsed().as_secs_f64(),
            telemetry::fields([
                ("artifacts", artifacts_arg.clone()),
                ("dev_server", dev_server.clone()),
            ]),
        );
        self.metrics.counter(
            telemetry::STAGE_ARTIFACT,
            telemetry::fields([
                ("success", result.is_ok().to_string()),
                ("artifacts", artifacts_arg),
                ("dev_server", dev_server),
            ]),
        );

        match result {
            Ok(_) => {
                info!("Finished staging artifacts: {}", staging_info);
                Ok(())
            }
            Err(e) if e.is_timeout() => {
                error!("stage_artifacts timed out: {}", staging_info);
                Err(DevServerError::Timeout(format!(
                    "stage_artifacts timed out: {}",
                    staging_info
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// First half of a two-phase download
    pub async fn trigger_download(&self, endpoint: &DevServerEndpoint, request: &StagingRequest) -> Result<()> {
        info!("trigger_download starts for {}", request.build);
        self.staged_phase(endpoint, request, "trigger_download").await?;
        info!("trigger_download finishes for {}", request.build);
        Ok(())
    }

    /// Second half of a two-phase download
    pub async fn finish_download(&self, endpoint: &DevServerEndpoint, request: &StagingRequest) -> Result<()> {
        self.staged_phase(endpoint, request, "finish_download").await
    }

    async fn staged_phase(&self, endpoint: &DevServerEndpoint, request: &StagingRequest, phase: &str) -> Result<()> {
        let error_message = format!(
            "{} for {} failed;HTTP OK not accompanied by 'Success'.",
            phase, request.build
        );
        match self.call_and_wait(endpoint, "stage", request, &error_message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_timeout() => {
                error!("{} timed out for {}.", phase, request.build);
                Err(DevServerError::Timeout(format!(
                    "{} timed out for {}.",
                    phase, request.build
                )))
            }
            Err(e) => Err(e),
        }
    }
}
