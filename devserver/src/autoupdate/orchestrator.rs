//! Trigger, poll, clean up and retry a DUT auto-update

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::autoupdate::classify::{classify_exceptions, is_retryable_error, parse_au_error};
use crate::autoupdate::fsm::{AuAttemptFsm, AuEvent, AuState};
use crate::constants::{
    AU_RETRY_LIMIT, CROS_AU_POLLING_INTERVAL, CROS_AU_RETRY_INTERVAL,
    DEVSERVER_IS_CROS_AU_FINISHED_TIMEOUT,
};
use crate::endpoint::DevServerEndpoint;
use crate::errors::{DevServerError, Result};
use crate::filesys::{Dir, File};
use crate::http::{retry_call, wire_bool, DevServerCall, Params, RetryPolicy};
use crate::net::Resolver;
use crate::servers::build_name::parse_build_name;
use crate::telemetry::{self, MetricsSink};
use crate::utils::poll_for_condition;

const NO_JSON: &str = "No JSON object could be decoded";

/// Auto-update timing and attempt budget
#[derive(Debug, Clone)]
pub struct AutoUpdateOptions {
    pub attempts_limit: u32,
    pub poll_interval: Duration,
    /// Budget for one attempt's `get_au_status` poll
    pub finish_timeout: Duration,
    /// Pause between attempts on the same devserver
    pub retry_interval: Duration,
    pub request_timeout: Option<Duration>,
}

impl Default for AutoUpdateOptions {
    fn default() -> Self {
        Self {
            attempts_limit: AU_RETRY_LIMIT,
            poll_interval: CROS_AU_POLLING_INTERVAL,
            finish_timeout: DEVSERVER_IS_CROS_AU_FINISHED_TIMEOUT,
            retry_interval: CROS_AU_RETRY_INTERVAL,
            request_timeout: None,
        }
    }
}

/// An update process running on a devserver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuProcessHandle {
    pub host_name: String,
    pub pid: u32,
    /// Directory receiving the devserver's update log, if any
    pub log_dir: Option<PathBuf>,
}

impl AuProcessHandle {
    pub fn log_filename(log_dir: &Path, host_name: &str, pid: u32) -> PathBuf {
        log_dir.join(format!("CrOS_update_{}_{}.log", host_name, pid))
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_dir
            .as_deref()
            .map(|dir| Self::log_filename(dir, &self.host_name, self.pid))
    }
}

/// Result of a whole `auto_update` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoUpdateOutcome {
    pub success: bool,
    pub retry_with_another_devserver: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuStatusPayload {
    Legacy(bool, serde_json::Value),
    Detailed {
        #[serde(default)]
        finished: bool,
        #[serde(default)]
        status: Option<serde_json::Value>,
        #[serde(default)]
        detailed_error_msg: Option<String>,
    },
}

/// Interpret one `get_au_status` body as "finished or not"
fn parse_au_status(body: &str) -> Result<bool> {
    let payload: AuStatusPayload = serde_json::from_str(body).map_err(|_| {
        DevServerError::Server(format!("{} (Got AU status: {:?})", NO_JSON, body))
    })?;
    match payload {
        AuStatusPayload::Detailed {
            detailed_error_msg: Some(msg),
            ..
        } if !msg.is_empty() => Err(DevServerError::Server(msg)),
        AuStatusPayload::Detailed { finished, status, .. } => {
            log_au_progress(finished, status.as_ref());
            Ok(finished)
        }
        AuStatusPayload::Legacy(finished, status) => {
            log_au_progress(finished, Some(&status));
            Ok(finished)
        }
    }
}

fn log_au_progress(finished: bool, status: Option<&serde_json::Value>) {
    if finished {
        debug!("CrOS auto-update is finished");
    } else {
        debug!("Current CrOS auto-update status: {:?}", status);
    }
}

/// `[true, pid]` starts polling; `[false, msg]` is a rejection carrying `msg`
fn parse_trigger_response(body: &str) -> Result<u32> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|_| {
        DevServerError::Server(format!("{} (Got cros_au response: {:?})", NO_JSON, body))
    })?;
    let accepted = value.get(0).and_then(|v| v.as_bool()).unwrap_or(false);
    let detail = value.get(1);
    if accepted {
        return detail
            .and_then(|v| v.as_u64())
            .and_then(|pid| u32::try_from(pid).ok())
            .ok_or_else(|| DevServerError::Server(format!("cros_au returned no usable pid: {}", body)));
    }
    let message = match detail {
        Some(serde_json::Value::String(msg)) => msg.clone(),
        Some(other) => other.to_string(),
        None => body.trim().to_string(),
    };
    Err(DevServerError::Server(message))
}

/// Drives `cros_au` and its helper RPCs against one devserver
#[derive(Clone)]
pub struct AutoUpdateOrchestrator {
    call: DevServerCall,
    retry: RetryPolicy,
    options: AutoUpdateOptions,
    resolver: Arc<dyn Resolver>,
    metrics: Arc<dyn MetricsSink>,
}

impl AutoUpdateOrchestrator {
    pub fn new(
        call: DevServerCall,
        retry: RetryPolicy,
        options: AutoUpdateOptions,
        resolver: Arc<dyn Resolver>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            call,
            retry,
            options,
            resolver,
            metrics,
        }
    }

    pub fn options(&self) -> &AutoUpdateOptions {
        &self.options
    }

    fn au_params(host_name: &str, pid: u32) -> Params {
        vec![
            ("host_name".to_string(), host_name.to_string()),
            ("pid".to_string(), pid.to_string()),
        ]
    }

    async fn retried(&self, endpoint: &DevServerEndpoint, label: &str, url: &str) -> Result<String> {
        retry_call(&self.retry, label, endpoint.hostname(), self.metrics.as_ref(), || {
            self.call.run_call(url, self.options.request_timeout)
        })
        .await
    }

    /// Issue `cros_au` and return its raw body
    pub async fn trigger_auto_update(
        &self,
        endpoint: &DevServerEndpoint,
        host_name: &str,
        build_name: &str,
        force_update: bool,
        full_update: bool,
    ) -> Result<String> {
        let params = vec![
            ("async".to_string(), wire_bool(true)),
            ("host_name".to_string(), host_name.to_string()),
            ("build_name".to_string(), build_name.to_string()),
            ("force_update".to_string(), wire_bool(force_update)),
            ("full_update".to_string(), wire_bool(full_update)),
        ];
        let url = endpoint.build_call("cros_au", &params);
        let response = self.retried(endpoint, "cros_au", &url).await?;
        info!("Received response from devserver for cros_au call: {:?}", response);
        Ok(response)
    }

    /// Poll `get_au_status` until the update process reports finished
    pub async fn wait_for_auto_update_finished(
        &self,
        endpoint: &DevServerEndpoint,
        host_name: &str,
        pid: u32,
    ) -> Result<()> {
        debug!("Check the progress for auto-update process {}", pid);
        let url = endpoint.build_call("get_au_status", &Self::au_params(host_name, pid));
        poll_for_condition(
            || self.au_finished_once(&url),
            self.options.finish_timeout,
            self.options.poll_interval,
            &format!("auto-update process {} for {}", pid, host_name),
        )
        .await
    }

    async fn au_finished_once(&self, url: &str) -> Result<bool> {
        match self.call.run_call(url, self.options.request_timeout).await {
            Ok(body) => parse_au_status(&body),
            Err(e) if e.is_retryable() => {
                warn!("{}: Retrying connection to devserver to check auto-update status.", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Kill a lingering update process; false when the devserver refuses
    pub async fn kill_au_process_for_host(&self, endpoint: &DevServerEndpoint, host_name: &str, pid: u32) -> bool {
        let url = endpoint.build_call("kill_au_proc", &Self::au_params(host_name, pid));
        let result = match self.retried(endpoint, "kill_au_proc", &url).await {
            Ok(response) if response.trim() == "True" => Ok(()),
            Ok(response) => Err(DevServerError::Server(format!(
                "Failed to kill the triggerred CrOS auto_update process on devserver {}, the response is {}",
                endpoint.url(),
                response
            ))),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("{}", e);
                false
            }
        }
    }

    /// Remove the devserver's tracking file for `(host_name, pid)`
    pub async fn clean_track_log(&self, endpoint: &DevServerEndpoint, host_name: &str, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let url = endpoint.build_call("handler_cleanup", &Self::au_params(host_name, pid));
        match self.retried(endpoint, "handler_cleanup", &url).await {
            Ok(_) => true,
            Err(e) => {
                debug!(
                    "Failed to clean track_status_file on devserver for host {} and process id {}: {}",
                    host_name, pid, e
                );
                false
            }
        }
    }

    /// Fetch the update log and write it under `log_dir`
    pub async fn collect_au_log(&self, endpoint: &DevServerEndpoint, handle: &AuProcessHandle) -> bool {
        if handle.pid == 0 {
            return false;
        }
        let Some(path) = handle.log_file() else {
            return false;
        };
        let url = endpoint.build_call("collect_cros_au_log", &Self::au_params(&handle.host_name, handle.pid));
        let result = match self.retried(endpoint, "collect_cros_au_log", &url).await {
            Ok(log) => {
                debug!("Saving auto-update logs into {}", path.display());
                File::new(path.clone()).write_string(&log).await.map_err(|e| {
                    DevServerError::Server(format!(
                        "Failed to write auto-update logs into {}: {}",
                        path.display(),
                        e
                    ))
                })
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "Failed to collect auto-update log on devserver for host {} and process id {}: {}",
                    handle.host_name, handle.pid, e
                );
                false
            }
        }
    }

    /// Auto-update `host_name` to `build_name`.
    ///
    /// Returns `(success, retry_with_another_devserver)`; an error is raised
    /// only when every attempt failed and another devserver would not help.
    pub async fn auto_update(
        &self,
        endpoint: &DevServerEndpoint,
        host_name: &str,
        build_name: &str,
        log_dir: Option<&Path>,
        force_update: bool,
        full_update: bool,
    ) -> Result<AutoUpdateOutcome> {
        let au_log_dir = log_dir.map(|d| Dir::new(d).autoupdate_logs().path().to_path_buf());
        let mut fsm = AuAttemptFsm::new(self.options.attempts_limit);
        // May become the DUT's IP after the first failed attempt
        let mut target_host = host_name.to_string();

        loop {
            fsm.process(AuEvent::Trigger).map_err(DevServerError::Server)?;
            let attempt = fsm.budget().attempts_made;
            debug!("Start CrOS auto-update for host {} at {} time(s).", host_name, attempt);

            match self
                .trigger_auto_update(endpoint, &target_host, build_name, force_update, full_update)
                .await
            {
                Err(e) => {
                    let msg = e.to_string();
                    debug!("Exception raised on auto_update attempt #{}:\n{}", attempt, msg);
                    fsm.process(AuEvent::AttemptFailed(Some(msg.clone())))
                        .map_err(DevServerError::Server)?;
                    if is_retryable_error(&msg) {
                        fsm.process(AuEvent::RetryElsewhere).map_err(DevServerError::Server)?;
                    }
                }
                Ok(response) => {
                    let (raised, pid) = match parse_trigger_response(&response) {
                        Ok(pid) => {
                            debug!("start process {} for auto_update in devserver", pid);
                            fsm.process(AuEvent::Accepted { pid }).map_err(DevServerError::Server)?;
                            let waited = self.wait_for_auto_update_finished(endpoint, &target_host, pid).await;
                            (waited.err(), pid)
                        }
                        Err(e) => {
                            debug!("Failed to trigger auto-update process on devserver");
                            (Some(e), 0)
                        }
                    };

                    let handle = AuProcessHandle {
                        host_name: target_host.clone(),
                        pid,
                        log_dir: au_log_dir.clone(),
                    };
                    let cleaned = self.clean_track_log(endpoint, &target_host, pid).await;
                    let collected = if au_log_dir.is_some() {
                        self.collect_au_log(endpoint, &handle).await
                    } else {
                        true
                    };

                    if raised.is_none() && cleaned && collected {
                        debug!("CrOS auto-update succeed for host {}", host_name);
                        fsm.process(AuEvent::Finished).map_err(DevServerError::Server)?;
                        break;
                    }

                    if !self.kill_au_process_for_host(endpoint, &target_host, pid).await {
                        debug!("Failed to kill auto_update process {}", pid);
                    }
                    match raised {
                        Some(e) => {
                            let msg = e.to_string();
                            debug!("Exception raised on auto_update attempt #{}:\n{}", attempt, msg);
                            if let Some(path) = handle.log_file() {
                                debug!("Please see error details in log {}", path.display());
                            }
                            fsm.process(AuEvent::AttemptFailed(Some(parse_au_error(&msg))))
                                .map_err(DevServerError::Server)?;
                            if is_retryable_error(&msg) {
                                fsm.process(AuEvent::RetryElsewhere).map_err(DevServerError::Server)?;
                            }
                        }
                        None => {
                            fsm.process(AuEvent::AttemptFailed(None)).map_err(DevServerError::Server)?;
                        }
                    }
                }
            }

            if fsm.is_terminal() {
                break;
            }
            if !fsm.can_retry() {
                fsm.process(AuEvent::GiveUp).map_err(DevServerError::Server)?;
                break;
            }

            tokio::time::sleep(self.options.retry_interval).await;
            match self.resolver.resolve(host_name).await {
                Some(ip) => {
                    target_host = ip.to_string();
                    debug!("AU failed, trying IP instead of hostname: {}", target_host);
                }
                None => warn!("Failed to resolve {}, retrying with the hostname", host_name),
            }
        }

        let success = fsm.state() == AuState::Succeeded;
        let retry_elsewhere = fsm.retry_elsewhere();
        let errors = &fsm.budget().per_attempt_errors;
        self.report(endpoint, host_name, build_name, success, errors);

        if success || retry_elsewhere {
            return Ok(AutoUpdateOutcome {
                success,
                retry_with_another_devserver: retry_elsewhere,
            });
        }

        let reason = errors
            .first()
            .cloned()
            .unwrap_or_else(|| "RPC calls after the whole auto-update process failed.".to_string());
        Err(DevServerError::Server(format!(
            "CrOS auto-update failed for host {}: {}",
            host_name, reason
        )))
    }

    fn report(&self, endpoint: &DevServerEndpoint, host_name: &str, build_name: &str, success: bool, errors: &[String]) {
        let (board, build_type, milestone) = match parse_build_name(build_name) {
            Ok(parsed) => (parsed.board, parsed.build_type, parsed.milestone.unwrap_or_default()),
            Err(_) => {
                warn!(
                    "Unable to parse build name {} for metrics. Continuing anyway.",
                    build_name
                );
                (String::new(), String::new(), String::new())
            }
        };
        let error = classify_exceptions(errors);

        self.metrics.counter(
            telemetry::CROS_UPDATE_BY_DEVSERVER,
            telemetry::fields([
                ("dev_server", endpoint.resolved_hostname().to_string()),
                ("success", success.to_string()),
                ("board", board.clone()),
                ("build_type", build_type),
                ("milestone", milestone),
                ("error", error.clone()),
            ]),
        );
        self.metrics.counter(
            telemetry::CROS_UPDATE_PER_DUT,
            telemetry::fields([
                ("success", success.to_string()),
                ("board", board),
                ("error", error),
                ("dut_host_name", host_name.to_string()),
            ]),
        );
    }
}
