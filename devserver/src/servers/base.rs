//! Shared plumbing for servers that stage builds

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::context::LabContext;
use crate::config::DevServerConfig;
use crate::endpoint::DevServerEndpoint;
use crate::errors::{DevServerError, Result};
use crate::http::{retry_call, wire_bool, DevServerCall, Params, RetryPolicy};
use crate::staging::{StagingCoordinator, StagingOptions};
use crate::telemetry::MetricsSink;

/// Staging capability shared by Chrome OS and Launch Control devservers
#[async_trait]
pub trait ArtifactServer: Send + Sync {
    fn core(&self) -> &ImageServerCore;

    fn endpoint(&self) -> &DevServerEndpoint {
        self.core().endpoint()
    }

    fn url(&self) -> &str {
        self.core().endpoint().url()
    }

    /// Resolve a `LATEST` build name to a concrete one
    async fn translate(&self, build: &str) -> Result<String>;

    async fn stage_artifacts(
        &self,
        build: &str,
        artifacts: &[String],
        files: &[String],
        archive_url: Option<&str>,
    ) -> Result<()>;

    /// Stage what is needed to start provisioning; with `synchronous` also
    /// wait for the rest.
    async fn trigger_download(&self, build: &str, synchronous: bool) -> Result<()>;

    /// Stage the full artifact set, blocking until it is done
    async fn finish_download(&self, build: &str) -> Result<()>;

    async fn get_staged_file_url(&self, filename: &str, build: &str) -> Result<String>;

    /// Devserver URL of `file_name` inside `artifacts` of `build`
    async fn locate_file(&self, file_name: &str, artifacts: &[String], build: &str) -> Result<String>;

    async fn list_control_files(&self, build: &str, suite_name: &str) -> Result<Vec<String>> {
        let build = self.translate(build).await?;
        self.core().list_control_files(&build, suite_name).await
    }

    async fn get_control_file(&self, build: &str, control_path: &str) -> Result<String> {
        let build = self.translate(build).await?;
        self.core().get_control_file(&build, control_path).await
    }

    async fn list_suite_controls(&self, build: &str, suite_name: &str) -> Result<BTreeMap<String, String>> {
        let build = self.translate(build).await?;
        self.core().list_suite_controls(&build, suite_name).await
    }
}

/// Fill an image URL template
pub fn render_image_url(pattern: &str, devserver: &str, image: &str) -> String {
    pattern.replace("{devserver}", devserver).replace("{image}", image)
}

fn param(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Endpoint, call layer and staging coordinator of one build devserver
#[derive(Clone)]
pub struct ImageServerCore {
    endpoint: DevServerEndpoint,
    config: Arc<DevServerConfig>,
    call: DevServerCall,
    metrics: Arc<dyn MetricsSink>,
    staging: StagingCoordinator,
}

impl ImageServerCore {
    pub fn new(endpoint: DevServerEndpoint, ctx: &LabContext) -> Self {
        let call = ctx.call();
        let staging = StagingCoordinator::new(
            call.clone(),
            RetryPolicy::staging(),
            StagingOptions::default(),
            ctx.metrics.clone(),
        );
        Self {
            endpoint,
            config: ctx.config.clone(),
            call,
            metrics: ctx.metrics.clone(),
            staging,
        }
    }

    pub fn endpoint(&self) -> &DevServerEndpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.config
    }

    pub fn call(&self) -> &DevServerCall {
        &self.call
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn staging(&self) -> &StagingCoordinator {
        &self.staging
    }

    /// Run `method` under `policy` and return the body
    pub async fn run(&self, method: &str, params: &[(String, String)], policy: &RetryPolicy) -> Result<String> {
        let url = self.endpoint.build_call(method, params);
        retry_call(policy, method, self.endpoint.hostname(), self.metrics.as_ref(), || {
            self.call.run_call(&url, None)
        })
        .await
    }

    /// Like [`run`](Self::run), split into lines
    pub async fn run_lines(&self, method: &str, params: &[(String, String)], policy: &RetryPolicy) -> Result<Vec<String>> {
        let url = self.endpoint.build_call(method, params);
        retry_call(policy, method, self.endpoint.hostname(), self.metrics.as_ref(), || {
            self.call.run_call_lines(&url, None)
        })
        .await
    }

    /// Directory URL of `image` on this devserver
    pub fn image_url(&self, image: &str) -> String {
        let pattern = self.config.image_url_pattern.replace("update", "static");
        render_image_url(&pattern, self.endpoint.url(), image)
    }

    /// Archive root for `artifacts`: the canary channel for factory images,
    /// the image archive otherwise
    pub fn storage_server_for(&self, artifacts: &[String]) -> &str {
        if artifacts.iter().any(|a| *a == self.config.factory_artifact) {
            &self.config.canary_channel_server
        } else {
            &self.config.image_storage_server
        }
    }

    pub async fn list_control_files(&self, build: &str, suite_name: &str) -> Result<Vec<String>> {
        let params = vec![param("build", build), param("suite_name", suite_name)];
        self.run_lines("controlfiles", &params, &RetryPolicy::staging()).await
    }

    pub async fn get_control_file(&self, build: &str, control_path: &str) -> Result<String> {
        let params = vec![param("build", build), param("control_path", control_path)];
        self.run("controlfiles", &params, &RetryPolicy::staging()).await
    }

    /// Control file contents keyed by path
    pub async fn list_suite_controls(&self, build: &str, suite_name: &str) -> Result<BTreeMap<String, String>> {
        let params = vec![param("build", build), param("suite_name", suite_name)];
        let body = self.run("list_suite_controls", &params, &RetryPolicy::staging()).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `locate_file` with the build identified by `build_params`; the result
    /// is served under `static/<build_path>/`.
    pub async fn locate_file(
        &self,
        file_name: &str,
        artifacts: &[String],
        build_path: &str,
        build_params: Params,
    ) -> Result<String> {
        if build_path.is_empty() {
            return Err(DevServerError::Server(format!(
                "You must specify build information to look for file {} in artifacts {:?}.",
                file_name, artifacts
            )));
        }
        let mut params = vec![
            param("file_name", file_name),
            param("artifacts", &artifacts.join(",")),
            ("async".to_string(), wire_bool(false)),
        ];
        params.extend(build_params);
        let file_path = self.run("locate_file", &params, &RetryPolicy::staging()).await?;
        Ok(format!(
            "{}/static/{}/{}",
            self.endpoint.url(),
            build_path,
            file_path.trim()
        ))
    }
}
