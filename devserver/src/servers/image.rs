//! Chrome OS image devserver

use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::app::context::LabContext;
use crate::autoupdate::{AuProcessHandle, AutoUpdateOptions, AutoUpdateOrchestrator, AutoUpdateOutcome};
use crate::config::DevServerConfig;
use crate::constants::{
    ARTIFACTS_TO_BE_STAGED_FOR_IMAGE, ARTIFACTS_TO_BE_STAGED_FOR_IMAGE_WITH_AUTOTEST, DEPENDENCIES_FILE,
};
use crate::endpoint::DevServerEndpoint;
use crate::errors::{DevServerError, Result};
use crate::http::RetryPolicy;
use crate::select::{DevServerSelector, Selectable};
use crate::servers::base::{render_image_url, ArtifactServer, ImageServerCore};
use crate::staging::StagingRequest;
use crate::utils::compare_loose_versions;

fn owned(artifacts: &[&str]) -> Vec<String> {
    artifacts.iter().map(|a| a.to_string()).collect()
}

fn latest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^([\w-]+)-(\w+)/LATEST").expect("valid LATEST regex"))
}

/// Devserver that stages and serves Chrome OS images and updates DUTs
#[derive(Clone)]
pub struct ImageServer {
    core: ImageServerCore,
    autoupdate: AutoUpdateOrchestrator,
}

impl Selectable for ImageServer {
    fn candidate_urls(config: &DevServerConfig) -> Vec<String> {
        config.dev_servers.clone()
    }

    fn from_endpoint(endpoint: DevServerEndpoint, ctx: &LabContext) -> Self {
        Self::new(endpoint, ctx)
    }
}

impl ImageServer {
    pub fn new(endpoint: DevServerEndpoint, ctx: &LabContext) -> Self {
        let autoupdate = AutoUpdateOrchestrator::new(
            ctx.call(),
            RetryPolicy::staging(),
            AutoUpdateOptions::default(),
            ctx.resolver.clone(),
            ctx.metrics.clone(),
        );
        Self {
            core: ImageServerCore::new(endpoint, ctx),
            autoupdate,
        }
    }

    /// Healthy image devserver for `build`, near `hostname` when known
    pub async fn resolve(ctx: &LabContext, build: &str, hostname: Option<&str>, ban_list: &[String]) -> Result<Self> {
        DevServerSelector::<ImageServer>::new(ctx)
            .resolve(build, hostname, ban_list)
            .await
    }

    /// Latest official build for `board` in the image archive
    pub async fn get_latest_build_in_gs(&self, board: &str) -> Result<String> {
        let method = format!("xbuddy_translate/remote/{}/latest-official", board);
        let params = vec![("image_dir".to_string(), self.core.config().image_storage_server.clone())];
        let image_name = self.core.run(&method, &params, &RetryPolicy::staging()).await?;
        let image_name = image_name.trim();
        Ok(image_name
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default())
    }

    /// Files staged for `image`
    pub async fn list_image_dir(&self, image: &str) -> Result<Vec<String>> {
        let archive_url = format!("{}{}", self.core.config().image_storage_server, image);
        let params = vec![("archive_url".to_string(), archive_url)];
        self.core
            .run_lines("list_image_dir", &params, &RetryPolicy::health_check())
            .await
    }

    /// Stage autotest for telemetry; returns the install path on the devserver
    pub async fn setup_telemetry(&self, build: &str) -> Result<String> {
        let build = self.translate(build).await?;
        let archive_url = format!("{}{}", self.core.config().image_storage_server, build);
        let params = vec![("archive_url".to_string(), archive_url)];
        self.core.run("setup_telemetry", &params, &RetryPolicy::staging()).await
    }

    pub async fn get_update_url(&self, image: &str) -> Result<String> {
        let image = self.translate(image).await?;
        Ok(render_image_url(
            &self.core.config().image_url_pattern,
            self.url(),
            &image,
        ))
    }

    pub async fn get_full_payload_url(&self, image: &str) -> Result<String> {
        let image = self.translate(image).await?;
        Ok(format!("{}/update.gz", self.core.image_url(&image)))
    }

    pub async fn get_test_image_url(&self, image: &str) -> Result<String> {
        let image = self.translate(image).await?;
        Ok(format!("{}/chromiumos_test_image.bin", self.core.image_url(&image)))
    }

    /// Contents of the pre-processed suite dependencies file
    pub async fn get_dependencies_file(&self, build: &str) -> Result<String> {
        let build = self.translate(build).await?;
        self.core.get_control_file(&build, DEPENDENCIES_FILE).await
    }

    /// Highest `latestbuild` answer across every healthy devserver
    pub async fn get_latest_build(ctx: &LabContext, target: &str, milestone: &str) -> Result<String> {
        let selector = DevServerSelector::<ImageServer>::new(ctx);
        let healthy = selector.healthy_servers().await?;
        if healthy.is_empty() {
            return Err(DevServerError::NoHealthyDevServer {
                tried: selector.servers(),
                hostname: None,
            });
        }

        let params = vec![
            ("target".to_string(), target.to_string()),
            ("milestone".to_string(), milestone.to_string()),
        ];
        let mut latest: Option<String> = None;
        for endpoint in healthy {
            let server = ImageServer::new(endpoint, ctx);
            let build = server
                .core
                .run("latestbuild", &params, &RetryPolicy::staging())
                .await?
                .trim()
                .to_string();
            latest = match latest {
                Some(best) if compare_loose_versions(&best, &build).is_ge() => Some(best),
                _ => Some(build),
            };
        }
        latest.ok_or_else(|| DevServerError::Server(format!("no latest build for {}", target)))
    }

    pub async fn kill_au_process_for_host(&self, host_name: &str, pid: u32) -> bool {
        self.autoupdate
            .kill_au_process_for_host(self.endpoint(), host_name, pid)
            .await
    }

    pub async fn clean_track_log(&self, host_name: &str, pid: u32) -> bool {
        self.autoupdate.clean_track_log(self.endpoint(), host_name, pid).await
    }

    pub async fn collect_au_log(&self, host_name: &str, pid: u32, log_dir: &Path) -> bool {
        let handle = AuProcessHandle {
            host_name: host_name.to_string(),
            pid,
            log_dir: Some(log_dir.to_path_buf()),
        };
        self.autoupdate.collect_au_log(self.endpoint(), &handle).await
    }

    /// Update `host_name` to `build_name` through this devserver
    pub async fn auto_update(
        &self,
        host_name: &str,
        build_name: &str,
        log_dir: Option<&Path>,
        force_update: bool,
        full_update: bool,
    ) -> Result<AutoUpdateOutcome> {
        self.autoupdate
            .auto_update(self.endpoint(), host_name, build_name, log_dir, force_update, full_update)
            .await
    }

    fn download_request(&self, build: &str, artifacts: Vec<String>) -> StagingRequest {
        let archive_url = format!("{}{}", self.core.config().image_storage_server, build);
        StagingRequest::chromeos(build, artifacts, Vec::new(), Some(archive_url))
    }
}

#[async_trait]
impl ArtifactServer for ImageServer {
    fn core(&self) -> &ImageServerCore {
        &self.core
    }

    async fn translate(&self, build: &str) -> Result<String> {
        let Some(caps) = latest_regex().captures(build) else {
            return Ok(build.to_string());
        };
        let builder = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let translated = self.get_latest_build_in_gs(builder).await?;
        debug!("Translated relative build {} to {}", build, translated);
        Ok(translated)
    }

    async fn stage_artifacts(
        &self,
        build: &str,
        artifacts: &[String],
        files: &[String],
        archive_url: Option<&str>,
    ) -> Result<()> {
        if artifacts.is_empty() && files.is_empty() {
            return Err(DevServerError::Server("Must specify something to stage.".into()));
        }
        let build = self.translate(build).await?;
        let archive_url = match archive_url {
            Some(url) => url.to_string(),
            None => format!("{}{}", self.core.storage_server_for(artifacts), build),
        };
        let request = StagingRequest::chromeos(&build, artifacts.to_vec(), files.to_vec(), Some(archive_url));
        self.core.staging().stage_artifacts(self.endpoint(), &request).await
    }

    async fn trigger_download(&self, build: &str, synchronous: bool) -> Result<()> {
        let build = self.translate(build).await?;
        let request = self.download_request(&build, owned(ARTIFACTS_TO_BE_STAGED_FOR_IMAGE));
        self.core.staging().trigger_download(self.endpoint(), &request).await?;
        if synchronous {
            self.finish_download(&build).await?;
        }
        Ok(())
    }

    async fn finish_download(&self, build: &str) -> Result<()> {
        let build = self.translate(build).await?;
        let request = self.download_request(&build, owned(ARTIFACTS_TO_BE_STAGED_FOR_IMAGE_WITH_AUTOTEST));
        self.core.staging().finish_download(self.endpoint(), &request).await
    }

    async fn get_staged_file_url(&self, filename: &str, build: &str) -> Result<String> {
        let build = self.translate(build).await?;
        Ok(format!("{}/{}", self.core.image_url(&build), filename))
    }

    async fn locate_file(&self, file_name: &str, artifacts: &[String], build: &str) -> Result<String> {
        let params = vec![("build".to_string(), build.to_string())];
        self.core.locate_file(file_name, artifacts, build, params).await
    }
}
