//! Launch Control (Android and Brillo) build devserver

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::debug;

use crate::app::context::LabContext;
use crate::config::DevServerConfig;
use crate::constants::OS_TYPE_ANDROID;
use crate::endpoint::DevServerEndpoint;
use crate::errors::{DevServerError, Result};
use crate::http::{Params, RetryPolicy};
use crate::select::{DevServerSelector, Selectable};
use crate::servers::base::{ArtifactServer, ImageServerCore};
use crate::servers::build_name::LaunchControlBuild;
use crate::staging::{OsParams, StagingRequest};

/// Operating system of a Launch Control build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AndroidOs {
    #[default]
    Android,
    Brillo,
}

impl AndroidOs {
    /// Artifacts needed to reimage a DUT with this OS
    pub fn artifacts_for_reimage(&self) -> Vec<String> {
        let artifacts: &[&str] = match self {
            AndroidOs::Android => &["bootloader_image", "radio_image", "zip_images", "test_zip"],
            AndroidOs::Brillo => &["zip_images", "vendor_partitions"],
        };
        artifacts.iter().map(|a| a.to_string()).collect()
    }
}

impl FromStr for AndroidOs {
    type Err = DevServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "android" => Ok(AndroidOs::Android),
            "brillo" => Ok(AndroidOs::Brillo),
            _ => Err(DevServerError::Configuration(format!("Unknown Launch Control OS: {}", s))),
        }
    }
}

impl fmt::Display for AndroidOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AndroidOs::Android => f.write_str("android"),
            AndroidOs::Brillo => f.write_str("brillo"),
        }
    }
}

fn os_params(build: &LaunchControlBuild) -> OsParams {
    OsParams::Android {
        target: build.target.clone(),
        build_id: build.build_id.clone(),
        branch: build.branch.clone(),
    }
}

/// Devserver that stages Launch Control builds
#[derive(Clone)]
pub struct AndroidBuildServer {
    core: ImageServerCore,
}

impl Selectable for AndroidBuildServer {
    fn candidate_urls(config: &DevServerConfig) -> Vec<String> {
        config.dev_servers.clone()
    }

    fn from_endpoint(endpoint: DevServerEndpoint, ctx: &LabContext) -> Self {
        Self::new(endpoint, ctx)
    }
}

impl AndroidBuildServer {
    pub fn new(endpoint: DevServerEndpoint, ctx: &LabContext) -> Self {
        Self {
            core: ImageServerCore::new(endpoint, ctx),
        }
    }

    pub async fn resolve(ctx: &LabContext, build: &str, hostname: Option<&str>, ban_list: &[String]) -> Result<Self> {
        DevServerSelector::<AndroidBuildServer>::new(ctx)
            .resolve(build, hostname, ban_list)
            .await
    }

    /// Build name in the configured Launch Control pattern
    pub fn build_name(&self, build: &LaunchControlBuild) -> String {
        build.render(&self.core.config().android_build_name_pattern)
    }

    fn parse_complete(build: &str) -> Result<LaunchControlBuild> {
        LaunchControlBuild::parse(build)
            .filter(LaunchControlBuild::is_complete)
            .ok_or_else(|| {
                DevServerError::Server(
                    "Must specify all build info (target, build_id and branch) to stage.".into(),
                )
            })
    }

    /// Base URL for pulling files of one build
    pub fn get_pull_url(&self, target: &str, build_id: &str, branch: &str) -> String {
        format!("{}/static/{}/{}/{}", self.url(), branch, target, build_id)
    }

    /// Two-phase download with explicit artifacts and OS.
    ///
    /// `artifacts` of `None` selects the reimage set for `os`.
    pub async fn trigger_download_for_os(
        &self,
        build: &str,
        artifacts: Option<Vec<String>>,
        files: Vec<String>,
        os: AndroidOs,
        synchronous: bool,
    ) -> Result<()> {
        let parsed = Self::parse_complete(build)?;
        let artifacts = artifacts
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| os.artifacts_for_reimage());
        let request = StagingRequest {
            build: self.build_name(&parsed),
            artifacts,
            files,
            archive_url: None,
            os: os_params(&parsed),
        };
        self.core.staging().trigger_download(self.endpoint(), &request).await?;
        if synchronous {
            self.finish_download_for_os(build, os).await?;
        }
        Ok(())
    }

    /// Unlike the trigger phase, this names the archive in the image store
    pub async fn finish_download_for_os(&self, build: &str, os: AndroidOs) -> Result<()> {
        let parsed = Self::parse_complete(build)?;
        let request = StagingRequest {
            build: self.build_name(&parsed),
            artifacts: os.artifacts_for_reimage(),
            files: Vec::new(),
            archive_url: Some(format!("{}{}", self.core.config().image_storage_server, build)),
            os: os_params(&parsed),
        };
        self.core.staging().finish_download(self.endpoint(), &request).await
    }
}

#[async_trait]
impl ArtifactServer for AndroidBuildServer {
    fn core(&self) -> &ImageServerCore {
        &self.core
    }

    async fn translate(&self, build: &str) -> Result<String> {
        let parsed = LaunchControlBuild::parse(build).ok_or_else(|| {
            DevServerError::Configuration(format!("Not a Launch Control build: {}", build))
        })?;
        if !parsed.is_latest() {
            return Ok(build.to_string());
        }

        let params: Params = vec![
            ("branch".to_string(), parsed.branch.clone()),
            ("target".to_string(), parsed.target.clone()),
            ("os_type".to_string(), OS_TYPE_ANDROID.to_string()),
        ];
        let build_id = self.core.run("latestbuild", &params, &RetryPolicy::staging()).await?;
        let translated = self.build_name(&LaunchControlBuild::new(&parsed.branch, &parsed.target, build_id.trim()));
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
        let parsed = Self::parse_complete(build)?;
        if artifacts.is_empty() && files.is_empty() {
            return Err(DevServerError::Server("Must specify something to stage.".into()));
        }
        let name = self.build_name(&parsed);
        let archive_url = match archive_url {
            Some(url) => url.to_string(),
            None => format!("{}{}", self.core.storage_server_for(artifacts), name),
        };
        let request = StagingRequest {
            build: name,
            artifacts: artifacts.to_vec(),
            files: files.to_vec(),
            archive_url: Some(archive_url),
            os: os_params(&parsed),
        };
        self.core.staging().stage_artifacts(self.endpoint(), &request).await
    }

    async fn trigger_download(&self, build: &str, synchronous: bool) -> Result<()> {
        self.trigger_download_for_os(build, None, Vec::new(), AndroidOs::Android, synchronous)
            .await
    }

    async fn finish_download(&self, build: &str) -> Result<()> {
        self.finish_download_for_os(build, AndroidOs::Android).await
    }

    async fn get_staged_file_url(&self, filename: &str, build: &str) -> Result<String> {
        let build = self.translate(build).await?;
        Ok(format!("{}/{}", self.core.image_url(&build), filename))
    }

    async fn locate_file(&self, file_name: &str, artifacts: &[String], build: &str) -> Result<String> {
        let Some(parsed) = LaunchControlBuild::parse(build) else {
            return self.core.locate_file(file_name, artifacts, "", Vec::new()).await;
        };
        let params: Params = vec![
            ("branch".to_string(), parsed.branch.clone()),
            ("target".to_string(), parsed.target.clone()),
            ("build_id".to_string(), parsed.build_id.clone()),
            ("os_type".to_string(), OS_TYPE_ANDROID.to_string()),
        ];
        let build_path = format!("{}/{}/{}", parsed.branch, parsed.target, parsed.build_id);
        self.core.locate_file(file_name, artifacts, &build_path, params).await
    }
}
