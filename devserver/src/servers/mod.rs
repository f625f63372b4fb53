//! Protocol adapters over the selection, staging and auto-update machinery

pub mod android;
pub mod base;
pub mod build_name;
pub mod crash;
pub mod image;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use android::{AndroidBuildServer, AndroidOs};
pub use base::{ArtifactServer, ImageServerCore};
pub use build_name::{is_launch_control_build, parse_build_name, LaunchControlBuild, ParsedBuildName};
pub use crash::CrashServer;
pub use image::ImageServer;

use crate::app::context::LabContext;
use crate::errors::Result;

/// Either kind of build devserver, chosen by the build name
#[derive(Clone)]
pub enum AnyImageServer {
    ChromeOs(ImageServer),
    Android(AndroidBuildServer),
}

impl AnyImageServer {
    fn inner(&self) -> &dyn ArtifactServer {
        match self {
            AnyImageServer::ChromeOs(server) => server,
            AnyImageServer::Android(server) => server,
        }
    }

    pub fn as_chromeos(&self) -> Option<&ImageServer> {
        match self {
            AnyImageServer::ChromeOs(server) => Some(server),
            AnyImageServer::Android(_) => None,
        }
    }
}

#[async_trait]
impl ArtifactServer for AnyImageServer {
    fn core(&self) -> &ImageServerCore {
        self.inner().core()
    }

    async fn translate(&self, build: &str) -> Result<String> {
        self.inner().translate(build).await
    }

    async fn stage_artifacts(
        &self,
        build: &str,
        artifacts: &[String],
        files: &[String],
        archive_url: Option<&str>,
    ) -> Result<()> {
        self.inner().stage_artifacts(build, artifacts, files, archive_url).await
    }

    async fn trigger_download(&self, build: &str, synchronous: bool) -> Result<()> {
        self.inner().trigger_download(build, synchronous).await
    }

    async fn finish_download(&self, build: &str) -> Result<()> {
        self.inner().finish_download(build).await
    }

    async fn get_staged_file_url(&self, filename: &str, build: &str) -> Result<String> {
        self.inner().get_staged_file_url(filename, build).await
    }

    async fn locate_file(&self, file_name: &str, artifacts: &[String], build: &str) -> Result<String> {
        self.inner().locate_file(file_name, artifacts, build).await
    }

    async fn list_control_files(&self, build: &str, suite_name: &str) -> Result<Vec<String>> {
        self.inner().list_control_files(build, suite_name).await
    }

    async fn get_control_file(&self, build: &str, control_path: &str) -> Result<String> {
        self.inner().get_control_file(build, control_path).await
    }

    async fn list_suite_controls(&self, build: &str, suite_name: &str) -> Result<BTreeMap<String, String>> {
        self.inner().list_suite_controls(build, suite_name).await
    }
}

/// Pick a devserver for `build`: Launch Control builds go to an
/// [`AndroidBuildServer`], everything else to an [`ImageServer`].
pub async fn resolve(
    ctx: &LabContext,
    build: &str,
    hostname: Option<&str>,
    ban_list: &[String],
) -> Result<AnyImageServer> {
    if is_launch_control_build(build) {
        Ok(AnyImageServer::Android(
            AndroidBuildServer::resolve(ctx, build, hostname, ban_list).await?,
        ))
    } else {
        Ok(AnyImageServer::ChromeOs(
            ImageServer::resolve(ctx, build, hostname, ban_list).await?,
        ))
    }
}
