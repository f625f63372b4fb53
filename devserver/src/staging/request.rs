//! Parameter tuple identifying one staging job

use crate::constants::OS_TYPE_ANDROID;
use crate::http::{wire_bool, Params};

/// OS-specific identification of the build being staged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsParams {
    ChromeOs,
    /// Launch Control build; the devserver treats Android and Brillo alike
    Android {
        target: String,
        build_id: String,
        branch: String,
    },
}

/// What to stage. The devserver keys staging jobs by exactly these values,
/// so `stage` and `is_staged` must send the same set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingRequest {
    /// Display name of the build, used in messages
    pub build: String,
    pub artifacts: Vec<String>,
    pub files: Vec<String>,
    pub archive_url: Option<String>,
    pub os: OsParams,
}

impl StagingRequest {
    pub fn chromeos(build: &str, artifacts: Vec<String>, files: Vec<String>, archive_url: Option<String>) -> Self {
        Self {
            build: build.to_string(),
            artifacts,
            files,
            archive_url,
            os: OsParams::ChromeOs,
        }
    }

    pub fn artifacts_arg(&self) -> String {
        self.artifacts.join(",")
    }

    pub fn files_arg(&self) -> String {
        self.files.join(",")
    }

    /// Parameters for `is_staged`
    pub fn is_staged_params(&self) -> Params {
        let mut params = Params::new();
        if let Some(archive_url) = &self.archive_url {
            params.push(("archive_url".into(), archive_url.clone()));
        }
        params.push(("artifacts".into(), self.artifacts_arg()));
        params.push(("files".into(), self.files_arg()));
        if let OsParams::Android {
            target,
            build_id,
            branch,
        } = &self.os
        {
            params.push(("target".into(), target.clone()));
            params.push(("build_id".into(), build_id.clone()));
            params.push(("branch".into(), branch.clone()));
            params.push(("os_type".into(), OS_TYPE_ANDROID.into()));
        }
        params
    }

    /// Parameters for the asynchronous `stage` call
    pub fn stage_params(&self) -> Params {
        let mut params = vec![("async".to_string(), wire_bool(true))];
        params.extend(self.is_staged_params());
        params
    }

    pub fn staging_info(&self) -> String {
        format!(
            "build={}, artifacts={:?}, files={:?}, archive_url={}",
            self.build,
            self.artifacts,
            self.files,
            self.archive_url.as_deref().unwrap_or("None")
        )
    }
}
