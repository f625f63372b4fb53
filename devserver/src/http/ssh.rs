//! RPC over `ssh <devserver> curl <url>`

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::constants::DOWNLOADER_EXCEPTION;
use crate::http::transport::{Transport, TransportError};
use crate::telemetry::{self, MetricsSink};
use crate::utils::sh_escape;

/// Runs each call on the devserver itself through ssh.
///
/// Uploads are not tunnelled; they go through `upload` directly.
pub struct SshTransport {
    upload: Arc<dyn Transport>,
    metrics: Arc<dyn MetricsSink>,
}

impl SshTransport {
    pub fn new(upload: Arc<dyn Transport>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { upload, metrics }
    }

    /// Remote command line for `url`
    pub fn remote_command(url: &str) -> String {
        format!("curl \"{}\"", sh_escape(url))
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl Transport for SshTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, TransportError> {
        let host = host_of(url);

        let mut command = Command::new("ssh");
        command
            .arg(&host)
            .arg(Self::remote_command(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(TransportError::Connection(format!("failed to run ssh: {}", e))),
            Err(_) => {
                return Err(TransportError::Timeout(format!(
                    "ssh call to {} timed out after {:?}",
                    host, timeout
                )))
            }
        };

        if !output.status.success() {
            let exit_status = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            debug!(
                "Error occurred with exit_code {} when executing the ssh call: {}",
                exit_status, stderr
            );
            self.metrics.counter(
                telemetry::SSH_FAILURE,
                telemetry::fields([("dev_server", host)]),
            );
            return Err(TransportError::Command { exit_status, stderr });
        }

        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        if body.contains(DOWNLOADER_EXCEPTION) {
            return Err(TransportError::Server { status: None, body });
        }
        Ok(body)
    }

    async fn post_file(
        &self,
        url: &str,
        field: &str,
        file_name: &str,
        contents: Vec<u8>,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        self.upload.post_file(url, field, file_name, contents, timeout).await
    }
}
