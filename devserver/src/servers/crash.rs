//! Crash symbolication server

use std::path::Path;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;

use crate::app::context::LabContext;
use crate::config::DevServerConfig;
use crate::endpoint::DevServerEndpoint;
use crate::errors::Result;
use crate::filesys::File;
use crate::http::{retry_call, DevServerCall, RetryPolicy};
use crate::select::{DevServerSelector, Selectable};
use crate::telemetry::{self, MetricsSink};

/// Server that turns minidumps into stack traces.
///
/// Shares selection and health checking with the image devservers but
/// ignores where the DUT lives.
#[derive(Clone)]
pub struct CrashServer {
    endpoint: DevServerEndpoint,
    config: Arc<DevServerConfig>,
    call: DevServerCall,
    metrics: Arc<dyn MetricsSink>,
}

impl Selectable for CrashServer {
    fn candidate_urls(config: &DevServerConfig) -> Vec<String> {
        config.crash_servers.clone()
    }

    fn location_aware() -> bool {
        false
    }

    fn from_endpoint(endpoint: DevServerEndpoint, ctx: &LabContext) -> Self {
        Self {
            endpoint,
            config: ctx.config.clone(),
            call: ctx.call(),
            metrics: ctx.metrics.clone(),
        }
    }
}

impl CrashServer {
    pub async fn resolve(ctx: &LabContext, build: &str) -> Result<Self> {
        DevServerSelector::<CrashServer>::new(ctx).resolve(build, None, &[]).await
    }

    pub fn endpoint(&self) -> &DevServerEndpoint {
        &self.endpoint
    }

    /// Symbolicate the minidump at `minidump_path` against `build`'s symbols
    pub async fn symbolicate_dump(&self, minidump_path: &Path, build: &str) -> Result<String> {
        let dump = File::new(minidump_path);
        let contents = dump.read_bytes().await?;
        let file_name = dump.name();

        let fields = || telemetry::fields([("dev_server", self.endpoint.resolved_hostname().to_string())]);
        self.metrics.counter(telemetry::SYMBOLICATE_DUMP, fields());

        let archive_url = format!("{}{}", self.config.image_storage_server, build);
        let url = self
            .endpoint
            .build_call("symbolicate_dump", &[("archive_url".to_string(), archive_url)]);
        info!("Symbolicating {} on {}", minidump_path.display(), self.endpoint);

        let start = Instant::now();
        let result = retry_call(
            &RetryPolicy::staging(),
            "symbolicate_dump",
            self.endpoint.hostname(),
            self.metrics.as_ref(),
            || self.call.post_file(&url, "minidump", &file_name, contents.clone(), None),
        )
        .await;
        self.metrics.gauge(
            telemetry::SYMBOLICATE_DUMP_DURATION,
            start.elapsed().as_secs_f64(),
            fields(),
        );
        result
    }
}
