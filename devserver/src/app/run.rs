//! Command dispatch for the binary

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::info;

use crate::app::context::LabContext;
use crate::errors::{DevServerError, Result};
use crate::health::HealthChecker;
use crate::select::DevServerSelector;
use crate::servers::{self, ArtifactServer, CrashServer, ImageServer};

/// One CLI command with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Resolve {
        build: String,
        hostname: Option<String>,
        ban_list: Vec<String>,
    },
    Health,
    LeastLoaded {
        hostname: Option<String>,
    },
    Stage {
        build: String,
        hostname: Option<String>,
        artifacts: Vec<String>,
        files: Vec<String>,
        archive_url: Option<String>,
    },
    TriggerDownload {
        build: String,
        hostname: Option<String>,
        synchronous: bool,
    },
    AutoUpdate {
        host_name: String,
        build: String,
        log_dir: Option<PathBuf>,
        force_update: bool,
        full_update: bool,
    },
    LatestBuild {
        target: String,
        milestone: String,
    },
    Symbolicate {
        minidump: PathBuf,
        build: String,
    },
}

fn required(args: &HashMap<String, String>, key: &str) -> Result<String> {
    args.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| DevServerError::Configuration(format!("missing --{}=<value>", key)))
}

fn list(args: &HashMap<String, String>, key: &str) -> Vec<String> {
    args.get(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn flag(args: &HashMap<String, String>, key: &str) -> bool {
    args.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

impl Command {
    /// Build a command from its name and `--key=value` arguments
    pub fn from_args(name: &str, args: &HashMap<String, String>) -> Result<Self> {
        let hostname = args.get("hostname").cloned();
        let command = match name {
            "resolve" => Command::Resolve {
                build: required(args, "build")?,
                hostname,
                ban_list: list(args, "ban_list"),
            },
            "health" => Command::Health,
            "least-loaded" => Command::LeastLoaded { hostname },
            "stage" => Command::Stage {
                build: required(args, "build")?,
                hostname,
                artifacts: list(args, "artifacts"),
                files: list(args, "files"),
                archive_url: args.get("archive_url").cloned(),
            },
            "trigger-download" => Command::TriggerDownload {
                build: required(args, "build")?,
                hostname,
                synchronous: !args.get("synchronous").is_some_and(|v| v.eq_ignore_ascii_case("false")),
            },
            "auto-update" => Command::AutoUpdate {
                host_name: required(args, "host")?,
                build: required(args, "build")?,
                log_dir: args.get("log_dir").map(PathBuf::from),
                force_update: flag(args, "force_update"),
                full_update: flag(args, "full_update"),
            },
            "latest-build" => Command::LatestBuild {
                target: required(args, "target")?,
                milestone: args.get("milestone").cloned().unwrap_or_default(),
            },
            "symbolicate" => Command::Symbolicate {
                minidump: PathBuf::from(required(args, "minidump")?),
                build: required(args, "build")?,
            },
            other => {
                return Err(DevServerError::Configuration(format!("unknown command: {}", other)));
            }
        };
        Ok(command)
    }
}

/// Execute `command` and return its result as JSON
pub async fn run(ctx: &LabContext, command: Command) -> Result<Value> {
    info!("Running {:?}", command);
    match command {
        Command::Resolve {
            build,
            hostname,
            ban_list,
        } => {
            let server = servers::resolve(ctx, &build, hostname.as_deref(), &ban_list).await?;
            Ok(json!({
                "build": build,
                "devserver": server.url(),
                "hostname": server.endpoint().resolved_hostname(),
            }))
        }

        Command::Health => {
            let checker = ctx.health_checker();
            let mut report = Vec::new();
            for url in &ctx.config.dev_servers {
                let endpoint = ctx.endpoint(url)?;
                let load = checker.get_load(&endpoint, HealthChecker::default_timeout()).await;
                let healthy = match &load {
                    Some(load) => checker.is_apache_client_count_ok(load) && checker.is_free_disk_ok(load),
                    None => false,
                };
                report.push(json!({
                    "devserver": endpoint.url(),
                    "healthy": healthy,
                    "load": load,
                }));
            }
            Ok(Value::Array(report))
        }

        Command::LeastLoaded { hostname } => {
            let selector = DevServerSelector::<ImageServer>::new(ctx);
            let devserver = selector.pick_least_loaded(hostname.as_deref()).await?;
            Ok(json!({ "devserver": devserver }))
        }

        Command::Stage {
            build,
            hostname,
            artifacts,
            files,
            archive_url,
        } => {
            let server = servers::resolve(ctx, &build, hostname.as_deref(), &[]).await?;
            server
                .stage_artifacts(&build, &artifacts, &files, archive_url.as_deref())
                .await?;
            Ok(json!({ "devserver": server.url(), "staged": true }))
        }

        Command::TriggerDownload {
            build,
            hostname,
            synchronous,
        } => {
            let server = servers::resolve(ctx, &build, hostname.as_deref(), &[]).await?;
            server.trigger_download(&build, synchronous).await?;
            Ok(json!({ "devserver": server.url(), "synchronous": synchronous }))
        }

        Command::AutoUpdate {
            host_name,
            build,
            log_dir,
            force_update,
            full_update,
        } => {
            let server = ImageServer::resolve(ctx, &build, Some(&host_name), &[]).await?;
            let outcome = server
                .auto_update(&host_name, &build, log_dir.as_deref(), force_update, full_update)
                .await?;
            Ok(json!({
                "devserver": server.url(),
                "success": outcome.success,
                "retry_with_another_devserver": outcome.retry_with_another_devserver,
            }))
        }

        Command::LatestBuild { target, milestone } => {
            let latest = ImageServer::get_latest_build(ctx, &target, &milestone).await?;
            Ok(json!({ "target": target, "latest_build": latest }))
        }

        Command::Symbolicate { minidump, build } => {
            let server = CrashServer::resolve(ctx, &build).await?;
            let stack = server.symbolicate_dump(&minidump, &build).await?;
            Ok(json!({ "crashserver": server.endpoint().url(), "stack": stack }))
        }
    }
}
