//! Devserver Client - Entry Point
//!
//! Picks devservers, stages builds and drives DUT auto-updates from the
//! command line.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use devserver_client::app::run::{run, Command};
use devserver_client::app::LabContext;
use devserver_client::config::DevServerConfig;
use devserver_client::logs::{init_logging, LogOptions};
use devserver_client::utils::version_info;

use tracing::error;

const USAGE: &str = "usage: devserver-client [--config=PATH] [--log_file_dir=DIR] <resolve|health|least-loaded|stage|trigger-download|auto-update|latest-build|symbolicate> [--key=value...]";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();
    let mut command_name: Option<String> = None;

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        } else if command_name.is_none() {
            command_name = Some(arg.clone());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{version}"),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    let Some(command_name) = command_name else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    if let Err(e) = execute(&command_name, &cli_args).await {
        error!("{command_name} failed: {e:#}");
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn execute(command_name: &str, cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    let config = match cli_args.get("config") {
        Some(path) => DevServerConfig::load(path)
            .await
            .with_context(|| format!("failed to load config {path}"))?,
        None => DevServerConfig::default(),
    };

    let log_options = LogOptions {
        log_level: config.log_level.clone(),
        log_dir: cli_args.get("log_file_dir").map(PathBuf::from),
        json_format: cli_args.contains_key("json_logs"),
        ..Default::default()
    };
    // Held until exit so buffered file output is flushed
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let command = Command::from_args(command_name, cli_args)?;
    let ctx = LabContext::from_config(config);
    let output = run(&ctx, command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
