//! Auto-update orchestration tests

use std::net::Ipv4Addr;

use devserver_client::filesys::Dir;
use devserver_client::http::TransportError;
use devserver_client::servers::ImageServer;
use devserver_client::telemetry::{CROS_UPDATE_BY_DEVSERVER, CROS_UPDATE_PER_DUT};
use devserver_client::testing::StaticResolver;
use tempfile::tempdir;

use crate::common::{config_with, lab, Lab};

const D1: &str = "http://d1:8082";
const CROS_AU: &str = "http://d1:8082/cros_au";
const AU_STATUS: &str = "http://d1:8082/get_au_status";
const CLEANUP: &str = "http://d1:8082/handler_cleanup";
const KILL: &str = "http://d1:8082/kill_au_proc";
const COLLECT: &str = "http://d1:8082/collect_cros_au_log";
const BUILD: &str = "lumpy-release/R27-3837.0.0";

fn au_lab() -> (Lab, ImageServer) {
    let resolver = StaticResolver::new().with("dut1", Ipv4Addr::new(10, 0, 0, 5));
    let lab = lab(config_with(&[D1]), resolver);
    lab.transport.set_default_ok(CLEANUP, "True");
    lab.transport.set_default_ok(KILL, "True");
    let server = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);
    (lab, server)
}

#[tokio::test(start_paused = true)]
async fn test_auto_update_success_with_legacy_status() {
    let (lab, server) = au_lab();
    lab.transport.set_default_ok(CROS_AU, "[true, 4321]");
    for _ in 0..3 {
        lab.transport.push_ok(AU_STATUS, r#"[false, "running"]"#);
    }
    lab.transport.set_default_ok(AU_STATUS, r#"[true, "done"]"#);

    let outcome = server.auto_update("dut1", BUILD, None, false, false).await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.retry_with_another_devserver);

    let triggers = lab.transport.calls_to(CROS_AU);
    assert_eq!(triggers.len(), 1);
    assert_eq!(
        triggers[0],
        "http://d1:8082/cros_au?async=True&host_name=dut1&build_name=lumpy-release/R27-3837.0.0&force_update=False&full_update=False"
    );
    assert_eq!(lab.transport.calls_to(AU_STATUS).len(), 4);
    assert_eq!(lab.transport.calls_to(CLEANUP), vec!["http://d1:8082/handler_cleanup?host_name=dut1&pid=4321".to_string()]);
    assert!(lab.transport.calls_to(KILL).is_empty());
    assert!(lab.transport.calls_to(COLLECT).is_empty());

    let by_devserver = lab.metrics.named(CROS_UPDATE_BY_DEVSERVER);
    assert_eq!(by_devserver.len(), 1);
    assert_eq!(by_devserver[0].fields["success"], "true");
    assert_eq!(by_devserver[0].fields["board"], "lumpy");
    assert_eq!(by_devserver[0].fields["build_type"], "release");
    assert_eq!(by_devserver[0].fields["milestone"], "27");
    assert_eq!(by_devserver[0].fields["error"], "");
    let per_dut = lab.metrics.named(CROS_UPDATE_PER_DUT);
    assert_eq!(per_dut[0].fields["dut_host_name"], "dut1");
}

#[tokio::test(start_paused = true)]
async fn test_auto_update_collects_log() {
    let (lab, server) = au_lab();
    lab.transport.set_default_ok(CROS_AU, "[true, 77]");
    lab.transport
        .set_default_ok(AU_STATUS, r#"{"finished": true, "status": "UPDATE_COMPLETE"}"#);
    lab.transport.set_default_ok(COLLECT, "update log line 1\nupdate log line 2\n");
    let tmp = tempdir().unwrap();
    let job_dir = Dir::new(tmp.path());

    let outcome = server
        .auto_update("dut1", BUILD, Some(job_dir.path()), true, true)
        .await
        .unwrap();
    assert!(outcome.success);
    assert!(lab.transport.calls_to(CROS_AU)[0].ends_with("force_update=True&full_update=True"));

    let log = job_dir
        .subdir("autoupdate_logs")
        .file("CrOS_update_dut1_77.log")
        .read_string()
        .await
        .unwrap();
    assert_eq!(log, "update log line 1\nupdate log line 2\n");
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_trigger_error_uses_whole_budget() {
    let (lab, server) = au_lab();
    lab.transport.set_default(
        CROS_AU,
        Err(TransportError::Server {
            status: Some(500),
            body: "RootfsUpdateError: failed to write rootfs".into(),
        }),
    );

    let err = server.auto_update("dut1", BUILD, None, false, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "CrOS auto-update failed for host dut1: RootfsUpdateError: failed to write rootfs"
    );

    let triggers = lab.transport.calls_to(CROS_AU);
    assert_eq!(triggers.len(), 2);
    assert!(triggers[0].contains("host_name=dut1&"));
    // Second attempt goes by IP
    assert!(triggers[1].contains("host_name=10.0.0.5&"));

    let by_devserver = lab.metrics.named(CROS_UPDATE_BY_DEVSERVER);
    assert_eq!(by_devserver[0].fields["success"], "false");
    assert_ne!(by_devserver[0].fields["error"], "");
}

#[tokio::test(start_paused = true)]
async fn test_unpingable_dut_asks_for_another_devserver() {
    let (lab, server) = au_lab();
    lab.transport
        .set_default_ok(CROS_AU, r#"[false, "dut1 is not pingable"]"#);

    let outcome = server.auto_update("dut1", BUILD, None, false, false).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.retry_with_another_devserver);
    assert_eq!(lab.transport.calls_to(CROS_AU).len(), 1);
    // No pid, so there is nothing to clean up
    assert!(lab.transport.calls_to(CLEANUP).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_status_error_kills_and_retries() {
    let (lab, server) = au_lab();
    lab.transport.set_default_ok(CROS_AU, "[true, 55]");
    lab.transport.set_default_ok(
        AU_STATUS,
        r#"{"finished": true, "status": "FAILED", "detailed_error_msg": "Traceback:\nRootfsUpdateError: disk full"}"#,
    );

    let err = server.auto_update("dut1", BUILD, None, false, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "CrOS auto-update failed for host dut1: RootfsUpdateError: disk full"
    );
    assert_eq!(lab.transport.calls_to(CROS_AU).len(), 2);
    assert_eq!(lab.transport.calls_to(KILL).len(), 2);
    assert_eq!(lab.transport.calls_to(CLEANUP).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_au_helper_rpcs() {
    let (lab, server) = au_lab();
    assert!(server.kill_au_process_for_host("dut1", 9).await);
    assert!(server.clean_track_log("dut1", 9).await);
    assert!(!server.clean_track_log("dut1", 0).await);

    lab.transport.set_default_ok(KILL, "False");
    assert!(!server.kill_au_process_for_host("dut1", 9).await);
}

#[tokio::test(start_paused = true)]
async fn test_kill_au_process_retries_transient_errors() {
    let (lab, server) = au_lab();
    lab.transport
        .push_error(KILL, TransportError::Connection("connection refused".into()));
    assert!(server.kill_au_process_for_host("dut1", 9).await);
    assert_eq!(lab.transport.calls_to(KILL).len(), 2);
}
