//! Image, Android and crash server adapter tests

use std::collections::HashMap;

use devserver_client::app::run::{run, Command};
use devserver_client::errors::DevServerError;
use devserver_client::filesys::Dir;
use devserver_client::servers::{self, AndroidBuildServer, AnyImageServer, ArtifactServer, CrashServer, ImageServer};
use devserver_client::telemetry::{SYMBOLICATE_DUMP, SYMBOLICATE_DUMP_DURATION};
use devserver_client::testing::StaticResolver;
use serde_json::json;
use tempfile::tempdir;

use crate::common::{config_with, lab, mark_healthy, Lab};

const D1: &str = "http://d1:8082";
const D2: &str = "http://d2:8082";
const C1: &str = "http://c1:8082";
const ANDROID_BUILD: &str = "git_mnc-release/shamu-userdebug/2457013";
const BUILD: &str = "lumpy-release/R27-3837.0.0";

fn healthy_lab(servers: &[&str]) -> Lab {
    let lab = lab(config_with(servers), StaticResolver::new());
    for server in servers {
        mark_healthy(&lab.transport, server);
    }
    lab
}

#[tokio::test(start_paused = true)]
async fn test_resolve_dispatches_on_build_name() {
    let lab = healthy_lab(&[D1]);

    let server = servers::resolve(&lab.ctx, ANDROID_BUILD, None, &[]).await.unwrap();
    assert!(matches!(server, AnyImageServer::Android(_)));
    assert!(server.as_chromeos().is_none());

    let server = servers::resolve(&lab.ctx, BUILD, None, &[]).await.unwrap();
    assert!(server.as_chromeos().is_some());
    assert_eq!(server.url(), D1);
}

#[tokio::test(start_paused = true)]
async fn test_image_urls() {
    let lab = healthy_lab(&[D1]);
    let server = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);

    assert_eq!(
        server.get_update_url(BUILD).await.unwrap(),
        "http://d1:8082/update/lumpy-release/R27-3837.0.0"
    );
    assert_eq!(
        server.get_full_payload_url(BUILD).await.unwrap(),
        "http://d1:8082/static/lumpy-release/R27-3837.0.0/update.gz"
    );
    assert_eq!(
        server.get_test_image_url(BUILD).await.unwrap(),
        "http://d1:8082/static/lumpy-release/R27-3837.0.0/chromiumos_test_image.bin"
    );
    assert_eq!(
        server.get_staged_file_url("autotest.tar", BUILD).await.unwrap(),
        "http://d1:8082/static/lumpy-release/R27-3837.0.0/autotest.tar"
    );
    assert!(lab.transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_translate_latest_build() {
    let lab = healthy_lab(&[D1]);
    lab.transport.set_default_ok(
        "http://d1:8082/xbuddy_translate/remote/lumpy/latest-official",
        "lumpy-release/R40-6000.0.0/chromiumos_test_image.bin",
    );
    let server = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);

    assert_eq!(server.translate("lumpy-release/LATEST").await.unwrap(), "lumpy-release/R40-6000.0.0");
    assert_eq!(
        lab.transport.calls()[0],
        "http://d1:8082/xbuddy_translate/remote/lumpy/latest-official?image_dir=gs://chromeos-image-archive/"
    );
    assert_eq!(server.translate(BUILD).await.unwrap(), BUILD);
    assert_eq!(lab.transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_locate_file() {
    let lab = healthy_lab(&[D1]);
    lab.transport
        .set_default_ok("http://d1:8082/locate_file", "full_payload/update.gz\n");

    let image = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);
    let url = image
        .locate_file("update.gz", &["full_payload".to_string()], BUILD)
        .await
        .unwrap();
    assert_eq!(url, "http://d1:8082/static/lumpy-release/R27-3837.0.0/full_payload/update.gz");
    assert_eq!(
        lab.transport.calls()[0],
        "http://d1:8082/locate_file?file_name=update.gz&artifacts=full_payload&async=False&build=lumpy-release/R27-3837.0.0"
    );

    let err = image
        .locate_file("update.gz", &["full_payload".to_string()], "")
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("You must specify build information"));

    let android = AndroidBuildServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);
    let url = android
        .locate_file("boot.img", &["zip_images".to_string()], ANDROID_BUILD)
        .await
        .unwrap();
    assert_eq!(
        url,
        "http://d1:8082/static/git_mnc-release/shamu-userdebug/2457013/full_payload/update.gz"
    );
    assert!(lab.transport.calls()[1].ends_with(
        "branch=git_mnc-release&target=shamu-userdebug&build_id=2457013&os_type=android"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_android_translate_and_staging() {
    let lab = healthy_lab(&[D1]);
    lab.transport.set_default_ok("http://d1:8082/latestbuild", "2460000\n");
    lab.transport.set_default_ok("http://d1:8082/stage", "Success");
    lab.transport.set_default_ok("http://d1:8082/is_staged", "True");
    let android = AndroidBuildServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);

    assert_eq!(
        android.translate("git_mnc-release/shamu-userdebug/LATEST").await.unwrap(),
        "git_mnc-release/shamu-userdebug/2460000"
    );
    assert!(lab.transport.calls()[0].ends_with("branch=git_mnc-release&target=shamu-userdebug&os_type=android"));

    android.trigger_download(ANDROID_BUILD, false).await.unwrap();
    let stage = lab.transport.calls_to("http://d1:8082/stage");
    assert_eq!(
        stage[0],
        "http://d1:8082/stage?async=True&artifacts=bootloader_image,radio_image,zip_images,test_zip&files=&target=shamu-userdebug&build_id=2457013&branch=git_mnc-release&os_type=android"
    );

    android.finish_download(ANDROID_BUILD).await.unwrap();
    let stage = lab.transport.calls_to("http://d1:8082/stage");
    assert_eq!(
        stage[1],
        "http://d1:8082/stage?async=True&archive_url=gs://chromeos-image-archive/git_mnc-release/shamu-userdebug/2457013&artifacts=bootloader_image,radio_image,zip_images,test_zip&files=&target=shamu-userdebug&build_id=2457013&branch=git_mnc-release&os_type=android"
    );

    let err = android.trigger_download("git_mnc-release/shamu-userdebug/", false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Must specify all build info (target, build_id and branch) to stage."
    );
}

#[tokio::test(start_paused = true)]
async fn test_suite_control_queries() {
    let lab = healthy_lab(&[D1]);
    lab.transport.set_default_ok(
        "http://d1:8082/list_suite_controls",
        r#"{"client/site_tests/a/control": "NAME = 'a'", "server/site_tests/b/control": "NAME = 'b'"}"#,
    );
    lab.transport.set_default_ok(
        "http://d1:8082/controlfiles",
        "client/site_tests/a/control\nserver/site_tests/b/control\n",
    );
    let server = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);

    let controls = server.list_suite_controls(BUILD, "bvt").await.unwrap();
    assert_eq!(controls.len(), 2);
    assert_eq!(controls["client/site_tests/a/control"], "NAME = 'a'");

    let files = server.list_control_files(BUILD, "bvt").await.unwrap();
    assert_eq!(files, vec!["client/site_tests/a/control", "server/site_tests/b/control"]);
}

#[tokio::test(start_paused = true)]
async fn test_get_latest_build_across_healthy_servers() {
    let lab = healthy_lab(&[D1, D2]);
    lab.transport.set_default_ok("http://d1:8082/latestbuild", "R40-6000.0.0");
    lab.transport.set_default_ok("http://d2:8082/latestbuild", "R41-6100.0.0\n");

    let latest = ImageServer::get_latest_build(&lab.ctx, "lumpy-release", "41").await.unwrap();
    assert_eq!(latest, "R41-6100.0.0");
    assert!(lab.transport.calls_to("http://d1:8082/latestbuild")[0]
        .ends_with("latestbuild?target=lumpy-release&milestone=41"));
}

#[tokio::test(start_paused = true)]
async fn test_get_latest_build_without_healthy_servers() {
    let lab = lab(config_with(&[D1]), StaticResolver::new());
    let result = ImageServer::get_latest_build(&lab.ctx, "lumpy-release", "").await;
    assert!(matches!(result, Err(DevServerError::NoHealthyDevServer { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_symbolicate_dump() {
    let mut config = config_with(&[D1]);
    config.crash_servers = vec![C1.to_string()];
    let lab = lab(config, StaticResolver::new());
    mark_healthy(&lab.transport, C1);
    lab.transport
        .set_default_ok("http://c1:8082/symbolicate_dump", "Thread 0 (crashed)\n 0  libc.so");

    let tmp = tempdir().unwrap();
    let dump = Dir::new(tmp.path()).file("chrome.dmp");
    dump.write_string("MDMP").await.unwrap();

    let server = CrashServer::resolve(&lab.ctx, BUILD).await.unwrap();
    assert_eq!(server.endpoint().url(), C1);
    let stack = server.symbolicate_dump(dump.path(), BUILD).await.unwrap();
    assert_eq!(stack, "Thread 0 (crashed)\n 0  libc.so");
    assert_eq!(
        lab.transport.calls_to("http://c1:8082/symbolicate_dump")[0],
        "http://c1:8082/symbolicate_dump?archive_url=gs://chromeos-image-archive/lumpy-release/R27-3837.0.0"
    );
    assert_eq!(lab.metrics.named(SYMBOLICATE_DUMP).len(), 1);
    assert_eq!(lab.metrics.named(SYMBOLICATE_DUMP_DURATION).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_resolve_command() {
    let lab = healthy_lab(&[D1]);
    let args: HashMap<String, String> = [("build".to_string(), BUILD.to_string())].into_iter().collect();
    let command = Command::from_args("resolve", &args).unwrap();

    let output = run(&lab.ctx, command).await.unwrap();
    assert_eq!(
        output,
        json!({ "build": BUILD, "devserver": D1, "hostname": "d1" })
    );
}
