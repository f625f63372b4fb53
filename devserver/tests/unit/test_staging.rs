//! Staging protocol tests

use std::time::Duration;

use devserver_client::errors::DevServerError;
use devserver_client::http::{RetryPolicy, TransportError};
use devserver_client::servers::{ArtifactServer, ImageServer};
use devserver_client::staging::{StagingCoordinator, StagingOptions, StagingRequest};
use devserver_client::telemetry::{STAGE_ARTIFACT, STAGE_ARTIFACT_DURATION};
use devserver_client::testing::StaticResolver;
use tokio_test::{assert_err, assert_ok};

use crate::common::{config_with, lab, Lab};

const D1: &str = "http://d1:8082";
const STAGE: &str = "http://d1:8082/stage";
const IS_STAGED: &str = "http://d1:8082/is_staged";
const BUILD: &str = "lumpy-release/R27-3837.0.0";

fn coordinator(lab: &Lab, options: StagingOptions) -> StagingCoordinator {
    StagingCoordinator::new(lab.ctx.call(), RetryPolicy::staging(), options, lab.metrics.clone())
}

fn request() -> StagingRequest {
    StagingRequest::chromeos(
        BUILD,
        vec!["full_payload".into(), "stateful".into()],
        vec![],
        Some(format!("gs://chromeos-image-archive/{}", BUILD)),
    )
}

fn staging_lab() -> Lab {
    let lab = lab(config_with(&[D1]), StaticResolver::new());
    lab.transport.set_default_ok(STAGE, "Success");
    lab
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_staged() {
    let lab = staging_lab();
    for _ in 0..3 {
        lab.transport.push_ok(IS_STAGED, "False");
    }
    lab.transport.set_default_ok(IS_STAGED, "True");
    let endpoint = lab.ctx.endpoint(D1).unwrap();

    let start = tokio::time::Instant::now();
    assert_ok!(
        coordinator(&lab, StagingOptions::default())
            .stage_artifacts(&endpoint, &request())
            .await
    );
    assert!(start.elapsed() >= Duration::from_secs(15));

    assert_eq!(lab.transport.calls_to(STAGE).len(), 1);
    let polls = lab.transport.calls_to(IS_STAGED);
    assert_eq!(polls.len(), 4);
    assert_eq!(
        polls[0],
        "http://d1:8082/is_staged?archive_url=gs://chromeos-image-archive/lumpy-release/R27-3837.0.0&artifacts=full_payload,stateful&files="
    );
    assert_eq!(
        lab.transport.calls_to(STAGE)[0],
        "http://d1:8082/stage?async=True&archive_url=gs://chromeos-image-archive/lumpy-release/R27-3837.0.0&artifacts=full_payload,stateful&files="
    );

    let counters = lab.metrics.named(STAGE_ARTIFACT);
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].fields["success"], "true");
    assert_eq!(counters[0].fields["artifacts"], "full_payload,stateful");
    assert_eq!(counters[0].fields["dev_server"], "d1");
    let gauges = lab.metrics.named(STAGE_ARTIFACT_DURATION);
    assert_eq!(gauges.len(), 1);
    assert!(gauges[0].value.unwrap_or_default() >= 15.0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_is_staged_error_is_absorbed() {
    let lab = staging_lab();
    lab.transport
        .push_error(IS_STAGED, TransportError::Connection("connection reset".into()));
    lab.transport.push_ok(IS_STAGED, "<html>Proxy Error</html>");
    lab.transport.set_default_ok(IS_STAGED, "True");
    let endpoint = lab.ctx.endpoint(D1).unwrap();

    assert_ok!(
        coordinator(&lab, StagingOptions::default())
            .stage_artifacts(&endpoint, &request())
            .await
    );
    assert_eq!(lab.transport.calls_to(IS_STAGED).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_is_staged_server_error_is_fatal() {
    let lab = staging_lab();
    lab.transport.push_ok(IS_STAGED, "False");
    lab.transport.push_error(
        IS_STAGED,
        TransportError::Server {
            status: Some(500),
            body: "<pre>DownloaderException: no such artifact</pre>".into(),
        },
    );
    lab.transport.set_default_ok(IS_STAGED, "True");
    let endpoint = lab.ctx.endpoint(D1).unwrap();

    let err = assert_err!(
        coordinator(&lab, StagingOptions::default())
            .stage_artifacts(&endpoint, &request())
            .await
    );
    assert!(matches!(&err, DevServerError::Server(msg) if msg.contains("DownloaderException: no such artifact")));
    assert_eq!(lab.transport.calls_to(IS_STAGED).len(), 2);
    assert_eq!(lab.metrics.named(STAGE_ARTIFACT)[0].fields["success"], "false");
}

#[tokio::test(start_paused = true)]
async fn test_stage_without_success_is_rejected() {
    let lab = lab(config_with(&[D1]), StaticResolver::new());
    lab.transport.set_default_ok(STAGE, "Failure");
    let endpoint = lab.ctx.endpoint(D1).unwrap();

    let err = assert_err!(
        coordinator(&lab, StagingOptions::default())
            .stage_artifacts(&endpoint, &request())
            .await
    );
    assert_eq!(
        err.to_string(),
        "staging artifacts=full_payload,stateful files=  for lumpy-release/R27-3837.0.0 failed;HTTP OK not accompanied by 'Success'."
    );
    assert!(lab.transport.calls_to(IS_STAGED).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_staging_timeout() {
    let lab = staging_lab();
    lab.transport.set_default_ok(IS_STAGED, "False");
    let endpoint = lab.ctx.endpoint(D1).unwrap();
    let options = StagingOptions {
        timeout: Duration::from_secs(30),
        ..Default::default()
    };

    let err = assert_err!(coordinator(&lab, options).stage_artifacts(&endpoint, &request()).await);
    assert!(err.is_timeout());
    assert!(err.to_string().contains("stage_artifacts timed out: build=lumpy-release/R27-3837.0.0"));
    assert_eq!(lab.metrics.named(STAGE_ARTIFACT)[0].fields["success"], "false");
}

#[tokio::test(start_paused = true)]
async fn test_trigger_download_timeout_names_phase() {
    let lab = staging_lab();
    lab.transport.set_default_ok(IS_STAGED, "False");
    let endpoint = lab.ctx.endpoint(D1).unwrap();
    let options = StagingOptions {
        timeout: Duration::from_secs(10),
        ..Default::default()
    };

    let err = assert_err!(coordinator(&lab, options).trigger_download(&endpoint, &request()).await);
    assert_eq!(
        err.to_string(),
        "Timed out: trigger_download timed out for lumpy-release/R27-3837.0.0."
    );
}

#[tokio::test(start_paused = true)]
async fn test_image_server_stage_defaults_archive_url() {
    let lab = staging_lab();
    lab.transport.set_default_ok(IS_STAGED, "True");
    let server = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);

    assert_ok!(
        server
            .stage_artifacts(BUILD, &["full_payload".to_string()], &[], None)
            .await
    );
    assert_ok!(
        server
            .stage_artifacts(BUILD, &["factory_image".to_string()], &[], None)
            .await
    );

    let stages = lab.transport.calls_to(STAGE);
    assert!(stages[0].contains("archive_url=gs://chromeos-image-archive/lumpy-release/R27-3837.0.0&"));
    assert!(stages[1].contains("archive_url=gs://chromeos-releases/lumpy-release/R27-3837.0.0&"));
}

#[tokio::test(start_paused = true)]
async fn test_image_server_rejects_empty_stage() {
    let lab = staging_lab();
    let server = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);

    let err = assert_err!(server.stage_artifacts(BUILD, &[], &[], None).await);
    assert_eq!(err.to_string(), "Must specify something to stage.");
    assert!(lab.transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_synchronous_trigger_download_stages_both_sets() {
    let lab = staging_lab();
    lab.transport.set_default_ok(IS_STAGED, "True");
    let server = ImageServer::new(lab.ctx.endpoint(D1).unwrap(), &lab.ctx);

    assert_ok!(server.trigger_download(BUILD, true).await);

    let stages = lab.transport.calls_to(STAGE);
    assert_eq!(stages.len(), 2);
    assert!(stages[0].contains("artifacts=full_payload,test_suites,stateful&"));
    assert!(stages[1].contains("artifacts=full_payload,test_suites,control_files,stateful,autotest_packages&"));

    assert_ok!(server.trigger_download(BUILD, false).await);
    assert_eq!(lab.transport.calls_to(STAGE).len(), 3);
}
