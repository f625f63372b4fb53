//! Devserver selection tests

use std::net::Ipv4Addr;
use std::time::Duration;

use devserver_client::config::DevServerConfig;
use devserver_client::constants::TIMEOUT_GET_DEVSERVER_LOAD;
use devserver_client::errors::DevServerError;
use devserver_client::select::DevServerSelector;
use devserver_client::servers::{ArtifactServer, ImageServer};
use devserver_client::testing::StaticResolver;
use devserver_client::utils::stable_hash;

use crate::common::{config_with, lab, load_with, mark_healthy, Lab, HEALTHY_LOAD};

const D1: &str = "http://d1:8082";
const D2: &str = "http://d2:8082";
const D3: &str = "http://d3:8082";

fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with("d1", Ipv4Addr::new(10, 1, 1, 5))
        .with("d2", Ipv4Addr::new(10, 2, 0, 5))
        .with("d3", Ipv4Addr::new(10, 5, 1, 1))
        .with("restricted-dut", Ipv4Addr::new(10, 1, 3, 40))
        .with("local-dut", Ipv4Addr::new(10, 5, 0, 9))
        .with("far-dut", Ipv4Addr::new(192, 168, 0, 9))
}

fn restricted_config() -> DevServerConfig {
    let mut config = config_with(&[D1, D2]);
    config.restricted_subnets = vec!["10.1.0.0/19".parse().unwrap()];
    config
}

fn healthy_lab(config: DevServerConfig, servers: &[&str]) -> Lab {
    let lab = lab(config, resolver());
    for server in servers {
        mark_healthy(&lab.transport, server);
    }
    lab
}

#[tokio::test(start_paused = true)]
async fn test_resolve_is_build_affine() {
    let lab = healthy_lab(config_with(&[D1, D2]), &[D1, D2]);
    let build = "lumpy-release/R27-3837.0.0";
    let expected = [D1, D2][(stable_hash(build) % 2) as usize];

    for _ in 0..3 {
        let server = ImageServer::resolve(&lab.ctx, build, None, &[]).await.unwrap();
        assert_eq!(server.url(), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_resolve_skips_banned_and_unhealthy() {
    let lab = healthy_lab(config_with(&[D1, D2]), &[D2]);
    let build = "lumpy-release/R27-3837.0.0";

    // d1 never answers check_health
    let server = ImageServer::resolve(&lab.ctx, build, None, &[]).await.unwrap();
    assert_eq!(server.url(), D2);

    let banned = vec![D2.to_string()];
    let result = ImageServer::resolve(&lab.ctx, build, None, &banned).await;
    match result {
        Err(DevServerError::NoHealthyDevServer { tried, hostname }) => {
            assert_eq!(tried, vec![D1.to_string(), D2.to_string()]);
            assert!(hostname.is_none());
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("banned devserver was selected"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_resolve_with_no_devservers() {
    let lab = healthy_lab(config_with(&[]), &[]);
    let result = ImageServer::resolve(&lab.ctx, "b", Some("far-dut"), &[]).await;
    assert!(matches!(result, Err(DevServerError::NoHealthyDevServer { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_restricted_dut_stays_in_its_subnet() {
    let lab = healthy_lab(restricted_config(), &[D1, D2]);
    for build in ["a", "b", "c", "d"] {
        let server = ImageServer::resolve(&lab.ctx, build, Some("restricted-dut"), &[])
            .await
            .unwrap();
        assert_eq!(server.url(), D1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_restricted_dut_does_not_fall_back() {
    let lab = healthy_lab(restricted_config(), &[D2]);
    let result = ImageServer::resolve(&lab.ctx, "a", Some("restricted-dut"), &[]).await;
    match result {
        Err(DevServerError::NoHealthyDevServer { tried, hostname }) => {
            assert_eq!(tried, vec![D1.to_string()]);
            assert_eq!(hostname.as_deref(), Some("restricted-dut"));
        }
        _ => panic!("expected NoHealthyDevServer"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unrestricted_dut_never_gets_restricted_server() {
    let lab = healthy_lab(restricted_config(), &[D1, D2]);
    for build in ["a", "b", "c", "d"] {
        let server = ImageServer::resolve(&lab.ctx, build, Some("far-dut"), &[])
            .await
            .unwrap();
        assert_eq!(server.url(), D2);
    }
    // Unresolvable DUTs are treated the same way
    let server = ImageServer::resolve(&lab.ctx, "a", Some("ghost-dut"), &[])
        .await
        .unwrap();
    assert_eq!(server.url(), D2);
}

#[tokio::test(start_paused = true)]
async fn test_prefer_local_devserver_with_fallback() {
    let mut config = config_with(&[D2, D3]);
    config.prefer_local_devserver = true;

    let lab = healthy_lab(config.clone(), &[D2, D3]);
    let (candidates, can_retry) = DevServerSelector::<ImageServer>::new(&lab.ctx)
        .available_devservers(Some("local-dut"))
        .await
        .unwrap();
    assert_eq!(candidates, vec![D3.to_string()]);
    assert!(can_retry);

    // The local devserver is down, so any unrestricted one will do
    let lab = healthy_lab(config, &[D2]);
    let server = ImageServer::resolve(&lab.ctx, "a", Some("local-dut"), &[])
        .await
        .unwrap();
    assert_eq!(server.url(), D2);
}

#[tokio::test(start_paused = true)]
async fn test_pick_least_loaded_prefers_idle_disk() {
    let lab = lab(config_with(&[D1, D2]), resolver());
    lab.transport
        .set_default_ok("http://d1:8082/check_health", &load_with(500.0, 10.0));
    lab.transport
        .set_default_ok("http://d2:8082/check_health", &load_with(100.0, 10.0));

    let selector = DevServerSelector::<ImageServer>::new(&lab.ctx);
    let picked = selector.pick_least_loaded(None).await.unwrap();
    assert_eq!(picked.as_deref(), Some(D2));
}

#[tokio::test(start_paused = true)]
async fn test_pick_least_loaded_skips_busy_cpu() {
    let lab = lab(config_with(&[D1, D2]), resolver());
    lab.transport
        .set_default_ok("http://d1:8082/check_health", &load_with(500.0, 10.0));
    lab.transport
        .set_default_ok("http://d2:8082/check_health", &load_with(100.0, 95.0));

    let selector = DevServerSelector::<ImageServer>::new(&lab.ctx);
    let picked = selector.pick_least_loaded(None).await.unwrap();
    assert_eq!(picked.as_deref(), Some(D1));
}

#[tokio::test(start_paused = true)]
async fn test_pick_least_loaded_survives_hung_devserver() {
    assert_eq!(stable_hash("") % 2, 0);
    let lab = lab(config_with(&[D1, D2]), resolver());
    // The up-front health check hashes the empty build onto d1 and gets an
    // answer; its next check_health then hangs with an otherwise winning load.
    lab.transport.push_ok("http://d1:8082/check_health", HEALTHY_LOAD);
    lab.transport.push_delayed(
        "http://d1:8082/check_health",
        Duration::from_secs(3600),
        Ok(load_with(1.0, 10.0)),
    );
    lab.transport
        .set_default_ok("http://d2:8082/check_health", &load_with(500.0, 10.0));

    let selector = DevServerSelector::<ImageServer>::new(&lab.ctx);
    let start = tokio::time::Instant::now();
    let picked = selector.pick_least_loaded(None).await.unwrap();

    assert_eq!(picked.as_deref(), Some(D2));
    assert!(start.elapsed() <= TIMEOUT_GET_DEVSERVER_LOAD);
}

#[tokio::test(start_paused = true)]
async fn test_pick_least_loaded_without_candidates() {
    let lab = lab(config_with(&[D1]), resolver());
    let selector = DevServerSelector::<ImageServer>::new(&lab.ctx);
    assert!(selector.pick_least_loaded(None).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_healthy_servers_lists_only_healthy() {
    let lab = healthy_lab(config_with(&[D1, D2, D3]), &[D1, D3]);
    let healthy: Vec<String> = DevServerSelector::<ImageServer>::new(&lab.ctx)
        .healthy_servers()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.url().to_string())
        .collect();
    assert_eq!(healthy, vec![D1.to_string(), D3.to_string()]);
}
