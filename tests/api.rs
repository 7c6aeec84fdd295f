//! REST API behaviour through the full router.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum_test::TestServer;
use edgeplane::api::{build_router, ApiState};
use edgeplane::bootstrap::BootstrapParams;
use edgeplane::registry::ExposureRegistry;
use edgeplane::runtime::MemoryRuntime;
use edgeplane::xds::XdsState;
use edgeplane::AppConfig;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Harness {
    server: TestServer,
    runtime: Arc<MemoryRuntime>,
    _dir: TempDir,
}

async fn harness(apps: &[&str]) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.registry.state_dir = dir.path().to_string_lossy().into_owned();
    config.registry.tcp_port_min = 10000;
    config.registry.tcp_port_max = 10010;

    let runtime = Arc::new(MemoryRuntime::new());
    for app in apps {
        runtime.add_container(&format!("{}-main", app)).await;
    }
    let xds = Arc::new(XdsState::new(config.proxy.node_id.clone()));
    let registry = ExposureRegistry::open(&config, runtime.clone(), xds).await.unwrap();

    let state = ApiState::new(registry, BootstrapParams::from_config(&config));
    let server = TestServer::new(build_router(state)).unwrap();
    Harness { server, runtime, _dir: dir }
}

fn web_body() -> Value {
    json!({
        "app_id": "web",
        "protocol": "http",
        "hostname": "web.local",
        "container_port": 8080
    })
}

#[tokio::test]
async fn create_returns_201_then_200_for_the_same_exposure() {
    let h = harness(&["web"]).await;

    let first = h.server.post("/api/v1/exposures").json(&web_body()).await;
    first.assert_status(StatusCode::CREATED);
    let created: Value = first.json();
    assert!(created["id"].as_str().unwrap().starts_with("exp_"));
    assert_eq!(created["hostname"], "web.local");
    assert_eq!(created["status"], "available");
    assert!(created.get("host_port").is_none());

    let second = h.server.post("/api/v1/exposures").json(&web_body()).await;
    second.assert_status_ok();
    let again: Value = second.json();
    assert_eq!(again["id"], created["id"]);
}

#[tokio::test]
async fn tcp_exposure_reports_host_port_without_hostname() {
    let h = harness(&["db"]).await;

    let response = h
        .server
        .post("/api/v1/exposures")
        .json(&json!({ "app_id": "db", "protocol": "tcp", "hostname": "ignored", "container_port": 5432 }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["host_port"], 10000);
    assert!(body.get("hostname").is_none());
}

#[tokio::test]
async fn get_list_and_delete_roundtrip() {
    let h = harness(&["web"]).await;
    let created: Value = h.server.post("/api/v1/exposures").json(&web_body()).await.json();
    let id = created["id"].as_str().unwrap().to_string();

    let fetched: Value = h.server.get(&format!("/api/v1/exposures/{id}")).await.json();
    assert_eq!(fetched["app_id"], "web");
    assert_eq!(fetched["container_port"], 8080);

    let listed: Value = h.server.get("/api/v1/exposures").await.json();
    assert_eq!(listed["exposures"].as_array().unwrap().len(), 1);

    let by_app: Value = h.server.get("/api/v1/apps/web/exposures").await.json();
    assert_eq!(by_app["exposures"][0]["id"], id.as_str());

    h.server.delete(&format!("/api/v1/exposures/{id}")).await.assert_status(StatusCode::NO_CONTENT);
    h.server.get(&format!("/api/v1/exposures/{id}")).await.assert_status_not_found();

    let listed: Value = h.server.get("/api/v1/exposures").await.json();
    assert!(listed["exposures"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let h = harness(&[]).await;

    let missing = h.server.get("/api/v1/exposures/exp_0000000000000000").await;
    missing.assert_status_not_found();
    let body: Value = missing.json();
    assert_eq!(body["error"], "not_found");

    h.server.get("/api/v1/exposures/not-an-id").await.assert_status_not_found();
    h.server.delete("/api/v1/exposures/exp_0000000000000000").await.assert_status_not_found();
    h.server.delete("/api/v1/apps/ghost/exposures").await.assert_status_not_found();
}

#[tokio::test]
async fn invalid_requests_are_bad_request() {
    let h = harness(&["web"]).await;

    let cases = [
        json!({ "app_id": "web", "protocol": "udp", "hostname": "web.local", "container_port": 8080 }),
        json!({ "app_id": "web", "protocol": "http", "container_port": 8080 }),
        json!({ "app_id": "web", "protocol": "http", "hostname": "web.local", "container_port": 0 }),
        json!({ "app_id": "web", "protocol": "http", "hostname": "web.local", "container_port": 70000 }),
        json!({ "app_id": "bad/app", "protocol": "http", "hostname": "web.local", "container_port": 80 }),
    ];

    for case in cases {
        let response = h.server.post("/api/v1/exposures").json(&case).await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "bad_request", "case {case}");
    }

    let listed: Value = h.server.get("/api/v1/exposures").await.json();
    assert!(listed["exposures"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn missing_container_and_hostname_conflict() {
    let h = harness(&["web", "api"]).await;

    let missing = h
        .server
        .post("/api/v1/exposures")
        .json(&json!({ "app_id": "ghost", "protocol": "http", "hostname": "ghost.local", "container_port": 80 }))
        .await;
    missing.assert_status_not_found();

    h.server.post("/api/v1/exposures").json(&web_body()).await.assert_status(StatusCode::CREATED);
    let conflict = h
        .server
        .post("/api/v1/exposures")
        .json(&json!({ "app_id": "api", "protocol": "http", "hostname": "web.local", "container_port": 3000 }))
        .await;
    conflict.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn local_alias_of_an_exposed_hostname_is_conflict() {
    let h = harness(&["web", "blog"]).await;

    let bare = json!({ "app_id": "web", "protocol": "http", "hostname": "web", "container_port": 8080 });
    h.server.post("/api/v1/exposures").json(&bare).await.assert_status(StatusCode::CREATED);

    let alias = json!({ "app_id": "blog", "protocol": "http", "hostname": "web.local", "container_port": 80 });
    let conflict = h.server.post("/api/v1/exposures").json(&alias).await;
    conflict.assert_status(StatusCode::CONFLICT);
    let body: Value = conflict.json();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn listing_inspects_each_app_once_and_concurrently() {
    let h = harness(&["web", "api", "db"]).await;
    for (app, hostname) in [("web", "web.local"), ("web", "www.local"), ("api", "api.local"), ("db", "db.local")] {
        let body = json!({ "app_id": app, "protocol": "http", "hostname": hostname, "container_port": 80 });
        h.server.post("/api/v1/exposures").json(&body).await.assert_status(StatusCode::CREATED);
    }

    let latency = Duration::from_millis(300);
    h.runtime.set_latency(Some(latency)).await;
    h.runtime.calls.inspect.store(0, Ordering::Relaxed);

    let started = Instant::now();
    let listed: Value = h.server.get("/api/v1/exposures").await.json();
    let elapsed = started.elapsed();

    let exposures = listed["exposures"].as_array().unwrap();
    assert_eq!(exposures.len(), 4);
    assert!(exposures.iter().all(|e| e["status"] == "available"));
    assert_eq!(h.runtime.calls.inspect.load(Ordering::Relaxed), 3);
    // Three sequential lookups would take at least 900ms.
    assert!(elapsed < latency * 5 / 2, "listing took {elapsed:?}");
}

#[tokio::test]
async fn app_status_follows_the_container() {
    let h = harness(&["web"]).await;

    let status: Value = h.server.get("/api/v1/apps/web/status").await.json();
    assert_eq!(status, json!({ "app_id": "web", "status": "available" }));

    h.runtime.remove_container("web-main").await;
    let status: Value = h.server.get("/api/v1/apps/web/status").await.json();
    assert_eq!(status["status"], "unavailable");
}

#[tokio::test]
async fn bootstrap_is_served_as_yaml() {
    let h = harness(&[]).await;

    let response = h.server.get("/api/v1/bootstrap").add_query_param("xds_port", 18001).await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/yaml");

    let document: serde_yaml::Value = serde_yaml::from_str(&response.text()).unwrap();
    assert_eq!(document["node"]["id"], serde_yaml::Value::from("zeropoint-node"));
    let text = response.text();
    assert!(text.contains("18001"));
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let h = harness(&[]).await;

    let health: Value = h.server.get("/health").await.json();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "edgeplane");

    let openapi: Value = h.server.get("/api-docs/openapi.json").await.json();
    assert!(openapi["paths"].get("/api/v1/exposures").is_some());
}
