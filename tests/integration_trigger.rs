//! Trigger endpoint integration tests
//!
//! Tests the HTTP surface end to end:
//! - Bearer token protection
//! - Sliding-window rate limiting with Retry-After
//! - Sheet group selection and the returned report

mod common;

use serde_json::{json, Value};
use wiremock::MockServer;

use common::{
    create_test_config, create_test_state, mount_page, run_test_server, trigger_url, TEST_TOKEN,
};
use formsync::config::SinkKind;

async fn mount_sources(server: &MockServer) {
    mount_page(
        server,
        "xmlns-cleaning",
        0,
        vec![json!({"id": "c1", "form": {"ward": "East"}})],
        false,
    )
    .await;
    mount_page(
        server,
        "xmlns-furnishing",
        0,
        vec![json!({"id": "f1"}), json!({"id": "f2"})],
        false,
    )
    .await;
}

// Test 1: Liveness endpoint needs no token
#[tokio::test]
async fn test_liveness() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&server.uri(), SinkKind::Csv, dir.path().to_str().unwrap());
    let (addr, _shutdown) = run_test_server(&config, create_test_state(&config).await).await;

    let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "running");
}

// Test 2: Missing or wrong token is forbidden and starts no run
#[tokio::test]
async fn test_trigger_forbidden() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&server.uri(), SinkKind::Csv, dir.path().to_str().unwrap());
    let (addr, _shutdown) = run_test_server(&config, create_test_state(&config).await).await;
    let client = reqwest::Client::new();

    let response = client.post(trigger_url(addr, None)).send().await.unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .post(trigger_url(addr, None))
        .bearer_auth("not-the-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    assert!(server.received_requests().await.unwrap().is_empty());
}

// Test 3: Authorized trigger syncs every group and returns the report
#[tokio::test]
async fn test_trigger_all_groups() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&server.uri(), SinkKind::Csv, dir.path().to_str().unwrap());
    let (addr, _shutdown) = run_test_server(&config, create_test_state(&config).await).await;

    let response = reqwest::Client::new()
        .post(trigger_url(addr, None))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "success");
    assert_eq!(body["results"][0]["form"], "Cleaning Checklist");
    assert_eq!(body["results"][0]["row_count"], 1);
    assert_eq!(body["results"][1]["form"], "Furnishing");
    assert_eq!(body["results"][1]["row_count"], 2);

    assert!(dir.path().join("Cleaning Checklist.csv").exists());
    assert!(dir.path().join("Furnishing.csv").exists());
}

// Test 4: Sheet selector syncs only that group
#[tokio::test]
async fn test_trigger_single_group() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&server.uri(), SinkKind::Csv, dir.path().to_str().unwrap());
    let (addr, _shutdown) = run_test_server(&config, create_test_state(&config).await).await;

    let response = reqwest::Client::new()
        .post(trigger_url(addr, Some("kmc")))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["form"], "Furnishing");

    assert!(!dir.path().join("Cleaning Checklist.csv").exists());
}

// Test 5: Unknown sheet group is rejected before any fetch
#[tokio::test]
async fn test_trigger_unknown_group() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&server.uri(), SinkKind::Csv, dir.path().to_str().unwrap());
    let (addr, _shutdown) = run_test_server(&config, create_test_state(&config).await).await;

    let response = reqwest::Client::new()
        .post(trigger_url(addr, Some("maternity")))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Unknown sheet group: maternity");
    assert!(server.received_requests().await.unwrap().is_empty());
}

// Test 6: Requests over capacity get 429 with Retry-After
#[tokio::test]
async fn test_trigger_rate_limited() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config =
        create_test_config(&server.uri(), SinkKind::Csv, dir.path().to_str().unwrap());
    config.auth.rate_limit.capacity = 2;
    config.auth.rate_limit.window_secs = 60;
    let (addr, _shutdown) = run_test_server(&config, create_test_state(&config).await).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .post(trigger_url(addr, Some("kmc")))
            .bearer_auth(TEST_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = client
        .post(trigger_url(addr, Some("kmc")))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);

    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    // Forbidden requests are answered before the limiter
    let response = client.post(trigger_url(addr, None)).send().await.unwrap();
    assert_eq!(response.status(), 403);
}
