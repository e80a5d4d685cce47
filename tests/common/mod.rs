//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use formsync::app::{build_orchestrator, build_state};
use formsync::config::{Config, RetryConfig, SinkConfig, SinkKind};
use formsync::models::{FormSpec, SheetGroup};
use formsync::server::{AppState, Server};

/// Shared trigger token used by the test configuration
pub const TEST_TOKEN: &str = "integration-token";

/// Path of the form list endpoint on the mock source
pub const FORM_PATH: &str = "/a/demo/api/v0.5/form/";

/// Build a test configuration pointing at a mock source
pub fn create_test_config(source_uri: &str, sink_kind: SinkKind, sink_path: &str) -> Config {
    let mut config = Config::default();
    config.auth.token = Some(TEST_TOKEN.to_string());

    config.source.base_url = Some(format!("{}{}", source_uri, FORM_PATH));
    config.source.username = Some("sync@example.com".to_string());
    config.source.api_key = Some("secret".to_string());
    config.source.https_only = false;
    config.source.page_size = 2;

    config.retry = RetryConfig {
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..Default::default()
    };

    config.sink = SinkConfig {
        kind: sink_kind,
        path: sink_path.to_string(),
    };

    config.sheets = vec![
        SheetGroup {
            name: "facility".to_string(),
            forms: vec![FormSpec::new("xmlns-cleaning", "Cleaning Checklist")],
        },
        SheetGroup {
            name: "kmc".to_string(),
            forms: vec![FormSpec::new("xmlns-furnishing", "Furnishing")],
        },
    ];

    config
}

/// Page envelope as returned by the source
pub fn page_body(objects: Vec<Value>, next: Option<&str>) -> Value {
    json!({
        "meta": { "limit": 2, "next": next },
        "objects": objects,
    })
}

/// Mount one page of a form at the given offset
pub async fn mount_page(
    server: &MockServer,
    source_id: &str,
    offset: u64,
    objects: Vec<Value>,
    has_next: bool,
) {
    let next = has_next.then(|| "?offset=next");
    Mock::given(method("GET"))
        .and(path(FORM_PATH))
        .and(query_param("xmlns", source_id))
        .and(query_param("offset", offset.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(objects, next)))
        .mount(server)
        .await;
}

/// Mount a failing response for every page of a form
pub async fn mount_failure(server: &MockServer, source_id: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(FORM_PATH))
        .and(query_param("xmlns", source_id))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Create a test application state from a configuration
pub async fn create_test_state(config: &Config) -> AppState {
    let orchestrator = build_orchestrator(config, None)
        .await
        .expect("Failed to build orchestrator");
    build_state(config, orchestrator, None, CancellationToken::new())
        .expect("Failed to build state")
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server(
    config: &Config,
    state: AppState,
) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let server = Server::new(config.server.clone(), state);
    tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    (addr, shutdown_tx)
}

/// Trigger URL for a running test server
pub fn trigger_url(addr: SocketAddr, sheet: Option<&str>) -> String {
    match sheet {
        Some(sheet) => format!("http://{}/update_sheets?sheet={}", addr, sheet),
        None => format!("http://{}/update_sheets", addr),
    }
}
