//! Sync pipeline integration tests
//!
//! Tests the full pipeline against a mock source:
//! - Pagination into a SQLite sink
//! - Idempotent reruns and replacement
//! - Partial failure isolation
//! - CSV output with gap filling

mod common;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

use common::{create_test_config, mount_failure, mount_page};
use formsync::app::build_orchestrator;
use formsync::config::SinkKind;
use formsync::models::{FieldValue, RunOutcome, SyncStatus};
use formsync::sink::SqliteSink;

fn submission(id: &str, name: &str, score: i64) -> serde_json::Value {
    json!({
        "id": id,
        "form": { "name": name, "score": score },
    })
}

async fn mount_three_cleaning_records(server: &MockServer) {
    mount_page(
        server,
        "xmlns-cleaning",
        0,
        vec![submission("a", "Ward 1", 3), submission("b", "Ward 2", 5)],
        true,
    )
    .await;
    mount_page(
        server,
        "xmlns-cleaning",
        2,
        vec![submission("c", "Ward 3", 4)],
        false,
    )
    .await;
}

// Test 1: Paginated form lands in SQLite with flattened columns
#[tokio::test]
async fn test_sync_paginates_into_sqlite() {
    let server = MockServer::start().await;
    mount_three_cleaning_records(&server).await;
    mount_page(&server, "xmlns-furnishing", 0, vec![], false).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sync.db");
    let config = create_test_config(
        &server.uri(),
        SinkKind::Sqlite,
        db_path.to_str().unwrap(),
    );

    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    let report = orchestrator
        .run(config.catalog().select(None).unwrap(), CancellationToken::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].form, "Cleaning Checklist");
    assert_eq!(report.results[0].status, SyncStatus::Success);
    assert_eq!(report.results[0].row_count, Some(3));
    assert_eq!(report.results[1].status, SyncStatus::NoData);

    let sink = SqliteSink::new(db_path.to_str().unwrap()).await.unwrap();
    let (header, rows) = sink.read_table("Cleaning Checklist").await.unwrap();
    assert_eq!(header, vec!["id", "form.name", "form.score"]);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2][1], FieldValue::Text("Ward 3".to_string()));
    assert_eq!(rows[2][2], FieldValue::Integer(4));

    // Forms without data leave no table behind
    assert!(!sink.table_exists("Furnishing").await.unwrap());
}

// Test 2: Rerunning against unchanged data yields the same table
#[tokio::test]
async fn test_sync_rerun_is_idempotent() {
    let server = MockServer::start().await;
    mount_three_cleaning_records(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sync.db");
    let config = create_test_config(
        &server.uri(),
        SinkKind::Sqlite,
        db_path.to_str().unwrap(),
    );

    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    let forms = config.catalog().select(Some("facility")).unwrap();

    orchestrator.run(forms.clone(), CancellationToken::new()).await;
    let sink = SqliteSink::new(db_path.to_str().unwrap()).await.unwrap();
    let first = sink.read_table("Cleaning Checklist").await.unwrap();

    let report = orchestrator.run(forms, CancellationToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Success);
    let second = sink.read_table("Cleaning Checklist").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.1.len(), 3);
}

// Test 3: A later run replaces rows instead of appending
#[tokio::test]
async fn test_sync_replaces_previous_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sync.db");

    let server = MockServer::start().await;
    mount_three_cleaning_records(&server).await;
    let config = create_test_config(
        &server.uri(),
        SinkKind::Sqlite,
        db_path.to_str().unwrap(),
    );
    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    orchestrator
        .run(
            config.catalog().select(Some("facility")).unwrap(),
            CancellationToken::new(),
        )
        .await;

    // The source now holds a single submission
    let server = MockServer::start().await;
    mount_page(
        &server,
        "xmlns-cleaning",
        0,
        vec![submission("z", "Ward 9", 1)],
        false,
    )
    .await;
    let config = create_test_config(
        &server.uri(),
        SinkKind::Sqlite,
        db_path.to_str().unwrap(),
    );
    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    let report = orchestrator
        .run(
            config.catalog().select(Some("facility")).unwrap(),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(report.results[0].row_count, Some(1));

    let sink = SqliteSink::new(db_path.to_str().unwrap()).await.unwrap();
    let (_, rows) = sink.read_table("Cleaning Checklist").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], FieldValue::Text("z".to_string()));
}

// Test 4: One failing form does not stop the others
#[tokio::test]
async fn test_sync_partial_failure() {
    let server = MockServer::start().await;
    mount_failure(&server, "xmlns-cleaning", 500).await;
    mount_page(
        &server,
        "xmlns-furnishing",
        0,
        vec![json!({"id": "f1", "room": "A"})],
        false,
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sync.db");
    let config = create_test_config(
        &server.uri(),
        SinkKind::Sqlite,
        db_path.to_str().unwrap(),
    );

    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    let report = orchestrator
        .run(config.catalog().select(None).unwrap(), CancellationToken::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Partial);
    assert_eq!(report.results[0].status, SyncStatus::Error);
    assert!(report.results[0].error.is_some());
    assert_eq!(report.results[1].status, SyncStatus::Success);
    assert_eq!(report.results[1].row_count, Some(1));

    let sink = SqliteSink::new(db_path.to_str().unwrap()).await.unwrap();
    assert!(!sink.table_exists("Cleaning Checklist").await.unwrap());
    assert!(sink.table_exists("Furnishing").await.unwrap());
}

// Test 5: Rejected credentials fail every form without retries
#[tokio::test]
async fn test_sync_unauthorized_source() {
    let server = MockServer::start().await;
    mount_failure(&server, "xmlns-cleaning", 401).await;
    mount_failure(&server, "xmlns-furnishing", 401).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(
        &server.uri(),
        SinkKind::Csv,
        dir.path().to_str().unwrap(),
    );

    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    let report = orchestrator
        .run(config.catalog().select(None).unwrap(), CancellationToken::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.with_status(SyncStatus::Error).count(), 2);

    // One request per form
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

// Test 6: CSV output fills fields missing from some submissions
#[tokio::test]
async fn test_sync_csv_fills_gaps() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "xmlns-furnishing",
        0,
        vec![
            json!({"id": "f1", "form": {"room": "A"}}),
            json!({"id": "f2", "form": {"bed": 2}}),
        ],
        false,
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(
        &server.uri(),
        SinkKind::Csv,
        dir.path().to_str().unwrap(),
    );

    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    let report = orchestrator
        .run(
            config.catalog().select(Some("kmc")).unwrap(),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(report.outcome, RunOutcome::Success);

    let mut reader = csv::Reader::from_path(dir.path().join("Furnishing.csv")).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header, vec!["id", "form.room", "form.bed"]);

    let rows: Vec<Vec<String>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    assert_eq!(rows, vec![vec!["f1", "A", ""], vec!["f2", "", "2"]]);
}

// Test 7: A cancelled run skips every form
#[tokio::test]
async fn test_sync_cancelled_run() {
    let server = MockServer::start().await;
    mount_three_cleaning_records(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(
        &server.uri(),
        SinkKind::Csv,
        dir.path().to_str().unwrap(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();

    let orchestrator = build_orchestrator(&config, None).await.unwrap();
    let report = orchestrator
        .run(config.catalog().select(None).unwrap(), cancel)
        .await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.with_status(SyncStatus::Skipped).count(), 2);
    assert!(server.received_requests().await.unwrap().is_empty());
}
