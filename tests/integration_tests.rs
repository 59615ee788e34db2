// Integration Tests for Probe Console
// End-to-end runs through the pipeline, the HTTP API, and the live WebSocket feed

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use probe_console::config::ConsoleConfig;
use probe_console::dashboard;
use probe_console::orchestrator::{FnSource, MeasurementSource};
use probe_console::signals::ShutdownCoordinator;
use probe_console::{AppContext, Category, MeasurementRecord};

fn single_record_source() -> Arc<dyn MeasurementSource> {
    Arc::new(FnSource::new("sort", Category::Benchmark, || async {
        Ok(vec![MeasurementRecord::graded("sort.u64", Category::Benchmark, 12.0, 50.0)
            .with_extension("elements", 1_000usize)])
    }))
}

fn context_in(dir: &TempDir) -> Arc<AppContext> {
    let mut config = ConsoleConfig::default();
    config.history.path = dir.path().join("history.db");
    Arc::new(AppContext::with_sources(config, vec![single_record_source()]))
}

fn topics(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut topics = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        let frame: Value = serde_json::from_str(&raw).unwrap();
        topics.push(frame["type"].as_str().unwrap().to_string());
    }
    topics
}

#[tokio::test]
async fn test_single_record_run_end_to_end() {
    let dir = TempDir::new().unwrap();
    let context = context_in(&dir);

    let (tx, mut rx) = mpsc::channel(16);
    let viewer = context.hub.register(tx);
    assert!(context.hub.open(viewer));
    assert_eq!(topics(&mut rx), vec!["welcome"]);

    let snapshot = context.orchestrator.collect(false).await;
    assert!(!snapshot.cached);
    assert_eq!(snapshot.summary.total, 1);
    assert_eq!(snapshot.summary.passed, 1);
    assert_eq!(snapshot.summary.score, 100);

    let history = context.history.clone().expect("store opened");
    assert_eq!(history.record_count().await.unwrap(), 1);
    let stored = history.latest("sort.u64", 10).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].extensions, snapshot.domains[&Category::Benchmark][0].extensions);

    // One per-record event, then the snapshot; a healthy run raises no alerts
    assert_eq!(topics(&mut rx), vec!["benchmark:complete", "data:updated"]);

    let cached = context.orchestrator.collect(true).await;
    assert!(cached.cached);
    assert_eq!(cached.generated_at, snapshot.generated_at);
    assert!(topics(&mut rx).is_empty());
    assert_eq!(history.record_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_history_feeds_trends_and_success_rates() {
    let dir = TempDir::new().unwrap();
    let context = context_in(&dir);

    context.orchestrator.collect(false).await;
    context.orchestrator.collect(false).await;

    let history = context.history.clone().unwrap();
    let report = history.query_trends(1, 60).await;
    assert!(report.trends.iter().all(|bucket| bucket.name == "sort.u64"));
    assert_eq!(report.trends.iter().map(|bucket| bucket.count).sum::<usize>(), 2);
    assert!(report.regressions.is_empty());

    let rates = history.success_rates().await;
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0].total, 2);
    assert_eq!(rates[0].passed, 2);
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_http_api_routes() {
    let dir = TempDir::new().unwrap();
    let context = context_in(&dir);
    let app = dashboard::router(context.clone());

    let (status, health) = get_json(app.clone(), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sources"], 1);
    assert_eq!(health["cache"]["warm"], false);
    assert!(health["connections"].as_array().unwrap().is_empty());
    assert!(health["persistence"].as_str().unwrap().ends_with("history.db"));

    let (status, snapshot) = get_json(app.clone(), "/api/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["summary"]["passed"], 1);
    assert_eq!(snapshot["cached"], false);

    let (_, again) = get_json(app.clone(), "/api/snapshot").await;
    assert_eq!(again["cached"], true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/collect")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, history) = get_json(app.clone(), "/api/history/sort.u64?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().map(Vec::len), Some(1));

    let (status, _) = get_json(app.clone(), "/api/trends?hours=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, trends) = get_json(app, "/api/trends?hours=1&bucket_minutes=5").await;
    assert_eq!(status, StatusCode::OK);
    assert!(trends["trends"].is_array());
}

#[tokio::test]
async fn test_history_routes_without_store() {
    let dir = TempDir::new().unwrap();
    let mut config = ConsoleConfig::default();
    // A directory is not a usable database file
    config.history.path = dir.path().to_path_buf();
    let context = Arc::new(AppContext::with_sources(config, vec![single_record_source()]));
    assert!(context.history.is_none());

    let (status, body) = get_json(dashboard::router(context.clone()), "/api/success-rates").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    // Collection still works without persistence
    let (status, snapshot) = get_json(dashboard::router(context), "/api/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["summary"]["total"], 1);
}

async fn next_frame<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_websocket_live_feed() {
    let dir = TempDir::new().unwrap();
    let context = context_in(&dir);
    let coordinator = ShutdownCoordinator::new();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(dashboard::serve(listener, context.clone(), coordinator.wait()));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    let welcome = next_frame(&mut socket).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["data"]["connection_id"].is_string());
    assert_eq!(context.hub.viewer_count(), 1);

    socket
        .send(Message::Text(
            r#"{"type":"subscribe","channels":["data:updated"]}"#.to_string(),
        ))
        .await
        .unwrap();
    let subscribed = next_frame(&mut socket).await;
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(subscribed["data"]["channels"][0], "data:updated");

    // benchmark:complete is filtered out by the subscription
    context.orchestrator.collect(false).await;
    let update = next_frame(&mut socket).await;
    assert_eq!(update["type"], "data:updated");
    assert_eq!(update["data"]["summary"]["passed"], 1);

    socket
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let pong = next_frame(&mut socket).await;
    assert_eq!(pong["type"], "pong");

    socket.close(None).await.unwrap();
    for _ in 0..50 {
        if context.hub.viewer_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(context.hub.viewer_count(), 0);

    coordinator.trigger();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
