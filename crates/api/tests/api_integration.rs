//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::routes::sagas::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_store::{
    EventEnvelope, EventId, InMemoryEventStore, InMemoryPersistentStore, SagaId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryTransport, Method, SagaCoordinator, SagaEvent};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

type TestState = AppState<
    InMemoryEventStore<SagaEvent>,
    InMemoryPersistentStore<SagaEvent>,
    InMemoryTransport,
>;

struct TestApp {
    app: axum::Router,
    state: Arc<TestState>,
    durable: InMemoryPersistentStore<SagaEvent>,
    transport: InMemoryTransport,
}

fn setup() -> TestApp {
    let durable = InMemoryPersistentStore::new();
    let transport = InMemoryTransport::new();
    let coordinator =
        SagaCoordinator::new(InMemoryEventStore::new(), durable.clone(), transport.clone());
    let state = Arc::new(AppState::new(coordinator));
    let app = api::create_app(state.clone(), get_metrics_handle());

    TestApp {
        app,
        state,
        durable,
        transport,
    }
}

const DEFINITION: &str = r#"[
    {
        "id": "request-1",
        "serviceName": "aaa",
        "transaction": {"method": "post", "path": "/rest/as"},
        "compensation": {"method": "delete", "path": "/rest/as"}
    },
    {
        "id": "request-2",
        "serviceName": "bbb",
        "transaction": {"method": "put", "path": "/rest/bs"},
        "compensation": {"method": "delete", "path": "/rest/bs"}
    }
]"#;

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_saga(definition: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/sagas")
        .header("content-type", "application/json")
        .body(Body::from(definition.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let t = setup();

    let (status, json) = send(&t.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "saga-coordinator");
}

#[tokio::test]
async fn test_run_saga() {
    let t = setup();

    let (status, json) = send(&t.app, post_saga(DEFINITION)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert!(json["saga_id"].as_str().unwrap().parse::<SagaId>().is_ok());
    assert_eq!(t.transport.call_count().await, 2);
}

#[tokio::test]
async fn test_aborted_saga_returns_conflict() {
    let t = setup();
    t.transport.fail_on("bbb", Method::Put, "/rest/bs").await;
    t.transport.fail_on("aaa", Method::Delete, "/rest/as").await;

    let (status, json) = send(&t.app, post_saga(DEFINITION)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], "aborted");
    assert_eq!(json["failed_request"], "request-2");
    assert_eq!(json["compensation_failures"], serde_json::json!(["request-1"]));
}

#[tokio::test]
async fn test_invalid_definition_returns_bad_request() {
    let t = setup();

    let (status, json) = send(&t.app, post_saga(r#"[{"id": "x"}]"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Invalid saga definition"));
    assert_eq!(t.transport.call_count().await, 0);
}

#[tokio::test]
async fn test_get_saga_status() {
    let t = setup();
    let (_, created) = send(&t.app, post_saga(DEFINITION)).await;
    let saga_id = created["saga_id"].as_str().unwrap();

    let (status, json) = send(&t.app, get(&format!("/sagas/{saga_id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saga_id"], saga_id);
    assert_eq!(json["state"], "Completed");
    assert_eq!(json["last_event_id"], 6);
    assert_eq!(
        json["completed_requests"],
        serde_json::json!(["request-1", "request-2"])
    );
    assert_eq!(json["compensated_requests"], serde_json::json!([]));
}

#[tokio::test]
async fn test_get_unknown_saga_returns_not_found() {
    let t = setup();

    let (status, _) = send(&t.app, get(&format!("/sagas/{}", SagaId::new()))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_saga_with_invalid_id() {
    let t = setup();

    let (status, json) = send(&t.app, get("/sagas/not-a-uuid")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Invalid ID format"));
}

#[tokio::test]
async fn test_saga_events() {
    let t = setup();
    let (_, created) = send(&t.app, post_saga(DEFINITION)).await;
    let saga_id = created["saga_id"].as_str().unwrap();

    let (status, json) = send(&t.app, get(&format!("/sagas/{saga_id}/events"))).await;

    assert_eq!(status, StatusCode::OK);
    let events = json.as_array().unwrap();
    let summary: Vec<_> = events
        .iter()
        .map(|e| {
            (
                e["event_id"].as_i64().unwrap(),
                e["event_type"].as_str().unwrap(),
                e["request_id"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, "SagaStarted", "saga-start"),
            (2, "TransactionStarted", "request-1"),
            (3, "TransactionEnded", "request-1"),
            (4, "TransactionStarted", "request-2"),
            (5, "TransactionEnded", "request-2"),
            (6, "SagaEnded", "saga-end"),
        ]
    );
    assert_eq!(events[0]["payload"]["type"], "SagaStarted");
    assert_eq!(events[0]["saga_id"], saga_id);
}

#[tokio::test]
async fn test_list_all_events() {
    let t = setup();
    send(&t.app, post_saga(DEFINITION)).await;
    send(&t.app, post_saga("[]")).await;

    let (status, json) = send(&t.app, get("/events")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn test_reanimated_saga_is_visible() {
    let t = setup();
    let saga_id = SagaId::new();
    t.durable
        .seed([EventEnvelope::new(
            EventId::first(),
            saga_id,
            SagaEvent::saga_started(DEFINITION),
        )])
        .await;

    let outcomes = t.state.coordinator.reanimate().await.unwrap();
    assert!(outcomes[0].result.is_ok());

    let (status, json) = send(&t.app, get(&format!("/sagas/{saga_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Completed");
    assert_eq!(t.transport.call_count().await, 2);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup();
    send(&t.app, post_saga("[]")).await;

    let response = t.app.clone().oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}
