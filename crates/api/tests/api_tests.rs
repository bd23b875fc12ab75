use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use coordinator_api::{create_app, DEFAULT_METRICS_ENDPOINT, JOB_HEADER, USER_ID_HEADER};
use coordinator_config::{ApiConfig, BrokerConfig, EngineConfig};
use coordinator_domain::clock::SystemClock;
use coordinator_engine::{EngineContainer, EngineDeps};
use coordinator_infrastructure::MetricsCollector;
use coordinator_testing_utils::{
    MockDispatchRepository, MockSettingsRepository, MockUnitRepository, RecordingMessageBus,
    UnitBuilder,
};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    units: MockUnitRepository,
    container: EngineContainer,
    _shutdown: broadcast::Sender<()>,
}

fn test_app(with_metrics: bool) -> TestApp {
    let units = MockUnitRepository::new();
    let (shutdown, _) = broadcast::channel(4);
    let deps = EngineDeps {
        dispatches: Arc::new(MockDispatchRepository::new()),
        units: Arc::new(units.clone()),
        settings: Arc::new(MockSettingsRepository::new()),
        bus: Arc::new(RecordingMessageBus::new()),
        clock: Arc::new(SystemClock),
        metrics: Arc::new(MetricsCollector::new()),
    };
    let container = EngineContainer::build(
        deps,
        &EngineConfig::default(),
        &BrokerConfig::default(),
        "centrum",
        shutdown.clone(),
    );
    let metrics = with_metrics.then(|| PrometheusBuilder::new().build_recorder().handle());
    let router = create_app(
        container.service.clone(),
        metrics,
        &ApiConfig::default(),
        DEFAULT_METRICS_ENDPOINT,
    );

    TestApp {
        router,
        units,
        container,
        _shutdown: shutdown,
    }
}

fn post(uri: &str, user_id: i32, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(JOB_HEADER, "ambulance")
        .header(USER_ID_HEADER, user_id.to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, user_id: i32) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(JOB_HEADER, "ambulance")
        .header(USER_ID_HEADER, user_id.to_string())
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app(false);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["metrics_enabled"], false);
}

#[tokio::test]
async fn test_requests_without_identity_are_rejected() {
    let app = test_app(false);
    let request = Request::builder()
        .method("POST")
        .uri("/api/dispatches/list")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["type"], "MISSING_IDENTITY");
}

#[tokio::test]
async fn test_job_that_breaks_bus_subjects_is_rejected() {
    let app = test_app(false);
    let request = Request::builder()
        .method("POST")
        .uri("/api/dispatches")
        .header("content-type", "application/json")
        .header(JOB_HEADER, "fire.dept")
        .header(USER_ID_HEADER, "1")
        .body(Body::from(
            json!({ "message": "Sturz", "x": 1.0, "y": 2.0 }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");
    let (_, listed) = send(&app, post("/api/dispatches/list", 1, json!({}))).await;
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_create_and_list_dispatches() {
    let app = test_app(false);
    let (status, body) = send(
        &app,
        post(
            "/api/dispatches",
            1,
            json!({ "message": "Sturz im Treppenhaus", "x": 12.5, "y": -3.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_u64().unwrap();
    assert_eq!(body["data"]["status"]["status"], "NEW");

    let (status, body) = send(&app, post("/api/dispatches/list", 1, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"].as_u64(), Some(id));
}

#[tokio::test]
async fn test_error_mapping() {
    let app = test_app(false);

    let (status, body) = send(
        &app,
        post(
            "/api/dispatches/assign",
            1,
            json!({ "dispatch_id": 99, "to_add": [1] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "DISPATCH_NOT_FOUND");

    let (status, body) = send(
        &app,
        post(
            "/api/dispatches/take",
            7,
            json!({ "dispatch_ids": [1], "response": "ACCEPTED" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);
}

#[tokio::test]
async fn test_unit_status_requires_membership() {
    let app = test_app(false);
    app.units
        .insert(UnitBuilder::new().with_id(3).with_user(10).build());

    let request = json!({ "unit_id": 3, "status": "ON_BREAK" });
    let (status, body) = send(&app, post("/api/units/status", 11, request.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "NOT_PART_OF_UNIT");

    let (status, body) = send(&app, post("/api/units/status", 10, request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"]["status"], "ON_BREAK");
}

#[tokio::test]
async fn test_settings_and_take_control() {
    let app = test_app(false);

    let (status, body) = send(
        &app,
        post(
            "/api/settings",
            1,
            json!({ "enabled": true, "mode": "CENTRAL_COMMAND" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mode"], "CENTRAL_COMMAND");

    let (status, body) = send(&app, get("/api/settings", 2)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);

    let (status, body) = send(
        &app,
        post("/api/settings/take-control", 5, json!({ "signon": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user_ids"], json!([5]));

    let (status, _) = send(
        &app,
        post("/api/settings", 1, json!({ "enabled": true, "mode": "UNSPECIFIED" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let disabled = test_app(false);
    let (status, _) = send(&disabled, get("/metrics", 1)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let enabled = test_app(true);
    let response = enabled
        .router
        .clone()
        .oneshot(get("/metrics", 1))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stream_sends_snapshot_first() {
    let app = test_app(false);
    let response = app
        .router
        .clone()
        .oneshot(get("/api/stream", 1))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&first);
    assert!(text.contains("event: snapshot"));
    assert_eq!(app.container.service.stream_clients("ambulance"), 1);
}
