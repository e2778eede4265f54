//! HTTP API tests against an in-memory inventory and a scripted executor

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keel::app::options::AppOptions;
use keel::app::state::AppState;
use keel::remote::RecordingExecutor;
use keel::server::serve::router;
use keel::storage::inventory::{Inventory, JsonInventory};

const STORE: &str = r#"{"letsencrypt": {"Certificates": [{"domain": {"main": "shop.example.com", "sans": []}}]}}"#;

fn deployment_json() -> String {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "kube-app"},
        "spec": {
            "replicas": 3,
            "selector": {"matchLabels": {"app": "kube-app"}},
            "template": {"spec": {"containers": [{"name": "kube-app"}]}}
        },
        "status": {"readyReplicas": 3, "availableReplicas": 3, "replicas": 3}
    })
    .to_string()
}

fn inventory(webhook_url: Option<&str>) -> Arc<JsonInventory> {
    Arc::new(JsonInventory::in_memory(json!({
        "servers": [
            {"uuid": "docker-srv", "name": "docker", "ip": "10.0.0.1",
             "settings": {"webhook_enabled": webhook_url.is_some(), "webhook_url": webhook_url,
                          "webhook_secret": "hook-secret"}},
            {"uuid": "kube-srv", "name": "kube", "ip": "10.0.0.2",
             "settings": {"orchestrator": "kubernetes", "kubernetes_namespace": "apps"}}
        ],
        "applications": [
            {"id": 1, "uuid": "docker-app", "name": "shop", "image": "shop:1",
             "server_uuid": "docker-srv", "fqdn": "https://shop.example.com"},
            {"id": 2, "uuid": "kube-app", "name": "api", "image": "api:1",
             "server_uuid": "kube-srv"}
        ]
    })))
}

fn state(executor: RecordingExecutor, inventory: Arc<JsonInventory>) -> (Arc<AppState>, AppOptions) {
    let options = AppOptions::default();
    let state = AppState::with_parts(&options, Arc::new(executor), inventory);
    (Arc::new(state), options)
}

async fn call(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (state, options) = state(RecordingExecutor::new(), inventory(None));
    let app = router(Arc::new(state.server_state(&options)));

    let (status, body) = call(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "keel");
}

#[tokio::test]
async fn test_kubernetes_status() {
    let executor = RecordingExecutor::new().respond("kubectl get deployment kube-app -n apps -o json", &deployment_json());
    let (state, options) = state(executor, inventory(None));
    let app = router(Arc::new(state.server_state(&options)));

    let (status, body) = call(app, "GET", "/applications/kube-app/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orchestrator"], "kubernetes");
    assert_eq!(body["status"]["status"], "running");
    assert_eq!(body["status"]["running"], 3);
}

#[tokio::test]
async fn test_unknown_application_is_404() {
    let (state, options) = state(RecordingExecutor::new(), inventory(None));
    let app = router(Arc::new(state.server_state(&options)));

    let (status, _) = call(app, "GET", "/applications/missing/resources", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scale_validation() {
    let (state, options) = state(RecordingExecutor::new(), inventory(None));
    let server_state = Arc::new(state.server_state(&options));

    let (status, body) = call(
        router(server_state.clone()),
        "POST",
        "/applications/kube-app/scale",
        Some(json!({"replicas": "many"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Valid replicas count is required.");

    let (status, _) = call(
        router(server_state.clone()),
        "POST",
        "/applications/missing/scale",
        Some(json!({"replicas": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        router(server_state),
        "POST",
        "/applications/docker-app/scale",
        Some(json!({"replicas": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("standalone"));
}

#[tokio::test]
async fn test_scale_kubernetes_persists_replicas() {
    let executor = RecordingExecutor::new();
    let inventory = inventory(None);
    let (state, options) = state(executor, inventory.clone());
    let app = router(Arc::new(state.server_state(&options)));

    let (status, body) = call(app, "POST", "/applications/kube-app/scale", Some(json!({"replicas": 4}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replicas"], 4);
    assert_eq!(body["orchestrator"], "kubernetes");

    let app = inventory.application("kube-app").await.unwrap();
    assert_eq!(app.kubernetes.replicas, 4);
}

#[tokio::test]
async fn test_scale_failure_is_500() {
    let executor = RecordingExecutor::new().fail("kubectl scale", "error: deployments.apps \"kube-app\" not found");
    let (state, options) = state(executor, inventory(None));
    let app = router(Arc::new(state.server_state(&options)));

    let (status, body) = call(app, "POST", "/applications/kube-app/scale", Some(json!({"replicas": 2}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"].as_str().unwrap().contains("kube-app"));
}

#[tokio::test]
async fn test_dns_provider_catalogue() {
    let (state, options) = state(RecordingExecutor::new(), inventory(None));
    let server_state = Arc::new(state.server_state(&options));

    let (status, body) = call(router(server_state.clone()), "GET", "/dns/providers", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["providers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    assert_eq!(names, vec!["cloudflare", "route53", "digitalocean"]);

    let (status, body) = call(router(server_state.clone()), "GET", "/dns/providers/Route53/fields", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fields"]["access_key_id"]["required"], true);
    assert_eq!(body["fields"]["region"]["default"], "us-east-1");

    let (status, _) = call(router(server_state.clone()), "GET", "/dns/providers/bogus/fields", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        router(server_state),
        "POST",
        "/dns/providers/bogus/validate",
        Some(json!({"credentials": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["kind"], "unsupported_provider");
    assert!(body["message"].as_str().unwrap().contains("bogus"));
}

#[tokio::test]
async fn test_certificate_provisioning_end_to_end() {
    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"event": "domain.provisioning.started"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hooks)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "event": "domain.provisioning.completed",
            "data": {"domains": ["shop.example.com"], "certificate_type": "http-01"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hooks)
        .await;

    let executor = RecordingExecutor::new().respond("acme.json", STORE);
    let (state, options) = state(executor, inventory(Some(&hooks.uri())));
    let app = router(Arc::new(state.server_state(&options)));

    let (status, body) = call(app, "POST", "/applications/docker-app/certificates", Some(json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["domains"], json!(["shop.example.com"]));
    assert_eq!(body["certificate_type"], "http-01");
    assert!(state.scheduler.contains("docker-app").await);

    assert_eq!(state.scheduler.run_due(Utc::now()).await, 1);
    assert!(state.scheduler.is_empty().await);

    // signatures verify against the body without its signature field
    let requests = hooks.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in requests {
        let mut payload: Value = serde_json::from_slice(&request.body).unwrap();
        let signature = payload["signature"].as_str().unwrap().to_string();
        payload.as_object_mut().unwrap().remove("signature");
        let typed: webhook_payload::WebhookPayload = serde_json::from_value(payload).unwrap();
        let unsigned = serde_json::to_vec(&typed).unwrap();
        assert_eq!(signature, keel::events::sign(&unsigned, b"hook-secret"));
    }
}

#[tokio::test]
async fn test_certificate_cancel() {
    let (state, options) = state(RecordingExecutor::new(), inventory(None));
    let server_state = Arc::new(state.server_state(&options));

    let (status, _) = call(
        router(server_state.clone()),
        "POST",
        "/applications/docker-app/certificates",
        Some(json!({"domains": ["shop.example.com"], "certificate_type": "dns-01"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = call(router(server_state.clone()), "DELETE", "/applications/docker-app/certificates", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.scheduler.is_empty().await);

    let (status, _) = call(router(server_state), "DELETE", "/applications/docker-app/certificates", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_certificate_request_validation() {
    let (state, options) = state(RecordingExecutor::new(), inventory(None));
    let server_state = Arc::new(state.server_state(&options));

    let (status, _) = call(
        router(server_state.clone()),
        "POST",
        "/applications/kube-app/certificates",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        router(server_state),
        "POST",
        "/applications/docker-app/certificates",
        Some(json!({"certificate_type": "tls-alpn-01"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(state.scheduler.is_empty().await);
}

#[tokio::test]
async fn test_options_webhook_timeout_default() {
    assert_eq!(AppOptions::default().webhook_timeout, Duration::from_secs(10));
}
