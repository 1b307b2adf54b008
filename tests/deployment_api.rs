//! `POST /deployment` 端到端测试
//!
//! 使用内存资源存储和 wiremock 提供的签名密钥集驱动完整路由。

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use deploy_gate::api;
use deploy_gate::config::EnvConfig;
use deploy_gate::domain::{DynamicObject, WatchEvent, WatchEventType};
use deploy_gate::infra::memory::{AfterScript, MemoryStore, WatchScript};
use deploy_gate::state::AppState;

const SECRET: &[u8] = b"deploy-gate-test-signing-secret";
const KID: &str = "test-key";
const APP_NAME: &str = "core-demo-api-aks-dev";
const IMAGE: &str = "registry.io/demo-api:dev@sha256:1";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("deploy_gate=debug")
        .with_test_writer()
        .try_init();
}

fn config(vars: &[(&str, &str)]) -> EnvConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvConfig::from_lookup(|key| vars.get(key).cloned())
}

fn local_app(store: Arc<MemoryStore>) -> Router {
    api::router(Arc::new(
        AppState::new(config(&[("LOCAL", "true")]), store).unwrap(),
    ))
}

async fn authenticated_app(server: &MockServer, store: Arc<MemoryStore>) -> Router {
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [{ "kty": "oct", "kid": KID, "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(SECRET) }]
        })))
        .mount(server)
        .await;

    let jwks_url = format!("{}/.well-known/jwks", server.uri());
    let config = config(&[
        ("OIDC_JWKS_URL", jwks_url.as_str()),
        ("OIDC_ALGORITHMS", "HS256"),
    ]);
    api::router(Arc::new(AppState::new(config, store).unwrap()))
}

fn token(owner: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "iss": "https://token.actions.githubusercontent.com",
        "aud": "https://github.com/3lvia",
        "exp": now + 300,
        "iat": now - 5,
        "repository_owner": owner,
        "repository": format!("{}/core-demo-api", owner)
    });
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(KID.to_string());
    encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn deployment_body() -> String {
    json!({
        "application_name": "demo-api",
        "system": "core",
        "cluster_type": "aks",
        "environment": "dev",
        "image": "registry.io/demo-api@sha256:1"
    })
    .to_string()
}

fn application(sync: &str, health: &str) -> DynamicObject {
    cluster_application(APP_NAME, "aks", sync, health)
}

fn cluster_application(name: &str, cluster_type: &str, sync: &str, health: &str) -> DynamicObject {
    DynamicObject::new(json!({
        "metadata": {
            "name": name,
            "labels": {
                "elvia.no/system": "core",
                "elvia.no/application": "demo-api",
                "kubernetes.io/environment": "dev",
                "elvia.no/cluster-type": cluster_type
            }
        },
        "status": {
            "sync": { "status": sync },
            "health": { "status": health },
            "summary": { "images": [IMAGE] }
        }
    }))
}

async fn converging_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert("argocd", application("Synced", "Healthy")).await;
    store
        .script(
            APP_NAME,
            WatchScript::new(
                vec![
                    WatchEvent::new(WatchEventType::Modified, application("OutOfSync", "Healthy")),
                    WatchEvent::new(WatchEventType::Modified, application("Synced", "Progressing")),
                    WatchEvent::new(WatchEventType::Modified, application("Synced", "Healthy")),
                ],
                AfterScript::Hang,
            ),
        )
        .await;
    store
}

fn post(body: String, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/deployment")
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_status_endpoint() {
    let app = local_app(Arc::new(MemoryStore::new()));
    let request = Request::builder().uri("/status").body(Body::empty()).unwrap();

    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "OK" }));
}

#[tokio::test]
async fn test_health_reports_mode() {
    let app = local_app(Arc::new(MemoryStore::new()));
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auth_required"], json!(false));
    assert_eq!(body["namespace"], json!("argocd"));
    assert_eq!(body["convergence_mode"], json!("out-of-sync"));
}

#[tokio::test]
async fn test_missing_token_is_rejected_before_body() {
    init_tracing();
    let server = MockServer::start().await;
    let app = authenticated_app(&server, Arc::new(MemoryStore::new())).await;

    let (status, body) = send(app, post("{not json".to_string(), &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "X-GitHub-OIDC-Token header is required" }));
}

#[tokio::test]
async fn test_invalid_token_is_forbidden() {
    let server = MockServer::start().await;
    let app = authenticated_app(&server, converging_store().await).await;

    let oidc_token = token("someone-else");

    let (status, body) = send(
        app,
        post(deployment_body(), &[("X-GitHub-OIDC-Token", oidc_token.as_str())]),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().starts_with("invalid token: "));
}

#[tokio::test]
async fn test_unknown_application_is_internal_error() {
    let server = MockServer::start().await;
    let app = authenticated_app(&server, Arc::new(MemoryStore::new())).await;

    let oidc_token = token("3lvia");

    let (status, body) = send(
        app,
        post(deployment_body(), &[("X-GitHub-OIDC-Token", oidc_token.as_str())]),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("application not found"));
}

#[tokio::test]
async fn test_successful_deployment() {
    init_tracing();
    let server = MockServer::start().await;
    let store = converging_store().await;
    let app = authenticated_app(&server, store.clone()).await;

    let oidc_token = token("3lvia");

    let (status, body) = send(
        app,
        post(deployment_body(), &[("X-GitHub-OIDC-Token", oidc_token.as_str())]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Application successfully deployed!" }));
    assert_eq!(store.open_watches(), 0);
}

#[tokio::test]
async fn test_invalid_deployment_in_local_mode() {
    let app = local_app(Arc::new(MemoryStore::new()));
    let body = json!({
        "application_name": "demo-api",
        "cluster_type": "aks",
        "environment": "dev",
        "image": "registry.io/demo-api@sha256:1"
    })
    .to_string();

    let (status, body) = send(app, post(body, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "invalid deployment: system is required" }));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_header_bounds_the_watch() {
    let store = Arc::new(MemoryStore::new());
    store.insert("argocd", application("Synced", "Healthy")).await;
    let app = local_app(store.clone());

    let (status, body) = send(app, post(deployment_body(), &[("X-Timeout", "2s")])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({
            "error": format!("failed to watch {}: timed out waiting for application lifecycle", APP_NAME)
        })
    );
    assert_eq!(store.open_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_check_all_clusters_reports_every_failed_target() {
    let store = Arc::new(MemoryStore::new());
    let gke = "core-demo-api-gke-dev";
    let onprem = "core-demo-api-onprem-dev";

    // aks 收敛，gke 的监视被提前关闭，onprem 始终不变直到超时
    for (name, cluster_type) in [(APP_NAME, "aks"), (gke, "gke"), (onprem, "onprem")] {
        store
            .insert("argocd", cluster_application(name, cluster_type, "Synced", "Healthy"))
            .await;
    }
    store
        .script(
            APP_NAME,
            WatchScript::new(
                vec![
                    WatchEvent::new(
                        WatchEventType::Modified,
                        cluster_application(APP_NAME, "aks", "OutOfSync", "Healthy"),
                    ),
                    WatchEvent::new(
                        WatchEventType::Modified,
                        cluster_application(APP_NAME, "aks", "Synced", "Healthy"),
                    ),
                ],
                AfterScript::Hang,
            ),
        )
        .await;
    store
        .script(gke, WatchScript::new(vec![], AfterScript::Close))
        .await;

    let body = json!({
        "application_name": "demo-api",
        "system": "core",
        "cluster_type": "aks",
        "environment": "dev",
        "image": "registry.io/demo-api@sha256:1",
        "check_all_clusters": true
    })
    .to_string();

    let app = local_app(store.clone());
    let (status, body) = send(app, post(body, &[("X-Timeout", "30s")])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({
            "error": format!(
                "failed to watch {}: watch closed unexpectedly; failed to watch {}: timed out waiting for application lifecycle",
                gke, onprem
            )
        })
    );
    assert_eq!(store.open_watches(), 0);
}

#[tokio::test]
async fn test_dropped_request_cancels_watches() {
    let store = Arc::new(MemoryStore::new());
    store.insert("argocd", application("Synced", "Healthy")).await;
    let app = local_app(store.clone());

    let request = tokio::spawn(app.oneshot(post(deployment_body(), &[])));

    let mut opened = false;
    for _ in 0..200 {
        if store.open_watches() == 1 {
            opened = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(opened, "watch was never opened");

    // 客户端断开时 handler future 被 drop
    request.abort();
    let _ = request.await;

    let mut released = false;
    for _ in 0..200 {
        if store.open_watches() == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "watch was not released after the request was dropped");
}

#[tokio::test(start_paused = true)]
async fn test_metrics_endpoint_reports_requests_and_outcomes() {
    let store = converging_store().await;
    let app = local_app(store);

    let (status, _) = send(app.clone(), post(deployment_body(), &[])).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; version=0.0.4; charset=utf-8"
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(
        r#"deploy_gate_http_requests_total{method="POST",route="/deployment",status="200"} 1"#
    ));
    assert!(text.contains(r#"deploy_gate_watch_outcomes_total{outcome="converged"} 1"#));
    assert!(text.contains(r#"deploy_gate_deployments_total{result="success"} 1"#));
}
