//! End-to-end tests for the provisioning API routes

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use tsp_api::{AppState, router};
use tsp_core::credential::{EncryptedCredentialStore, MemoryBackend};
use tsp_core::provisioner::RetryPolicy;
use tsp_core::{CredentialCipher, MockAuthProvider, Provisioner, ProvisionerSettings};

const KEY: &str = "test-key";
const PHONE: &str = "+15550001111";

fn app(provider: MockAuthProvider) -> Router {
    let store = Arc::new(EncryptedCredentialStore::new(
        Arc::new(MemoryBackend::new()),
        CredentialCipher::new(&[7u8; 32]).unwrap(),
    ));
    let settings = ProvisionerSettings {
        retry: RetryPolicy {
            max_retries: 1,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..ProvisionerSettings::default()
    };
    let provisioner = Arc::new(Provisioner::new(Arc::new(provider), store.clone(), settings));

    router(AppState {
        provisioner,
        store,
        api_key: Some(KEY.to_string()),
    })
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", KEY);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn start(app: &Router, identity: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/sessions/start",
        Some(json!({"user_identity": identity, "phone_number": PHONE})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["request_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let app = app(MockAuthProvider::new("12345"));
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_requests"], 0);
}

#[tokio::test]
async fn test_missing_key_is_unauthorized() {
    let app = app(MockAuthProvider::new("12345"));
    let request = Request::post("/sessions/start")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"user_identity": "u1", "phone_number": PHONE}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_code_flow_issues_credential() {
    let app = app(MockAuthProvider::new("12345"));
    let id = start(&app, "u1").await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/sessions/{id}/code"),
        Some(json!({"code": "12345"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "completed");

    let (status, body) = call(&app, Method::GET, &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "completed");
    assert_eq!(body["user_identity"], "u1");

    let (status, body) = call(&app, Method::GET, "/credentials", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["user_identity"], "u1");
    assert!(body[0].get("session_blob").is_none());

    let (status, body) = call(&app, Method::GET, "/credentials/u1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phone_number"], PHONE);
    assert!(!body["session_blob"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_two_factor_flow() {
    let app = app(MockAuthProvider::new("12345").with_password("hunter2", Some("pets")));
    let id = start(&app, "u2").await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/sessions/{id}/code"),
        Some(json!({"code": "12345"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "awaiting_password");
    assert_eq!(body["password_hint"], "pets");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/sessions/{id}/password"),
        Some(json!({"password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "InvalidPassword");
    assert_eq!(body["state"], "awaiting_password");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/sessions/{id}/password"),
        Some(json!({"password": "hunter2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "completed");
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let app = app(MockAuthProvider::new("12345"));
    start(&app, "u1").await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/sessions/start",
        Some(json!({"user_identity": "u1", "phone_number": PHONE})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "conflict");
    assert_eq!(body["error"]["code"], "AlreadyInProgress");
}

#[tokio::test]
async fn test_invalid_phone_is_unprocessable() {
    let app = app(MockAuthProvider::new("12345"));
    let (status, body) = call(
        &app,
        Method::POST,
        "/sessions/start",
        Some(json!({"user_identity": "u1", "phone_number": "not a phone"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "invalid_input");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = app(MockAuthProvider::new("12345"));
    let (status, body) = call(
        &app,
        Method::POST,
        "/sessions/start",
        Some(json!({"user_identity": "u1"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "InvalidRequest");
}

#[tokio::test]
async fn test_wrong_codes_exhaust_attempts() {
    let app = app(MockAuthProvider::new("12345"));
    let id = start(&app, "u1").await;
    let uri = format!("/sessions/{id}/code");

    let (status, body) = call(&app, Method::POST, &uri, Some(json!({"code": "00000"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "InvalidCode");

    call(&app, Method::POST, &uri, Some(json!({"code": "00000"}))).await;
    let (_, body) = call(&app, Method::POST, &uri, Some(json!({"code": "00000"}))).await;
    assert_eq!(body["state"], "failed");

    let (status, body) = call(&app, Method::POST, &uri, Some(json!({"code": "12345"}))).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["code"], "RequestClosed");

    // The identity is free again
    start(&app, "u1").await;
}

#[tokio::test]
async fn test_password_before_code_is_wrong_step() {
    let app = app(MockAuthProvider::new("12345"));
    let id = start(&app, "u1").await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/sessions/{id}/password"),
        Some(json!({"password": "hunter2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "WrongStep");
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let app = app(MockAuthProvider::new("12345"));

    let (status, _) = call(&app, Method::GET, "/sessions/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &app,
        Method::POST,
        "/sessions/00000000-0000-4000-8000-000000000000/code",
        Some(json!({"code": "12345"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn test_cancel_closes_request() {
    let app = app(MockAuthProvider::new("12345"));
    let id = start(&app, "u1").await;

    let (status, body) = call(&app, Method::DELETE, &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");

    let (status, _) = call(&app, Method::DELETE, &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_provider_outage_is_unavailable() {
    let provider = MockAuthProvider::new("12345");
    provider.fail_next(5);
    let app = app(provider);

    let (status, body) = call(
        &app,
        Method::POST,
        "/sessions/start",
        Some(json!({"user_identity": "u1", "phone_number": PHONE})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "provider_transient");
}

#[tokio::test]
async fn test_unregistered_phone_is_bad_gateway() {
    let app = app(MockAuthProvider::new("12345").unregistered_phone(PHONE));
    let id = start(&app, "u1").await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/sessions/{id}/code"),
        Some(json!({"code": "12345"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "provider_permanent");
    assert_eq!(body["state"], "failed");
}

#[tokio::test]
async fn test_delete_credential_is_idempotent() {
    let app = app(MockAuthProvider::new("12345"));
    let id = start(&app, "u1").await;
    call(
        &app,
        Method::POST,
        &format!("/sessions/{id}/code"),
        Some(json!({"code": "12345"})),
    )
    .await;

    let (status, _) = call(&app, Method::DELETE, "/credentials/u1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::DELETE, "/credentials/u1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, Method::GET, "/credentials/u1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "CredentialNotFound");
}
