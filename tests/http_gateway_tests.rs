use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use echo_client::error::AppError;
use echo_client::gateway::{HttpGateway, LoginRequest, RegisterRequest, SessionGateway};
use echo_client::identity::{OpOutcome, SessionStore};
use echo_client::realtime::NullChannel;
use echo_client::storage::{DurableStorage, MemoryStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Minimal stand-in for the session backend. Only `valid` is accepted as a bearer.
struct FakeBackend {
    valid: Mutex<String>,
    last_prefs: Mutex<Option<Value>>,
}

type Shared = Arc<FakeBackend>;

fn user_json() -> Value {
    json!({"id": 1, "username": "alice", "first_name": "Alice", "email": "alice@example.org", "role": {"role_type": "student", "name": "Student"}})
}

fn authorized(st: &FakeBackend, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", st.valid.lock().as_str());
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(expected.as_str())
}

async fn login(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] == "secret" {
        (StatusCode::OK, Json(json!({
            "success": true,
            "message": "Login successful",
            "data": {"user": user_json()},
            "token": "abc",
            "refresh": "def"
        })))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid credentials"})))
    }
}

async fn register(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["username"] == "taken" {
        (StatusCode::BAD_REQUEST, Json(json!({"error": "Username already exists"})))
    } else {
        (StatusCode::CREATED, Json(json!({"success": true})))
    }
}

async fn forgot_password() -> StatusCode { StatusCode::OK }

async fn current_user(State(st): State<Shared>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if authorized(&st, &headers) {
        (StatusCode::OK, Json(json!({"success": true, "data": user_json()})))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Could not validate credentials"})))
    }
}

async fn refresh(State(st): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["refresh_token"] == "def" {
        (StatusCode::OK, Json(json!({"access_token": st.valid.lock().clone()})))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid refresh token"})))
    }
}

async fn update_preferences(State(st): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if !authorized(&st, &headers) {
        return (StatusCode::FORBIDDEN, Json(json!({"detail": "Not authenticated"})));
    }
    *st.last_prefs.lock() = Some(body.clone());
    (StatusCode::OK, Json(json!({"success": true, "data": body})))
}

async fn notifications(State(st): State<Shared>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&st, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Not authenticated"})));
    }
    (StatusCode::OK, Json(json!([
        {"id": 1, "message": "Quiz graded", "read": false},
        {"id": 2, "message": "Welcome", "read": true}
    ])))
}

async fn start_backend() -> (Shared, String) {
    let st: Shared = Arc::new(FakeBackend { valid: Mutex::new("abc".to_string()), last_prefs: Mutex::new(None) });
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/forgot-password/", post(forgot_password))
        .route("/api/auth/user", get(current_user))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/preferences/update/", patch(update_preferences))
        .route("/api/notifications", get(notifications))
        .with_state(st.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (st, format!("http://{}/api", addr))
}

fn gateway(base: &str) -> HttpGateway {
    HttpGateway::new(base, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn login_normalizes_nested_user_and_maps_bad_credentials() {
    let (_st, base) = start_backend().await;
    let gw = gateway(&base);

    let ok = gw.login(&LoginRequest { username: "alice".into(), password: "secret".into(), role: Some("student".into()) }).await.unwrap();
    assert_eq!(ok.user.id, 1);
    assert_eq!(ok.user.resolved_role(), Some("student"));
    assert_eq!(ok.token.as_deref(), Some("abc"));
    assert_eq!(ok.refresh.as_deref(), Some("def"));

    let err = gw.login(&LoginRequest { username: "alice".into(), password: "nope".into(), role: None }).await.unwrap_err();
    assert_eq!(err, AppError::rejected("http_401", "Invalid credentials"));
}

#[tokio::test]
async fn register_reports_backend_error_text() {
    let (_st, base) = start_backend().await;
    let gw = gateway(&base);
    let mut req = RegisterRequest { username: "bob".into(), email: "bob@example.org".into(), password: "pw".into(), ..Default::default() };
    assert!(gw.register(&req).await.is_ok());
    req.username = "taken".into();
    assert_eq!(gw.register(&req).await.unwrap_err().message(), "Username already exists");
}

#[tokio::test]
async fn empty_success_body_is_null() {
    let (_st, base) = start_backend().await;
    assert_eq!(gateway(&base).forgot_password("alice@example.org").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn bearer_endpoints_classify_refusals_as_unauthorized() {
    let (_st, base) = start_backend().await;
    let gw = gateway(&base);
    let user = gw.current_user(Some("abc".into())).await.unwrap();
    assert_eq!(user.username, "alice");

    let err = gw.current_user(Some("stale".into())).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(gw.notifications(None).await.unwrap_err().is_unauthorized());
    assert_eq!(gw.notifications(Some("abc".into())).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = gateway(&format!("http://{}", addr)).forgot_password("a@b.c").await.unwrap_err();
    assert!(matches!(err, AppError::Transport { .. }), "got {:?}", err);
}

#[tokio::test]
async fn store_over_http_refreshes_an_expired_token() {
    let (st, base) = start_backend().await;
    let storage = MemoryStorage::new();
    let store = SessionStore::new(gateway(&base), storage.clone(), NullChannel);
    store.initialize();

    assert_eq!(store.login("alice", "wrong", None).await, OpOutcome::failed("Invalid credentials"));
    assert_eq!(store.login("alice", "secret", Some("student")).await, OpOutcome::ok());
    assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("abc"));
    assert!(store.revalidate().await.success);

    // The backend rotates its key; the next authorized call must refresh and retry.
    *st.valid.lock() = "abc2".to_string();
    let out = store.update_preferences(&json!({"theme": "dark", "notifications": true})).await;
    assert_eq!(out, OpOutcome::ok());
    assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("abc2"));
    assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("def"));
    assert_eq!(st.last_prefs.lock().clone(), Some(json!({"theme": "dark", "notifications": true})));
    assert_eq!(store.identity().unwrap().preferences.unwrap().theme.as_deref(), Some("dark"));
    assert_eq!(store.unread_count().await.unwrap(), 1);
}
