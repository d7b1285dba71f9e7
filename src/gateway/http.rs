use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{LoginGrant, LoginRequest, Notification, PasswordChange, RegisterRequest, SessionGateway, TokenPair};
use crate::config::ClientConfig;
use crate::error::{invalid_url, AppError, AppResult};
use crate::identity::User;

/// How a 401/403 from an endpoint is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Auth {
    /// Credentials are the payload (login, refresh): a refusal is an answer, not an expired session.
    Anonymous,
    Bearer,
}

/// REST implementation of [`SessionGateway`].
#[derive(Clone, Debug)]
pub struct HttpGateway {
    base: Url,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base: &str, timeout: Duration) -> AppResult<Self> {
        let base = Url::parse(base).map_err(invalid_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    pub fn from_config(cfg: &ClientConfig) -> AppResult<Self> {
        Self::new(&cfg.api_base_url, cfg.request_timeout())
    }

    pub fn base(&self) -> &Url { &self.base }

    /// Endpoint paths are appended to the base as-is, so a base with a path prefix keeps it.
    fn url(&self, path: &str) -> AppResult<Url> {
        let joined = format!("{}{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(invalid_url)
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> AppResult<RequestBuilder> {
        let mut rb = self.client.request(method, self.url(path)?);
        if let Some(token) = bearer.filter(|t| !t.is_empty()) {
            rb = rb.header(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token))?);
        }
        Ok(rb)
    }

    async fn send(&self, rb: RequestBuilder, path: &str, auth: Auth) -> AppResult<Value> {
        let resp = rb.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        debug!(target: "echo::gateway", "{} -> {} ({} bytes)", path, status.as_u16(), bytes.len());

        if status.is_success() {
            if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        let message = error_message(status, &body);
        let unauthorized = status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
        if unauthorized && auth == Auth::Bearer {
            Err(AppError::unauthorized(format!("http_{}", status.as_u16()), message))
        } else {
            Err(AppError::rejected(format!("http_{}", status.as_u16()), message))
        }
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<&B>,
        auth: Auth,
    ) -> AppResult<Value> {
        let mut rb = self.request(method, path, bearer)?;
        if let Some(b) = body {
            rb = rb.json(b);
        }
        self.send(rb, path, auth).await
    }
}

/// Backend error text: `error`, then `detail`, then the status line.
fn error_message(status: StatusCode, body: &Value) -> String {
    let field = |k: &str| body.get(k).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty());
    match field("error").or_else(|| field("detail")) {
        Some(s) => s.to_string(),
        None => format!("HTTP {}: {}", status.as_u16(), status.canonical_reason().unwrap_or("")),
    }
}

/// Login answers carry the user either under `data.user` or at the top level.
fn login_grant(body: Value) -> AppResult<LoginGrant> {
    let user = body
        .get("data")
        .and_then(|d| d.get("user"))
        .or_else(|| body.get("user"))
        .cloned()
        .ok_or_else(|| AppError::decode("missing_user", "login response carries no user"))?;
    let text = |k: &str| body.get(k).and_then(|v| v.as_str()).map(|s| s.to_string());
    Ok(LoginGrant {
        user: serde_json::from_value(user)?,
        token: text("token").or_else(|| text("access_token")),
        refresh: text("refresh").or_else(|| text("refresh_token")),
        message: text("message"),
    })
}

/// `GET /auth/user` answers `{success, data: user}` or the bare user.
fn unwrap_user(body: Value) -> AppResult<User> {
    let user = match body {
        Value::Object(mut m) if m.get("data").map(|d| d.is_object()).unwrap_or(false) => m.remove("data").unwrap_or_default(),
        other => other,
    };
    Ok(serde_json::from_value(user)?)
}

/// Notification lists come bare or wrapped in `data`/`results`.
fn unwrap_list(body: Value) -> AppResult<Vec<Notification>> {
    let list = match body {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut m) => m.remove("data").or_else(|| m.remove("results")).unwrap_or(Value::Array(vec![])),
        Value::Null => Value::Array(vec![]),
        other => return Err(AppError::decode("unexpected_shape".to_string(), format!("expected notification list, got {}", other))),
    };
    Ok(serde_json::from_value(list)?)
}

impl SessionGateway for HttpGateway {
    async fn login(&self, req: &LoginRequest) -> AppResult<LoginGrant> {
        let body = self.call(Method::POST, "/auth/login", None, Some(req), Auth::Anonymous).await?;
        login_grant(body)
    }

    async fn register(&self, req: &RegisterRequest) -> AppResult<Value> {
        self.call(Method::POST, "/auth/register", None, Some(req), Auth::Anonymous).await
    }

    async fn forgot_password(&self, email: &str) -> AppResult<Value> {
        self.call(Method::POST, "/auth/forgot-password/", None, Some(&json!({ "email": email })), Auth::Anonymous).await
    }

    async fn update_preferences(&self, bearer: Option<String>, preferences: &Value) -> AppResult<Value> {
        self.call(Method::PATCH, "/auth/preferences/update/", bearer.as_deref(), Some(preferences), Auth::Bearer).await
    }

    async fn change_password(&self, bearer: Option<String>, change: &PasswordChange) -> AppResult<Value> {
        self.call(Method::POST, "/auth/change-password/", bearer.as_deref(), Some(change), Auth::Bearer).await
    }

    async fn current_user(&self, bearer: Option<String>) -> AppResult<User> {
        let body = self.call::<Value>(Method::GET, "/auth/user", bearer.as_deref(), None, Auth::Bearer).await?;
        unwrap_user(body)
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let body = self
            .call(Method::POST, "/auth/refresh", None, Some(&json!({ "refresh_token": refresh_token })), Auth::Anonymous)
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn notifications(&self, bearer: Option<String>) -> AppResult<Vec<Notification>> {
        let body = self.call::<Value>(Method::GET, "/notifications", bearer.as_deref(), None, Auth::Bearer).await?;
        unwrap_list(body)
    }
}
