//! The backend session API as seen by the session store.
//!
//! `SessionGateway` is the seam the store is generic over: `HttpGateway` talks to the
//! REST backend, tests script one in memory. Bearer tokens are passed per call so the
//! gateway never holds session state of its own.

mod types;
mod http;

pub use types::{LoginRequest, RegisterRequest, PasswordChange, LoginGrant, TokenPair, Notification};
pub use http::HttpGateway;

use std::future::Future;

use serde_json::Value;

use crate::error::AppResult;
use crate::identity::User;

pub trait SessionGateway: Send + Sync {
    fn login(&self, req: &LoginRequest) -> impl Future<Output = AppResult<LoginGrant>> + Send;

    fn register(&self, req: &RegisterRequest) -> impl Future<Output = AppResult<Value>> + Send;

    fn forgot_password(&self, email: &str) -> impl Future<Output = AppResult<Value>> + Send;

    /// Preferences are sent as one object and replace the stored ones.
    fn update_preferences(&self, bearer: Option<String>, preferences: &Value) -> impl Future<Output = AppResult<Value>> + Send;

    fn change_password(&self, bearer: Option<String>, change: &PasswordChange) -> impl Future<Output = AppResult<Value>> + Send;

    fn current_user(&self, bearer: Option<String>) -> impl Future<Output = AppResult<User>> + Send;

    fn refresh(&self, refresh_token: &str) -> impl Future<Output = AppResult<TokenPair>> + Send;

    fn notifications(&self, bearer: Option<String>) -> impl Future<Output = AppResult<Vec<Notification>>> + Send;
}
