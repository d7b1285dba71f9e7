#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Notify;

use echo_client::error::{AppError, AppResult};
use echo_client::gateway::{LoginGrant, LoginRequest, Notification, PasswordChange, RegisterRequest, SessionGateway, TokenPair};
use echo_client::identity::User;
use echo_client::realtime::NotificationChannel;

/// In-memory gateway answering each operation from a queue of canned results.
/// An operation with an empty queue fails with a transport error.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<HashMap<&'static str, VecDeque<AppResult<Value>>>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    calls: Mutex<Vec<(&'static str, Option<String>)>>,
    /// Signalled when a gated call has been entered.
    pub entered: Notify,
}

impl ScriptedGateway {
    pub fn new() -> Self { Self::default() }

    pub fn push(&self, op: &'static str, result: AppResult<Value>) -> &Self {
        self.script.lock().entry(op).or_default().push_back(result);
        self
    }

    /// Make calls to `op` wait until the returned handle is notified.
    pub fn gate(&self, op: &'static str) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        self.gates.lock().insert(op, n.clone());
        n
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|(o, _)| *o == op).count()
    }

    pub fn bearers(&self, op: &str) -> Vec<Option<String>> {
        self.calls.lock().iter().filter(|(o, _)| *o == op).map(|(_, b)| b.clone()).collect()
    }

    async fn next(&self, op: &'static str, bearer: Option<String>) -> AppResult<Value> {
        self.calls.lock().push((op, bearer));
        let gate = self.gates.lock().get(op).cloned();
        if let Some(g) = gate {
            self.entered.notify_one();
            g.notified().await;
        }
        let next = self.script.lock().get_mut(op).and_then(|q| q.pop_front());
        next.unwrap_or_else(|| Err(AppError::transport("unscripted", op)))
    }

    async fn next_as<T: DeserializeOwned>(&self, op: &'static str, bearer: Option<String>) -> AppResult<T> {
        let v = self.next(op, bearer).await?;
        Ok(serde_json::from_value(v)?)
    }
}

impl SessionGateway for ScriptedGateway {
    async fn login(&self, _req: &LoginRequest) -> AppResult<LoginGrant> { self.next_as("login", None).await }
    async fn register(&self, _req: &RegisterRequest) -> AppResult<Value> { self.next("register", None).await }
    async fn forgot_password(&self, _email: &str) -> AppResult<Value> { self.next("forgot_password", None).await }
    async fn update_preferences(&self, bearer: Option<String>, _preferences: &Value) -> AppResult<Value> {
        self.next("update_preferences", bearer).await
    }
    async fn change_password(&self, bearer: Option<String>, _change: &PasswordChange) -> AppResult<Value> {
        self.next("change_password", bearer).await
    }
    async fn current_user(&self, bearer: Option<String>) -> AppResult<User> { self.next_as("current_user", bearer).await }
    async fn refresh(&self, _refresh_token: &str) -> AppResult<TokenPair> { self.next_as("refresh", None).await }
    async fn notifications(&self, bearer: Option<String>) -> AppResult<Vec<Notification>> {
        self.next_as("notifications", bearer).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Set(String),
    Cleared,
}

/// Notification channel that only remembers what it was told.
#[derive(Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<ChannelEvent>>,
}

impl RecordingChannel {
    pub fn events(&self) -> Vec<ChannelEvent> { self.events.lock().clone() }
    pub fn last(&self) -> Option<ChannelEvent> { self.events.lock().last().cloned() }
}

impl NotificationChannel for RecordingChannel {
    fn set_auth_token(&self, token: &str) { self.events.lock().push(ChannelEvent::Set(token.to_string())); }
    fn clear_auth(&self) { self.events.lock().push(ChannelEvent::Cleared); }
}

pub fn student_json(id: i64, username: &str) -> Value {
    json!({"id": id, "username": username, "first_name": "Alice", "last_name": "Liddell", "email": "alice@example.org", "role": "student"})
}

pub fn grant(user: Value, token: &str, refresh: &str) -> Value {
    json!({"user": user, "token": token, "refresh": refresh})
}
