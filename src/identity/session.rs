//! The session store: single source of truth for who is signed in.
//!
//! One `SessionStore` is built at bootstrap and shared (usually as an `Arc`) with
//! everything that needs the session. It owns the durable-storage mirror of the session
//! and pushes credential changes to the realtime channel. Gateway failures never escape
//! as errors; operations report an [`OpOutcome`] the caller can show as-is.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::authorizer;
use super::user::User;
use crate::error::{AppError, AppResult};
use crate::gateway::{LoginRequest, PasswordChange, RegisterRequest, SessionGateway};
use crate::realtime::NotificationChannel;
use crate::storage::{clear_session_keys, DurableStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, USER_KEY};

const SESSION_EXPIRED: &str = "Authentication failed. Please log in again.";
const LOGIN_SUPERSEDED: &str = "Login superseded";
const SESSION_CHANGED: &str = "session_changed";

/// Result of a session operation as a page would display it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpOutcome {
    pub fn ok() -> Self { Self { success: true, error: None } }
    pub fn failed(msg: impl Into<String>) -> Self { Self { success: false, error: Some(msg.into()) } }
}

/// Point-in-time view of the session, cheap to hand to the route guard or a page.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub identity: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

impl SessionSnapshot {
    pub fn signed_out() -> Self { Self { identity: None, is_authenticated: false, is_loading: false } }

    pub fn has_role(&self, role: &str) -> bool { authorizer::has_role(self.identity.as_ref(), role) }
    pub fn has_permission(&self, permission: &str) -> bool { authorizer::has_permission(self.identity.as_ref(), permission) }
    pub fn resolved_role(&self) -> Option<&str> { self.identity.as_ref().and_then(|u| u.resolved_role()) }
}

#[derive(Debug, Default)]
struct SessionState {
    identity: Option<User>,
    /// Present (possibly empty, when the gateway omitted it) iff a session is live.
    access_token: Option<String>,
    refresh_token: Option<String>,
    initialized: bool,
}

impl SessionState {
    fn is_authenticated(&self) -> bool { self.identity.is_some() && self.access_token.is_some() }

    fn clear(&mut self) {
        self.identity = None;
        self.access_token = None;
        self.refresh_token = None;
    }
}

/// Marks the store as loading for as long as it is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) { self.0.fetch_sub(1, Ordering::SeqCst); }
}

pub struct SessionStore<G, S, C> {
    gateway: G,
    storage: S,
    channel: C,
    state: RwLock<SessionState>,
    in_flight: AtomicUsize,
    /// Bumped by every login and logout, always under the state write lock. Work started
    /// under one value may only commit or end the session while it is still current.
    epoch: AtomicU64,
}

impl<G, S, C> SessionStore<G, S, C>
where
    G: SessionGateway,
    S: DurableStorage,
    C: NotificationChannel,
{
    pub fn new(gateway: G, storage: S, channel: C) -> Self {
        Self {
            gateway,
            storage,
            channel,
            state: RwLock::new(SessionState::default()),
            in_flight: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn gateway(&self) -> &G { &self.gateway }
    pub fn channel(&self) -> &C { &self.channel }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.read();
        self.snapshot_of(&st)
    }

    fn snapshot_of(&self, st: &SessionState) -> SessionSnapshot {
        SessionSnapshot {
            identity: st.identity.clone(),
            is_authenticated: st.is_authenticated(),
            is_loading: !st.initialized || self.in_flight.load(Ordering::SeqCst) > 0,
        }
    }

    pub fn is_authenticated(&self) -> bool { self.state.read().is_authenticated() }
    pub fn is_loading(&self) -> bool { self.snapshot().is_loading }
    pub fn identity(&self) -> Option<User> { self.state.read().identity.clone() }

    /// Bearer for authenticated calls made outside the store; `None` when signed out or empty.
    pub fn access_token(&self) -> Option<String> {
        self.state.read().access_token.clone().filter(|t| !t.is_empty())
    }

    /// Restore the session left in durable storage. Runs once; later calls return the
    /// current state unchanged.
    ///
    /// The restore is optimistic: nothing is checked with the server (see [`Self::revalidate`]).
    /// Anything short of a non-empty token plus a parsable identity leaves the session
    /// signed out with the session keys cleared.
    pub fn initialize(&self) -> SessionSnapshot {
        let mut st = self.state.write();
        if st.initialized {
            return self.snapshot_of(&st);
        }

        let token = read_key(&self.storage, ACCESS_TOKEN_KEY).filter(|t| !t.is_empty());
        let saved = read_key(&self.storage, USER_KEY);

        match (token, saved) {
            (Some(token), Some(raw)) => match serde_json::from_str::<User>(&raw) {
                Ok(user) => {
                    info!(target: "echo::session", "restored session user={} id={}", user.username, user.id);
                    st.identity = Some(user);
                    st.refresh_token = read_key(&self.storage, REFRESH_TOKEN_KEY);
                    self.channel.set_auth_token(&token);
                    st.access_token = Some(token);
                }
                Err(e) => {
                    let err = AppError::corrupt("corrupt_identity".to_string(), e.to_string());
                    warn!(target: "echo::session", "discarding stored session: {}", err);
                    clear_session_keys(&self.storage);
                    self.channel.clear_auth();
                }
            },
            (None, None) => {
                clear_session_keys(&self.storage);
                self.channel.clear_auth();
            }
            (token, saved) => {
                warn!(
                    target: "echo::session",
                    "discarding partial stored session (token={}, identity={})",
                    token.is_some(), saved.is_some()
                );
                clear_session_keys(&self.storage);
                self.channel.clear_auth();
            }
        }

        st.initialized = true;
        self.snapshot_of(&st)
    }

    pub async fn login(&self, username: &str, password: &str, role_hint: Option<&str>) -> OpOutcome {
        let _loading = InFlight::enter(&self.in_flight);
        let epoch = {
            let _st = self.state.write();
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        let req = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            role: role_hint.map(|r| r.to_string()),
        };

        let grant = match self.gateway.login(&req).await {
            Ok(g) => g,
            Err(e) => {
                warn!(target: "echo::session", "login failed user={}: {}", username, e);
                return OpOutcome::failed(e.display_message("Login failed"));
            }
        };

        let token = grant.token.unwrap_or_default();
        let refresh = grant.refresh.unwrap_or_default();

        let mut st = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            info!(target: "echo::session", "dropping stale login result user={}", username);
            return OpOutcome::failed(LOGIN_SUPERSEDED);
        }
        if let Err(e) = self.persist_session(&grant.user, &token, &refresh) {
            error!(target: "echo::session", "could not persist session user={}: {}", username, e);
            return OpOutcome::failed("Login failed");
        }
        if token.is_empty() {
            warn!(target: "echo::session", "gateway issued no access token user={}", username);
        }
        info!(target: "echo::session", "signed in user={} id={}", grant.user.username, grant.user.id);
        st.identity = Some(grant.user);
        st.refresh_token = Some(refresh);
        st.initialized = true;
        self.channel.set_auth_token(&token);
        st.access_token = Some(token);
        OpOutcome::ok()
    }

    /// Create an account. Does not sign in; callers follow up with [`Self::login`].
    pub async fn register(&self, req: &RegisterRequest) -> OpOutcome {
        let _loading = InFlight::enter(&self.in_flight);
        match self.gateway.register(req).await {
            Ok(_) => {
                info!(target: "echo::session", "registered user={}", req.username);
                OpOutcome::ok()
            }
            Err(e) => {
                warn!(target: "echo::session", "registration failed user={}: {}", req.username, e);
                OpOutcome::failed(e.display_message("Registration failed"))
            }
        }
    }

    /// Sign out locally: identity, tokens, every session key and the realtime credentials.
    pub fn logout(&self) {
        let mut st = self.state.write();
        self.end_session(&mut st);
    }

    /// Log out only if no login or logout happened since `epoch` was read.
    fn logout_if_current(&self, epoch: u64) -> bool {
        let mut st = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(target: "echo::session", "session changed meanwhile; keeping it");
            return false;
        }
        self.end_session(&mut st);
        true
    }

    fn end_session(&self, st: &mut SessionState) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let who = st.identity.as_ref().map(|u| u.username.clone());
        st.clear();
        let failed = clear_session_keys(&self.storage);
        self.channel.clear_auth();
        info!(target: "echo::session", "signed out user={:?} storage_failures={}", who, failed);
    }

    /// Ask the backend to send a reset mail. Only a transport failure is reported; whatever
    /// the backend answers is treated as delivered.
    pub async fn forgot_password(&self, email: &str) -> OpOutcome {
        match self.gateway.forgot_password(email).await {
            Ok(_) => OpOutcome::ok(),
            Err(e @ (AppError::Transport { .. } | AppError::Decode { .. })) => {
                warn!(target: "echo::session", "forgot-password request failed: {}", e);
                OpOutcome::failed("Failed to send reset email")
            }
            Err(e) => {
                debug!(target: "echo::session", "forgot-password answered with {}", e);
                OpOutcome::ok()
            }
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        authorizer::has_role(self.state.read().identity.as_ref(), role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        authorizer::has_permission(self.state.read().identity.as_ref(), permission)
    }

    /// Shallow-merge `patch` into the identity, in memory and in storage. No server call.
    /// Signed out, this is a no-op.
    pub fn update_user(&self, patch: &Value) -> AppResult<()> {
        let mut st = self.state.write();
        let Some(current) = st.identity.as_ref() else {
            debug!(target: "echo::session", "update_user ignored: signed out");
            return Ok(());
        };
        let merged = current.merged(patch)?;
        let raw = serde_json::to_string(&merged)?;
        self.storage.set(USER_KEY, &raw)?;
        st.identity = Some(merged);
        Ok(())
    }

    pub async fn update_preferences(&self, preferences: &Value) -> OpOutcome {
        const FALLBACK: &str = "Failed to update preferences";
        if !preferences.is_object() {
            return OpOutcome::failed(FALLBACK);
        }
        let _loading = InFlight::enter(&self.in_flight);
        match self.authorized(move |bearer| self.gateway.update_preferences(bearer, preferences)).await {
            Ok(_) => match self.update_user(&json!({ "preferences": preferences })) {
                Ok(()) => OpOutcome::ok(),
                Err(e) => {
                    warn!(target: "echo::session", "preferences saved remotely but not locally: {}", e);
                    OpOutcome::failed(FALLBACK)
                }
            },
            Err(e) => {
                warn!(target: "echo::session", "update preferences failed: {}", e);
                failure(e, FALLBACK)
            }
        }
    }

    pub async fn change_password(&self, change: &PasswordChange) -> OpOutcome {
        const FALLBACK: &str = "Failed to change password";
        let _loading = InFlight::enter(&self.in_flight);
        match self.authorized(move |bearer| self.gateway.change_password(bearer, change)).await {
            Ok(_) => OpOutcome::ok(),
            Err(e) => {
                warn!(target: "echo::session", "change password failed: {}", e);
                failure(e, FALLBACK)
            }
        }
    }

    /// Rotate the access token with the stored refresh token.
    ///
    /// A rejected refresh ends the session; a transport failure leaves it as it was, and so
    /// does any failure once a newer login or logout has replaced the session.
    pub async fn refresh(&self) -> OpOutcome {
        const FALLBACK: &str = "Token refresh failed";
        let _loading = InFlight::enter(&self.in_flight);
        let epoch = self.epoch.load(Ordering::SeqCst);
        match self.rotate_tokens(epoch).await {
            Ok(_) => OpOutcome::ok(),
            Err(e @ AppError::Transport { .. }) => {
                warn!(target: "echo::session", "token refresh unreachable: {}", e);
                OpOutcome::failed(FALLBACK)
            }
            Err(e) if e.code_str() == SESSION_CHANGED => {
                debug!(target: "echo::session", "dropping stale refresh result");
                OpOutcome::failed(FALLBACK)
            }
            Err(e) => {
                warn!(target: "echo::session", "token refresh rejected: {}", e);
                self.logout_if_current(epoch);
                OpOutcome::failed(FALLBACK)
            }
        }
    }

    /// Re-read the identity from the server. Never called implicitly; startup stays optimistic.
    pub async fn revalidate(&self) -> OpOutcome {
        const FALLBACK: &str = "Failed to load user";
        if !self.is_authenticated() {
            return OpOutcome::failed("Not signed in");
        }
        let _loading = InFlight::enter(&self.in_flight);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let user = match self.authorized(move |bearer| self.gateway.current_user(bearer)).await {
            Ok(u) => u,
            Err(e) => {
                warn!(target: "echo::session", "revalidate failed: {}", e);
                return failure(e, FALLBACK);
            }
        };

        let mut st = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch || st.identity.is_none() {
            return OpOutcome::failed(FALLBACK);
        }
        let raw = match serde_json::to_string(&user) {
            Ok(r) => r,
            Err(e) => return failure(e.into(), FALLBACK),
        };
        if let Err(e) = self.storage.set(USER_KEY, &raw) {
            return failure(e.into(), FALLBACK);
        }
        debug!(target: "echo::session", "revalidated user={} id={}", user.username, user.id);
        st.identity = Some(user);
        OpOutcome::ok()
    }

    /// Number of unread notifications for the signed-in user; 0 when signed out.
    /// Does not touch the loading flag so background polling stays invisible.
    pub async fn unread_count(&self) -> AppResult<usize> {
        if !self.is_authenticated() {
            return Ok(0);
        }
        let items = self.authorized(move |bearer| self.gateway.notifications(bearer)).await?;
        Ok(items.iter().filter(|n| !n.read).count())
    }

    /// Run an authenticated gateway call; on 401/403 rotate tokens once and retry.
    /// If the session cannot be renewed it is ended, unless a newer login or logout has
    /// replaced it in the meantime; then the call fails with `session_changed` and the
    /// newer session is left alone.
    async fn authorized<T, F, Fut>(&self, call: F) -> AppResult<T>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let (bearer, epoch) = {
            let st = self.state.read();
            (st.access_token.clone().filter(|t| !t.is_empty()), self.epoch.load(Ordering::SeqCst))
        };
        match call(bearer).await {
            Err(e) if e.is_unauthorized() => {
                debug!(target: "echo::session", "bearer refused ({}), attempting refresh", e);
                let renewed = match self.rotate_tokens(epoch).await {
                    Ok(token) => call(Some(token)).await,
                    Err(e) => Err(e),
                };
                match renewed {
                    Ok(v) => Ok(v),
                    Err(e) if e.code_str() == SESSION_CHANGED => Err(e),
                    Err(e) => {
                        warn!(target: "echo::session", "session could not be renewed: {}", e);
                        if self.logout_if_current(epoch) {
                            Err(AppError::unauthorized("session_expired", SESSION_EXPIRED))
                        } else {
                            Err(session_changed())
                        }
                    }
                }
            }
            other => other,
        }
    }

    /// Rotate tokens on behalf of work started under `epoch`. Fails with `session_changed`
    /// if that session is no longer the current one, before or after the gateway call.
    async fn rotate_tokens(&self, epoch: u64) -> AppResult<String> {
        let refresh = {
            let st = self.state.read();
            if self.epoch.load(Ordering::SeqCst) != epoch || st.identity.is_none() {
                return Err(session_changed());
            }
            st.refresh_token.clone().filter(|t| !t.is_empty())
        };
        let Some(refresh) = refresh else {
            return Err(AppError::unauthorized("no_refresh_token", "No refresh token available"));
        };

        let pair = self.gateway.refresh(&refresh).await?;

        let mut st = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch || st.identity.is_none() {
            return Err(session_changed());
        }
        let next_refresh = pair.refresh.filter(|r| !r.is_empty()).unwrap_or(refresh);
        self.storage.set(ACCESS_TOKEN_KEY, &pair.token)?;
        self.storage.set(REFRESH_TOKEN_KEY, &next_refresh)?;
        st.access_token = Some(pair.token.clone());
        st.refresh_token = Some(next_refresh);
        self.channel.set_auth_token(&pair.token);
        info!(target: "echo::session", "rotated access token (len={})", pair.token.len());
        Ok(pair.token)
    }

    /// Write the three session keys; on failure put back whatever was there before.
    fn persist_session(&self, user: &User, token: &str, refresh: &str) -> AppResult<()> {
        let user_json = serde_json::to_string(user)?;
        let previous: Vec<(&str, Option<String>)> = SESSION_KEYS.iter().map(|k| (*k, read_key(&self.storage, k))).collect();
        let writes = [(ACCESS_TOKEN_KEY, token), (REFRESH_TOKEN_KEY, refresh), (USER_KEY, user_json.as_str())];
        for (key, value) in writes {
            if let Err(e) = self.storage.set(key, value) {
                for (k, prev) in &previous {
                    let _ = match prev {
                        Some(v) => self.storage.set(k, v),
                        None => self.storage.remove(k),
                    };
                }
                return Err(e.into());
            }
        }
        Ok(())
    }
}

fn read_key<S: DurableStorage + ?Sized>(storage: &S, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "echo::storage", "read of '{}' failed: {}", key, e);
            None
        }
    }
}

fn session_changed() -> AppError {
    AppError::unauthorized(SESSION_CHANGED, "Session changed during the request")
}

fn failure(e: AppError, fallback: &str) -> OpOutcome {
    match &e {
        AppError::Unauthorized { code, message } if code == "session_expired" => OpOutcome::failed(message.clone()),
        _ => OpOutcome::failed(e.display_message(fallback)),
    }
}
