//! Realtime notifications that follow the session's credentials.
//!
//! The session store only knows the [`NotificationChannel`] seam: it hands over a new
//! bearer on sign-in and refresh and clears it on sign-out. `WsChannel` turns that into
//! a socket connection; `NullChannel` is for processes that never listen.

mod ws;
mod poller;

pub use ws::{WsChannel, ReconnectPolicy};
pub use poller::{UnreadPoller, badge_label};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub trait NotificationChannel: Send + Sync {
    /// Start (or restart) the channel with this bearer token.
    fn set_auth_token(&self, token: &str);
    /// Drop credentials and close any open connection without reconnecting.
    fn clear_auth(&self);
}

impl<T: NotificationChannel + ?Sized> NotificationChannel for Arc<T> {
    fn set_auth_token(&self, token: &str) { (**self).set_auth_token(token) }
    fn clear_auth(&self) { (**self).clear_auth() }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullChannel;

impl NotificationChannel for NullChannel {
    fn set_auth_token(&self, _token: &str) {}
    fn clear_auth(&self) {}
}

/// One server push: `{"type": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}
