use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{NotificationChannel, RealtimeEvent};
use crate::config::ClientConfig;
use crate::error::AppResult;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self { max_retries: cfg.ws_max_retries, base_delay: cfg.ws_retry_delay() }
    }

    /// Linear backoff: the n-th retry waits n times the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration { self.base_delay * attempt }
}

impl Default for ReconnectPolicy {
    fn default() -> Self { Self { max_retries: 3, base_delay: Duration::from_millis(2_000) } }
}

struct Connection {
    token: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Connection {
    fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// WebSocket notification channel. At most one connection runs at a time and it always
/// carries the most recent token.
pub struct WsChannel {
    base: Url,
    policy: ReconnectPolicy,
    events: broadcast::Sender<RealtimeEvent>,
    current: Mutex<Option<Connection>>,
}

impl WsChannel {
    pub fn new(base: Url, policy: ReconnectPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { base, policy, events, current: Mutex::new(None) }
    }

    pub fn from_config(cfg: &ClientConfig) -> AppResult<Self> {
        Ok(Self::new(cfg.ws_base()?, ReconnectPolicy::from_config(cfg)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> { self.events.subscribe() }

    /// Token of the running connection, if any.
    pub fn active_token(&self) -> Option<String> {
        self.current.lock().as_ref().filter(|c| !c.task.is_finished()).map(|c| c.token.clone())
    }

    pub fn is_active(&self) -> bool { self.active_token().is_some() }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/ws/?token={}", self.base.as_str().trim_end_matches('/'), urlencoding::encode(token))
    }
}

impl NotificationChannel for WsChannel {
    fn set_auth_token(&self, token: &str) {
        if token.is_empty() {
            self.clear_auth();
            return;
        }
        let mut current = self.current.lock();
        if let Some(prev) = current.take() {
            prev.stop();
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!(target: "echo::realtime", "no async runtime; realtime notifications disabled");
                return;
            }
        };
        let (tx, rx) = oneshot::channel();
        let task = handle.spawn(run_connection(self.endpoint(token), self.policy, self.events.clone(), rx));
        *current = Some(Connection { token: token.to_string(), shutdown: Some(tx), task });
    }

    fn clear_auth(&self) {
        if let Some(conn) = self.current.lock().take() {
            debug!(target: "echo::realtime", "closing realtime connection");
            conn.stop();
        }
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        if let Some(conn) = self.current.get_mut().take() {
            conn.stop();
        }
    }
}

fn publish(events: &broadcast::Sender<RealtimeEvent>, text: &str) {
    match serde_json::from_str::<RealtimeEvent>(text) {
        Ok(ev) => {
            debug!(target: "echo::realtime", "event type={}", ev.kind);
            // No subscribers is fine; the event is simply not observed.
            let _ = events.send(ev);
        }
        Err(e) => warn!(target: "echo::realtime", "dropping malformed frame: {}", e),
    }
}

async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    events: broadcast::Sender<RealtimeEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;
    loop {
        let connected = tokio::select! {
            _ = &mut shutdown => return,
            res = tokio_tungstenite::connect_async(url.as_str()) => res,
        };
        match connected {
            Ok((mut stream, _resp)) => {
                attempt = 0;
                info!(target: "echo::realtime", "realtime connected");
                loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            let frame = CloseFrame { code: CloseCode::Normal, reason: "client signed out".into() };
                            let _ = stream.close(Some(frame)).await;
                            return;
                        }
                        msg = stream.next() => match msg {
                            Some(Ok(Message::Text(text))) => publish(&events, &text),
                            Some(Ok(Message::Close(frame))) => {
                                if frame.as_ref().map(|f| f.code == CloseCode::Normal).unwrap_or(false) {
                                    info!(target: "echo::realtime", "server closed realtime connection normally");
                                    return;
                                }
                                warn!(target: "echo::realtime", "realtime connection closed abnormally: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(target: "echo::realtime", "realtime connection error: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            Err(e) => warn!(target: "echo::realtime", "realtime connect failed: {}", e),
        }

        attempt += 1;
        if attempt > policy.max_retries {
            warn!(target: "echo::realtime", "giving up on realtime after {} retries", policy.max_retries);
            return;
        }
        let delay = policy.delay_for(attempt);
        debug!(target: "echo::realtime", "reconnecting in {:?} (attempt {}/{})", delay, attempt, policy.max_retries);
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(3), Duration::from_millis(6_000));
    }

    #[test]
    fn endpoint_encodes_token() {
        let ch = WsChannel::new(Url::parse("ws://localhost:8000/").unwrap(), ReconnectPolicy::default());
        assert_eq!(ch.endpoint("a b+c"), "ws://localhost:8000/ws/?token=a%20b%2Bc");
    }

    #[test]
    fn without_runtime_nothing_is_spawned() {
        let ch = WsChannel::new(Url::parse("ws://localhost:1").unwrap(), ReconnectPolicy::default());
        ch.set_auth_token("tok");
        assert!(!ch.is_active());
        ch.clear_auth();
    }
}
