use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::gateway::SessionGateway;
use crate::identity::SessionStore;
use crate::realtime::NotificationChannel;
use crate::storage::DurableStorage;

/// Background unread-notification counter. Polls at a fixed interval; a failed poll keeps
/// the last value. The task ends when the poller is stopped or dropped.
pub struct UnreadPoller {
    rx: watch::Receiver<usize>,
    task: JoinHandle<()>,
}

impl UnreadPoller {
    pub fn spawn<G, S, C>(store: Arc<SessionStore<G, S, C>>, every: Duration) -> Self
    where
        G: SessionGateway + 'static,
        S: DurableStorage + 'static,
        C: NotificationChannel + 'static,
    {
        let (tx, rx) = watch::channel(0usize);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.unread_count().await {
                    Ok(n) => {
                        tx.send_if_modified(|cur| {
                            let changed = *cur != n;
                            *cur = n;
                            changed
                        });
                    }
                    Err(e) => debug!(target: "echo::realtime", "unread poll failed: {}", e),
                }
            }
        });
        Self { rx, task }
    }

    pub fn latest(&self) -> usize { *self.rx.borrow() }

    pub fn subscribe(&self) -> watch::Receiver<usize> { self.rx.clone() }

    pub fn stop(self) {}
}

impl Drop for UnreadPoller {
    fn drop(&mut self) { self.task.abort(); }
}

/// Badge text for an unread count; nothing is shown for zero.
pub fn badge_label(count: usize) -> Option<String> {
    match count {
        0 => None,
        n if n > 99 => Some("99+".to_string()),
        n => Some(n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badge_caps_at_ninety_nine() {
        assert_eq!(badge_label(0), None);
        assert_eq!(badge_label(7).as_deref(), Some("7"));
        assert_eq!(badge_label(99).as_deref(), Some("99"));
        assert_eq!(badge_label(100).as_deref(), Some("99+"));
    }
}
