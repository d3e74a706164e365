use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::PicitClient;

/// A running token refresh task. Stops when dropped.
pub struct AutoRefresh {
    handle: JoinHandle<()>,
}

impl AutoRefresh {
    /// Refresh the client's session every `every` until stopped. An auth
    /// failure ends the task and clears the local session; transport errors
    /// are logged and retried on the next tick.
    pub fn start(client: PicitClient, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                match client.refresh().await {
                    Ok(_) => {}
                    Err(e) if e.is_auth() => {
                        info!("Session ended, stopping auto-refresh: {}", e);
                        client.clear_session().await;
                        return;
                    }
                    Err(e) => warn!("Token refresh failed: {}", e),
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Foreground/background hooks for the host app.
///
/// Tokens are kept fresh only while the app is in the foreground.
pub struct SessionLifecycle {
    client: PicitClient,
    refresh_every: Duration,
    refresh: Mutex<Option<AutoRefresh>>,
}

impl SessionLifecycle {
    pub fn new(client: PicitClient, refresh_every: Duration) -> Self {
        Self {
            client,
            refresh_every,
            refresh: Mutex::new(None),
        }
    }

    /// Start refreshing if signed in and not already running.
    pub async fn on_foreground(&self) {
        let mut refresh = self.refresh.lock().await;
        if refresh.as_ref().is_some_and(AutoRefresh::is_running) {
            return;
        }
        if self.client.token().await.is_none() {
            debug!("Foregrounded without a session, auto-refresh not started");
            *refresh = None;
            return;
        }
        *refresh = Some(AutoRefresh::start(self.client.clone(), self.refresh_every));
    }

    pub async fn on_background(&self) {
        // Dropping the handle aborts the task
        self.refresh.lock().await.take();
    }

    pub async fn is_refreshing(&self) -> bool {
        self.refresh
            .lock()
            .await
            .as_ref()
            .is_some_and(AutoRefresh::is_running)
    }
}
