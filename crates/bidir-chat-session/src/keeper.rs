//! Keep-alive and connection-loss notification.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bidir_chat_core::{Connection, HeartbeatMode};

/// Keeps a routed session from expiring and reports unexpected closes.
///
/// Dropping the keeper clears the close notification.
pub struct SessionKeeper {
    connection: Arc<dyn Connection>,
    armed: Arc<AtomicBool>,
    heartbeat: Option<Duration>,
}

impl SessionKeeper {
    /// Create a keeper for the session's connection.
    #[must_use]
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            armed: Arc::new(AtomicBool::new(false)),
            heartbeat: None,
        }
    }

    /// Configure heartbeats from the gateway's idle timeout, in seconds.
    ///
    /// A positive timeout turns on continuous heartbeats at that interval.
    /// Zero or negative means sessions never expire; nothing is configured.
    pub fn configure_keep_alive(&mut self, timeout_secs: i32) -> Option<Duration> {
        let secs = u64::try_from(timeout_secs).ok().filter(|s| *s > 0)?;
        let interval = Duration::from_secs(secs);
        self.connection.set_heartbeat(interval, HeartbeatMode::Always);
        self.heartbeat = Some(interval);
        tracing::debug!(?interval, "Heartbeats enabled");
        Some(interval)
    }

    /// Heartbeat interval, if heartbeats were configured.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat
    }

    /// Call `handler` when the connection closes unexpectedly.
    pub fn on_connection_lost<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.armed.store(true, Ordering::SeqCst);
        let armed = Arc::clone(&self.armed);
        self.connection.set_close_callback(Some(Arc::new(move || {
            // A close already in flight when we disarmed must stay silent.
            if armed.load(Ordering::SeqCst) {
                handler();
            }
        })));
    }

    /// Stop reporting closes. Call right before an intentional teardown.
    pub fn disarm(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.connection.set_close_callback(None);
            tracing::debug!("Close notification cleared");
        }
    }

    /// Whether a close would currently be reported.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl Drop for SessionKeeper {
    fn drop(&mut self) {
        self.disarm();
    }
}
