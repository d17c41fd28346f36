//! Server side of the loopback middleware.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bidir_chat_core::{
    CallbackServant, CloseCallback, Connection, CreateSessionError, Credentials, EndpointRef,
    HeartbeatMode, Identity, Inbound, InvocationMode, MiddlewareError, ObjectAdapter,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default idle timeout of loopback sessions, in seconds.
const DEFAULT_IDLE_TIMEOUT: i32 = 30;

struct SessionEntry {
    user: String,
    connection: Weak<LoopbackConnection>,
    callback: Option<Identity>,
}

struct Receiver {
    connection: Weak<LoopbackConnection>,
    identity: Identity,
}

struct HubState {
    reachable: bool,
    is_gateway: bool,
    idle_timeout: i32,
    refusals: VecDeque<CreateSessionError>,
    secrets: HashMap<String, String>,
    session_attempts: u32,
    sessions: HashMap<u64, SessionEntry>,
    receivers: Vec<Receiver>,
    callback_counter: i32,
    heartbeat_configs: Vec<(Duration, HeartbeatMode)>,
    heartbeats: u64,
    destroyed_communicators: usize,
    transcript: Vec<String>,
    connections: Vec<Weak<LoopbackConnection>>,
    unresponsive: bool,
    stalled_calls: usize,
    serving: bool,
    greetings: Vec<InvocationMode>,
    pings: u64,
}

/// In-process stand-in for a routing gateway and its back-end servers.
///
/// Any user id / password combination is accepted unless a secret was
/// required for that user or a refusal was queued. Each message said in a
/// session is relayed to every session with a callback, as `user > text`.
pub struct LoopbackHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl LoopbackHub {
    /// Create a hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                reachable: true,
                is_gateway: true,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                refusals: VecDeque::new(),
                secrets: HashMap::new(),
                session_attempts: 0,
                sessions: HashMap::new(),
                receivers: Vec::new(),
                callback_counter: 0,
                heartbeat_configs: Vec::new(),
                heartbeats: 0,
                destroyed_communicators: 0,
                transcript: Vec::new(),
                connections: Vec::new(),
                unresponsive: false,
                stalled_calls: 0,
                serving: true,
                greetings: Vec::new(),
                pings: 0,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- configuration -------------------------------------------------

    /// Make connection attempts fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Make the router fail its type check.
    pub fn set_gateway(&self, is_gateway: bool) {
        self.lock().is_gateway = is_gateway;
    }

    /// Idle timeout reported to clients, in seconds.
    pub fn set_idle_timeout(&self, secs: i32) {
        self.lock().idle_timeout = secs;
    }

    /// Fail the next `create_session` call with `error`. Queued refusals
    /// are consumed in order.
    pub fn refuse_next(&self, error: CreateSessionError) {
        self.lock().refusals.push_back(error);
    }

    /// Require `secret` for `user`.
    pub fn require_secret(&self, user: impl Into<String>, secret: impl Into<String>) {
        self.lock().secrets.insert(user.into(), secret.into());
    }

    /// Leave `create_session` and `send_message` calls unanswered.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.lock().unresponsive = unresponsive;
    }

    // --- observation ---------------------------------------------------

    /// Number of `create_session` calls received.
    #[must_use]
    pub fn session_attempts(&self) -> u32 {
        self.lock().session_attempts
    }

    /// Users with a live session.
    #[must_use]
    pub fn live_sessions(&self) -> Vec<String> {
        let mut users: Vec<String> = self.lock().sessions.values().map(|s| s.user.clone()).collect();
        users.sort();
        users
    }

    /// Every message said, in arrival order, as `user > text`.
    #[must_use]
    pub fn transcript(&self) -> Vec<String> {
        self.lock().transcript.clone()
    }

    /// Heartbeat configurations applied to connections.
    #[must_use]
    pub fn heartbeat_configs(&self) -> Vec<(Duration, HeartbeatMode)> {
        self.lock().heartbeat_configs.clone()
    }

    /// Heartbeats received.
    #[must_use]
    pub fn heartbeats(&self) -> u64 {
        self.lock().heartbeats
    }

    /// Number of communicators destroyed.
    #[must_use]
    pub fn destroyed_communicators(&self) -> usize {
        self.lock().destroyed_communicators
    }

    /// Calls left hanging while unresponsive.
    #[must_use]
    pub fn stalled_calls(&self) -> usize {
        self.lock().stalled_calls
    }

    /// Greetings the hello server dispatched, in order.
    #[must_use]
    pub fn greetings(&self) -> Vec<InvocationMode> {
        self.lock().greetings.clone()
    }

    /// Pings answered.
    #[must_use]
    pub fn pings(&self) -> u64 {
        self.lock().pings
    }

    /// Whether the hello server still accepts requests.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.lock().serving
    }

    // --- simulation ----------------------------------------------------

    /// Open a connection to the hub.
    pub fn open_connection(self: &Arc<Self>) -> Arc<LoopbackConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(LoopbackConnection {
            id,
            category: Uuid::new_v4().simple().to_string(),
            hub: Arc::downgrade(self),
            close_callback: Mutex::new(None),
            adapter: Mutex::new(None),
            heartbeat: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.lock().connections.push(Arc::downgrade(&connection));
        connection
    }

    /// Close every open connection, as if the gateway went away.
    pub fn sever_all(&self) {
        let connections: Vec<_> = self
            .lock()
            .connections
            .drain(..)
            .filter_map(|c| c.upgrade())
            .collect();
        for connection in connections {
            connection.close();
        }
    }

    /// Invoke every registered callback receiver with the next number.
    ///
    /// Returns how many receivers were reached.
    pub async fn fire_callbacks(&self) -> usize {
        let (num, targets) = {
            let mut state = self.lock();
            state.receivers.retain(|r| r.connection.strong_count() > 0);
            state.callback_counter = state.callback_counter.wrapping_add(1);
            let targets: Vec<_> = state
                .receivers
                .iter()
                .filter_map(|r| r.connection.upgrade().map(|c| (c, r.identity.clone())))
                .collect();
            (state.callback_counter, targets)
        };

        let mut reached = 0;
        for (connection, identity) in targets {
            match connection.dispatch(&identity, Inbound::Callback { num }).await {
                Ok(()) => reached += 1,
                Err(e) => tracing::debug!(%identity, "Callback not delivered: {e}"),
            }
        }
        reached
    }

    /// Fire callbacks every `interval` until the hub is dropped.
    pub fn spawn_callback_ticker(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.fire_callbacks().await;
            }
        })
    }

    // --- server operations ---------------------------------------------

    pub(crate) fn is_reachable(&self) -> bool {
        self.lock().reachable
    }

    pub(crate) fn is_gateway(&self) -> bool {
        self.lock().is_gateway
    }

    pub(crate) fn idle_timeout(&self) -> i32 {
        self.lock().idle_timeout
    }

    pub(crate) fn record_destroyed(&self) {
        self.lock().destroyed_communicators += 1;
    }

    /// Never returns while the hub is unresponsive.
    pub(crate) async fn stall_if_unresponsive(&self) {
        {
            let mut state = self.lock();
            if !state.unresponsive {
                return;
            }
            state.stalled_calls += 1;
        }
        futures::future::pending::<()>().await;
    }

    pub(crate) fn greet(&self, mode: InvocationMode, target: &str) -> Result<(), MiddlewareError> {
        let mut state = self.lock();
        if !state.serving {
            return Err(MiddlewareError::ConnectFailed(target.to_string()));
        }
        state.greetings.push(mode);
        drop(state);
        tracing::debug!(?mode, "Hello World!");
        Ok(())
    }

    pub(crate) fn ping(&self, target: &str) -> Result<(), MiddlewareError> {
        let mut state = self.lock();
        if !state.serving {
            return Err(MiddlewareError::ConnectFailed(target.to_string()));
        }
        state.pings += 1;
        Ok(())
    }

    pub(crate) fn shut_down(&self, target: &str) -> Result<(), MiddlewareError> {
        let mut state = self.lock();
        if !state.serving {
            return Err(MiddlewareError::ConnectFailed(target.to_string()));
        }
        state.serving = false;
        drop(state);
        tracing::debug!("Loopback server shutting down");
        Ok(())
    }

    pub(crate) fn create_session(
        &self,
        connection: &Arc<LoopbackConnection>,
        credentials: &Credentials,
    ) -> Result<u64, CreateSessionError> {
        let mut state = self.lock();
        state.session_attempts += 1;

        if let Some(refusal) = state.refusals.pop_front() {
            return Err(refusal);
        }
        if let Some(expected) = state.secrets.get(&credentials.id) {
            if *expected != credentials.secret {
                return Err(CreateSessionError::PermissionDenied {
                    reason: "bad secret".to_string(),
                });
            }
        }
        if state
            .sessions
            .values()
            .any(|s| std::ptr::eq(s.connection.as_ptr(), Arc::as_ptr(connection)))
        {
            return Err(CreateSessionError::CannotCreateSession {
                reason: "session exists".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.sessions.insert(
            id,
            SessionEntry {
                user: credentials.id.clone(),
                connection: Arc::downgrade(connection),
                callback: None,
            },
        );
        drop(state);
        tracing::debug!(user = %credentials.id, id, "Loopback session created");
        Ok(id)
    }

    pub(crate) fn set_callback(&self, session: u64, identity: Identity) -> Result<(), MiddlewareError> {
        let mut state = self.lock();
        let entry = state
            .sessions
            .get_mut(&session)
            .ok_or_else(|| MiddlewareError::Remote("session destroyed".to_string()))?;
        entry.callback = Some(identity);
        Ok(())
    }

    pub(crate) async fn say(&self, session: u64, text: &str) -> Result<(), MiddlewareError> {
        let (line, targets) = {
            let mut state = self.lock();
            let user = state
                .sessions
                .get(&session)
                .map(|s| s.user.clone())
                .ok_or_else(|| MiddlewareError::Remote("session destroyed".to_string()))?;
            let line = format!("{user} > {text}");
            state.transcript.push(line.clone());
            let targets: Vec<_> = state
                .sessions
                .values()
                .filter_map(|s| {
                    let identity = s.callback.clone()?;
                    s.connection.upgrade().map(|c| (c, identity))
                })
                .collect();
            (line, targets)
        };

        for (connection, identity) in targets {
            let inbound = Inbound::Message { data: line.clone() };
            if let Err(e) = connection.dispatch(&identity, inbound).await {
                tracing::debug!(%identity, "Message not delivered: {e}");
            }
        }
        Ok(())
    }

    pub(crate) fn destroy_session(&self, session: u64) -> Result<(), MiddlewareError> {
        self.lock()
            .sessions
            .remove(&session)
            .map(|_| ())
            .ok_or_else(|| MiddlewareError::Remote("session destroyed".to_string()))
    }

    pub(crate) fn add_receiver(&self, connection: &Arc<LoopbackConnection>, identity: Identity) {
        self.lock().receivers.push(Receiver {
            connection: Arc::downgrade(connection),
            identity,
        });
    }

    fn record_heartbeat_config(&self, interval: Duration, mode: HeartbeatMode) {
        self.lock().heartbeat_configs.push((interval, mode));
    }

    fn record_heartbeat(&self) {
        self.lock().heartbeats += 1;
    }

    fn connection_closed(&self, connection: &LoopbackConnection) {
        let mut state = self.lock();
        state
            .sessions
            .retain(|_, s| !std::ptr::eq(s.connection.as_ptr(), connection));
        state
            .receivers
            .retain(|r| !std::ptr::eq(r.connection.as_ptr(), connection));
        state.connections.retain(|c| c.strong_count() > 0);
    }
}

/// Client connection to a [`LoopbackHub`].
pub struct LoopbackConnection {
    id: u64,
    category: String,
    hub: Weak<LoopbackHub>,
    close_callback: Mutex<Option<CloseCallback>>,
    adapter: Mutex<Option<Arc<dyn ObjectAdapter>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl LoopbackConnection {
    /// Connection id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Category the gateway reserves for this client.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Whether the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Currently registered close callback.
    #[must_use]
    pub fn close_callback(&self) -> Option<CloseCallback> {
        self.close_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close the connection and notify the close callback, once.
    ///
    /// Sessions and receivers bound to the connection go away with it.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hub) = self.hub.upgrade() {
            hub.connection_closed(self);
        }

        let callback = self
            .close_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), MiddlewareError> {
        if self.is_closed() {
            Err(MiddlewareError::ConnectionLost)
        } else {
            Ok(())
        }
    }

    pub(crate) fn hub(&self) -> Result<Arc<LoopbackHub>, MiddlewareError> {
        self.hub.upgrade().ok_or(MiddlewareError::ConnectionLost)
    }

    async fn dispatch(&self, identity: &Identity, inbound: Inbound) -> Result<(), MiddlewareError> {
        self.ensure_open()?;
        let servant = self
            .adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|a| a.find(identity))
            .ok_or_else(|| MiddlewareError::ObjectNotFound(identity.clone()))?;
        servant.deliver(inbound).await;
        Ok(())
    }
}

impl Connection for LoopbackConnection {
    fn set_heartbeat(&self, interval: Duration, mode: HeartbeatMode) {
        let Ok(hub) = self.hub() else {
            return;
        };
        hub.record_heartbeat_config(interval, mode);

        let mut slot = self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
        if mode == HeartbeatMode::Off || interval.is_zero() || self.is_closed() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let hub = Arc::downgrade(&hub);
        *slot = Some(runtime.spawn(async move {
            // Beat twice per timeout period so one late beat is harmless.
            let mut ticker = tokio::time::interval((interval / 2).max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.record_heartbeat();
            }
        }));
    }

    fn set_close_callback(&self, callback: Option<CloseCallback>) {
        *self
            .close_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn set_adapter(&self, adapter: Arc<dyn ObjectAdapter>) {
        *self.adapter.lock().unwrap_or_else(PoisonError::into_inner) = Some(adapter);
    }
}

/// Object adapter of the loopback middleware.
pub struct LoopbackAdapter {
    servants: RwLock<HashMap<Identity, Arc<dyn CallbackServant>>>,
    destroyed: AtomicBool,
    routed: bool,
}

impl LoopbackAdapter {
    /// Create an adapter. `routed` adapters are reached through the router.
    #[must_use]
    pub fn new(routed: bool) -> Arc<Self> {
        Arc::new(Self {
            servants: RwLock::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            routed,
        })
    }

    /// Whether the adapter was destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl ObjectAdapter for LoopbackAdapter {
    fn add(
        &self,
        servant: Arc<dyn CallbackServant>,
        identity: Identity,
    ) -> Result<EndpointRef, MiddlewareError> {
        if self.is_destroyed() {
            return Err(MiddlewareError::Adapter("adapter destroyed".to_string()));
        }
        let mut servants = self.servants.write().unwrap_or_else(PoisonError::into_inner);
        if servants.contains_key(&identity) {
            return Err(MiddlewareError::AlreadyRegistered(identity));
        }
        servants.insert(identity.clone(), servant);
        Ok(EndpointRef {
            identity,
            routed: self.routed,
        })
    }

    fn find(&self, identity: &Identity) -> Option<Arc<dyn CallbackServant>> {
        if self.is_destroyed() {
            return None;
        }
        self.servants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.servants
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }
}

/// Servant that records deliveries, for tests.
#[derive(Default)]
pub struct RecordingServant {
    received: Mutex<Vec<Inbound>>,
}

impl RecordingServant {
    /// Deliveries received so far.
    #[must_use]
    pub fn received(&self) -> Vec<Inbound> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CallbackServant for RecordingServant {
    async fn deliver(&self, inbound: Inbound) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(inbound);
    }
}
