//! Client side of the loopback middleware.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bidir_chat_core::{
    CallbackSender, Communicator, Connection, CreateSessionError, Credentials, EndpointRef,
    GatewayEndpoint, GatewayProxy, HelloProxy, Identity, InvocationMode, Middleware,
    MiddlewareError, ObjectAdapter, PingProxy, RuntimeConfig, SessionProxy,
};

use super::hub::{LoopbackAdapter, LoopbackConnection, LoopbackHub};

/// Middleware whose communicators all talk to one [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackMiddleware {
    hub: Arc<LoopbackHub>,
}

impl LoopbackMiddleware {
    /// Create a middleware bound to `hub`.
    #[must_use]
    pub const fn new(hub: Arc<LoopbackHub>) -> Self {
        Self { hub }
    }

    /// The hub behind this middleware.
    #[must_use]
    pub fn hub(&self) -> &Arc<LoopbackHub> {
        &self.hub
    }
}

#[async_trait]
impl Middleware for LoopbackMiddleware {
    async fn initialize(
        &self,
        config: RuntimeConfig,
    ) -> Result<Arc<dyn Communicator>, MiddlewareError> {
        tracing::debug!(router = ?config.default_router.as_ref().map(ToString::to_string), "Loopback communicator created");
        Ok(Arc::new(LoopbackCommunicator {
            inner: Arc::new(Shared {
                hub: Arc::clone(&self.hub),
                config,
                connection: Mutex::new(None),
                adapters: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        }))
    }
}

struct Shared {
    hub: Arc<LoopbackHub>,
    config: RuntimeConfig,
    connection: Mutex<Option<Arc<LoopbackConnection>>>,
    adapters: Mutex<Vec<Arc<LoopbackAdapter>>>,
    destroyed: AtomicBool,
}

impl Shared {
    fn connection_slot(&self) -> MutexGuard<'_, Option<Arc<LoopbackConnection>>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connection, opening one if needed. A closed connection is
    /// reported as lost rather than silently replaced.
    fn connect(&self, target: &str) -> Result<Arc<LoopbackConnection>, MiddlewareError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(MiddlewareError::Destroyed);
        }
        let mut slot = self.connection_slot();
        if let Some(ref connection) = *slot {
            connection.ensure_open()?;
            return Ok(Arc::clone(connection));
        }
        if !self.hub.is_reachable() {
            return Err(MiddlewareError::ConnectFailed(target.to_string()));
        }
        let connection = self.hub.open_connection();
        tracing::debug!(id = connection.id(), %target, "Loopback connection opened");
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn current(&self) -> Option<Arc<LoopbackConnection>> {
        self.connection_slot().clone()
    }

    fn track(&self, adapter: &Arc<LoopbackAdapter>) {
        self.adapters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(adapter));
    }
}

/// Communicator of the loopback middleware.
pub struct LoopbackCommunicator {
    inner: Arc<Shared>,
}

#[async_trait]
impl Communicator for LoopbackCommunicator {
    async fn resolve_gateway(&self) -> Result<Arc<dyn GatewayProxy>, MiddlewareError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(MiddlewareError::Destroyed);
        }
        let router = self
            .inner
            .config
            .default_router
            .as_ref()
            .ok_or(MiddlewareError::NoRouter)?;
        Ok(Arc::new(LoopbackGateway {
            inner: Arc::clone(&self.inner),
            target: router.to_string(),
        }))
    }

    async fn resolve_sender(
        &self,
        proxy: &GatewayEndpoint,
    ) -> Result<Arc<dyn CallbackSender>, MiddlewareError> {
        let connection = self.inner.connect(&proxy.to_string())?;
        Ok(Arc::new(LoopbackSender { connection }))
    }

    async fn resolve_hello(
        &self,
        proxy: &GatewayEndpoint,
    ) -> Result<Arc<dyn HelloProxy>, MiddlewareError> {
        let target = proxy.to_string();
        let connection = self.inner.connect(&target)?;
        Ok(Arc::new(LoopbackHello {
            connection,
            target,
            batched: AtomicUsize::new(0),
        }))
    }

    async fn resolve_ping(
        &self,
        proxy: &GatewayEndpoint,
    ) -> Result<Arc<dyn PingProxy>, MiddlewareError> {
        let target = proxy.to_string();
        let connection = self.inner.connect(&target)?;
        Ok(Arc::new(LoopbackPing { connection, target }))
    }

    async fn create_router_adapter(
        &self,
        gateway: &dyn GatewayProxy,
    ) -> Result<Arc<dyn ObjectAdapter>, MiddlewareError> {
        let connection = gateway.connection().ok_or(MiddlewareError::ConnectionLost)?;
        let adapter = LoopbackAdapter::new(true);
        self.inner.track(&adapter);
        connection.set_adapter(Arc::clone(&adapter) as Arc<dyn ObjectAdapter>);
        Ok(adapter)
    }

    async fn create_adapter(&self) -> Result<Arc<dyn ObjectAdapter>, MiddlewareError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(MiddlewareError::Destroyed);
        }
        let adapter = LoopbackAdapter::new(false);
        self.inner.track(&adapter);
        Ok(adapter)
    }

    async fn destroy(&self) -> Result<(), MiddlewareError> {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.hub.record_destroyed();

        let connection = self.inner.connection_slot().take();
        if let Some(connection) = connection {
            connection.close();
        }
        let adapters: Vec<_> = self
            .inner
            .adapters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for adapter in adapters {
            adapter.destroy();
        }
        tracing::debug!("Loopback communicator destroyed");
        Ok(())
    }
}

struct LoopbackGateway {
    inner: Arc<Shared>,
    target: String,
}

#[async_trait]
impl GatewayProxy for LoopbackGateway {
    async fn check(&self) -> Result<(), MiddlewareError> {
        self.inner.connect(&self.target)?;
        if self.inner.hub.is_gateway() {
            Ok(())
        } else {
            Err(MiddlewareError::NotAGateway(self.target.clone()))
        }
    }

    async fn create_session(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn SessionProxy>, CreateSessionError> {
        let connection = self.inner.connect(&self.target)?;
        let hub = connection.hub()?;
        hub.stall_if_unresponsive().await;
        let id = hub.create_session(&connection, credentials)?;
        Ok(Arc::new(LoopbackSession {
            hub,
            id,
            connection,
        }))
    }

    async fn idle_timeout(&self) -> Result<i32, MiddlewareError> {
        self.inner.connect(&self.target)?;
        Ok(self.inner.hub.idle_timeout())
    }

    async fn client_category(&self) -> Result<String, MiddlewareError> {
        let connection = self.inner.connect(&self.target)?;
        Ok(connection.category().to_string())
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.inner
            .current()
            .map(|connection| connection as Arc<dyn Connection>)
    }
}

struct LoopbackSession {
    hub: Arc<LoopbackHub>,
    id: u64,
    connection: Arc<LoopbackConnection>,
}

#[async_trait]
impl SessionProxy for LoopbackSession {
    async fn set_callback(&self, callback: &EndpointRef) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        if !callback.routed {
            return Err(MiddlewareError::Adapter(format!(
                "{} is not reachable through the router",
                callback.identity
            )));
        }
        self.hub.set_callback(self.id, callback.identity.clone())
    }

    async fn send_message(&self, text: &str) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        self.hub.stall_if_unresponsive().await;
        self.hub.say(self.id, text).await
    }

    async fn destroy(&self) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        self.hub.destroy_session(self.id)
    }
}

struct LoopbackSender {
    connection: Arc<LoopbackConnection>,
}

#[async_trait]
impl CallbackSender for LoopbackSender {
    async fn add_client(&self, identity: &Identity) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        self.connection
            .hub()?
            .add_receiver(&self.connection, identity.clone());
        tracing::debug!(%identity, "Callback receiver added");
        Ok(())
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        Some(Arc::clone(&self.connection) as Arc<dyn Connection>)
    }
}

struct LoopbackHello {
    connection: Arc<LoopbackConnection>,
    target: String,
    batched: AtomicUsize,
}

#[async_trait]
impl HelloProxy for LoopbackHello {
    async fn say_hello(
        &self,
        mode: InvocationMode,
        delay: Duration,
    ) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        match mode {
            InvocationMode::BatchOneway => {
                self.batched.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            InvocationMode::Oneway => self.connection.hub()?.greet(mode, &self.target),
            InvocationMode::Twoway => {
                self.connection.hub()?.greet(mode, &self.target)?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        }
    }

    async fn flush_batch(&self) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        let queued = self.batched.swap(0, Ordering::SeqCst);
        let hub = self.connection.hub()?;
        for _ in 0..queued {
            hub.greet(InvocationMode::BatchOneway, &self.target)?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        self.connection.hub()?.shut_down(&self.target)
    }
}

struct LoopbackPing {
    connection: Arc<LoopbackConnection>,
    target: String,
}

#[async_trait]
impl PingProxy for LoopbackPing {
    async fn ping(&self) -> Result<(), MiddlewareError> {
        self.connection.ensure_open()?;
        self.connection.hub()?.ping(&self.target)
    }
}
