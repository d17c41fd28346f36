//! Middleware collaborator traits.
//!
//! The client core never speaks a wire protocol itself. Everything it needs
//! from the remote-object middleware is expressed here; an implementation
//! backs these traits with a real connection (or, for tests, an in-process
//! hub).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Credentials, EndpointRef, GatewayEndpoint, Identity, Inbound, RuntimeConfig};

/// Handler invoked when a connection closes.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// How a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// Wait for the reply.
    Twoway,
    /// Return once the request is written. No reply, no delivery guarantee.
    Oneway,
    /// Queue the request until the batch is flushed.
    BatchOneway,
}

/// When a connection emits heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatMode {
    /// Never send heartbeats.
    Off,
    /// Only while dispatching an incoming call.
    OnDispatch,
    /// Only while the connection is idle.
    OnIdle,
    /// Continuously, regardless of pending requests.
    Always,
}

/// Middleware failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MiddlewareError {
    #[error("connection to {0} failed")]
    ConnectFailed(String),
    #[error("Object is not a routing gateway: {0}")]
    NotAGateway(String),
    #[error("No router configured")]
    NoRouter,
    #[error("Connection lost")]
    ConnectionLost,
    #[error("Communicator destroyed")]
    Destroyed,
    #[error("Object adapter error: {0}")]
    Adapter(String),
    #[error("Identity already registered: {0}")]
    AlreadyRegistered(Identity),
    #[error("Object not found: {0}")]
    ObjectNotFound(Identity),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of a `create_session` call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CreateSessionError {
    /// The gateway refused the credentials.
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },
    /// The gateway accepted the credentials but could not set up a session.
    #[error("cannot create session: {reason}")]
    CannotCreateSession { reason: String },
    /// Any other failure.
    #[error(transparent)]
    Transport(#[from] MiddlewareError),
}

/// Object hosted by the client and invoked by the remote peer.
#[async_trait]
pub trait CallbackServant: Send + Sync {
    /// Handle one inbound call.
    async fn deliver(&self, inbound: Inbound);
}

/// Live connection to a remote peer.
pub trait Connection: Send + Sync {
    /// Configure heartbeats for this connection.
    fn set_heartbeat(&self, interval: Duration, mode: HeartbeatMode);

    /// Set or clear the close notification.
    ///
    /// Once cleared, a later close must not invoke the previous callback.
    fn set_close_callback(&self, callback: Option<CloseCallback>);

    /// Dispatch calls arriving on this connection to `adapter`.
    fn set_adapter(&self, adapter: Arc<dyn ObjectAdapter>);
}

/// Container of locally hosted servants.
pub trait ObjectAdapter: Send + Sync {
    /// Register a servant under `identity`.
    ///
    /// # Errors
    /// Returns error if the identity is taken or the adapter is destroyed.
    fn add(
        &self,
        servant: Arc<dyn CallbackServant>,
        identity: Identity,
    ) -> Result<EndpointRef, MiddlewareError>;

    /// Register a servant under a fresh UUID identity.
    ///
    /// # Errors
    /// Returns error if the adapter is destroyed.
    fn add_with_uuid(
        &self,
        servant: Arc<dyn CallbackServant>,
    ) -> Result<EndpointRef, MiddlewareError> {
        self.add(servant, Identity::random())
    }

    /// Look up the servant registered under `identity`.
    fn find(&self, identity: &Identity) -> Option<Arc<dyn CallbackServant>>;

    /// Deactivate the adapter and drop every servant.
    fn destroy(&self);
}

/// Authenticated session on the gateway.
#[async_trait]
pub trait SessionProxy: Send + Sync {
    /// Tell the session where to deliver server-originated messages.
    async fn set_callback(&self, callback: &EndpointRef) -> Result<(), MiddlewareError>;

    /// Send one message and wait for the acknowledgement.
    async fn send_message(&self, text: &str) -> Result<(), MiddlewareError>;

    /// Destroy the session.
    async fn destroy(&self) -> Result<(), MiddlewareError>;
}

/// Routing gateway that authenticates clients.
#[async_trait]
pub trait GatewayProxy: Send + Sync {
    /// Confirm the target really is a routing gateway.
    async fn check(&self) -> Result<(), MiddlewareError>;

    /// Authenticate and create a session.
    async fn create_session(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn SessionProxy>, CreateSessionError>;

    /// Idle timeout of sessions, in seconds. Zero or negative means never.
    async fn idle_timeout(&self) -> Result<i32, MiddlewareError>;

    /// Category reserved for this client's callback identities.
    async fn client_category(&self) -> Result<String, MiddlewareError>;

    /// Cached connection, available once a call has succeeded.
    fn connection(&self) -> Option<Arc<dyn Connection>>;
}

/// Server object that calls registered clients back.
#[async_trait]
pub trait CallbackSender: Send + Sync {
    /// Register the client's receiver.
    async fn add_client(&self, identity: &Identity) -> Result<(), MiddlewareError>;

    /// Cached connection, available once a call has succeeded.
    fn connection(&self) -> Option<Arc<dyn Connection>>;
}

/// Greeting server object.
#[async_trait]
pub trait HelloProxy: Send + Sync {
    /// Ask the server to greet, replying after `delay`.
    ///
    /// One-way requests from one proxy reach the server in the order sent.
    async fn say_hello(&self, mode: InvocationMode, delay: Duration)
    -> Result<(), MiddlewareError>;

    /// Send every queued batch request.
    async fn flush_batch(&self) -> Result<(), MiddlewareError>;

    /// Shut the server down.
    async fn shutdown(&self) -> Result<(), MiddlewareError>;
}

/// Object that only answers pings.
#[async_trait]
pub trait PingProxy: Send + Sync {
    /// Round trip with an empty request.
    async fn ping(&self) -> Result<(), MiddlewareError>;
}

/// Process-wide middleware instance.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Proxy to the configured router, unchecked.
    async fn resolve_gateway(&self) -> Result<Arc<dyn GatewayProxy>, MiddlewareError>;

    /// Proxy to a callback sender, checked.
    async fn resolve_sender(
        &self,
        proxy: &GatewayEndpoint,
    ) -> Result<Arc<dyn CallbackSender>, MiddlewareError>;

    /// Proxy to a greeting server, checked.
    async fn resolve_hello(
        &self,
        proxy: &GatewayEndpoint,
    ) -> Result<Arc<dyn HelloProxy>, MiddlewareError>;

    /// Proxy to a ping object, checked.
    async fn resolve_ping(
        &self,
        proxy: &GatewayEndpoint,
    ) -> Result<Arc<dyn PingProxy>, MiddlewareError>;

    /// Adapter whose servants are reached through the router connection.
    async fn create_router_adapter(
        &self,
        gateway: &dyn GatewayProxy,
    ) -> Result<Arc<dyn ObjectAdapter>, MiddlewareError>;

    /// Adapter without endpoints, for use with `Connection::set_adapter`.
    async fn create_adapter(&self) -> Result<Arc<dyn ObjectAdapter>, MiddlewareError>;

    /// Destroy the communicator, closing every connection.
    async fn destroy(&self) -> Result<(), MiddlewareError>;
}

/// Entry point of a middleware implementation.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Create a communicator.
    async fn initialize(
        &self,
        config: RuntimeConfig,
    ) -> Result<Arc<dyn Communicator>, MiddlewareError>;
}
