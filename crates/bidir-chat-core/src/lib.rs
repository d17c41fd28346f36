//! Core abstractions for session-backed bidirectional RPC clients.
//!
//! This crate provides the fundamental building blocks:
//! - Middleware collaborator traits (`Communicator`, `GatewayProxy`, ...)
//! - `Identity`, `Credentials`, `EndpointRef`
//! - `GatewayEndpoint` / `RuntimeConfig` configuration
//! - `Inbox` - Ordered queue for inbound deliveries
//! - `ClientEvent` and `Command` for user-facing surfaces

pub mod command;
pub mod config;
pub mod event;
pub mod identity;
pub mod inbox;
pub mod traits;

pub use command::{Command, Input, QUIT_TOKEN, USAGE_HINT};
pub use config::{
    ConfigError, DEFAULT_HELLO, DEFAULT_PING, DEFAULT_ROUTER, DEFAULT_SENDER, GatewayEndpoint,
    RuntimeConfig, TransportScheme,
};
pub use event::{ClientEvent, Inbound, SessionState};
pub use identity::{Credentials, EndpointRef, Identity};
pub use inbox::{Inbox, InboundStream};
pub use traits::{
    CallbackSender, CallbackServant, CloseCallback, Communicator, Connection, CreateSessionError,
    GatewayProxy, HeartbeatMode, HelloProxy, InvocationMode, Middleware, MiddlewareError,
    ObjectAdapter, PingProxy, SessionProxy,
};
