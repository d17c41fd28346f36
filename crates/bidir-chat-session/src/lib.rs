//! Session-backed bidirectional chat clients.
//!
//! Provides:
//! - `SessionNegotiator` - Credential exchange with unbounded retry on refusal
//! - `CallbackEndpoint` - Router-bound servant registration
//! - `SessionKeeper` - Heartbeats and connection-loss notification
//! - `InteractiveLoop` - Ordered command dispatch
//! - `RuntimeGuard` - Exactly-once middleware teardown
//! - `ChatClient` / `CallbackClient` - The complete client flows
//! - `HelloClient` / `LatencyClient` - Greeting menu and ping timing
//! - `loopback` - In-process middleware (feature `loopback`)

pub mod client;
pub mod endpoint;
pub mod hello;
pub mod interactive;
pub mod keeper;
pub mod latency;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod negotiator;
pub mod runtime;
pub mod state;

use bidir_chat_core::ClientEvent;

/// Where a client sends everything its surface should show.
pub type EventSink = tokio::sync::mpsc::UnboundedSender<ClientEvent>;

pub use client::{
    CallbackClient, ChatClient, ClientConfig, ClientError, ClientIo, DEFAULT_BANNER,
    DEFAULT_COMMAND_PROMPT, ExitStatus,
};
pub use endpoint::{CALLBACK_NAME, CallbackEndpoint, EndpointError, InboxServant};
pub use hello::{HELLO_MENU, HELLO_PROMPT, HelloClient, HelloCommand};
pub use interactive::{InteractiveLoop, LoopChannels, LoopExit, LoopState};
pub use keeper::SessionKeeper;
pub use latency::{DEFAULT_REPETITIONS, LatencyClient, LatencyReport};
pub use negotiator::{
    AuthOutcome, CredentialPrompt, InputPrompt, Negotiated, NegotiationError, SessionNegotiator,
};
pub use runtime::{RuntimeError, RuntimeGuard};
pub use state::{SessionStateMachine, TransitionError};
