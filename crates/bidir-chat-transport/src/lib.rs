//! User-facing surfaces for chat clients.
//!
//! Provides:
//! - Wire protocol (JSON) spoken with the browser
//! - Terminal bridge (feature: terminal)
//! - WebSocket transport (feature: websocket)

pub mod protocol;

#[cfg(feature = "terminal")]
pub mod terminal;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};
