//! Inbound deliveries and client events.

use serde::{Deserialize, Serialize};

/// One call from the remote peer to a callback servant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Chat line relayed by the session.
    Message { data: String },
    /// Numbered callback from a callback sender.
    Callback { num: i32 },
}

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session.
    Disconnected,
    /// Negotiating or registering the callback.
    Connecting,
    /// Session established, commands accepted.
    Connected,
}

/// Something the client wants the user to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Informational line.
    Notice { text: String },
    /// Input is expected.
    Prompt { text: String },
    /// Chat line from the session.
    Message { data: String },
    /// Numbered callback.
    Callback { num: i32 },
    /// Session negotiation refused; the user may try again.
    AuthRefused { message: String },
    /// Connection closed without being asked to.
    ConnectionLost,
    /// Any other failure.
    Error { message: String },
    /// State transition.
    State { state: SessionState },
}

impl ClientEvent {
    /// Informational line.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice { text: text.into() }
    }

    /// Error line.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<Inbound> for ClientEvent {
    fn from(inbound: Inbound) -> Self {
        match inbound {
            Inbound::Message { data } => Self::Message { data },
            Inbound::Callback { num } => Self::Callback { num },
        }
    }
}
