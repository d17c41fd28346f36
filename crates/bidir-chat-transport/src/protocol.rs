//! Wire protocol between the browser and the chat server.

use bidir_chat_core::{ClientEvent, Credentials, Input, SessionState};
use serde::{Deserialize, Serialize};

/// Message from browser to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sign in, or retry after a refusal.
    SignIn { username: String, password: String },
    /// Say something in the chat.
    Say { text: String },
    /// Leave the chat.
    SignOut,
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Input for the client behind the socket. `Ping` has none.
    #[must_use]
    pub fn into_input(self) -> Option<Input> {
        match self {
            Self::SignIn { username, password } => {
                Some(Input::Credentials(Credentials::new(username, password)))
            }
            Self::Say { text } => Some(Input::Line(text)),
            Self::SignOut => Some(Input::Quit),
            Self::Ping => None,
        }
    }
}

/// Message from server to browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Informational text.
    Notice { text: String },
    /// Chat line relayed by the server.
    Message { data: String },
    /// Callback invocation.
    Callback { num: i32 },
    /// Sign-in refused; the form may be resubmitted.
    AuthRefused { message: String },
    /// Session state changed.
    State { state: SessionState },
    /// Connection to the gateway lost.
    ConnectionLost,
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Map a client event to the browser. Prompts are terminal-only.
    #[must_use]
    pub fn from_event(event: ClientEvent) -> Option<Self> {
        Some(match event {
            ClientEvent::Prompt { .. } => return None,
            ClientEvent::Notice { text } => Self::Notice { text },
            ClientEvent::Message { data } => Self::Message { data },
            ClientEvent::Callback { num } => Self::Callback { num },
            ClientEvent::AuthRefused { message } => Self::AuthRefused { message },
            ClientEvent::State { state } => Self::State { state },
            ClientEvent::ConnectionLost => Self::ConnectionLost,
            ClientEvent::Error { message } => Self::Error { message },
        })
    }
}
