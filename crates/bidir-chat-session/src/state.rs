//! Client session state machine.

use bidir_chat_core::{ClientEvent, SessionState};

use crate::EventSink;

/// Rejected state transition.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Cannot {event} while {from:?}")]
pub struct TransitionError {
    /// State the machine was in.
    pub from: SessionState,
    /// Attempted transition.
    pub event: &'static str,
}

/// Disconnected → Connecting → Connected, and back.
///
/// Every transition is published on the event sink, if any.
pub struct SessionStateMachine {
    state: SessionState,
    error: Option<String>,
    events: Option<EventSink>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionStateMachine {
    /// Create a machine in `Disconnected`.
    #[must_use]
    pub const fn new(events: Option<EventSink>) -> Self {
        Self {
            state: SessionState::Disconnected,
            error: None,
            events,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the last disconnect was caused by an error.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// The error that caused the last disconnect.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Start signing in. Dismisses any previous error.
    ///
    /// # Errors
    /// Returns error unless `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), TransitionError> {
        self.require(SessionState::Disconnected, "connect")?;
        self.error = None;
        self.enter(SessionState::Connecting);
        Ok(())
    }

    /// Session established.
    ///
    /// # Errors
    /// Returns error unless `Connecting`.
    pub fn connected(&mut self) -> Result<(), TransitionError> {
        self.require(SessionState::Connecting, "finish connecting")?;
        self.enter(SessionState::Connected);
        Ok(())
    }

    /// Orderly sign-out.
    ///
    /// # Errors
    /// Returns error if already `Disconnected`.
    pub fn disconnect(&mut self) -> Result<(), TransitionError> {
        if self.state == SessionState::Disconnected {
            return Err(TransitionError {
                from: self.state,
                event: "disconnect",
            });
        }
        self.enter(SessionState::Disconnected);
        Ok(())
    }

    /// Drop to `Disconnected` because of `reason`. Valid from any state.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.enter(SessionState::Disconnected);
    }

    fn require(&self, state: SessionState, event: &'static str) -> Result<(), TransitionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.state,
                event,
            })
        }
    }

    fn enter(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?state, "Session state change");
        self.state = state;
        if let Some(ref events) = self.events {
            let _ = events.send(ClientEvent::State { state });
        }
    }
}
