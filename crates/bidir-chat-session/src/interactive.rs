//! Interactive command loop.

use bidir_chat_core::{ClientEvent, Command, InboundStream, Input, SessionProxy, USAGE_HINT};
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::{EventSink, RuntimeGuard, SessionKeeper};

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for input.
    Prompting,
    /// Handling one command.
    Dispatching,
    /// Tearing down.
    Terminating,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Quit token or sign-out.
    Quit,
    /// Input source closed.
    InputClosed,
    /// Connection closed under us.
    ConnectionLost,
}

/// Channels the loop consumes.
pub struct LoopChannels<'a> {
    /// Typed input.
    pub input: &'a mut mpsc::Receiver<Input>,
    /// Deliveries from the callback endpoint.
    pub inbound: &'a mut InboundStream,
    /// Connection-loss notifications.
    pub lost: &'a mut mpsc::UnboundedReceiver<()>,
}

/// Reads commands and forwards them to the session, one at a time.
///
/// A command is awaited to completion before the next input is read, so
/// the peer sees commands in input order. Inbound deliveries are shown
/// whenever the loop is waiting for input.
pub struct InteractiveLoop<'a> {
    session: &'a dyn SessionProxy,
    keeper: &'a SessionKeeper,
    runtime: &'a RuntimeGuard,
    events: &'a EventSink,
    prompt: Option<String>,
    end_on_connection_loss: bool,
    state: LoopState,
}

impl<'a> InteractiveLoop<'a> {
    /// Create a loop for an established session.
    pub fn new(
        session: &'a dyn SessionProxy,
        keeper: &'a SessionKeeper,
        runtime: &'a RuntimeGuard,
        events: &'a EventSink,
    ) -> Self {
        Self {
            session,
            keeper,
            runtime,
            events,
            prompt: None,
            end_on_connection_loss: false,
            state: LoopState::Prompting,
        }
    }

    /// Emit a prompt event each time input is awaited.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    /// End the loop when the connection is lost instead of carrying on.
    #[must_use]
    pub const fn end_on_connection_loss(mut self, end: bool) -> Self {
        self.end_on_connection_loss = end;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// Run until quit, end of input or (if configured) connection loss.
    pub async fn run(&mut self, channels: LoopChannels<'_>) -> LoopExit {
        let LoopChannels {
            input,
            inbound,
            lost,
        } = channels;
        let mut inbound_open = true;
        let mut lost_open = true;

        self.prompting();
        loop {
            tokio::select! {
                biased;

                notice = lost.recv(), if lost_open => {
                    if notice.is_none() {
                        lost_open = false;
                        continue;
                    }
                    tracing::warn!("Connection lost");
                    self.emit(ClientEvent::ConnectionLost);
                    if self.end_on_connection_loss {
                        return self.terminate(LoopExit::ConnectionLost).await;
                    }
                }
                delivery = inbound.next(), if inbound_open => match delivery {
                    Some(received) => self.emit(received.into()),
                    None => inbound_open = false,
                },
                next = input.recv() => {
                    let Some(next) = next else {
                        return self.terminate(LoopExit::InputClosed).await;
                    };
                    self.state = LoopState::Dispatching;
                    if let Some(exit) = self.dispatch(next).await {
                        return exit;
                    }
                    self.prompting();
                }
            }
        }
    }

    async fn dispatch(&mut self, input: Input) -> Option<LoopExit> {
        let Some(command) = Option::<Command>::from(input) else {
            tracing::debug!("Ignoring credentials while signed in");
            return None;
        };

        match command {
            Command::Quit => return Some(self.terminate(LoopExit::Quit).await),
            Command::Unknown(token) => {
                tracing::debug!(%token, "Unknown control token");
                self.emit(ClientEvent::notice(USAGE_HINT));
            }
            Command::Say(text) => {
                if let Err(e) = self.session.send_message(&text).await {
                    tracing::warn!("Send failed: {e}");
                    self.emit(ClientEvent::error(e.to_string()));
                }
            }
            Command::Empty => {}
        }
        None
    }

    async fn terminate(&mut self, exit: LoopExit) -> LoopExit {
        self.state = LoopState::Terminating;
        tracing::debug!(?exit, "Terminating session");

        self.keeper.disarm();
        if exit != LoopExit::ConnectionLost {
            if let Err(e) = self.session.destroy().await {
                tracing::debug!("Ignoring failure while destroying session: {e}");
            }
        }
        self.runtime.teardown().await;
        exit
    }

    fn prompting(&mut self) {
        self.state = LoopState::Prompting;
        if let Some(ref prompt) = self.prompt {
            let _ = self.events.send(ClientEvent::Prompt {
                text: prompt.clone(),
            });
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}
