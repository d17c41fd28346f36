//! Client drivers tying negotiation, callbacks, keep-alive and the
//! interactive loop together.

use std::{future::Future, sync::Arc};

use bidir_chat_core::{
    ClientEvent, GatewayEndpoint, Inbox, Input, Middleware, MiddlewareError, RuntimeConfig,
};
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::{
    EventSink, RuntimeGuard, SessionKeeper, SessionStateMachine,
    endpoint::{CallbackEndpoint, EndpointError, InboxServant},
    interactive::{InteractiveLoop, LoopChannels, LoopExit},
    negotiator::{InputPrompt, Negotiated, NegotiationError, SessionNegotiator},
    runtime::RuntimeError,
    state::TransitionError,
};

/// Banner shown before the credential prompts.
pub const DEFAULT_BANNER: &str = "This demo accepts any user-id / password combination.";

/// Prompt shown while waiting for a chat line.
pub const DEFAULT_COMMAND_PROMPT: &str = "==> ";

/// Client error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
    #[error(transparent)]
    State(#[from] TransitionError),
}

impl ClientError {
    /// Text shown to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.middleware_error() {
            Some(MiddlewareError::ConnectFailed(_)) => "connection to server failed".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the user walked away from the sign-in prompt.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Negotiation(NegotiationError::Aborted))
    }

    fn middleware_error(&self) -> Option<&MiddlewareError> {
        match self {
            Self::Runtime(RuntimeError::Middleware(e))
            | Self::Negotiation(NegotiationError::Gateway(e) | NegotiationError::Fatal(e))
            | Self::Endpoint(EndpointError::Register(e) | EndpointError::Attach(e))
            | Self::Middleware(e) => Some(e),
            _ => None,
        }
    }
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Quit, end of input or interrupt.
    Success,
    /// Unrecovered error.
    Failure,
}

impl ExitStatus {
    /// Numeric exit code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Handed to the middleware.
    pub runtime: RuntimeConfig,
    /// Notice shown before the credential prompts.
    pub banner: Option<String>,
    /// Prompt emitted each time a chat line is awaited.
    pub command_prompt: Option<String>,
    /// End the session when the connection is lost.
    pub end_on_connection_loss: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(RuntimeConfig::default_routed().unwrap_or_default())
    }
}

impl ClientConfig {
    /// Create a configuration with the default banner and prompt.
    #[must_use]
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self {
            runtime,
            banner: Some(DEFAULT_BANNER.to_string()),
            command_prompt: Some(DEFAULT_COMMAND_PROMPT.to_string()),
            end_on_connection_loss: false,
        }
    }

    /// Route through `router`.
    #[must_use]
    pub fn with_router(mut self, router: GatewayEndpoint) -> Self {
        self.runtime.default_router = Some(router);
        self
    }

    /// Set or clear the banner.
    #[must_use]
    pub fn with_banner(mut self, banner: Option<String>) -> Self {
        self.banner = banner;
        self
    }

    /// Set or clear the command prompt.
    #[must_use]
    pub fn with_command_prompt(mut self, prompt: Option<String>) -> Self {
        self.command_prompt = prompt;
        self
    }

    /// End the session when the connection is lost.
    #[must_use]
    pub const fn end_on_connection_loss(mut self, end: bool) -> Self {
        self.end_on_connection_loss = end;
        self
    }
}

/// Channels connecting a client to its surface.
pub struct ClientIo {
    /// Typed input from the user.
    pub input: mpsc::Receiver<Input>,
    /// Everything the surface should show.
    pub events: EventSink,
}

impl ClientIo {
    /// Create client channels. Returns the client side plus the surface's
    /// input sender and event receiver.
    #[must_use]
    pub fn channel(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Sender<Input>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let (input_tx, input) = mpsc::channel(capacity);
        let (events, events_rx) = mpsc::unbounded_channel();
        (Self { input, events }, input_tx, events_rx)
    }
}

/// Session-backed chat client.
///
/// Runs the whole flow: runtime initialization, credential negotiation,
/// callback registration, keep-alive and the interactive loop. The runtime
/// is torn down exactly once whichever way the run ends.
pub struct ChatClient {
    middleware: Arc<dyn Middleware>,
    config: ClientConfig,
}

impl ChatClient {
    /// Create a client.
    #[must_use]
    pub fn new(middleware: Arc<dyn Middleware>, config: ClientConfig) -> Self {
        Self { middleware, config }
    }

    /// Run until quit, end of input, fatal error or `shutdown` resolves.
    pub async fn run<F>(&self, mut io: ClientIo, shutdown: F) -> ExitStatus
    where
        F: Future<Output = ()>,
    {
        let runtime = RuntimeGuard::new();
        let mut state = SessionStateMachine::new(Some(io.events.clone()));

        let result = tokio::select! {
            result = self.session(&runtime, &mut state, &mut io) => Some(result),
            () = shutdown => None,
        };
        runtime.teardown().await;

        match result {
            None => {
                tracing::info!("Interrupted");
                let _ = state.disconnect();
                ExitStatus::Success
            }
            Some(Ok(LoopExit::ConnectionLost)) => ExitStatus::Failure,
            Some(Ok(exit)) => {
                tracing::debug!(?exit, "Session ended");
                ExitStatus::Success
            }
            Some(Err(e)) if e.is_abort() => {
                tracing::debug!("Sign-in abandoned");
                let _ = state.disconnect();
                ExitStatus::Success
            }
            Some(Err(e)) => {
                tracing::error!("{e}");
                let message = e.user_message();
                let _ = io.events.send(ClientEvent::Error {
                    message: message.clone(),
                });
                state.fail(message);
                ExitStatus::Failure
            }
        }
    }

    async fn session(
        &self,
        runtime: &RuntimeGuard,
        state: &mut SessionStateMachine,
        io: &mut ClientIo,
    ) -> Result<LoopExit, ClientError> {
        state.begin_connect()?;
        let communicator = runtime
            .initialize(self.middleware.as_ref(), self.config.runtime.clone())
            .await?;

        let Negotiated {
            gateway,
            session,
            attempts,
        } = {
            let mut prompt =
                InputPrompt::new(&mut io.input, &io.events, self.config.banner.as_deref())
                    .with_state(&mut *state);
            SessionNegotiator::new(Arc::clone(&communicator))
                .negotiate(&mut prompt)
                .await?
        };
        tracing::info!(attempts, "Session established");

        let (timeout, category, adapter) = tokio::try_join!(
            gateway.idle_timeout(),
            gateway.client_category(),
            communicator.create_router_adapter(gateway.as_ref()),
        )?;

        let (inbox, mut inbound) = Inbox::channel();
        let endpoint = CallbackEndpoint::register(adapter, &category, InboxServant::new(inbox))?;
        endpoint.attach(session.as_ref()).await?;

        let connection = gateway.connection().ok_or(MiddlewareError::ConnectionLost)?;
        let mut keeper = SessionKeeper::new(connection);
        keeper.configure_keep_alive(timeout);
        let (lost_tx, mut lost) = mpsc::unbounded_channel();
        keeper.on_connection_lost(move || {
            let _ = lost_tx.send(());
        });

        state.connected()?;

        let exit = InteractiveLoop::new(
            session.as_ref(),
            &keeper,
            runtime,
            &io.events,
        )
        .with_prompt(self.config.command_prompt.clone())
        .end_on_connection_loss(self.config.end_on_connection_loss)
        .run(LoopChannels {
            input: &mut io.input,
            inbound: &mut inbound,
            lost: &mut lost,
        })
        .await;

        if exit == LoopExit::ConnectionLost {
            state.fail("Connection lost");
        } else {
            state.disconnect()?;
        }
        Ok(exit)
    }
}

/// Client that receives callbacks from a sender it calls directly.
///
/// The receiver's adapter is bound to the outgoing connection, so the
/// sender calls back without dialing the client.
pub struct CallbackClient {
    middleware: Arc<dyn Middleware>,
    runtime: RuntimeConfig,
    sender: GatewayEndpoint,
}

impl CallbackClient {
    /// Create a client calling `sender`.
    #[must_use]
    pub fn new(middleware: Arc<dyn Middleware>, sender: GatewayEndpoint) -> Self {
        Self {
            middleware,
            runtime: RuntimeConfig::default(),
            sender,
        }
    }

    /// Replace the runtime configuration.
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Report callbacks on `events` until `shutdown` resolves or the
    /// connection goes away.
    pub async fn run<F>(&self, events: EventSink, shutdown: F) -> ExitStatus
    where
        F: Future<Output = ()>,
    {
        let runtime = RuntimeGuard::new();

        let result = tokio::select! {
            result = self.receive(&runtime, &events) => Some(result),
            () = shutdown => None,
        };
        runtime.teardown().await;

        match result {
            None | Some(Ok(())) => ExitStatus::Success,
            Some(Err(e)) => {
                tracing::error!("{e}");
                let _ = events.send(ClientEvent::Error {
                    message: e.user_message(),
                });
                ExitStatus::Failure
            }
        }
    }

    async fn receive(&self, runtime: &RuntimeGuard, events: &EventSink) -> Result<(), ClientError> {
        let communicator = runtime
            .initialize(self.middleware.as_ref(), self.runtime.clone())
            .await?;
        let sender = communicator.resolve_sender(&self.sender).await?;
        let adapter = communicator.create_adapter().await?;

        let (inbox, mut inbound) = Inbox::channel();
        let endpoint = CallbackEndpoint::register_with_uuid(adapter, InboxServant::new(inbox))?;

        let connection = sender.connection().ok_or(MiddlewareError::ConnectionLost)?;
        connection.set_adapter(Arc::clone(endpoint.adapter()));
        let keeper = SessionKeeper::new(connection);
        let (lost_tx, mut lost) = mpsc::unbounded_channel();
        keeper.on_connection_lost(move || {
            let _ = lost_tx.send(());
        });

        endpoint.attach_to_sender(sender.as_ref()).await?;
        tracing::info!(identity = %endpoint.identity(), "Waiting for callbacks");

        loop {
            tokio::select! {
                biased;

                Some(()) = lost.recv() => {
                    let _ = events.send(ClientEvent::ConnectionLost);
                    return Err(MiddlewareError::ConnectionLost.into());
                }
                delivery = inbound.next() => match delivery {
                    Some(received) => {
                        let _ = events.send(received.into());
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}
