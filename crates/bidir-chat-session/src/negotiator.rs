//! Session negotiation against the routing gateway.

use std::sync::Arc;

use async_trait::async_trait;
use bidir_chat_core::{
    ClientEvent, Communicator, CreateSessionError, Credentials, GatewayProxy, Input,
    MiddlewareError, SessionProxy, SessionState,
};
use tokio::sync::mpsc;

use crate::{EventSink, SessionStateMachine};

/// Outcome of one negotiation attempt.
pub enum AuthOutcome {
    /// Session created.
    Ok(Arc<dyn SessionProxy>),
    /// Credentials refused. Recoverable.
    PermissionDenied(String),
    /// Gateway could not create the session. Recoverable.
    CannotCreate(String),
    /// Anything else. Not recoverable.
    Fatal(MiddlewareError),
}

impl AuthOutcome {
    /// Message shown to the user when the attempt may be retried.
    #[must_use]
    pub fn refusal_message(&self) -> Option<String> {
        match self {
            Self::PermissionDenied(reason) => Some(format!("permission denied:\n{reason}")),
            Self::CannotCreate(reason) => Some(format!("cannot create session:\n{reason}")),
            Self::Ok(_) | Self::Fatal(_) => None,
        }
    }
}

impl From<Result<Arc<dyn SessionProxy>, CreateSessionError>> for AuthOutcome {
    fn from(result: Result<Arc<dyn SessionProxy>, CreateSessionError>) -> Self {
        match result {
            Ok(session) => Self::Ok(session),
            Err(CreateSessionError::PermissionDenied { reason }) => Self::PermissionDenied(reason),
            Err(CreateSessionError::CannotCreateSession { reason }) => Self::CannotCreate(reason),
            Err(CreateSessionError::Transport(e)) => Self::Fatal(e),
        }
    }
}

/// Negotiation error.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("Routing gateway unavailable: {0}")]
    Gateway(MiddlewareError),
    #[error("Session negotiation failed: {0}")]
    Fatal(MiddlewareError),
    #[error("Sign-in abandoned")]
    Aborted,
}

/// Source of credentials for the retry loop.
#[async_trait]
pub trait CredentialPrompt: Send {
    /// Ask for credentials. `None` means the user gave up.
    async fn credentials(&mut self) -> Option<Credentials>;

    /// Report a recoverable refusal before the next prompt.
    fn refused(&mut self, message: &str);
}

/// Successful negotiation.
pub struct Negotiated {
    /// Checked gateway proxy.
    pub gateway: Arc<dyn GatewayProxy>,
    /// The new session.
    pub session: Arc<dyn SessionProxy>,
    /// Number of `create_session` calls it took.
    pub attempts: u32,
}

/// Obtains a session from the routing gateway.
pub struct SessionNegotiator {
    communicator: Arc<dyn Communicator>,
}

impl SessionNegotiator {
    /// Create a negotiator for the given communicator.
    #[must_use]
    pub fn new(communicator: Arc<dyn Communicator>) -> Self {
        Self { communicator }
    }

    /// Resolve and check the router.
    ///
    /// # Errors
    /// Returns error if the router is unreachable or not a gateway. Never
    /// worth retrying.
    pub async fn gateway(&self) -> Result<Arc<dyn GatewayProxy>, NegotiationError> {
        let gateway = self
            .communicator
            .resolve_gateway()
            .await
            .map_err(NegotiationError::Gateway)?;
        gateway.check().await.map_err(NegotiationError::Gateway)?;
        Ok(gateway)
    }

    /// Make one attempt.
    pub async fn attempt(gateway: &dyn GatewayProxy, credentials: &Credentials) -> AuthOutcome {
        tracing::debug!(user = %credentials.id, "Creating session");
        gateway.create_session(credentials).await.into()
    }

    /// Negotiate until the gateway accepts or the prompt gives up.
    ///
    /// Refusals are reported through the prompt and retried without limit.
    ///
    /// # Errors
    /// Returns error on an unreachable gateway, a fatal failure, or when
    /// the prompt yields no more credentials.
    pub async fn negotiate(
        &self,
        prompt: &mut dyn CredentialPrompt,
    ) -> Result<Negotiated, NegotiationError> {
        let gateway = self.gateway().await?;
        let mut attempts = 0u32;

        loop {
            let credentials = prompt.credentials().await.ok_or(NegotiationError::Aborted)?;
            attempts = attempts.saturating_add(1);

            let message = match Self::attempt(gateway.as_ref(), &credentials).await {
                AuthOutcome::Ok(session) => {
                    return Ok(Negotiated {
                        gateway,
                        session,
                        attempts,
                    });
                }
                AuthOutcome::Fatal(e) => return Err(NegotiationError::Fatal(e)),
                refused => refused.refusal_message().unwrap_or_default(),
            };
            tracing::info!(attempts, "Session refused: {message}");
            prompt.refused(&message);
        }
    }
}

/// Prompt reading credentials from a surface's input channel.
///
/// A `Credentials` input is used as is. Otherwise two lines are read, the
/// user id and the password, with a prompt event before each.
///
/// With a state machine attached, a refusal fails it to `Disconnected` and
/// the next submission starts connecting again.
pub struct InputPrompt<'a> {
    input: &'a mut mpsc::Receiver<Input>,
    events: &'a EventSink,
    banner: Option<&'a str>,
    state: Option<&'a mut SessionStateMachine>,
}

impl<'a> InputPrompt<'a> {
    /// Create a prompt over an input channel.
    pub fn new(
        input: &'a mut mpsc::Receiver<Input>,
        events: &'a EventSink,
        banner: Option<&'a str>,
    ) -> Self {
        Self {
            input,
            events,
            banner,
            state: None,
        }
    }

    /// Drive `state` through refusals and resubmissions.
    #[must_use]
    pub fn with_state(mut self, state: &'a mut SessionStateMachine) -> Self {
        self.state = Some(state);
        self
    }

    async fn read_credentials(&mut self) -> Option<Credentials> {
        if let Some(banner) = self.banner {
            let _ = self.events.send(ClientEvent::notice(banner));
        }

        let id = match self.line("user id: ").await? {
            LineOrCredentials::Credentials(credentials) => return Some(credentials),
            LineOrCredentials::Line(id) => id,
        };
        let secret = match self.line("password: ").await? {
            LineOrCredentials::Credentials(credentials) => return Some(credentials),
            LineOrCredentials::Line(secret) => secret,
        };
        Some(Credentials::new(id, secret))
    }

    async fn line(&mut self, prompt: &str) -> Option<LineOrCredentials> {
        let _ = self.events.send(ClientEvent::Prompt {
            text: prompt.to_string(),
        });
        match self.input.recv().await? {
            Input::Line(line) => Some(LineOrCredentials::Line(line.trim().to_string())),
            Input::Credentials(credentials) => Some(LineOrCredentials::Credentials(credentials)),
            Input::Quit => None,
        }
    }
}

enum LineOrCredentials {
    Line(String),
    Credentials(Credentials),
}

#[async_trait]
impl<'a> CredentialPrompt for InputPrompt<'a> {
    async fn credentials(&mut self) -> Option<Credentials> {
        let credentials = self.read_credentials().await?;
        if let Some(state) = self.state.as_deref_mut() {
            if state.state() == SessionState::Disconnected {
                let _ = state.begin_connect();
            }
        }
        Some(credentials)
    }

    fn refused(&mut self, message: &str) {
        let _ = self.events.send(ClientEvent::AuthRefused {
            message: message.to_string(),
        });
        if let Some(state) = self.state.as_deref_mut() {
            state.fail(message);
        }
    }
}
