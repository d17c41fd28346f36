//! Menu-driven greeting client.

use std::{future::Future, sync::Arc, time::Duration};

use bidir_chat_core::{
    ClientEvent, GatewayEndpoint, HelloProxy, Input, InvocationMode, Middleware, MiddlewareError,
    RuntimeConfig,
};

use crate::{ClientError, ClientIo, EventSink, ExitStatus, RuntimeGuard};

/// Menu listing every command.
pub const HELLO_MENU: &str = "usage:
t: send greeting as twoway
o: send greeting as oneway
O: send greeting as batch oneway
f: flush all batch requests
T: set a timeout
P: set a server delay
s: shutdown server
x: exit
?: help
";

/// Prompt shown while waiting for a command.
pub const HELLO_PROMPT: &str = "==> ";

/// Invocation timeout switched on by `T`.
pub const INVOCATION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Server delay switched on by `P`.
pub const SERVER_DELAY: Duration = Duration::from_millis(2500);

/// One menu command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloCommand {
    Greet(InvocationMode),
    Flush,
    ToggleTimeout,
    ToggleDelay,
    Shutdown,
    Exit,
    Help,
    Unknown(String),
}

impl HelloCommand {
    /// Parse one input line. Commands are single, case-sensitive letters.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "t" => Self::Greet(InvocationMode::Twoway),
            "o" => Self::Greet(InvocationMode::Oneway),
            "O" => Self::Greet(InvocationMode::BatchOneway),
            "f" => Self::Flush,
            "T" => Self::ToggleTimeout,
            "P" => Self::ToggleDelay,
            "s" => Self::Shutdown,
            "x" => Self::Exit,
            "?" => Self::Help,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Per-run invocation settings.
struct Invoker {
    proxy: Arc<dyn HelloProxy>,
    timeout: Option<Duration>,
    delay: Duration,
}

impl Invoker {
    fn new(proxy: Arc<dyn HelloProxy>) -> Self {
        Self {
            proxy,
            timeout: None,
            delay: Duration::ZERO,
        }
    }

    async fn invoke<Fut>(&self, call: Fut) -> Result<(), MiddlewareError>
    where
        Fut: Future<Output = Result<(), MiddlewareError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| MiddlewareError::Timeout(limit))?,
            None => call.await,
        }
    }

    /// Carry out `command`, reporting on `events`.
    async fn apply(
        &mut self,
        command: HelloCommand,
        events: &EventSink,
    ) -> Result<(), MiddlewareError> {
        match command {
            HelloCommand::Greet(mode) => {
                self.invoke(self.proxy.say_hello(mode, self.delay)).await?;
            }
            HelloCommand::Flush => self.invoke(self.proxy.flush_batch()).await?,
            HelloCommand::Shutdown => self.invoke(self.proxy.shutdown()).await?,
            HelloCommand::ToggleTimeout => {
                self.timeout = match self.timeout {
                    Some(_) => None,
                    None => Some(INVOCATION_TIMEOUT),
                };
                let text = match self.timeout {
                    Some(limit) => format!("timeout is now set to {}ms", limit.as_millis()),
                    None => "timeout is now switched off".to_string(),
                };
                let _ = events.send(ClientEvent::notice(text));
            }
            HelloCommand::ToggleDelay => {
                self.delay = if self.delay.is_zero() {
                    SERVER_DELAY
                } else {
                    Duration::ZERO
                };
                let text = if self.delay.is_zero() {
                    "server delay is now deactivated".to_string()
                } else {
                    format!("server delay is now set to {}ms", self.delay.as_millis())
                };
                let _ = events.send(ClientEvent::notice(text));
            }
            HelloCommand::Help => {
                let _ = events.send(ClientEvent::notice(""));
                let _ = events.send(ClientEvent::notice(HELLO_MENU));
            }
            HelloCommand::Unknown(line) => {
                let _ = events.send(ClientEvent::notice(format!("unknown command `{line}'")));
                let _ = events.send(ClientEvent::notice(""));
                let _ = events.send(ClientEvent::notice(HELLO_MENU));
            }
            HelloCommand::Exit => {}
        }
        Ok(())
    }
}

/// Client greeting a hello server, one menu command at a time.
pub struct HelloClient {
    middleware: Arc<dyn Middleware>,
    runtime: RuntimeConfig,
    proxy: GatewayEndpoint,
}

impl HelloClient {
    /// Create a client talking to the server at `proxy`.
    #[must_use]
    pub fn new(middleware: Arc<dyn Middleware>, proxy: GatewayEndpoint) -> Self {
        Self {
            middleware,
            runtime: RuntimeConfig::default(),
            proxy,
        }
    }

    /// Replace the runtime configuration.
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Run the menu until `x`, end of input or `shutdown` resolves.
    ///
    /// A failed command is reported and the menu continues. Only a failure
    /// to reach the server ends the run with [`ExitStatus::Failure`].
    pub async fn run<F>(&self, mut io: ClientIo, shutdown: F) -> ExitStatus
    where
        F: Future<Output = ()>,
    {
        let runtime = RuntimeGuard::new();
        let result = tokio::select! {
            result = self.menu(&runtime, &mut io) => Some(result),
            () = shutdown => None,
        };
        runtime.teardown().await;
        Self::status(result, &io.events)
    }

    /// Send a single two-way greeting and tear down.
    pub async fn greet_once<F>(&self, events: EventSink, shutdown: F) -> ExitStatus
    where
        F: Future<Output = ()>,
    {
        let runtime = RuntimeGuard::new();
        let result = tokio::select! {
            result = self.greet(&runtime) => Some(result),
            () = shutdown => None,
        };
        runtime.teardown().await;
        Self::status(result, &events)
    }

    fn status(result: Option<Result<(), ClientError>>, events: &EventSink) -> ExitStatus {
        match result {
            None => {
                tracing::info!("Interrupted");
                ExitStatus::Success
            }
            Some(Ok(())) => ExitStatus::Success,
            Some(Err(e)) => {
                tracing::error!("{e}");
                let _ = events.send(ClientEvent::error(e.user_message()));
                ExitStatus::Failure
            }
        }
    }

    async fn connect(&self, runtime: &RuntimeGuard) -> Result<Arc<dyn HelloProxy>, ClientError> {
        let communicator = runtime
            .initialize(self.middleware.as_ref(), self.runtime.clone())
            .await?;
        Ok(communicator.resolve_hello(&self.proxy).await?)
    }

    async fn greet(&self, runtime: &RuntimeGuard) -> Result<(), ClientError> {
        let hello = self.connect(runtime).await?;
        hello
            .say_hello(InvocationMode::Twoway, Duration::ZERO)
            .await?;
        Ok(())
    }

    async fn menu(&self, runtime: &RuntimeGuard, io: &mut ClientIo) -> Result<(), ClientError> {
        let mut invoker = Invoker::new(self.connect(runtime).await?);
        let _ = io.events.send(ClientEvent::notice(HELLO_MENU));

        loop {
            let _ = io.events.send(ClientEvent::Prompt {
                text: HELLO_PROMPT.to_string(),
            });
            let line = match io.input.recv().await {
                None | Some(Input::Quit) => return Ok(()),
                Some(Input::Line(line)) => line,
                Some(Input::Credentials(_)) => continue,
            };
            let command = HelloCommand::parse(&line);
            if command == HelloCommand::Exit {
                return Ok(());
            }
            if let Err(e) = invoker.apply(command, &io.events).await {
                tracing::warn!("{e}");
                let _ = io.events.send(ClientEvent::error(e.to_string()));
            }
        }
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use bidir_chat_core::DEFAULT_HELLO;
    use tokio::sync::mpsc;

    use super::*;
    use crate::loopback::{LoopbackHub, LoopbackMiddleware};

    fn client(hub: &Arc<LoopbackHub>) -> HelloClient {
        HelloClient::new(
            Arc::new(LoopbackMiddleware::new(Arc::clone(hub))),
            GatewayEndpoint::parse(DEFAULT_HELLO).unwrap(),
        )
    }

    async fn run_menu(hub: &Arc<LoopbackHub>, lines: &[&str]) -> (ExitStatus, Vec<ClientEvent>) {
        let (io, input_tx, mut events_rx) = ClientIo::channel(lines.len().max(1));
        for line in lines {
            input_tx.send(Input::line(*line)).await.unwrap();
        }
        drop(input_tx);

        let status = client(hub).run(io, futures::future::pending()).await;
        (status, drain(&mut events_rx))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn notices(events: &[ClientEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Notice { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            HelloCommand::parse("t\n"),
            HelloCommand::Greet(InvocationMode::Twoway)
        );
        assert_eq!(
            HelloCommand::parse("O"),
            HelloCommand::Greet(InvocationMode::BatchOneway)
        );
        assert_eq!(HelloCommand::parse("T"), HelloCommand::ToggleTimeout);
        assert_eq!(HelloCommand::parse("x"), HelloCommand::Exit);
        assert_eq!(HelloCommand::parse("X"), HelloCommand::Unknown("X".into()));
        assert_eq!(HelloCommand::parse(""), HelloCommand::Unknown(String::new()));
    }

    #[tokio::test]
    async fn test_greetings_in_every_mode() {
        let hub = LoopbackHub::new();
        let (status, events) = run_menu(&hub, &["t", "o", "O", "O", "f", "x", "t"]).await;

        assert_eq!(status, ExitStatus::Success);
        assert_eq!(
            hub.greetings(),
            vec![
                InvocationMode::Twoway,
                InvocationMode::Oneway,
                InvocationMode::BatchOneway,
                InvocationMode::BatchOneway,
            ]
        );
        assert_eq!(notices(&events).first(), Some(&HELLO_MENU));
        assert!(!events.iter().any(|e| matches!(e, ClientEvent::Error { .. })));
        assert_eq!(hub.destroyed_communicators(), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_repeats_menu() {
        let hub = LoopbackHub::new();
        let (status, events) = run_menu(&hub, &["hello"]).await;

        assert_eq!(status, ExitStatus::Success);
        assert_eq!(
            notices(&events),
            vec![HELLO_MENU, "unknown command `hello'", "", HELLO_MENU]
        );
        assert!(hub.greetings().is_empty());
    }

    #[tokio::test]
    async fn test_toggles_report_settings() {
        let hub = LoopbackHub::new();
        let (_, events) = run_menu(&hub, &["T", "P", "T", "P"]).await;

        assert_eq!(
            notices(&events)[1..],
            [
                "timeout is now set to 2000ms",
                "server delay is now set to 2500ms",
                "timeout is now switched off",
                "server delay is now deactivated",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_shorter_than_server_delay() {
        let hub = LoopbackHub::new();
        let (status, events) = run_menu(&hub, &["P", "T", "t", "P", "t"]).await;

        assert_eq!(status, ExitStatus::Success);
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::Error { .. }))
            .collect();
        assert_eq!(
            errors,
            vec![&ClientEvent::error(
                MiddlewareError::Timeout(INVOCATION_TIMEOUT).to_string()
            )]
        );
        assert_eq!(hub.greetings().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_then_greeting_fails_but_menu_continues() {
        let hub = LoopbackHub::new();
        let (status, events) = run_menu(&hub, &["s", "t", "?"]).await;

        assert_eq!(status, ExitStatus::Success);
        assert!(!hub.is_serving());
        let target = GatewayEndpoint::parse(DEFAULT_HELLO).unwrap().to_string();
        assert!(events.contains(&ClientEvent::error(
            MiddlewareError::ConnectFailed(target).to_string()
        )));
        assert_eq!(notices(&events).last(), Some(&HELLO_MENU));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_once() {
        let hub = LoopbackHub::new();
        hub.set_reachable(false);
        let (status, events) = run_menu(&hub, &["t"]).await;

        assert_eq!(status, ExitStatus::Failure);
        assert_eq!(
            events,
            vec![ClientEvent::error("connection to server failed")]
        );
        assert_eq!(hub.destroyed_communicators(), 1);
    }

    #[tokio::test]
    async fn test_greet_once() {
        let hub = LoopbackHub::new();
        let (events, mut events_rx) = mpsc::unbounded_channel();

        let status = client(&hub)
            .greet_once(events, futures::future::pending())
            .await;

        assert_eq!(status, ExitStatus::Success);
        assert_eq!(hub.greetings(), vec![InvocationMode::Twoway]);
        assert!(drain(&mut events_rx).is_empty());
        assert_eq!(hub.destroyed_communicators(), 1);
    }
}
