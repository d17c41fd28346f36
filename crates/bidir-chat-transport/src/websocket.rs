//! WebSocket transport for browser chat clients.
//!
//! Every socket drives its own [`ChatClient`]. A client is started by the
//! first `sign_in` and lives until sign-out, a fatal error or loss of the
//! gateway connection; the next `sign_in` on the same socket starts a new
//! one.

use std::{
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, header, uri::Authority},
    response::IntoResponse,
};
use bidir_chat_core::{ClientEvent, GatewayEndpoint, Input, Middleware, SessionState};
use bidir_chat_session::{ChatClient, ClientConfig, ClientIo, ExitStatus};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Middleware every client runs on.
    pub middleware: Arc<dyn Middleware>,
    /// Base client configuration.
    pub config: ClientConfig,
    /// Fixed router. When unset, the router is derived from the page origin.
    pub router: Option<GatewayEndpoint>,
    /// Whether the page is served over a secure origin.
    pub secure: bool,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(middleware: Arc<dyn Middleware>) -> Self {
        Self {
            middleware,
            config: ClientConfig::default()
                .with_banner(None)
                .with_command_prompt(None)
                .end_on_connection_loss(true),
            router: None,
            secure: false,
        }
    }

    /// Use a fixed router.
    #[must_use]
    pub fn with_router(mut self, router: Option<GatewayEndpoint>) -> Self {
        self.router = router;
        self
    }

    /// Mark the origin as secure.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Client configuration for a socket opened from `hostname`.
    #[must_use]
    pub fn client_config(&self, hostname: Option<&str>) -> ClientConfig {
        let router = self
            .router
            .clone()
            .unwrap_or_else(|| GatewayEndpoint::for_origin(self.secure, hostname));
        self.config.clone().with_router(router)
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> impl IntoResponse {
    let hostname = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(host_name);
    let config = state.client_config(hostname.as_deref());
    let id = Uuid::new_v4();
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, config).instrument(tracing::info_span!("socket", %id))
    })
}

/// Host part of a `Host` header value, without port or IPv6 brackets.
fn host_name(header: &str) -> Option<String> {
    let authority = Authority::from_str(header).ok()?;
    let host = authority.host();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some(host.to_string())
}

/// Client started by a sign-in.
struct ActiveClient {
    input: mpsc::Sender<Input>,
    signed_in: Arc<AtomicBool>,
    task: JoinHandle<ExitStatus>,
}

impl ActiveClient {
    fn start(
        state: &WsState,
        config: &ClientConfig,
        out: &mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let (io, input, mut events) = ClientIo::channel(16);
        let signed_in = Arc::new(AtomicBool::new(false));

        let forward_out = out.clone();
        let forward_flag = Arc::clone(&signed_in);
        let forward = async move {
            while let Some(event) = events.recv().await {
                if let ClientEvent::State { state } = event {
                    forward_flag.store(state == SessionState::Connected, Ordering::SeqCst);
                }
                if let Some(msg) = ServerMessage::from_event(event) {
                    if forward_out.send(msg).is_err() {
                        break;
                    }
                }
            }
        };

        let client = ChatClient::new(Arc::clone(&state.middleware), config.clone());
        let task = tokio::spawn(
            async move {
                let (status, ()) =
                    tokio::join!(client.run(io, futures::future::pending()), forward);
                tracing::debug!(?status, "Chat client finished");
                status
            }
            .in_current_span(),
        );

        Self {
            input,
            signed_in,
            task,
        }
    }

    fn is_live(&self) -> bool {
        !self.task.is_finished() && !self.input.is_closed()
    }

    fn is_signed_in(&self) -> bool {
        self.signed_in.load(Ordering::SeqCst)
    }
}

async fn handle_socket(socket: WebSocket, state: WsState, config: ClientConfig) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the browser
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut active: Option<ActiveClient> = None;

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        if client_msg == ClientMessage::Ping {
            let _ = tx.send(ServerMessage::Pong);
            continue;
        }
        let starts_client = matches!(client_msg, ClientMessage::SignIn { .. });
        let Some(input) = client_msg.into_input() else {
            continue;
        };

        let client = match active.take() {
            Some(client) if client.is_live() => client,
            _ if starts_client => ActiveClient::start(&state, &config, &tx),
            _ => {
                let _ = tx.send(ServerMessage::Error {
                    message: "not signed in".to_string(),
                });
                continue;
            }
        };

        if matches!(input, Input::Line(_)) && !client.is_signed_in() {
            let _ = tx.send(ServerMessage::Error {
                message: "not signed in".to_string(),
            });
        } else if client.input.send(input).await.is_err() {
            tracing::debug!("Client ended before input was delivered");
        }
        active = Some(client);
    }

    // Dropping the input sender ends the client, which tears down its
    // runtime before the task completes.
    if let Some(ActiveClient { input, task, .. }) = active {
        drop(input);
        if let Err(e) = task.await {
            tracing::warn!("Chat client task failed: {e}");
        }
    }
    send_task.abort();
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(WsState::new(middleware)));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}
