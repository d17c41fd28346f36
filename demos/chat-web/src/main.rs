//! Browser chat client served over WebSocket.
//!
//! Run with: cargo run -p chat-web
//!
//! Then open http://localhost:3000 in your browser. Every tab signs in
//! separately and chats with every other tab through the loopback gateway.

use std::{net::SocketAddr, sync::Arc};

use axum::{Router, response::Html, routing::get};
use bidir_chat_core::GatewayEndpoint;
use bidir_chat_session::loopback::{LoopbackHub, LoopbackMiddleware};
use bidir_chat_transport::websocket::{WsState, create_ws_router};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "chat-web")]
#[command(about = "Browser chat client served over WebSocket")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Router proxy (derived from the page origin when unset)
    #[arg(long, env = "BIDIR_CHAT_ROUTER")]
    router: Option<GatewayEndpoint>,

    /// Page is served over https; use the secure router endpoint
    #[arg(long)]
    secure: bool,

    /// Idle timeout reported by the gateway, in seconds (0 disables heartbeats)
    #[arg(long, default_value_t = 30)]
    idle_timeout: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let hub = LoopbackHub::new();
    hub.set_idle_timeout(args.idle_timeout);
    let state = WsState::new(Arc::new(LoopbackMiddleware::new(hub)))
        .with_router(args.router)
        .with_secure(args.secure);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for interrupts: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

fn app(state: WsState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Chat</title>
    <style>
        body { font-family: sans-serif; max-width: 40em; margin: 2em auto; }
        .hidden { display: none; }
        #output { width: 100%; height: 20em; }
        #input { width: 100%; }
        #error { color: #b00; white-space: pre-line; }
    </style>
</head>
<body>
    <h1>Chat</h1>
    <div id="error"></div>

    <form id="signin-form">
        <p>This demo accepts any user-id / password combination.</p>
        <input id="username" placeholder="user id" autofocus>
        <input id="password" type="password" placeholder="password">
        <button type="submit">Sign in</button>
    </form>

    <div id="loading" class="hidden">Connecting...</div>

    <div id="chat-form" class="hidden">
        <textarea id="output" readonly></textarea>
        <input id="input" placeholder="say something">
        <button id="signout">Sign out</button>
    </div>

    <script>
        const $ = (id) => document.getElementById(id);
        const scheme = location.protocol === "https:" ? "wss://" : "ws://";
        const ws = new WebSocket(scheme + location.host + "/ws");

        function show(id) {
            for (const view of ["signin-form", "loading", "chat-form"]) {
                $(view).classList.toggle("hidden", view !== id);
            }
        }

        function error(text) {
            $("error").textContent = text;
            show("signin-form");
        }

        ws.onmessage = (event) => {
            const msg = JSON.parse(event.data);
            switch (msg.type) {
                case "state":
                    if (msg.state === "connecting") {
                        $("error").textContent = "";
                        show("loading");
                    } else if (msg.state === "connected") {
                        show("chat-form");
                        $("input").focus();
                    } else {
                        $("output").value = "";
                        if (!$("error").textContent) show("signin-form");
                    }
                    break;
                case "message":
                case "notice":
                    $("output").value += (msg.data ?? msg.text) + "\n";
                    $("output").scrollTop = $("output").scrollHeight;
                    break;
                case "auth_refused":
                case "error":
                    error(msg.message);
                    break;
                case "connection_lost":
                    error("Connection lost");
                    break;
            }
        };

        ws.onclose = () => error("Connection to server closed");

        $("signin-form").onsubmit = (e) => {
            e.preventDefault();
            $("error").textContent = "";
            show("loading");
            ws.send(JSON.stringify({
                type: "sign_in",
                username: $("username").value,
                password: $("password").value,
            }));
        };

        $("input").onkeypress = (e) => {
            if (e.key === "Enter") {
                ws.send(JSON.stringify({ type: "say", text: $("input").value }));
                $("input").value = "";
            }
        };

        $("signout").onclick = () => ws.send(JSON.stringify({ type: "sign_out" }));

        setInterval(() => ws.readyState === 1 && ws.send('{"type":"ping"}'), 30000);
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    fn test_app() -> Router {
        app(WsState::new(Arc::new(LoopbackMiddleware::new(
            LoopbackHub::new(),
        ))))
    }

    #[tokio::test]
    async fn test_index_page_served() {
        let response = test_app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let response = test_app()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["chat-web", "--secure", "--listen", "0.0.0.0:8000"]);
        assert!(args.secure);
        assert_eq!(args.listen.port(), 8000);
        assert_eq!(args.idle_timeout, 30);
    }
}
