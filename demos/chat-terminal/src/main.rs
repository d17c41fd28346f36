//! Terminal chat, callback, hello and latency clients.
//!
//! Run with: cargo run -p chat-terminal -- chat
//!
//! Every client runs against the in-process loopback gateway, so they work
//! without any server. Press Ctrl+C to leave at any time.

use std::{sync::Arc, time::Duration};

use bidir_chat_core::{
    DEFAULT_HELLO, DEFAULT_PING, DEFAULT_ROUTER, DEFAULT_SENDER, GatewayEndpoint,
};
use bidir_chat_session::{
    CallbackClient, ChatClient, ClientConfig, ClientIo, DEFAULT_REPETITIONS, HelloClient,
    LatencyClient,
    loopback::{LoopbackHub, LoopbackMiddleware},
};
use bidir_chat_transport::terminal::TerminalBridge;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "chat-terminal")]
#[command(about = "Session-backed chat, callback, hello and latency clients")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Chat through the routing gateway
    Chat {
        /// Router proxy
        #[arg(long, env = "BIDIR_CHAT_ROUTER", default_value = DEFAULT_ROUTER)]
        router: GatewayEndpoint,

        /// Idle timeout reported by the gateway, in seconds (0 disables heartbeats)
        #[arg(long, default_value_t = 30)]
        idle_timeout: i32,
    },
    /// Receive callbacks from a sender over the outgoing connection
    Callback {
        /// Callback sender proxy
        #[arg(long, default_value = DEFAULT_SENDER)]
        sender: GatewayEndpoint,

        /// Seconds between callbacks
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Greet a hello server from a command menu
    Hello {
        /// Hello server proxy
        #[arg(long, default_value = DEFAULT_HELLO)]
        proxy: GatewayEndpoint,
    },
    /// Send a single greeting and exit
    Minimal {
        /// Hello server proxy
        #[arg(long, default_value = DEFAULT_HELLO)]
        proxy: GatewayEndpoint,
    },
    /// Time round trips to a ping object
    Latency {
        /// Ping object proxy
        #[arg(long, default_value = DEFAULT_PING)]
        proxy: GatewayEndpoint,

        /// Number of pings
        #[arg(long, default_value_t = DEFAULT_REPETITIONS)]
        repetitions: u32,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logs go to stderr and stay quiet unless asked for, so they don't
    // interleave with the chat.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let hub = LoopbackHub::new();
    let middleware = Arc::new(LoopbackMiddleware::new(Arc::clone(&hub)));

    let (bridge, io) = TerminalBridge::new(16);
    let terminal = bridge.spawn(BufReader::new(tokio::io::stdin()), tokio::io::stdout());

    let status = match args.mode {
        Mode::Chat {
            router,
            idle_timeout,
        } => {
            hub.set_idle_timeout(idle_timeout);
            let client = ChatClient::new(middleware, ClientConfig::default().with_router(router));
            client.run(io, interrupted()).await
        }
        Mode::Callback { sender, interval } => {
            let ticker = hub.spawn_callback_ticker(Duration::from_secs(interval.max(1)));
            let ClientIo { events, .. } = io;
            let status = CallbackClient::new(middleware, sender)
                .run(events, interrupted())
                .await;
            ticker.abort();
            status
        }
        Mode::Hello { proxy } => HelloClient::new(middleware, proxy).run(io, interrupted()).await,
        Mode::Minimal { proxy } => {
            let ClientIo { events, .. } = io;
            HelloClient::new(middleware, proxy)
                .greet_once(events, interrupted())
                .await
        }
        Mode::Latency { proxy, repetitions } => {
            let ClientIo { events, .. } = io;
            LatencyClient::new(middleware, proxy)
                .with_repetitions(repetitions)
                .run(events, interrupted())
                .await
        }
    };

    terminal.finish().await;
    std::process::exit(status.code());
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for interrupts: {e}");
        std::future::pending::<()>().await;
    }
}
