//! End-to-end client flows against the loopback middleware.

use std::{sync::Arc, time::Duration};

use bidir_chat_core::{
    ClientEvent, Credentials, DEFAULT_SENDER, GatewayEndpoint, HeartbeatMode, Input, SessionState,
    USAGE_HINT,
};
use bidir_chat_session::{
    CallbackClient, ChatClient, ClientConfig, ClientIo, DEFAULT_COMMAND_PROMPT, ExitStatus,
    loopback::{LoopbackHub, LoopbackMiddleware},
};
use tokio::sync::{mpsc, oneshot};

fn client(hub: &Arc<LoopbackHub>, config: ClientConfig) -> ChatClient {
    ChatClient::new(Arc::new(LoopbackMiddleware::new(Arc::clone(hub))), config)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn messages(events: &[ClientEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Message { data } => Some(data.clone()),
            _ => None,
        })
        .collect()
}

/// Collect events up to and including the first one matching `done`.
async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    done: impl Fn(&ClientEvent) -> bool,
) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            let last = done(&event);
            seen.push(event);
            if last {
                break;
            }
        }
    })
    .await
    .expect("event never seen");
    seen
}

async fn wait_for_prompt(
    rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    prompt: &str,
) -> Vec<ClientEvent> {
    wait_for(rx, |e| matches!(e, ClientEvent::Prompt { text } if text == prompt)).await
}

/// Run a client over a fixed input script that ends with end of input.
async fn run_script(
    hub: &Arc<LoopbackHub>,
    config: ClientConfig,
    script: Vec<Input>,
) -> (ExitStatus, Vec<ClientEvent>) {
    let (io, input_tx, mut events_rx) = ClientIo::channel(script.len().max(1));
    for input in script {
        input_tx.send(input).await.unwrap();
    }
    drop(input_tx);

    let status = client(hub, config)
        .run(io, futures::future::pending())
        .await;
    (status, drain(&mut events_rx))
}

fn alice() -> Input {
    Input::Credentials(Credentials::new("alice", "pw"))
}

#[tokio::test]
async fn test_commands_reach_peer_in_input_order() {
    let hub = LoopbackHub::new();
    let (status, events) = run_script(
        &hub,
        ClientConfig::default(),
        vec![alice(), Input::line("a"), Input::line("b"), Input::line("c")],
    )
    .await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(hub.transcript(), vec!["alice > a", "alice > b", "alice > c"]);
    assert_eq!(
        messages(&events),
        vec!["alice > a", "alice > b", "alice > c"]
    );
}

#[tokio::test]
async fn test_quit_stops_dispatch_mid_batch() {
    let hub = LoopbackHub::new();
    let (status, _) = run_script(
        &hub,
        ClientConfig::default(),
        vec![
            alice(),
            Input::line("a"),
            Input::line("/quit"),
            Input::line("b"),
        ],
    )
    .await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(hub.transcript(), vec!["alice > a"]);
    assert!(hub.live_sessions().is_empty());
    assert_eq!(hub.destroyed_communicators(), 1);
}

#[tokio::test]
async fn test_unknown_control_token_shows_hint() {
    let hub = LoopbackHub::new();
    let (status, events) = run_script(
        &hub,
        ClientConfig::default(),
        vec![alice(), Input::line("/help"), Input::line("   "), Input::line("hi")],
    )
    .await;

    assert_eq!(status, ExitStatus::Success);
    assert!(events.contains(&ClientEvent::notice(USAGE_HINT)));
    assert_eq!(hub.transcript(), vec!["alice > hi"]);
}

#[tokio::test]
async fn test_heartbeat_configured_before_first_prompt() {
    let hub = LoopbackHub::new();
    hub.set_idle_timeout(60);
    let (io, input_tx, mut events_rx) = ClientIo::channel(4);
    input_tx.send(alice()).await.unwrap();

    let chat = client(&hub, ClientConfig::default());
    let task = tokio::spawn(async move { chat.run(io, futures::future::pending()).await });

    wait_for_prompt(&mut events_rx, DEFAULT_COMMAND_PROMPT).await;
    assert_eq!(
        hub.heartbeat_configs(),
        vec![(Duration::from_secs(60), HeartbeatMode::Always)]
    );

    drop(input_tx);
    assert_eq!(task.await.unwrap(), ExitStatus::Success);
}

#[tokio::test]
async fn test_zero_idle_timeout_skips_heartbeat() {
    let hub = LoopbackHub::new();
    hub.set_idle_timeout(0);
    let (status, _) = run_script(&hub, ClientConfig::default(), vec![alice()]).await;

    assert_eq!(status, ExitStatus::Success);
    assert!(hub.heartbeat_configs().is_empty());
}

#[tokio::test]
async fn test_refused_then_accepted() {
    let hub = LoopbackHub::new();
    hub.require_secret("alice", "y");
    let (status, events) = run_script(
        &hub,
        ClientConfig::default(),
        vec![
            Input::Credentials(Credentials::new("alice", "x")),
            Input::Credentials(Credentials::new("alice", "y")),
        ],
    )
    .await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(hub.session_attempts(), 2);
    assert!(events.contains(&ClientEvent::AuthRefused {
        message: "permission denied:\nbad secret".into()
    }));
    let states: Vec<SessionState> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::State { state } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn test_typed_credentials() {
    let hub = LoopbackHub::new();
    let (status, _) = run_script(
        &hub,
        ClientConfig::default(),
        vec![Input::line("bob"), Input::line("pw"), Input::line("hey")],
    )
    .await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(hub.transcript(), vec!["bob > hey"]);
}

#[tokio::test]
async fn test_unreachable_gateway_fails_with_teardown() {
    let hub = LoopbackHub::new();
    hub.set_reachable(false);
    let (status, events) = run_script(&hub, ClientConfig::default(), vec![alice()]).await;

    assert_eq!(status, ExitStatus::Failure);
    assert_eq!(status.code(), 1);
    assert!(events.contains(&ClientEvent::Error {
        message: "connection to server failed".into()
    }));
    assert_eq!(hub.destroyed_communicators(), 1);
}

#[tokio::test]
async fn test_abandoned_sign_in_exits_cleanly() {
    let hub = LoopbackHub::new();
    let (status, _) = run_script(&hub, ClientConfig::default(), vec![Input::Quit]).await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(hub.session_attempts(), 0);
    assert_eq!(hub.destroyed_communicators(), 1);
}

#[tokio::test]
async fn test_interrupt_tears_down_silently() {
    let hub = LoopbackHub::new();
    let (io, input_tx, mut events_rx) = ClientIo::channel(4);
    input_tx.send(alice()).await.unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let chat = client(&hub, ClientConfig::default());
    let task = tokio::spawn(async move {
        chat.run(io, async {
            let _ = stop_rx.await;
        })
        .await
    });

    wait_for_prompt(&mut events_rx, DEFAULT_COMMAND_PROMPT).await;
    stop_tx.send(()).unwrap();

    assert_eq!(task.await.unwrap(), ExitStatus::Success);
    assert_eq!(hub.destroyed_communicators(), 1);
    assert!(hub.live_sessions().is_empty());
    assert!(!drain(&mut events_rx).contains(&ClientEvent::ConnectionLost));
    drop(input_tx);
}

/// Resolves once the hub holds an unanswered call.
async fn once_stalled(hub: Arc<LoopbackHub>) {
    while hub.stalled_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_interrupt_during_negotiation() {
    let hub = LoopbackHub::new();
    hub.set_unresponsive(true);
    let (io, input_tx, mut events_rx) = ClientIo::channel(4);
    input_tx.send(alice()).await.unwrap();

    let status = client(&hub, ClientConfig::default())
        .run(io, once_stalled(Arc::clone(&hub)))
        .await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(hub.stalled_calls(), 1);
    assert_eq!(hub.destroyed_communicators(), 1);
    assert!(hub.live_sessions().is_empty());
    let events = drain(&mut events_rx);
    assert!(!events.iter().any(|e| matches!(e, ClientEvent::Error { .. })));
    assert_eq!(
        events.last(),
        Some(&ClientEvent::State {
            state: SessionState::Disconnected
        })
    );
    drop(input_tx);
}

#[tokio::test]
async fn test_interrupt_during_send() {
    let hub = LoopbackHub::new();
    let (io, input_tx, mut events_rx) = ClientIo::channel(4);
    input_tx.send(alice()).await.unwrap();

    let chat = client(&hub, ClientConfig::default());
    let stalled = once_stalled(Arc::clone(&hub));
    let task = tokio::spawn(async move { chat.run(io, stalled).await });

    wait_for_prompt(&mut events_rx, DEFAULT_COMMAND_PROMPT).await;
    hub.set_unresponsive(true);
    input_tx.send(Input::line("hello?")).await.unwrap();

    assert_eq!(task.await.unwrap(), ExitStatus::Success);
    assert_eq!(hub.stalled_calls(), 1);
    assert_eq!(hub.destroyed_communicators(), 1);
    assert!(hub.transcript().is_empty());
    assert!(!drain(&mut events_rx).iter().any(|e| matches!(e, ClientEvent::Error { .. })));
    drop(input_tx);
}

#[tokio::test]
async fn test_connection_loss_reported_and_loop_continues() {
    let hub = LoopbackHub::new();
    let (io, input_tx, mut events_rx) = ClientIo::channel(4);
    input_tx.send(alice()).await.unwrap();

    let chat = client(&hub, ClientConfig::default());
    let task = tokio::spawn(async move { chat.run(io, futures::future::pending()).await });

    wait_for_prompt(&mut events_rx, DEFAULT_COMMAND_PROMPT).await;
    hub.sever_all();
    wait_for(&mut events_rx, |e| *e == ClientEvent::ConnectionLost).await;

    input_tx.send(Input::line("anyone?")).await.unwrap();
    let seen = wait_for_prompt(&mut events_rx, DEFAULT_COMMAND_PROMPT).await;
    assert!(seen.iter().any(|e| matches!(e, ClientEvent::Error { .. })));

    drop(input_tx);
    assert_eq!(task.await.unwrap(), ExitStatus::Success);
    assert_eq!(hub.destroyed_communicators(), 1);
}

#[tokio::test]
async fn test_connection_loss_ends_session_when_configured() {
    let hub = LoopbackHub::new();
    let (io, input_tx, mut events_rx) = ClientIo::channel(4);
    input_tx.send(alice()).await.unwrap();

    let chat = client(&hub, ClientConfig::default().end_on_connection_loss(true));
    let task = tokio::spawn(async move { chat.run(io, futures::future::pending()).await });

    wait_for_prompt(&mut events_rx, DEFAULT_COMMAND_PROMPT).await;
    hub.sever_all();

    assert_eq!(task.await.unwrap(), ExitStatus::Failure);
    let events = drain(&mut events_rx);
    assert!(events.contains(&ClientEvent::ConnectionLost));
    assert_eq!(
        events.last(),
        Some(&ClientEvent::State {
            state: SessionState::Disconnected
        })
    );
    drop(input_tx);
}

#[tokio::test]
async fn test_two_clients_share_the_hub() {
    let hub = LoopbackHub::new();
    let (io_a, tx_a, mut rx_a) = ClientIo::channel(4);
    let (io_b, tx_b, mut rx_b) = ClientIo::channel(4);
    tx_a.send(alice()).await.unwrap();
    tx_b.send(Input::Credentials(Credentials::new("bob", "pw")))
        .await
        .unwrap();

    let a = client(&hub, ClientConfig::default());
    let b = client(&hub, ClientConfig::default());
    let task_a = tokio::spawn(async move { a.run(io_a, futures::future::pending()).await });
    let task_b = tokio::spawn(async move { b.run(io_b, futures::future::pending()).await });

    wait_for_prompt(&mut rx_a, DEFAULT_COMMAND_PROMPT).await;
    wait_for_prompt(&mut rx_b, DEFAULT_COMMAND_PROMPT).await;

    tx_a.send(Input::line("hello bob")).await.unwrap();
    wait_for_prompt(&mut rx_a, DEFAULT_COMMAND_PROMPT).await;
    let seen = tokio::time::timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .unwrap();
    assert_eq!(
        seen,
        Some(ClientEvent::Message {
            data: "alice > hello bob".into()
        })
    );

    drop(tx_a);
    drop(tx_b);
    assert_eq!(task_a.await.unwrap(), ExitStatus::Success);
    assert_eq!(task_b.await.unwrap(), ExitStatus::Success);
    assert_eq!(hub.destroyed_communicators(), 2);
}

#[tokio::test]
async fn test_callback_client_reports_callbacks_until_interrupt() {
    let hub = LoopbackHub::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let receiver = CallbackClient::new(
        Arc::new(LoopbackMiddleware::new(Arc::clone(&hub))),
        GatewayEndpoint::parse(DEFAULT_SENDER).unwrap(),
    );
    let task = tokio::spawn(async move {
        receiver
            .run(events_tx, async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.fire_callbacks().await == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    hub.fire_callbacks().await;

    let first = events_rx.recv().await.unwrap();
    let second = events_rx.recv().await.unwrap();
    assert!(matches!(first, ClientEvent::Callback { .. }));
    assert!(matches!(second, ClientEvent::Callback { .. }));
    assert_ne!(first, second);

    stop_tx.send(()).unwrap();
    assert_eq!(task.await.unwrap(), ExitStatus::Success);
    assert_eq!(hub.destroyed_communicators(), 1);
    assert_eq!(hub.fire_callbacks().await, 0);
}
