//! In-process middleware.
//!
//! A [`LoopbackHub`] plays the routing gateway, the chat server and the
//! callback sender. Communicators created by [`LoopbackMiddleware`] connect
//! to it without any network I/O, which makes the whole client flow
//! testable and lets the demos run standalone.

mod hub;
mod proxies;

pub use hub::{LoopbackAdapter, LoopbackConnection, LoopbackHub, RecordingServant};
pub use proxies::{LoopbackCommunicator, LoopbackMiddleware};

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use bidir_chat_core::{
        CallbackServant, Communicator, Connection, Credentials, GatewayEndpoint, HeartbeatMode,
        DEFAULT_HELLO, DEFAULT_SENDER, Identity, Inbound, InvocationMode, Middleware,
        MiddlewareError, ObjectAdapter, RuntimeConfig,
    };

    use super::*;

    async fn communicator(hub: &Arc<LoopbackHub>) -> Arc<dyn Communicator> {
        LoopbackMiddleware::new(Arc::clone(hub))
            .initialize(RuntimeConfig::default_routed().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_router_configured() {
        let communicator = LoopbackMiddleware::new(LoopbackHub::new())
            .initialize(RuntimeConfig::default())
            .await
            .unwrap();
        assert_eq!(
            communicator.resolve_gateway().await.err().map(|e| e.to_string()),
            Some(MiddlewareError::NoRouter.to_string())
        );
    }

    #[tokio::test]
    async fn test_not_a_gateway() {
        let hub = LoopbackHub::new();
        hub.set_gateway(false);
        let gateway = communicator(&hub).await.resolve_gateway().await.unwrap();
        assert!(matches!(
            gateway.check().await,
            Err(MiddlewareError::NotAGateway(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_is_relayed_to_every_callback() {
        let hub = LoopbackHub::new();
        let mut receivers = Vec::new();
        let mut sessions = Vec::new();

        for user in ["alice", "bob"] {
            let communicator = communicator(&hub).await;
            let gateway = communicator.resolve_gateway().await.unwrap();
            let session = gateway
                .create_session(&Credentials::new(user, "pw"))
                .await
                .unwrap();
            let adapter = communicator
                .create_router_adapter(gateway.as_ref())
                .await
                .unwrap();
            let servant = Arc::new(RecordingServant::default());
            let category = gateway.client_category().await.unwrap();
            let endpoint = adapter
                .add(
                    Arc::clone(&servant) as Arc<dyn CallbackServant>,
                    Identity::new("callback", category),
                )
                .unwrap();
            session.set_callback(&endpoint).await.unwrap();
            receivers.push(servant);
            sessions.push((communicator, session));
        }

        sessions[0].1.send_message("hi").await.unwrap();

        let expected = vec![Inbound::Message {
            data: "alice > hi".into(),
        }];
        assert_eq!(receivers[0].received(), expected);
        assert_eq!(receivers[1].received(), expected);
        assert_eq!(hub.transcript(), vec!["alice > hi".to_string()]);
        assert_eq!(hub.live_sessions(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_one_session_per_connection() {
        let hub = LoopbackHub::new();
        let gateway = communicator(&hub).await.resolve_gateway().await.unwrap();
        gateway
            .create_session(&Credentials::new("a", "b"))
            .await
            .unwrap();
        assert!(gateway
            .create_session(&Credentials::new("a", "b"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_destroy_closes_connection_and_sessions() {
        let hub = LoopbackHub::new();
        let communicator = communicator(&hub).await;
        let gateway = communicator.resolve_gateway().await.unwrap();
        let session = gateway
            .create_session(&Credentials::new("a", "b"))
            .await
            .unwrap();

        communicator.destroy().await.unwrap();
        communicator.destroy().await.unwrap();

        assert_eq!(hub.destroyed_communicators(), 1);
        assert!(hub.live_sessions().is_empty());
        assert_eq!(
            session.send_message("late").await,
            Err(MiddlewareError::ConnectionLost)
        );
        assert!(matches!(
            communicator.resolve_gateway().await,
            Err(MiddlewareError::Destroyed)
        ));
    }

    #[tokio::test]
    async fn test_callback_sender_reaches_bidir_client() {
        let hub = LoopbackHub::new();
        let communicator = communicator(&hub).await;
        let sender = communicator
            .resolve_sender(&GatewayEndpoint::parse(DEFAULT_SENDER).unwrap())
            .await
            .unwrap();
        let adapter = communicator.create_adapter().await.unwrap();
        let servant = Arc::new(RecordingServant::default());
        let endpoint = adapter
            .add_with_uuid(Arc::clone(&servant) as Arc<dyn CallbackServant>)
            .unwrap();
        sender.connection().unwrap().set_adapter(adapter);
        sender.add_client(&endpoint.identity).await.unwrap();

        assert_eq!(hub.fire_callbacks().await, 1);
        assert_eq!(hub.fire_callbacks().await, 1);
        assert_eq!(
            servant.received(),
            vec![Inbound::Callback { num: 1 }, Inbound::Callback { num: 2 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_flow_until_close() {
        let hub = LoopbackHub::new();
        let connection = hub.open_connection();
        connection.set_heartbeat(Duration::from_secs(10), HeartbeatMode::Always);

        tokio::time::sleep(Duration::from_secs(11)).await;
        let beats = hub.heartbeats();
        assert!(beats >= 2, "expected heartbeats, got {beats}");

        connection.close();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hub.heartbeats(), beats);
    }

    #[tokio::test]
    async fn test_sever_fires_close_callback() {
        let hub = LoopbackHub::new();
        let connection = hub.open_connection();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        connection.set_close_callback(Some(Arc::new(move || {
            let _ = tx.send(());
        })));

        hub.sever_all();
        assert!(connection.is_closed());
        assert_eq!(rx.recv().await, Some(()));
    }

    #[test]
    fn test_destroyed_adapter_rejects_servants() {
        let adapter = LoopbackAdapter::new(false);
        adapter.destroy();
        assert!(adapter.is_destroyed());
        assert!(matches!(
            adapter.add_with_uuid(Arc::new(RecordingServant::default())),
            Err(MiddlewareError::Adapter(_))
        ));
    }

    #[tokio::test]
    async fn test_batched_greetings_wait_for_flush() {
        let hub = LoopbackHub::new();
        let communicator = communicator(&hub).await;
        let hello = communicator
            .resolve_hello(&GatewayEndpoint::parse(DEFAULT_HELLO).unwrap())
            .await
            .unwrap();

        hello
            .say_hello(InvocationMode::BatchOneway, Duration::ZERO)
            .await
            .unwrap();
        hello
            .say_hello(InvocationMode::BatchOneway, Duration::ZERO)
            .await
            .unwrap();
        hello
            .say_hello(InvocationMode::Oneway, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(hub.greetings(), vec![InvocationMode::Oneway]);

        hello.flush_batch().await.unwrap();
        hello.flush_batch().await.unwrap();
        assert_eq!(
            hub.greetings(),
            vec![
                InvocationMode::Oneway,
                InvocationMode::BatchOneway,
                InvocationMode::BatchOneway,
            ]
        );
    }

    #[tokio::test]
    async fn test_shut_down_server_refuses_requests() {
        let hub = LoopbackHub::new();
        let communicator = communicator(&hub).await;
        let hello = communicator
            .resolve_hello(&GatewayEndpoint::parse(DEFAULT_HELLO).unwrap())
            .await
            .unwrap();

        hello.shutdown().await.unwrap();
        assert!(!hub.is_serving());
        assert!(matches!(
            hello.say_hello(InvocationMode::Twoway, Duration::ZERO).await,
            Err(MiddlewareError::ConnectFailed(_))
        ));
        assert!(hub.greetings().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_hub_leaves_calls_hanging() {
        let hub = LoopbackHub::new();
        hub.set_unresponsive(true);
        let gateway = communicator(&hub).await.resolve_gateway().await.unwrap();

        let attempt = tokio::time::timeout(
            Duration::from_secs(60),
            gateway.create_session(&Credentials::new("alice", "pw")),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(hub.stalled_calls(), 1);
        assert_eq!(hub.session_attempts(), 0);
    }
}
