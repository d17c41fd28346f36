//! Round-trip latency measurement against a ping object.

use std::{future::Future, sync::Arc, time::Duration};

use bidir_chat_core::{ClientEvent, GatewayEndpoint, Middleware, RuntimeConfig};
use tokio::time::Instant;

use crate::{ClientError, EventSink, ExitStatus, RuntimeGuard};

/// Pings sent when no count is given.
pub const DEFAULT_REPETITIONS: u32 = 1000;

/// Result of one latency run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyReport {
    pub repetitions: u32,
    pub total: Duration,
}

impl LatencyReport {
    /// Average round trip.
    #[must_use]
    pub fn per_ping(&self) -> Duration {
        self.total / self.repetitions.max(1)
    }
}

/// Client that pings a server a fixed number of times.
pub struct LatencyClient {
    middleware: Arc<dyn Middleware>,
    runtime: RuntimeConfig,
    proxy: GatewayEndpoint,
    repetitions: u32,
}

impl LatencyClient {
    /// Create a client pinging the object at `proxy`.
    #[must_use]
    pub fn new(middleware: Arc<dyn Middleware>, proxy: GatewayEndpoint) -> Self {
        Self {
            middleware,
            runtime: RuntimeConfig::default(),
            proxy,
            repetitions: DEFAULT_REPETITIONS,
        }
    }

    /// Replace the runtime configuration.
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set the number of pings. At least one is always sent.
    #[must_use]
    pub fn with_repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = repetitions.max(1);
        self
    }

    /// Ping until done or `shutdown` resolves, reporting timings on `events`.
    pub async fn run<F>(&self, events: EventSink, shutdown: F) -> ExitStatus
    where
        F: Future<Output = ()>,
    {
        let runtime = RuntimeGuard::new();
        let result = tokio::select! {
            result = self.measure(&runtime, &events) => Some(result),
            () = shutdown => None,
        };
        runtime.teardown().await;

        match result {
            None => {
                tracing::info!("Interrupted");
                ExitStatus::Success
            }
            Some(Ok(report)) => {
                let _ = events.send(ClientEvent::notice(format!(
                    "time for {} pings: {}ms",
                    report.repetitions,
                    report.total.as_millis()
                )));
                let _ = events.send(ClientEvent::notice(format!(
                    "time per ping: {:.3}ms",
                    report.per_ping().as_secs_f64() * 1000.0
                )));
                ExitStatus::Success
            }
            Some(Err(e)) => {
                tracing::error!("{e}");
                let _ = events.send(ClientEvent::error(e.user_message()));
                ExitStatus::Failure
            }
        }
    }

    async fn measure(
        &self,
        runtime: &RuntimeGuard,
        events: &EventSink,
    ) -> Result<LatencyReport, ClientError> {
        let communicator = runtime
            .initialize(self.middleware.as_ref(), self.runtime.clone())
            .await?;
        let ping = communicator.resolve_ping(&self.proxy).await?;

        let _ = events.send(ClientEvent::notice(format!(
            "pinging server {} times (this may take a while)",
            self.repetitions
        )));
        let start = Instant::now();
        for _ in 0..self.repetitions {
            ping.ping().await?;
        }
        let total = start.elapsed();
        tracing::debug!(?total, "Latency run finished");

        Ok(LatencyReport {
            repetitions: self.repetitions,
            total,
        })
    }
}
