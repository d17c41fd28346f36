//! Ordered queue for inbound deliveries.

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::Inbound;

/// Deliveries in arrival order.
pub type InboundStream = BoxStream<'static, Inbound>;

/// Producer side of an inbound delivery queue.
///
/// Callback servants push without blocking and nothing is dropped while the
/// consumer is busy with an outgoing call. The stream ends once every clone
/// of the inbox is gone.
#[derive(Clone)]
pub struct Inbox {
    sender: mpsc::UnboundedSender<Inbound>,
}

impl Inbox {
    /// Create an inbox and the stream draining it.
    #[must_use]
    pub fn channel() -> (Self, InboundStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, UnboundedReceiverStream::new(receiver).boxed())
    }

    /// Queue a delivery. Returns `false` once the consumer is gone.
    pub fn push(&self, inbound: Inbound) -> bool {
        if self.sender.send(inbound).is_err() {
            tracing::debug!("Inbound delivery after the consumer closed");
            return false;
        }
        true
    }

    /// Whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
