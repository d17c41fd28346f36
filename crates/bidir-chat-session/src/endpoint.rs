//! Callback endpoint hosted by the client.

use std::sync::Arc;

use async_trait::async_trait;
use bidir_chat_core::{
    CallbackSender, CallbackServant, EndpointRef, Identity, Inbound, Inbox, MiddlewareError,
    ObjectAdapter, SessionProxy,
};

/// Fixed name of the chat callback object. The gateway supplies the category.
pub const CALLBACK_NAME: &str = "callback";

/// Callback endpoint error.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Callback registration failed: {0}")]
    Register(MiddlewareError),
    #[error("Failed to hand the callback to the peer: {0}")]
    Attach(MiddlewareError),
}

/// Servant that posts every delivery into an [`Inbox`].
///
/// Never blocks the dispatching thread, so a peer calling back while an
/// outgoing call is pending cannot deadlock the client.
pub struct InboxServant {
    inbox: Inbox,
}

impl InboxServant {
    /// Create a servant writing to `inbox`.
    #[must_use]
    pub fn new(inbox: Inbox) -> Arc<Self> {
        Arc::new(Self { inbox })
    }
}

#[async_trait]
impl CallbackServant for InboxServant {
    async fn deliver(&self, inbound: Inbound) {
        tracing::trace!(?inbound, "Inbound delivery");
        if !self.inbox.push(inbound) {
            tracing::debug!("Dropping delivery for a finished session");
        }
    }
}

/// A servant registered with an adapter.
pub struct CallbackEndpoint {
    adapter: Arc<dyn ObjectAdapter>,
    endpoint: EndpointRef,
}

impl CallbackEndpoint {
    /// Register `servant` as `category/callback` on a router-bound adapter.
    ///
    /// On failure the adapter is destroyed so no partial registration
    /// survives.
    ///
    /// # Errors
    /// Returns error if the adapter rejects the servant.
    pub fn register(
        adapter: Arc<dyn ObjectAdapter>,
        category: &str,
        servant: Arc<dyn CallbackServant>,
    ) -> Result<Self, EndpointError> {
        let identity = Identity::new(CALLBACK_NAME, category);
        let result = adapter.add(servant, identity);
        Self::from_result(adapter, result)
    }

    /// Register `servant` under a fresh UUID identity.
    ///
    /// Used when the peer is called directly and the adapter is bound to
    /// the outgoing connection afterwards.
    ///
    /// # Errors
    /// Returns error if the adapter rejects the servant.
    pub fn register_with_uuid(
        adapter: Arc<dyn ObjectAdapter>,
        servant: Arc<dyn CallbackServant>,
    ) -> Result<Self, EndpointError> {
        let result = adapter.add_with_uuid(servant);
        Self::from_result(adapter, result)
    }

    fn from_result(
        adapter: Arc<dyn ObjectAdapter>,
        result: Result<EndpointRef, MiddlewareError>,
    ) -> Result<Self, EndpointError> {
        match result {
            Ok(endpoint) => {
                tracing::debug!(identity = %endpoint.identity, "Callback endpoint registered");
                Ok(Self { adapter, endpoint })
            }
            Err(e) => {
                adapter.destroy();
                Err(EndpointError::Register(e))
            }
        }
    }

    /// Identity the servant is registered under.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.endpoint.identity
    }

    /// Reference handed to the peer.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointRef {
        &self.endpoint
    }

    /// The adapter hosting the servant.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ObjectAdapter> {
        &self.adapter
    }

    /// Hand the endpoint to the session. Required before the session can
    /// deliver anything.
    ///
    /// # Errors
    /// Returns error if the call fails; the endpoint is deactivated.
    pub async fn attach(&self, session: &dyn SessionProxy) -> Result<(), EndpointError> {
        if let Err(e) = session.set_callback(&self.endpoint).await {
            self.deactivate();
            return Err(EndpointError::Attach(e));
        }
        Ok(())
    }

    /// Register the endpoint's identity with a callback sender.
    ///
    /// # Errors
    /// Returns error if the call fails; the endpoint is deactivated.
    pub async fn attach_to_sender(&self, sender: &dyn CallbackSender) -> Result<(), EndpointError> {
        if let Err(e) = sender.add_client(&self.endpoint.identity).await {
            self.deactivate();
            return Err(EndpointError::Attach(e));
        }
        Ok(())
    }

    /// Destroy the hosting adapter.
    pub fn deactivate(&self) {
        self.adapter.destroy();
    }
}
