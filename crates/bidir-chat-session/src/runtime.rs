//! Process-wide runtime context with guaranteed, idempotent teardown.

use std::sync::{Arc, Mutex, PoisonError};

use bidir_chat_core::{Communicator, Middleware, MiddlewareError, RuntimeConfig};

/// Runtime context error.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Runtime context already initialized")]
    AlreadyInitialized,
    #[error("Runtime context already destroyed")]
    Destroyed,
    #[error("Runtime context not initialized")]
    NotInitialized,
    #[error("Middleware initialization failed: {0}")]
    Middleware(#[from] MiddlewareError),
}

enum Slot {
    Empty,
    Live(Arc<dyn Communicator>),
    Destroyed,
}

/// Owner of the communicator.
///
/// Create it before initialization so every exit path, including those
/// where initialization never finished, can call [`teardown`](Self::teardown).
pub struct RuntimeGuard {
    slot: Mutex<Slot>,
}

impl Default for RuntimeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeGuard {
    /// Create an empty guard.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Initialize the middleware. Only one initialization per guard.
    ///
    /// # Errors
    /// Returns error if already initialized or destroyed, or if the
    /// middleware fails to start.
    pub async fn initialize(
        &self,
        middleware: &dyn Middleware,
        config: RuntimeConfig,
    ) -> Result<Arc<dyn Communicator>, RuntimeError> {
        match *self.lock() {
            Slot::Empty => {}
            Slot::Live(_) => return Err(RuntimeError::AlreadyInitialized),
            Slot::Destroyed => return Err(RuntimeError::Destroyed),
        }

        let communicator = middleware.initialize(config).await?;

        let installed = {
            let mut slot = self.lock();
            if matches!(*slot, Slot::Empty) {
                *slot = Slot::Live(Arc::clone(&communicator));
                true
            } else {
                false
            }
        };

        if installed {
            tracing::debug!("Runtime context initialized");
            Ok(communicator)
        } else {
            // Torn down while the middleware was starting.
            let _ = communicator.destroy().await;
            Err(RuntimeError::Destroyed)
        }
    }

    /// Get the live communicator.
    ///
    /// # Errors
    /// Returns error if not initialized or already destroyed.
    pub fn communicator(&self) -> Result<Arc<dyn Communicator>, RuntimeError> {
        match &*self.lock() {
            Slot::Live(c) => Ok(Arc::clone(c)),
            Slot::Empty => Err(RuntimeError::NotInitialized),
            Slot::Destroyed => Err(RuntimeError::Destroyed),
        }
    }

    /// Whether a communicator is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(*self.lock(), Slot::Live(_))
    }

    /// Destroy the communicator.
    ///
    /// Safe to call any number of times and before initialization. Only the
    /// first call on a live guard reaches the middleware; failures are
    /// logged and swallowed. Returns whether this call destroyed anything.
    pub async fn teardown(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lock(), Slot::Destroyed);
        let Slot::Live(communicator) = previous else {
            return false;
        };

        match communicator.destroy().await {
            Ok(()) => tracing::debug!("Runtime context destroyed"),
            Err(e) => tracing::warn!("Ignoring failure while destroying runtime context: {e}"),
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
