//! Object identities, endpoint references and credentials.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an object hosted by an adapter.
///
/// The category scopes the name: a gateway hands each client its own
/// category so callback identities never collide across clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Logical object name.
    pub name: String,
    /// Category the name lives in (may be empty).
    #[serde(default)]
    pub category: String,
}

impl Identity {
    /// Create an identity from a name and category.
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    /// Create an identity with a random UUID name and no category.
    #[must_use]
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().to_string(), String::new())
    }

    /// Parse the `category/name` form. A string without `/` is a bare name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((category, name)) => Self::new(name, category),
            None => Self::new(s, String::new()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.category, self.name)
        }
    }
}

/// Reference to an object registered with an adapter.
///
/// Handed to the remote peer so it can call back into this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRef {
    /// Identity the servant was registered under.
    pub identity: Identity,
    /// Whether calls reach the servant through the router connection.
    pub routed: bool,
}

/// Credentials submitted to the gateway.
///
/// The core never interprets them; they are forwarded as given.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User id.
    pub id: String,
    /// Password or other secret.
    pub secret: String,
}

impl Credentials {
    /// Create credentials from an id and secret.
    #[must_use]
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
