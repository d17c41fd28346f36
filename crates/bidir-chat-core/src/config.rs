//! Runtime configuration and gateway endpoint addressing.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Identity;

/// Default router proxy used by the terminal chat client.
pub const DEFAULT_ROUTER: &str = "DemoGlacier2/router:tcp -p 4063 -h localhost";

/// Default proxy of the callback sender used by the bidir client.
pub const DEFAULT_SENDER: &str = "sender:tcp -p 10000";

/// Default proxy of the greeting server.
pub const DEFAULT_HELLO: &str = "hello:tcp -h localhost -p 10000";

/// Default proxy of the ping object used for latency runs.
pub const DEFAULT_PING: &str = "ping:tcp -p 10000";

/// Configuration parse error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing endpoint in proxy string: {0}")]
    MissingEndpoint(String),
    #[error("Unknown transport scheme: {0}")]
    UnknownScheme(String),
    #[error("Missing value for option {0}")]
    MissingValue(String),
    #[error("Unknown endpoint option: {0}")]
    UnknownOption(String),
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Endpoint has no port: {0}")]
    MissingPort(String),
}

/// Transport used to reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportScheme {
    /// Plain TCP.
    Tcp,
    /// WebSocket.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl TransportScheme {
    /// Whether the transport is encrypted.
    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::Wss)
    }

    /// Scheme keyword as it appears in proxy strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

impl FromStr for TransportScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" | "default" => Ok(Self::Tcp),
            "ws" => Ok(Self::Ws),
            "wss" => Ok(Self::Wss),
            other => Err(ConfigError::UnknownScheme(other.to_string())),
        }
    }
}

/// Address of a remote object: identity plus one endpoint.
///
/// Written as `category/name:scheme -h host -p port [-r resource]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    /// Identity of the target object.
    pub identity: Identity,
    /// Transport scheme.
    pub scheme: TransportScheme,
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Resource path for WebSocket endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl GatewayEndpoint {
    /// Parse a proxy string.
    ///
    /// # Errors
    /// Returns error if the scheme is unknown, an option lacks its value,
    /// or the port is missing or invalid.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (identity, endpoint) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::MissingEndpoint(s.to_string()))?;

        let mut tokens = endpoint.split_whitespace();
        let scheme: TransportScheme = tokens
            .next()
            .ok_or_else(|| ConfigError::MissingEndpoint(s.to_string()))?
            .parse()?;

        let mut host = None;
        let mut port = None;
        let mut resource = None;
        while let Some(opt) = tokens.next() {
            let value = tokens
                .next()
                .ok_or_else(|| ConfigError::MissingValue(opt.to_string()))?;
            match opt {
                "-h" => host = Some(value.to_string()),
                "-p" => {
                    port = Some(
                        value
                            .parse::<u16>()
                            .map_err(|_| ConfigError::InvalidPort(value.to_string()))?,
                    );
                }
                "-r" => resource = Some(value.to_string()),
                // Timeouts are accepted for compatibility and ignored.
                "-t" => {}
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
        }

        Ok(Self {
            identity: Identity::parse(identity.trim()),
            scheme,
            host: host.unwrap_or_else(|| "localhost".to_string()),
            port: port.ok_or_else(|| ConfigError::MissingPort(s.to_string()))?,
            resource,
        })
    }

    /// Router endpoint for a browser page.
    ///
    /// Secure origins get the `wss` endpoint, everything else `ws`. The
    /// web server reverse-proxies both paths to the router.
    #[must_use]
    pub fn for_origin(secure: bool, hostname: Option<&str>) -> Self {
        let host = hostname
            .filter(|h| !h.is_empty())
            .unwrap_or("127.0.0.1")
            .to_string();
        let (scheme, port, resource) = if secure {
            (TransportScheme::Wss, 9090, "/chatwss")
        } else {
            (TransportScheme::Ws, 8080, "/chatws")
        };
        Self {
            identity: Identity::new("router", "DemoGlacier2"),
            scheme,
            host,
            port,
            resource: Some(resource.to_string()),
        }
    }
}

impl FromStr for GatewayEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -h {} -p {}",
            self.identity,
            self.scheme.as_str(),
            self.host,
            self.port
        )?;
        if let Some(ref resource) = self.resource {
            write!(f, " -r {resource}")?;
        }
        Ok(())
    }
}

/// Configuration handed to the middleware at initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Router every outgoing proxy is routed through, if any.
    pub default_router: Option<GatewayEndpoint>,
}

impl RuntimeConfig {
    /// Create a configuration routed through the given gateway.
    #[must_use]
    pub fn with_router(router: GatewayEndpoint) -> Self {
        Self {
            default_router: Some(router),
        }
    }

    /// Create a configuration routed through [`DEFAULT_ROUTER`].
    ///
    /// # Errors
    /// Returns error if the built-in proxy string fails to parse.
    pub fn default_routed() -> Result<Self, ConfigError> {
        Ok(Self::with_router(GatewayEndpoint::parse(DEFAULT_ROUTER)?))
    }
}
