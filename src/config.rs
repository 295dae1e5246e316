//! Runtime configuration for servers, sessions and transports.

use crate::server::sse::AuthRequest;
use crate::server::BoxedFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Timing knobs for a single session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Spacing of the liveness pings. `None` disables the liveness loop.
    pub ping_interval: Option<Duration>,
    /// How many times `connect` checks for the client's capabilities.
    pub negotiation_attempts: u32,
    /// Pause between two capability checks.
    pub negotiation_delay: Duration,
    /// Upper bound for outbound requests such as `ping` and `roots/list`.
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Some(Duration::from_millis(1000)),
            negotiation_attempts: 10,
            negotiation_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Maps an inbound streamed-HTTP request to the identity attached to its session.
pub type Authenticator<A> =
    Arc<dyn Fn(AuthRequest) -> BoxedFuture<anyhow::Result<A>> + Send + Sync>;

/// Identity and behavior of a [`crate::Server`].
pub struct ServerOptions<A> {
    pub name: String,
    pub version: String,
    pub session: SessionConfig,
    pub(crate) authenticate: Option<Authenticator<A>>,
}

impl<A> ServerOptions<A> {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            session: SessionConfig::default(),
            authenticate: None,
        }
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Installs the hook run once per streamed-HTTP connection before its session exists.
    /// An error rejects the connection with `401 Unauthorized`.
    pub fn authenticate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AuthRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<A>> + Send + 'static,
    {
        self.authenticate = Some(Arc::new(move |req| Box::pin(f(req))));
        self
    }
}

impl<A> fmt::Debug for ServerOptions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("session", &self.session)
            .field("authenticate", &self.authenticate.is_some())
            .finish()
    }
}

/// Where the streamed-HTTP transport listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseConfig {
    pub host: String,
    /// `0` binds an ephemeral port; see [`crate::Server::sse_address`].
    pub port: u16,
    /// Path of the event-stream endpoint.
    pub endpoint: String,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            endpoint: "/sse".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOptions {
    Stdio,
    Sse(SseConfig),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.ping_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.negotiation_attempts, 10);
        assert_eq!(
            config.negotiation_delay * config.negotiation_attempts,
            Duration::from_secs(1)
        );
    }
}
