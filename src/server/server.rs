//! Defines the main `Server` struct and its builder API for registering capabilities.

use super::session::{Session, SessionState};
use super::sse::{self, SseHandle};
use super::{lock, Prompt, Registry, Resource, ResourceTemplate, Tool};
use crate::config::{Authenticator, ServerOptions, StartOptions};
use crate::error::Result;
use crate::events::{EventEmitter, ServerEvent, SessionEvent};
use crate::network_adapter::{NetworkAdapter, StdioAdapter};
use crate::types::Implementation;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::info;

struct Shared<A> {
    options: ServerOptions<A>,
    sessions: Mutex<Vec<Session<A>>>,
    events: EventEmitter<ServerEvent<A>>,
    sse: Mutex<Option<SseHandle>>,
}

/// A high-level MCP server.
///
/// Register tools, resources, templates and prompts with the by-value builder methods,
/// then attach transports with [`Self::start`] or [`Self::serve`]. Each connection gets
/// its own [`Session`] with a snapshot of what was registered at that point.
///
/// # Example
///
/// ```no_run
/// use zapmcp::{Server, ServerOptions, StartOptions, Tool};
///
/// #[tokio::main]
/// async fn main() -> zapmcp::Result<()> {
///     let server: Server = Server::new(ServerOptions::new("demo", "1.0.0"))
///         .add_tool(Tool::new("echo", |_ctx| async { Ok("ok") }));
///     server.start(StartOptions::Stdio).await?;
///     Ok(())
/// }
/// ```
pub struct Server<A = ()> {
    registry: Registry<A>,
    shared: Arc<Shared<A>>,
}

impl<A> Clone for Server<A> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A> Server<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub fn new(options: ServerOptions<A>) -> Self {
        Self {
            registry: Registry::default(),
            shared: Arc::new(Shared {
                options,
                sessions: Mutex::new(Vec::new()),
                events: EventEmitter::default(),
                sse: Mutex::new(None),
            }),
        }
    }

    pub fn add_tool(mut self, tool: Tool<A>) -> Self {
        self.registry.tools.push(Arc::new(tool));
        self
    }

    pub fn add_resource(mut self, resource: Resource) -> Self {
        self.registry.resources.push(Arc::new(resource));
        self
    }

    pub fn add_resource_template(mut self, template: ResourceTemplate) -> Self {
        self.registry.templates.push(Arc::new(template));
        self
    }

    pub fn add_prompt(mut self, prompt: Prompt) -> Self {
        self.registry.prompts.push(Arc::new(prompt));
        self
    }

    /// Registers a listener for session connects and disconnects.
    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&ServerEvent<A>) + Send + Sync + 'static,
    {
        self.shared.events.on(listener);
    }

    /// The sessions currently connected.
    pub fn sessions(&self) -> Vec<Session<A>> {
        lock(&self.shared.sessions).clone()
    }

    /// Where the streamed-HTTP transport is listening, once started.
    pub fn sse_address(&self) -> Option<SocketAddr> {
        lock(&self.shared.sse).as_ref().map(SseHandle::local_addr)
    }

    pub(crate) fn authenticator(&self) -> Option<&Authenticator<A>> {
        self.shared.options.authenticate.as_ref()
    }

    pub(crate) fn create_session(&self, auth: Option<A>) -> Session<A> {
        Session::new(
            self.registry.clone(),
            Implementation {
                name: self.shared.options.name.clone(),
                version: self.shared.options.version.clone(),
            },
            self.shared.options.session.clone(),
            auth,
        )
    }

    /// Tracks `session` and connects it over `adapter`.
    pub(crate) async fn attach<N>(&self, session: &Session<A>, adapter: N) -> Result<()>
    where
        N: NetworkAdapter + 'static,
    {
        let shared = Arc::downgrade(&self.shared);
        let id = session.id().to_string();
        session.on(move |event| {
            if !matches!(event, SessionEvent::Disconnect) {
                return;
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let removed = {
                let mut sessions = lock(&shared.sessions);
                sessions
                    .iter()
                    .position(|s| s.id() == id)
                    .map(|index| sessions.remove(index))
            };
            if let Some(session) = removed {
                shared.events.emit(&ServerEvent::Disconnect { session });
            }
        });

        lock(&self.shared.sessions).push(session.clone());
        if let Err(e) = session.connect(adapter).await {
            lock(&self.shared.sessions).retain(|s| s.id() != session.id());
            return Err(e);
        }
        if session.state() == SessionState::Active {
            self.shared.events.emit(&ServerEvent::Connect {
                session: session.clone(),
            });
        }
        Ok(())
    }

    /// Runs a new session over any transport. Returns once negotiation has finished.
    pub async fn serve<N>(&self, adapter: N) -> Result<Session<A>>
    where
        N: NetworkAdapter + 'static,
    {
        let session = self.create_session(None);
        self.attach(&session, adapter).await?;
        Ok(session)
    }

    /// Starts a transport. Stdio serves one session over this process's standard streams;
    /// the streamed-HTTP transport accepts any number of sessions until [`Self::stop`].
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        match options {
            StartOptions::Stdio => {
                info!(server = %self.shared.options.name, "[Server] Serving over stdio");
                self.serve(StdioAdapter::stdio()).await?;
            }
            StartOptions::Sse(config) => {
                let handle = sse::listen(self.clone(), &config).await?;
                let previous = lock(&self.shared.sse).replace(handle);
                if let Some(previous) = previous {
                    previous.shutdown().await;
                }
            }
        }
        Ok(())
    }

    /// Closes every session, then shuts the streamed-HTTP listener down.
    pub async fn stop(&self) {
        for session in self.sessions() {
            session.close().await;
        }
        let handle = lock(&self.shared.sse).take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        info!(server = %self.shared.options.name, "[Server] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::network_adapter::ChannelAdapter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_server() -> Server {
        Server::new(
            ServerOptions::new("test", "0.1.0").session_config(SessionConfig {
                ping_interval: None,
                negotiation_attempts: 1,
                negotiation_delay: Duration::from_millis(1),
                request_timeout: Duration::from_millis(100),
            }),
        )
        .add_tool(Tool::new("echo", |_ctx| async { Ok("ok") }))
    }

    #[tokio::test]
    async fn test_sessions_tracked_until_disconnect() {
        let server = test_server();
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (c, d) = (Arc::clone(&connects), Arc::clone(&disconnects));
        server.on(move |event| match event {
            ServerEvent::Connect { .. } => {
                c.fetch_add(1, Ordering::SeqCst);
            }
            ServerEvent::Disconnect { .. } => {
                d.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (server_side, _client) = ChannelAdapter::pair();
        let session = server.serve(server_side).await.unwrap();
        assert_eq!(server.sessions().len(), 1);
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        session.close().await;
        assert!(server.sessions().is_empty());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_all_sessions() {
        let server = test_server();
        let (a, _ca) = ChannelAdapter::pair();
        let (b, _cb) = ChannelAdapter::pair();
        let first = server.serve(a).await.unwrap();
        let second = server.serve(b).await.unwrap();

        server.stop().await;
        assert_eq!(first.state(), SessionState::Closed);
        assert_eq!(second.state(), SessionState::Closed);
        assert!(server.sessions().is_empty());
    }

    #[test]
    fn test_registration_is_snapshotted_per_session() {
        let server = test_server();
        let session = server.create_session(None);
        let server = server.add_prompt(Prompt::new("later", |_| async { Ok(String::new()) }));
        assert!(session.capabilities().prompts.is_none());
        assert!(server.create_session(None).capabilities().prompts.is_some());
    }
}
