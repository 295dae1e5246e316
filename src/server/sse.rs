//! The streamed-HTTP transport: one event stream per client, messages posted back.
//!
//! `GET {endpoint}` opens a session and streams an `endpoint` event naming the URL to post
//! to, then one `message` event per outbound JSON-RPC message. `POST /messages?sessionId=`
//! delivers inbound messages to that session.

use super::Server;
use crate::config::SseConfig;
use crate::error::Result;
use crate::network_adapter::sse::SsePeer;
use crate::network_adapter::SseAdapter;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use futures::{future, stream, StreamExt};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// The path clients post messages to.
const MESSAGES_PATH: &str = "/messages";

/// What the authentication hook sees of an incoming connection.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub headers: HeaderMap,
    pub uri: Uri,
}

/// A running listener.
pub(crate) struct SseHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SseHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for open ones to finish.
    pub(crate) async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "[SSE] Listener task ended abnormally");
        }
    }
}

struct SseState<A: Clone + Send + Sync + 'static> {
    server: Server<A>,
    /// Inbound message senders, keyed by session id.
    connections: DashMap<String, mpsc::UnboundedSender<String>>,
}

pub(crate) async fn listen<A>(server: Server<A>, config: &SseConfig) -> Result<SseHandle>
where
    A: Clone + Send + Sync + 'static,
{
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    let state = Arc::new(SseState {
        server,
        connections: DashMap::new(),
    });
    let router = Router::new()
        .route(&config.endpoint, get(open_stream::<A>))
        .route(MESSAGES_PATH, post(post_message::<A>))
        .with_state(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "[SSE] Server error");
        }
    });
    info!(%local_addr, endpoint = %config.endpoint, "[SSE] Listening");

    Ok(SseHandle {
        local_addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn open_stream<A>(
    State(state): State<Arc<SseState<A>>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response
where
    A: Clone + Send + Sync + 'static,
{
    let auth = match state.server.authenticator() {
        Some(authenticate) => match authenticate(AuthRequest { headers, uri }).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "[SSE] Authentication rejected");
                return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
            }
        },
        None => None,
    };

    let session = state.server.create_session(auth);
    let id = session.id().to_string();
    let (adapter, SsePeer { posts, events }) = SseAdapter::channel();
    state.connections.insert(id.clone(), posts);

    let server = state.server.clone();
    let attached = session.clone();
    tokio::spawn(async move {
        if let Err(e) = server.attach(&attached, adapter).await {
            warn!(session_id = %attached.id(), error = %e, "[SSE] Session failed to start");
        }
    });

    debug!(session_id = %id, "[SSE] Stream opened");
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?sessionId={}", MESSAGES_PATH, id));
    let guard = StreamGuard {
        id,
        session,
        state: Arc::clone(&state),
    };
    let messages = UnboundedReceiverStream::new(events)
        .map(|message| Event::default().event("message").data(message));
    let stream = stream::once(future::ready(endpoint))
        .chain(messages)
        .map(move |event| {
            // Keeps the guard alive for as long as the client holds the stream.
            let _ = &guard;
            Ok::<_, Infallible>(event)
        });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn post_message<A>(
    State(state): State<Arc<SseState<A>>>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> StatusCode
where
    A: Clone + Send + Sync + 'static,
{
    let Some(id) = query.get("sessionId") else {
        return StatusCode::BAD_REQUEST;
    };
    let Some(posts) = state.connections.get(id).map(|entry| entry.value().clone()) else {
        debug!(session_id = %id, "[SSE] Post for an unknown session");
        return StatusCode::NOT_FOUND;
    };
    match posts.send(body) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

/// Closes the session once its event stream is dropped.
struct StreamGuard<A: Clone + Send + Sync + 'static> {
    id: String,
    session: super::Session<A>,
    state: Arc<SseState<A>>,
}

impl<A: Clone + Send + Sync + 'static> Drop for StreamGuard<A> {
    fn drop(&mut self) {
        self.state.connections.remove(&self.id);
        debug!(session_id = %self.id, "[SSE] Stream dropped");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let session = self.session.clone();
            runtime.spawn(async move { session.close().await });
        }
    }
}
