//! Defines the `Session`, which manages the state and logic for a single client connection.
//!
//! A session owns one transport. A background I/O task multiplexes outbound messages with
//! inbound ones; every inbound request is handled on its own task so a slow tool never
//! blocks other calls or the liveness ping.

use super::capabilities::server_capabilities;
use super::context::Context;
use super::{lock, Registry};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{EventEmitter, SessionEvent};
use crate::network_adapter::NetworkAdapter;
use crate::protocol::{IncomingMessage, ProtocolConnection};
use crate::types::{
    negotiate_protocol_version, CallToolParams, ClientCapabilities, CompleteParams,
    CreateMessageParams, CreateMessageResult, ErrorData, ErrorResponse, GetPromptParams,
    Implementation, InitializeRequestParams, InitializeResult, JSONRPCResponse, ListRootsResult,
    LoggingLevel, Notification, ReadResourceParams, Request, RequestId, Response, Root,
    ServerCapabilities, SetLevelParams, JSONRPC_VERSION,
};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A command for the I/O task.
pub(crate) enum Outbound {
    /// A serialized message to write to the transport.
    Message(String),
    /// Close the transport, report the outcome, and stop.
    Close(oneshot::Sender<Result<()>>),
}

/// A cloneable sender for messages bound to one client.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }

    pub(crate) fn send_message<T: Serialize>(&self, message: &T) -> Result<()> {
        let json_string = serde_json::to_string(message)?;
        self.outbound.send(Outbound::Message(json_string))?;
        Ok(())
    }

    pub(crate) fn send_notification<T: Serialize>(&self, method: &str, params: T) -> Result<()> {
        self.send_message(&Notification::new(method, Some(params)))
    }

    async fn close(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound.send(Outbound::Close(ack_tx))?;
        ack_rx.await?
    }
}

/// Lifecycle of a [`Session`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Negotiating,
    Active,
    Closed,
}

type PendingResponse = oneshot::Sender<std::result::Result<Value, ErrorData>>;

struct SessionInner<A> {
    id: String,
    registry: Registry<A>,
    capabilities: ServerCapabilities,
    server_info: Implementation,
    config: SessionConfig,
    auth: Option<A>,
    state: Mutex<SessionState>,
    client_capabilities: OnceLock<ClientCapabilities>,
    logging_level: Mutex<Option<LoggingLevel>>,
    roots: Mutex<Vec<Root>>,
    handle: Mutex<Option<ConnectionHandle>>,
    pending: DashMap<RequestId, PendingResponse>,
    next_id: AtomicI64,
    ping_task: Mutex<Option<JoinHandle<()>>>,
    events: EventEmitter<SessionEvent>,
    disconnected: AtomicBool,
}

/// One negotiated, stateful connection with a single client.
///
/// Cheap to clone; all clones refer to the same connection.
pub struct Session<A = ()> {
    inner: Arc<SessionInner<A>>,
}

impl<A> Clone for Session<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Session<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<A> Session<A> {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// What the client advertised in `initialize`, once it has done so.
    pub fn client_capabilities(&self) -> Option<&ClientCapabilities> {
        self.inner.client_capabilities.get()
    }

    /// The level last requested through `logging/setLevel`. Not used for filtering.
    pub fn logging_level(&self) -> Option<LoggingLevel> {
        *lock(&self.inner.logging_level)
    }

    pub fn roots(&self) -> Vec<Root> {
        lock(&self.inner.roots).clone()
    }

    pub fn auth(&self) -> Option<&A> {
        self.inner.auth.as_ref()
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.inner.capabilities
    }

    /// Registers a listener for this session's events.
    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(listener);
    }

    fn handle(&self) -> Option<ConnectionHandle> {
        lock(&self.inner.handle).clone()
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.inner.state) = state;
    }

    fn stop_ping(&self) {
        if let Some(task) = lock(&self.inner.ping_task).take() {
            task.abort();
        }
    }

    /// Drops every outstanding outbound request; their callers see `ChannelClosed`.
    fn fail_pending(&self) {
        self.inner.pending.clear();
    }

    fn emit_disconnect(&self) {
        if !self.inner.disconnected.swap(true, Ordering::SeqCst) {
            info!(session_id = %self.inner.id, "[Session] Disconnected");
            self.inner.events.emit(&SessionEvent::Disconnect);
        }
    }

    fn emit_error(&self, error: Error) {
        self.inner.events.emit(&SessionEvent::Error {
            error: Arc::new(error),
        });
    }

    /// Called by the I/O task when the transport ends on its own.
    fn on_transport_closed(&self) {
        self.set_state(SessionState::Closed);
        self.stop_ping();
        lock(&self.inner.handle).take();
        self.fail_pending();
        self.emit_disconnect();
    }

    /// Closes the session: the liveness loop stops first, then the transport closes.
    ///
    /// Idempotent. Transport close failures are logged, never returned.
    pub async fn close(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.stop_ping();

        let handle = lock(&self.inner.handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.close().await {
                warn!(session_id = %self.inner.id, error = %e, "[Session] Transport close failed");
            }
        }
        self.fail_pending();
        self.emit_disconnect();
    }
}

impl<A> Session<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        registry: Registry<A>,
        server_info: Implementation,
        config: SessionConfig,
        auth: Option<A>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: uuid::Uuid::new_v4().to_string(),
                capabilities: server_capabilities(&registry),
                registry,
                server_info,
                config,
                auth,
                state: Mutex::new(SessionState::Unconnected),
                client_capabilities: OnceLock::new(),
                logging_level: Mutex::new(None),
                roots: Mutex::new(Vec::new()),
                handle: Mutex::new(None),
                pending: DashMap::new(),
                next_id: AtomicI64::new(0),
                ping_task: Mutex::new(None),
                events: EventEmitter::default(),
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    /// Attaches the transport and runs capability negotiation.
    ///
    /// Returns once the session is `Active`, or `Closed` if the transport ended while
    /// negotiating. A session connects at most once.
    pub async fn connect<N>(&self, adapter: N) -> Result<()>
    where
        N: NetworkAdapter + 'static,
    {
        {
            let mut state = lock(&self.inner.state);
            if *state != SessionState::Unconnected {
                return Err(Error::UnexpectedState(format!(
                    "cannot connect a session that is {:?}",
                    *state
                )));
            }
            *state = SessionState::Negotiating;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *lock(&self.inner.handle) = Some(ConnectionHandle::new(outbound_tx));
        tokio::spawn(run_io(
            self.clone(),
            ProtocolConnection::new(adapter),
            outbound_rx,
        ));

        self.negotiate().await;
        if self.state() == SessionState::Closed {
            return Ok(());
        }

        if self
            .client_capabilities()
            .and_then(|caps| caps.roots.as_ref())
            .and_then(|roots| roots.list_changed)
            .unwrap_or(false)
        {
            match self.list_roots().await {
                Ok(roots) => *lock(&self.inner.roots) = roots,
                Err(e) => {
                    warn!(session_id = %self.inner.id, error = %e, "[Session] Initial roots fetch failed")
                }
            }
        }

        {
            let mut state = lock(&self.inner.state);
            if *state != SessionState::Negotiating {
                return Ok(());
            }
            *state = SessionState::Active;
        }
        self.start_ping();
        info!(session_id = %self.inner.id, "[Session] Active");
        self.inner.events.emit(&SessionEvent::Connect);
        Ok(())
    }

    async fn negotiate(&self) {
        for _ in 0..self.inner.config.negotiation_attempts {
            if self.client_capabilities().is_some() || self.state() == SessionState::Closed {
                return;
            }
            tokio::time::sleep(self.inner.config.negotiation_delay).await;
        }
        if self.client_capabilities().is_none() {
            warn!(
                session_id = %self.inner.id,
                "[Session] Client capabilities not received; continuing without them"
            );
        }
    }

    fn start_ping(&self) {
        let Some(interval) = self.inner.config.ping_interval else {
            return;
        };
        let session = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = session.ping().await {
                    warn!(session_id = %session.inner.id, error = %e, "[Session] Ping failed");
                    session.emit_error(e);
                }
            }
        });
        *lock(&self.inner.ping_task) = Some(task);
    }

    /// Sends an outbound request and waits for the correlated response.
    async fn request<P, T>(&self, method: &str, params: Option<P>) -> Result<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let handle = self.handle().ok_or(Error::ChannelClosed)?;
        let id = RequestId::Num(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);

        let request = Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        if let Err(e) = handle.send_message(&request) {
            self.inner.pending.remove(&id);
            return Err(e);
        }

        let outcome = match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(received) => received?,
            Err(elapsed) => {
                self.inner.pending.remove(&id);
                return Err(elapsed.into());
            }
        };
        let value = outcome.map_err(Error::JsonRpc)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Pings the client once.
    pub async fn ping(&self) -> Result<()> {
        self.request::<Value, Value>("ping", None).await.map(|_| ())
    }

    /// Asks the client for its current roots.
    pub async fn list_roots(&self) -> Result<Vec<Root>> {
        let result: ListRootsResult = self.request::<Value, _>("roots/list", None).await?;
        Ok(result.roots)
    }

    /// Forwards a sampling request to the client.
    pub async fn request_sampling(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        self.request("sampling/createMessage", Some(params)).await
    }

    fn handle_incoming(&self, value: Value) {
        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
        match IncomingMessage::from_value(value) {
            Ok(IncomingMessage::Request(request)) => {
                let session = self.clone();
                tokio::spawn(async move { session.handle_request(request).await });
            }
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(notification)
            }
            Ok(IncomingMessage::Response(response)) => self.handle_response(response),
            Err(error) => {
                debug!(session_id = %self.inner.id, message = %error.message, "[Session] Rejected message");
                self.reply(ErrorResponse::new(id, error));
            }
        }
    }

    fn reply<T: Serialize>(&self, message: T) {
        let Some(handle) = self.handle() else {
            debug!(session_id = %self.inner.id, "[Session] Dropping reply for a closed session");
            return;
        };
        if let Err(e) = handle.send_message(&message) {
            warn!(session_id = %self.inner.id, error = %e, "[Session] Failed to queue reply");
        }
    }

    async fn handle_request(&self, request: Request<Value>) {
        let method = request.method.clone();
        debug!(session_id = %self.inner.id, %method, "[Session] Handling request");
        match self.dispatch(&method, request.params).await {
            Ok(result) => self.reply(Response::new(request.id, result)),
            Err(error) => {
                debug!(session_id = %self.inner.id, %method, code = error.code, message = %error.message, "[Session] Request failed");
                self.reply(ErrorResponse::new(Some(request.id), error))
            }
        }
    }

    /// Routes one request. Listing and reading methods exist only when the matching
    /// capability was advertised.
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, ErrorData> {
        let params = params.filter(|p| !p.is_null()).unwrap_or_else(|| json!({}));
        let caps = &self.inner.capabilities;
        let registry = &self.inner.registry;

        match method {
            "initialize" => to_result(self.initialize(parse_params(params)?)),
            "ping" => Ok(json!({})),
            "tools/list" if caps.tools.is_some() => to_result(registry.list_tools()),
            "tools/call" if caps.tools.is_some() => {
                to_result(self.call_tool(parse_params(params)?).await?)
            }
            "resources/list" if caps.resources.is_some() => to_result(registry.list_resources()),
            "resources/templates/list" if caps.resources.is_some() => {
                to_result(registry.list_resource_templates())
            }
            "resources/read" if caps.resources.is_some() => {
                let params: ReadResourceParams = parse_params(params)?;
                to_result(registry.read_resource(&params.uri).await?)
            }
            "prompts/list" if caps.prompts.is_some() => to_result(registry.list_prompts()),
            "prompts/get" if caps.prompts.is_some() => {
                let params: GetPromptParams = parse_params(params)?;
                to_result(registry.get_prompt(params).await?)
            }
            "completion/complete" => {
                let params: CompleteParams = parse_params(params)?;
                to_result(registry.complete(params).await?)
            }
            "logging/setLevel" => {
                let params: SetLevelParams = parse_params(params)?;
                *lock(&self.inner.logging_level) = Some(params.level);
                Ok(json!({}))
            }
            other => Err(ErrorData::method_not_found(format!(
                "Method not found: {}",
                other
            ))),
        }
    }

    fn initialize(&self, params: InitializeRequestParams) -> InitializeResult {
        let protocol_version = negotiate_protocol_version(&params.protocol_version);
        info!(
            session_id = %self.inner.id,
            client = %params.client_info.name,
            protocol_version,
            "[Session] Client initialized"
        );
        if self
            .inner
            .client_capabilities
            .set(params.capabilities)
            .is_err()
        {
            warn!(session_id = %self.inner.id, "[Session] Repeated initialize; keeping the first capabilities");
        }
        InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: self.inner.capabilities.clone(),
            server_info: self.inner.server_info.clone(),
        }
    }

    async fn call_tool(
        &self,
        params: CallToolParams,
    ) -> std::result::Result<crate::types::CallToolResult, ErrorData> {
        let tool = self
            .inner
            .registry
            .find_tool(&params.name)
            .cloned()
            .ok_or_else(|| ErrorData::method_not_found(format!("Unknown tool: {}", params.name)))?;
        let handle = self
            .handle()
            .ok_or_else(|| ErrorData::internal_error("Session is closed"))?;
        let ctx = Context::new(
            self.inner.auth.clone(),
            params.meta.and_then(|meta| meta.progress_token),
            handle,
        );
        tool.call(params.arguments, ctx).await
    }

    fn handle_notification(&self, notification: Notification<Value>) {
        match notification.method.as_str() {
            "notifications/roots/list_changed" => {
                let session = self.clone();
                tokio::spawn(async move { session.refresh_roots().await });
            }
            "notifications/initialized" | "notifications/cancelled" => {
                debug!(session_id = %self.inner.id, method = %notification.method, "[Session] Notification");
            }
            other => {
                debug!(session_id = %self.inner.id, method = %other, "[Session] Ignoring unknown notification");
            }
        }
    }

    async fn refresh_roots(&self) {
        match self.list_roots().await {
            Ok(roots) => {
                *lock(&self.inner.roots) = roots.clone();
                self.inner.events.emit(&SessionEvent::RootsChanged { roots });
            }
            Err(e) => {
                warn!(session_id = %self.inner.id, error = %e, "[Session] Roots refetch failed");
                self.emit_error(e);
            }
        }
    }

    fn handle_response(&self, response: JSONRPCResponse<Value>) {
        let (id, outcome) = match response {
            JSONRPCResponse::Success(success) => (Some(success.id), Ok(success.result)),
            JSONRPCResponse::Error(failure) => (failure.id, Err(failure.error)),
        };
        let pending = id.and_then(|id| self.inner.pending.remove(&id));
        match pending {
            Some((_, waiter)) => {
                // The waiter may have timed out in the meantime.
                let _ = waiter.send(outcome);
            }
            None => debug!(session_id = %self.inner.id, "[Session] Response for an unknown request"),
        }
    }
}

async fn run_io<A, N>(
    session: Session<A>,
    mut connection: ProtocolConnection<N>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    A: Clone + Send + Sync + 'static,
    N: NetworkAdapter,
{
    loop {
        tokio::select! {
            biased;
            command = outbound.recv() => match command {
                Some(Outbound::Message(json_string)) => {
                    if let Err(e) = connection.send_raw(&json_string).await {
                        error!(session_id = %session.inner.id, error = %e, "[Session] Transport write failed");
                        break;
                    }
                }
                Some(Outbound::Close(ack)) => {
                    let _ = ack.send(connection.close().await);
                    return;
                }
                None => break,
            },
            incoming = connection.recv_message::<Value>() => match incoming {
                Ok(Some(value)) => session.handle_incoming(value),
                Ok(None) => {
                    debug!(session_id = %session.inner.id, "[Session] Transport ended");
                    break;
                }
                Err(Error::Serialization(e)) => {
                    warn!(session_id = %session.inner.id, error = %e, "[Session] Unparseable message");
                    let reply = ErrorResponse::new(None, ErrorData::parse_error(format!("Parse error: {}", e)));
                    if let Err(e) = connection.send_serializable(reply).await {
                        error!(session_id = %session.inner.id, error = %e, "[Session] Transport write failed");
                        break;
                    }
                }
                Err(e) => {
                    error!(session_id = %session.inner.id, error = %e, "[Session] Transport read failed");
                    break;
                }
            },
        }
    }
    if let Err(e) = connection.close().await {
        debug!(session_id = %session.inner.id, error = %e, "[Session] Transport close after end failed");
    }
    session.on_transport_closed();
}

fn parse_params<T: DeserializeOwned>(params: Value) -> std::result::Result<T, ErrorData> {
    serde_json::from_value(params)
        .map_err(|e| ErrorData::invalid_params(format!("Invalid params: {}", e)))
}

fn to_result<T: Serialize>(result: T) -> std::result::Result<Value, ErrorData> {
    serde_json::to_value(result).map_err(|e| ErrorData::internal_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_adapter::ChannelAdapter;
    use crate::server::Tool;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            ping_interval: None,
            negotiation_attempts: 2,
            negotiation_delay: Duration::from_millis(5),
            request_timeout: Duration::from_millis(200),
        }
    }

    fn session_with_echo() -> Session<()> {
        let mut registry = Registry::default();
        registry
            .tools
            .push(Arc::new(Tool::new("echo", |_ctx| async { Ok("ok") })));
        Session::new(
            registry,
            Implementation {
                name: "test".to_string(),
                version: "0.0.0".to_string(),
            },
            quiet_config(),
            None,
        )
    }

    async fn next_json(peer: &mut ChannelAdapter) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(1), peer.recv())
            .await
            .expect("timed out waiting for the session")
            .unwrap()
            .expect("transport closed");
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_connect_without_initialize_still_activates() {
        let session = session_with_echo();
        let (server_side, _client_side) = ChannelAdapter::pair();
        session.connect(server_side).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.client_capabilities().is_none());
        assert!(session.connect(ChannelAdapter::pair().0).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_error_keeps_connection_alive() {
        let session = session_with_echo();
        let (server_side, mut client) = ChannelAdapter::pair();
        session.connect(server_side).await.unwrap();

        client.send("{not json").await.unwrap();
        let reply = next_json(&mut client).await;
        assert_eq!(reply["error"]["code"], json!(crate::types::PARSE_ERROR));
        assert_eq!(reply["id"], Value::Null);

        client
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo"}}"#)
            .await
            .unwrap();
        let reply = next_json(&mut client).await;
        assert_eq!(reply["id"], json!(7));
        assert_eq!(reply["result"]["content"][0]["text"], json!("ok"));
    }

    #[tokio::test]
    async fn test_ungated_method_is_not_found() {
        let session = session_with_echo();
        let (server_side, mut client) = ChannelAdapter::pair();
        session.connect(server_side).await.unwrap();

        client
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"prompts/list"}"#)
            .await
            .unwrap();
        let reply = next_json(&mut client).await;
        assert_eq!(reply["error"]["code"], json!(crate::types::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_transport_end_emits_disconnect_once() {
        let session = session_with_echo();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        session.on(move |event| {
            if matches!(event, SessionEvent::Disconnect) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (server_side, mut client) = ChannelAdapter::pair();
        session.connect(server_side).await.unwrap();
        client.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while session.state() != SessionState::Closed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        session.close().await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outbound_request_times_out() {
        let session = session_with_echo();
        let (server_side, _client) = ChannelAdapter::pair();
        session.connect(server_side).await.unwrap();
        assert!(matches!(session.ping().await, Err(Error::Timeout)));
        assert!(session.inner.pending.is_empty());
    }
}
