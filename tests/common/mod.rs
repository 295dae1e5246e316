//! A minimal JSON-RPC client for driving sessions over an in-process channel.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use zapmcp::{ChannelAdapter, NetworkAdapter, Server, Session, SessionConfig};

pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Session timings that keep tests fast and free of background pings.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        ping_interval: None,
        negotiation_attempts: 10,
        negotiation_delay: Duration::from_millis(10),
        request_timeout: Duration::from_millis(500),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
    notifications: Mutex<Vec<Value>>,
    server_requests: Mutex<Vec<String>>,
    roots: Mutex<Vec<Value>>,
    ignored: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

/// The client end of a session. Answers `ping`, `roots/list` and
/// `sampling/createMessage` from the server automatically, unless told to ignore or fail
/// a method.
pub struct TestClient {
    tx: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    next_id: AtomicI64,
}

impl TestClient {
    pub fn spawn(mut adapter: ChannelAdapter) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let shared = Arc::new(Shared::default());
        let task_shared = Arc::clone(&shared);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => match outgoing {
                        Some(line) => {
                            if adapter.send(&line).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = adapter.close().await;
                            break;
                        }
                    },
                    incoming = adapter.recv() => match incoming {
                        Ok(Some(line)) => {
                            let value: Value = serde_json::from_str(&line).unwrap();
                            if let Some(reply) = handle_incoming(&task_shared, value) {
                                if adapter.send(&reply.to_string()).await.is_err() {
                                    break;
                                }
                            }
                        }
                        _ => break,
                    },
                }
            }
        });

        Self {
            tx,
            shared,
            next_id: AtomicI64::new(1000),
        }
    }

    /// Connects a fresh client to `server`, sending `initialize` with `capabilities`.
    pub async fn connect<A>(server: &Server<A>, capabilities: Value) -> (TestClient, Session<A>)
    where
        A: Clone + Send + Sync + 'static,
    {
        let (server_side, client_side) = ChannelAdapter::pair();
        let client = TestClient::spawn(client_side);
        let initialize = client.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": capabilities,
                "clientInfo": { "name": "test-client", "version": "0.0.1" }
            }),
        );
        let (session, init) = tokio::join!(server.serve(server_side), initialize);
        assert!(init.get("result").is_some(), "initialize failed: {}", init);
        client.notify("notifications/initialized", json!({}));
        (client, session.unwrap())
    }

    /// Sends a request and returns the full response message.
    pub async fn request(&self, method: &str, params: Value) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(id, tx);
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.tx.send(message.to_string()).unwrap();
        tokio::time::timeout(TIMEOUT, rx)
            .await
            .unwrap_or_else(|_| panic!("no response to {}", method))
            .unwrap()
    }

    /// Calls a tool and returns its `result`, panicking on a protocol error.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        let response = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await;
        response
            .get("result")
            .cloned()
            .unwrap_or_else(|| panic!("tools/call {} failed: {}", name, response))
    }

    pub fn notify(&self, method: &str, params: Value) {
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.tx.send(message.to_string()).unwrap();
    }

    pub fn send_raw(&self, line: &str) {
        self.tx.send(line.to_string()).unwrap();
    }

    pub fn notifications(&self) -> Vec<Value> {
        self.shared.notifications.lock().unwrap().clone()
    }

    /// Methods of the requests the server has sent to this client, in arrival order.
    pub fn server_requests(&self) -> Vec<String> {
        self.shared.server_requests.lock().unwrap().clone()
    }

    /// Leaves server requests for `method` unanswered.
    pub fn ignore_requests(&self, method: &str) {
        self.shared.ignored.lock().unwrap().push(method.to_string());
    }

    /// Answers server requests for `method` with an internal error.
    pub fn fail_requests(&self, method: &str) {
        self.shared.failing.lock().unwrap().push(method.to_string());
    }

    pub fn set_roots(&self, roots: Value) {
        *self.shared.roots.lock().unwrap() = roots.as_array().cloned().unwrap_or_default();
    }

    /// Waits until at least `count` notifications with `method` have arrived.
    pub async fn wait_for_notifications(&self, method: &str, count: usize) -> Vec<Value> {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let matching: Vec<Value> = self
                    .notifications()
                    .into_iter()
                    .filter(|n| n["method"] == method)
                    .collect();
                if matching.len() >= count {
                    return matching;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", method))
    }

    /// Drops the client's side of the transport.
    pub fn disconnect(self) {
        drop(self.tx);
    }
}

fn handle_incoming(shared: &Shared, value: Value) -> Option<Value> {
    let method = value.get("method").and_then(Value::as_str).map(str::to_string);
    let id = value.get("id").cloned().filter(|id| !id.is_null());

    match (method, id) {
        (Some(method), Some(id)) => {
            shared.server_requests.lock().unwrap().push(method.clone());
            if shared.ignored.lock().unwrap().contains(&method) {
                return None;
            }
            if shared.failing.lock().unwrap().contains(&method) {
                return Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32603, "message": "client refused" }
                }));
            }
            let result = match method.as_str() {
                "ping" => json!({}),
                "roots/list" => json!({ "roots": shared.roots.lock().unwrap().clone() }),
                "sampling/createMessage" => json!({
                    "model": "test-model",
                    "stopReason": "endTurn",
                    "role": "assistant",
                    "content": { "type": "text", "text": "sampled" }
                }),
                _ => {
                    return Some(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32601, "message": "Method not found" }
                    }))
                }
            };
            Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
        }
        (Some(_), None) => {
            shared.notifications.lock().unwrap().push(value);
            None
        }
        (None, Some(id)) => {
            if let Some(waiter) = id
                .as_i64()
                .and_then(|id| shared.pending.lock().unwrap().remove(&id))
            {
                let _ = waiter.send(value);
            }
            None
        }
        (None, None) => None,
    }
}
