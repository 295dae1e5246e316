mod common;

use common::{init_tracing, test_config};
use serde_json::{json, Value};
use std::time::Duration;
use zapmcp::{Context, Server, ServerOptions, SseConfig, StartOptions, Tool};

/// Reads server-sent events off a streaming response.
struct EventReader {
    response: reqwest::Response,
    buffer: String,
}

impl EventReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Returns the next `(event, data)` pair, or `None` once the stream ends.
    async fn next(&mut self) -> Option<(String, String)> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut event = String::from("message");
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        event = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push(value.trim_start().to_string());
                    }
                }
                if data.is_empty() {
                    // Keep-alive comment.
                    continue;
                }
                return Some((event, data.join("\n")));
            }
            let chunk = tokio::time::timeout(Duration::from_secs(2), self.response.chunk())
                .await
                .expect("timed out reading the event stream")
                .ok()??;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    async fn next_message(&mut self) -> Value {
        let (event, data) = self.next().await.expect("stream ended");
        assert_eq!(event, "message");
        serde_json::from_str(&data).unwrap()
    }
}

async fn start_server() -> Server<String> {
    let server: Server<String> = Server::new(
        ServerOptions::new("sse-test", "1.0.0")
            .session_config(test_config())
            .authenticate(|request| async move {
                match request.headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Bearer secret") => Ok("alice".to_string()),
                    _ => Err(anyhow::anyhow!("missing or wrong token")),
                }
            }),
    )
    .add_tool(Tool::new("whoami", |ctx: Context<String>| async move {
        Ok(ctx.auth().cloned().unwrap_or_default())
    }));
    server
        .start(StartOptions::Sse(SseConfig {
            port: 0,
            ..SseConfig::default()
        }))
        .await
        .unwrap();
    server
}

#[tokio::test]
async fn test_rejected_without_credentials() {
    init_tracing();
    let server = start_server().await;
    let base = format!("http://{}", server.sse_address().unwrap());

    let response = reqwest::get(format!("{}/sse", base)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(server.sessions().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_round_trip_over_sse() {
    init_tracing();
    let server = start_server().await;
    let base = format!("http://{}", server.sse_address().unwrap());
    let http = reqwest::Client::new();

    let stream = http
        .get(format!("{}/sse", base))
        .header("authorization", "Bearer secret")
        .send()
        .await
        .unwrap();
    assert!(stream.status().is_success());
    let mut events = EventReader::new(stream);

    let (event, endpoint) = events.next().await.unwrap();
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/messages?sessionId="));
    let post_url = format!("{}{}", base, endpoint);

    let initialize = json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "sse-client", "version": "1" }
        }
    });
    let posted = http.post(&post_url).body(initialize.to_string()).send().await.unwrap();
    assert_eq!(posted.status(), reqwest::StatusCode::ACCEPTED);
    let reply = events.next_message().await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["serverInfo"]["name"], "sse-test");

    let call = json!({
        "jsonrpc": "2.0", "id": 2, "method": "tools/call",
        "params": { "name": "whoami", "arguments": {} }
    });
    http.post(&post_url).body(call.to_string()).send().await.unwrap();
    let reply = events.next_message().await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"]["content"][0]["text"], "alice");
    assert_eq!(server.sessions().len(), 1);
    assert_eq!(server.sessions()[0].auth().map(String::as_str), Some("alice"));

    let unknown = http
        .post(format!("{}/messages?sessionId=nope", base))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
    let no_query = http.post(format!("{}/messages", base)).body("{}").send().await.unwrap();
    assert_eq!(no_query.status(), reqwest::StatusCode::BAD_REQUEST);

    server.stop().await;
    assert!(events.next().await.is_none());
    assert!(server.sessions().is_empty());
}
