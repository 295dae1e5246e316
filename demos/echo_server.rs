//! A small server exposing one of each capability kind.
//!
//! Run over stdio:
//! `cargo run --example echo_server`
//!
//! Or over streamed HTTP:
//! `cargo run --example echo_server -- --transport sse --port 8081`

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Notify;
use zapmcp::{
    Argument, Context, Prompt, Resource, ResourceBody, ResourceTemplate, Server, ServerEvent,
    ServerOptions, SseConfig, StartOptions, Tool, ToolParameters,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Sse,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// How clients reach the server.
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// The port number to listen on when serving over SSE.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path of the event-stream endpoint.
    #[arg(long, default_value = "/sse")]
    endpoint: String,
}

#[derive(Deserialize, ToolParameters)]
struct EchoParams {
    /// Text to send back.
    message: String,
    #[param(desc = "How many times to repeat the message")]
    times: Option<usize>,
}

async fn echo(params: EchoParams, ctx: Context<()>) -> Result<String> {
    let times = params.times.unwrap_or(1);
    ctx.log().info(format!("echoing {} time(s)", times));
    Ok(vec![params.message; times].join(" "))
}

fn build_server() -> Result<Server> {
    let server = Server::new(ServerOptions::new("echo-server", env!("CARGO_PKG_VERSION")))
        .add_tool(
            Tool::with_parameters("echo", echo).description("Echoes back your message"),
        )
        .add_resource(
            Resource::new("docs://readme", "Readme", || async {
                Ok("Call the `echo` tool with a message.")
            })
            .mime_type("text/plain"),
        )
        .add_resource_template(
            ResourceTemplate::new("greetings://{language}", "Greeting", |vars| async move {
                let greeting = match vars.get("language").map(String::as_str) {
                    Some("fr") => "Bonjour",
                    Some("de") => "Hallo",
                    _ => "Hello",
                };
                Ok(ResourceBody::text(greeting))
            })?
            .argument(Argument::new("language").enum_values(["en", "fr", "de"])),
        )
        .add_prompt(
            Prompt::new("greet", |args| async move {
                let who = args.get("who").cloned().unwrap_or_default();
                Ok(format!("Write a short greeting for {}.", who))
            })
            .description("Drafts a greeting")
            .argument(Argument::new("who").required()),
        );
    Ok(server)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Stdout carries the protocol when serving over stdio.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let server = build_server()?;
    let done = Arc::new(Notify::new());
    let notify = Arc::clone(&done);
    server.on(move |event| {
        if let ServerEvent::Disconnect { session } = event {
            tracing::info!(session_id = %session.id(), "client disconnected");
            notify.notify_one();
        }
    });

    match args.transport {
        Transport::Stdio => {
            server.start(StartOptions::Stdio).await?;
            tokio::select! {
                _ = done.notified() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Transport::Sse => {
            server
                .start(StartOptions::Sse(SseConfig {
                    port: args.port,
                    endpoint: args.endpoint,
                    ..SseConfig::default()
                }))
                .await?;
            if let Some(addr) = server.sse_address() {
                tracing::info!(%addr, "listening");
            }
            tokio::signal::ctrl_c().await?;
        }
    }

    server.stop().await;
    Ok(())
}
