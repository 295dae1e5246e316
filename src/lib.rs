//! A session engine for serving Model Context Protocol tools, resources and prompts.
//!
//! Register capabilities on a [`Server`], then attach a transport: stdio, the streamed-HTTP
//! (SSE) listener, or any [`NetworkAdapter`]. Each connection runs as its own [`Session`].

// Lets `#[derive(ToolParameters)]` expand to `::zapmcp::...` inside this crate's tests.
extern crate self as zapmcp;

pub mod config;
pub mod error;
pub mod events;
pub mod network_adapter;
pub mod protocol;
pub mod server;
pub mod types;

pub use config::{ServerOptions, SessionConfig, SseConfig, StartOptions};
pub use error::{Error, Result, UserError};
pub use events::{EventEmitter, ServerEvent, SessionEvent};
pub use network_adapter::{ChannelAdapter, NdjsonAdapter, NetworkAdapter, SseAdapter, StdioAdapter};
pub use server::{
    fuzzy_complete, Argument, AuthRequest, Completer, Context, Logger, Prompt, Resource,
    ResourceOutput, ResourceTemplate, Server, Session, SessionState, Tool, ToolOutput,
    UriTemplate,
};
pub use types::*;

/// The schema trait and its derive share a name, like `serde::Serialize`.
pub use server::ToolParameters;
pub use zapmcp_macros::ToolParameters;
