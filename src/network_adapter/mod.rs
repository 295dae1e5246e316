// src/network_adapter/mod.rs
pub mod channel;
pub mod ndjson;
pub mod sse;
pub mod r#trait; // Using r# to use the keyword `trait` as a module name

pub use channel::ChannelAdapter;
pub use ndjson::{NdjsonAdapter, StdioAdapter};
pub use r#trait::NetworkAdapter;
pub use sse::SseAdapter;
