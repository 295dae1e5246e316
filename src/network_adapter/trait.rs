// src/network_adapter/trait.rs
use crate::error::Result;
use async_trait::async_trait;

/// A bidirectional message channel carrying one JSON-RPC message per call.
///
/// `recv` must be cancel safe: the session polls it inside `tokio::select!` and may drop
/// the future when an outbound message is ready. `Ok(None)` signals that the peer is gone.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    async fn send(&mut self, msg: &str) -> Result<()>;
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Releases the transport. Called once when the session closes.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
