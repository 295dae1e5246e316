// src/network_adapter/sse.rs
use super::r#trait::NetworkAdapter;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// The session side of one streamed-HTTP connection.
///
/// Outbound messages are queued for the client's event stream; inbound messages arrive
/// from `POST` requests. The HTTP side holds the matching [`SsePeer`].
pub struct SseAdapter {
    events: Option<mpsc::UnboundedSender<String>>,
    posts: mpsc::UnboundedReceiver<String>,
}

/// The HTTP side of an [`SseAdapter`].
pub struct SsePeer {
    /// Forwards a posted message body to the session.
    pub posts: mpsc::UnboundedSender<String>,
    /// Yields messages to write to the event stream. Ends when the session closes.
    pub events: mpsc::UnboundedReceiver<String>,
}

impl SseAdapter {
    pub fn channel() -> (SseAdapter, SsePeer) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (posts_tx, posts_rx) = mpsc::unbounded_channel();
        (
            SseAdapter {
                events: Some(events_tx),
                posts: posts_rx,
            },
            SsePeer {
                posts: posts_tx,
                events: events_rx,
            },
        )
    }
}

#[async_trait]
impl NetworkAdapter for SseAdapter {
    async fn send(&mut self, msg: &str) -> Result<()> {
        let events = self.events.as_ref().ok_or(Error::ChannelClosed)?;
        events.send(msg.to_string())?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.posts.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the sender finishes the client's event stream.
        self.events.take();
        Ok(())
    }
}
