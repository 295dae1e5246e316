// src/network_adapter/channel.rs
use super::r#trait::NetworkAdapter;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An in-process transport built from a pair of unbounded channels.
///
/// Useful for embedding a session inside another program and for driving one from tests.
pub struct ChannelAdapter {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelAdapter {
    /// Returns two connected ends; whatever one sends, the other receives.
    pub fn pair() -> (ChannelAdapter, ChannelAdapter) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            ChannelAdapter {
                tx: Some(a_tx),
                rx: a_rx,
            },
            ChannelAdapter {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl NetworkAdapter for ChannelAdapter {
    async fn send(&mut self, msg: &str) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(msg.to_string())?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_ways_and_close_ends_peer() {
        let (mut left, mut right) = ChannelAdapter::pair();
        left.send("ping").await.unwrap();
        right.send("pong").await.unwrap();
        assert_eq!(right.recv().await.unwrap().as_deref(), Some("ping"));
        assert_eq!(left.recv().await.unwrap().as_deref(), Some("pong"));

        left.close().await.unwrap();
        assert_eq!(right.recv().await.unwrap(), None);
        assert!(matches!(left.send("late").await, Err(Error::ChannelClosed)));
    }
}
