// src/network_adapter/ndjson.rs
use super::r#trait::NetworkAdapter;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};

/// Newline-delimited JSON over any reader/writer pair.
///
/// Partial lines survive a cancelled `recv` in `pending`, so the adapter can be polled
/// from `tokio::select!`.
pub struct NdjsonAdapter<R, W> {
    reader: BufReader<R>,
    writer: W,
    pending: Vec<u8>,
}

/// The stdio transport: one process, one session.
pub type StdioAdapter = NdjsonAdapter<Stdin, Stdout>;

impl<R, W> NdjsonAdapter<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
        }
    }
}

impl NdjsonAdapter<Stdin, Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> NetworkAdapter for NdjsonAdapter<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&mut self, msg: &str) -> Result<()> {
        if msg.contains('\n') {
            return Err(Error::Other(
                "Refusing to send a message containing a raw newline".into(),
            ));
        }
        self.writer.write_all(msg.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| Error::Other(format!("Invalid UTF-8 in message: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_reads_lines_and_reports_eof() {
        let (mut peer, local) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(local);
        let mut adapter = NdjsonAdapter::new(read_half, write_half);

        peer.write_all(b"{\"a\":1}\r\n{\"b\":2}\n{\"c\":3}").await.unwrap();
        drop(peer);

        assert_eq!(adapter.recv().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(adapter.recv().await.unwrap().as_deref(), Some("{\"b\":2}"));
        // A trailing line without a newline is still delivered before EOF.
        assert_eq!(adapter.recv().await.unwrap().as_deref(), Some("{\"c\":3}"));
        assert_eq!(adapter.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_appends_newline() {
        let (mut peer, local) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(local);
        let mut adapter = NdjsonAdapter::new(read_half, write_half);

        adapter.send("{\"jsonrpc\":\"2.0\"}").await.unwrap();
        adapter.close().await.unwrap();

        let mut out = String::new();
        peer.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"jsonrpc\":\"2.0\"}\n");
        assert!(adapter.send("a\nb").await.is_err());
    }
}
