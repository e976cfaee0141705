//! Raw byte-stream channel over TCP
//!
//! Frames are NUL-delimited by the pub/sub protocol itself, so no extra
//! framing is applied here.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::channel::{ChannelKind, ChannelPair, Connector, FrameSink, FrameSource};
use crate::error::{Result, TransportError};

const READ_BUFFER_SIZE: usize = 8192;

/// Dials plain TCP channels
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    dial_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, dial_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            dial_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<ChannelPair> {
        tracing::debug!(addr = %self.addr, "Dialing stream channel");
        let stream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::DialFailed("timed out".into()))?
            .map_err(|e| TransportError::DialFailed(format!("{}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        Ok(ChannelPair::new(
            TcpSink { write },
            TcpSource {
                read,
                buf: vec![0u8; READ_BUFFER_SIZE],
            },
        ))
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Stream
    }
}

struct TcpSink {
    write: OwnedWriteHalf,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&mut self, data: &str) -> Result<()> {
        self.write.write_all(data.as_bytes()).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.write.shutdown().await?;
        Ok(())
    }
}

struct TcpSource {
    read: OwnedReadHalf,
    buf: Vec<u8>,
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        let n = self.read.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let connector = TcpConnector::new(addr.to_string(), Duration::from_secs(5));
        assert_eq!(connector.kind(), ChannelKind::Stream);
        let mut pair = connector.connect().await.unwrap();
        pair.sink.send("ping\0").await.unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 5 {
            let chunk = pair.source.recv().await.unwrap().unwrap();
            echoed.extend_from_slice(&chunk);
        }
        assert_eq!(echoed, b"ping\0");

        server.await.unwrap();
        assert!(pair.source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(addr.to_string(), Duration::from_secs(5));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(
            err,
            crate::CoreError::Transport(TransportError::DialFailed(_))
        ));
    }
}
