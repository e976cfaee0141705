//! Web channel over WebSocket
//!
//! The token rides both in the URL (`access_token`, added by
//! [`Endpoint::parse`](super::Endpoint::parse)) and as a bearer header.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::channel::{ChannelKind, ChannelPair, Connector, FrameSink, FrameSource};
use crate::error::{CoreError, Result, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials WebSocket channels with envelope framing
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    token: Option<String>,
    dial_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: Url, token: Option<String>, dial_timeout: Duration) -> Self {
        Self {
            url,
            token,
            dial_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<ChannelPair> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::DialFailed(format!("Bad request: {}", e)))?;

        if let Some(token) = &self.token {
            let value: HeaderValue = format!("Bearer {}", token)
                .parse()
                .map_err(|_| CoreError::Config("Token is not a valid header value".into()))?;
            request.headers_mut().insert("Authorization", value);
        }

        tracing::debug!(host = ?self.url.host_str(), "Dialing web channel");
        let (stream, _) = tokio::time::timeout(self.dial_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::DialFailed("timed out".into()))??;

        let (write, read) = stream.split();
        Ok(ChannelPair::enveloped(WsSink { write }, WsSource { read }))
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Web
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, data: &str) -> Result<()> {
        self.write
            .send(Message::Text(data.to_string()))
            .await
            .map_err(|e| CoreError::Protocol(format!("WebSocket write failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.write.send(Message::Close(None)).await;
        self.write
            .close()
            .await
            .map_err(|e| CoreError::Protocol(format!("WebSocket close failed: {}", e)))
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "WebSocket closed by server");
                    return Ok(None);
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(CoreError::Protocol(format!("WebSocket read failed: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }
}
