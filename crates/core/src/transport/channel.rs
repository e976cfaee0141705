//! Bidirectional channel abstraction under the pub/sub protocol
//!
//! A [`Connector`] dials one channel and hands back its two halves. Sinks
//! take inner-protocol text; sources yield inner-protocol bytes. Web
//! channels are wrapped in [`EnvelopeSink`] / [`EnvelopeSource`] so the
//! client never sees envelope framing.

use async_trait::async_trait;
use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::VecDeque;
use url::Url;

use crate::error::{CoreError, Result};
use crate::protocol::envelope::{self, EnvelopeFrame};

/// Default port for `tcp://` endpoints without one
pub const DEFAULT_TCP_PORT: u16 = 61613;

/// Write half of a channel
#[async_trait]
pub trait FrameSink: Send {
    /// Send one chunk of inner-protocol text
    async fn send(&mut self, data: &str) -> Result<()>;

    /// Release the channel; errors are not interesting at this point
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a channel
#[async_trait]
pub trait FrameSource: Send {
    /// Next chunk of inner-protocol bytes, `None` when the peer ended the stream
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// Both halves of a freshly dialed channel
pub struct ChannelPair {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl ChannelPair {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }

    /// Wrap a web channel's raw text halves in envelope framing
    pub fn enveloped(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self::new(EnvelopeSink::new(sink), EnvelopeSource::new(source))
    }
}

/// Dials channels to the backend
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<ChannelPair>;

    fn kind(&self) -> ChannelKind;
}

/// Channel flavour selected by the endpoint URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Raw byte stream, frames NUL-delimited
    Stream,
    /// Text messages with envelope framing
    Web,
}

/// Parsed backend endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Stream { addr: String },
    Web { url: Url },
}

impl Endpoint {
    /// Resolve a configured URL
    ///
    /// - `tcp://host[:port]` selects the byte stream
    /// - `ws(s)://...` is used as given
    /// - `http(s)://...` gets `/<server>/<session>/websocket` appended and
    ///   the scheme switched to `ws(s)`
    ///
    /// Web URLs carry the token as `access_token`.
    pub fn parse(raw: &str, token: Option<&str>) -> Result<Self> {
        let mut url =
            Url::parse(raw).map_err(|e| CoreError::Config(format!("Invalid URL {}: {}", raw, e)))?;

        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| CoreError::Config(format!("Missing host in {}", raw)))?;
                let port = url.port().unwrap_or(DEFAULT_TCP_PORT);
                return Ok(Endpoint::Stream {
                    addr: format!("{}:{}", host, port),
                });
            }
            "ws" | "wss" => {}
            "http" | "https" => {
                let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
                url.set_scheme(scheme)
                    .map_err(|_| CoreError::Config(format!("Cannot use {} as web endpoint", raw)))?;

                let (server, session) = session_path();
                url.path_segments_mut()
                    .map_err(|_| CoreError::Config(format!("Cannot use {} as web endpoint", raw)))?
                    .pop_if_empty()
                    .push(&server)
                    .push(&session)
                    .push("websocket");
            }
            other => {
                return Err(CoreError::Config(format!(
                    "Unsupported URL scheme: {}",
                    other
                )))
            }
        }

        if let Some(token) = token {
            url.query_pairs_mut().append_pair("access_token", token);
        }
        Ok(Endpoint::Web { url })
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Endpoint::Stream { .. } => ChannelKind::Stream,
            Endpoint::Web { .. } => ChannelKind::Web,
        }
    }

    /// Host name used as the pub/sub virtual host
    pub fn host(&self) -> String {
        match self {
            Endpoint::Stream { addr } => addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| addr.clone()),
            Endpoint::Web { url } => url.host_str().unwrap_or("localhost").to_string(),
        }
    }
}

/// Random `<3-digit server id>`, `<8-char session id>` pair
fn session_path() -> (String, String) {
    let mut rng = rand::thread_rng();
    let server = format!("{:03}", rng.gen_range(0..1000));
    let session: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    (server, session)
}

/// Sink that wraps every write in an envelope array
pub struct EnvelopeSink<S> {
    inner: S,
}

impl<S> EnvelopeSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: FrameSink> FrameSink for EnvelopeSink<S> {
    async fn send(&mut self, data: &str) -> Result<()> {
        let wrapped = envelope::encode(data)?;
        self.inner.send(&wrapped).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Source that unwraps envelope messages into inner-protocol chunks
///
/// A server heart-beat becomes an empty chunk: it counts as traffic for the
/// keepalive but never reaches the inner parser, so it cannot land inside a
/// frame split across envelope messages.
pub struct EnvelopeSource<S> {
    inner: S,
    pending: VecDeque<Bytes>,
}

impl<S> EnvelopeSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl<S: FrameSource> FrameSource for EnvelopeSource<S> {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }

            let Some(raw) = self.inner.recv().await? else {
                return Ok(None);
            };
            let text = String::from_utf8_lossy(&raw);

            match envelope::decode(&text)? {
                EnvelopeFrame::Open => continue,
                EnvelopeFrame::Heartbeat => return Ok(Some(Bytes::new())),
                EnvelopeFrame::Close { code, reason } => {
                    return Err(CoreError::Protocol(format!(
                        "Server closed session: {} {}",
                        code, reason
                    )))
                }
                EnvelopeFrame::Data(frames) => {
                    self.pending.extend(frames.into_iter().map(Bytes::from));
                }
                EnvelopeFrame::Raw(text) => return Ok(Some(Bytes::from(text))),
            }
        }
    }
}
