//! In-process channel for exercising the transport client without sockets
//!
//! [`MemoryConnector`] hands the far end of every dialed channel to the
//! test as a [`MemoryPeer`], which plays the backend.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::channel::{ChannelKind, ChannelPair, Connector, FrameSink, FrameSource};
use crate::error::{CoreError, Result, TransportError};
use crate::protocol::envelope;
use crate::protocol::{Command, Frame, FrameParser, Inbound};

/// Connector backed by in-memory channels
#[derive(Debug)]
pub struct MemoryConnector {
    kind: ChannelKind,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    dial_delay: Duration,
    fail_remaining: AtomicU32,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryConnector {
    /// New connector plus the stream of peers it accepts
    pub fn new(kind: ChannelKind) -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                kind,
                accept_tx,
                dial_delay: Duration::ZERO,
                fail_remaining: AtomicU32::new(0),
                attempts: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            },
            accept_rx,
        )
    }

    /// Every dial sleeps this long first
    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    /// Refuse the next `n` dials
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Dials started so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of dials that were in progress at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn dial(&self) -> Result<ChannelPair> {
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::DialFailed("connection refused".into()).into());
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            kind: self.kind,
            from_client: client_rx,
            to_client: peer_tx,
            parser: FrameParser::new(),
            pending: VecDeque::new(),
            next_message_id: 0,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::DialFailed("no listener".into()))?;

        let sink = MemorySink {
            tx: Some(client_tx),
        };
        let source = MemorySource { rx: peer_rx };
        Ok(match self.kind {
            ChannelKind::Web => ChannelPair::enveloped(sink, source),
            ChannelKind::Stream => ChannelPair::new(sink, source),
        })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<ChannelPair> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.dial().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, data: &str) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| CoreError::Protocol("channel closed".into()))?;
        tx.send(data.to_string())
            .map_err(|_| CoreError::Protocol("peer went away".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

/// Backend side of one in-memory channel
///
/// Speaks the same framing as a real server: envelope messages on web
/// channels, bare pub/sub frames on stream channels. Dropping the peer
/// ends the client's stream.
#[derive(Debug)]
pub struct MemoryPeer {
    kind: ChannelKind,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Bytes>,
    parser: FrameParser,
    pending: VecDeque<Frame>,
    next_message_id: u64,
}

impl MemoryPeer {
    /// Next frame from the client, skipping heart-beats
    ///
    /// `None` once the client released the channel.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }

            let raw = self.from_client.recv().await?;
            let chunks = match self.kind {
                ChannelKind::Web => serde_json::from_str::<Vec<String>>(&raw).unwrap_or_default(),
                ChannelKind::Stream => vec![raw],
            };
            for chunk in chunks {
                for item in self.parser.push(chunk.as_bytes()).ok()? {
                    if let Inbound::Frame(frame) = item {
                        self.pending.push_back(frame);
                    }
                }
            }
        }
    }

    /// Skip frames until one with `command` arrives
    pub async fn expect(&mut self, command: Command) -> Option<Frame> {
        loop {
            let frame = self.next_frame().await?;
            if frame.command == command {
                return Some(frame);
            }
        }
    }

    /// Wait for CONNECT and answer CONNECTED with `heart_beat` ("sx,sy")
    pub async fn accept(&mut self, heart_beat: &str) -> Option<Frame> {
        if self.kind == ChannelKind::Web {
            self.send_raw("o");
        }
        let connect = self.expect(Command::Connect).await?;
        self.send_frame(
            &Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", heart_beat),
        );
        Some(connect)
    }

    /// Deliver a MESSAGE for a subscription
    pub fn message(&mut self, subscription: &str, destination: &str, body: &str) -> bool {
        self.next_message_id += 1;
        let frame = Frame::new(Command::Message)
            .header("subscription", subscription)
            .header("destination", destination)
            .header("message-id", self.next_message_id.to_string())
            .with_body(body);
        self.send_frame(&frame)
    }

    /// Send one frame in this channel's framing
    pub fn send_frame(&self, frame: &Frame) -> bool {
        let wire = frame.encode();
        match self.kind {
            ChannelKind::Web => match envelope::encode_data(&[wire]) {
                Ok(text) => self.send_raw(&text),
                Err(_) => false,
            },
            ChannelKind::Stream => self.send_raw(&wire),
        }
    }

    /// Server heart-beat in this channel's framing
    pub fn heartbeat(&self) -> bool {
        match self.kind {
            ChannelKind::Web => self.send_raw("h"),
            ChannelKind::Stream => self.send_raw("\n"),
        }
    }

    /// Send text exactly as given
    pub fn send_raw(&self, text: &str) -> bool {
        self.to_client.send(Bytes::from(text.to_string())).is_ok()
    }
}
