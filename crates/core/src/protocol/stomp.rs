//! STOMP 1.2 frame codec for the pub/sub channel
//!
//! Frame layout: `COMMAND\n(header:value\n)*\n<body>\0`. Bare EOLs between
//! frames are heart-beats. The parser is streaming: chunks may split frames
//! anywhere, and one chunk may hold several frames.

use bytes::{Buf, BytesMut};

use crate::error::{CoreError, Result};

/// Maximum buffered frame size (4MB)
const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// STOMP protocol version we speak
pub const STOMP_VERSION: &str = "1.2";

/// Frame command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED headers are never escaped
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value; the first occurrence wins
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Client login frame
    ///
    /// `heart_beat` is (can send every ms, want to receive every ms).
    pub fn connect(host: &str, heart_beat: (u64, u64), token: Option<&str>) -> Self {
        let frame = Self::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1));
        match token {
            Some(token) => frame.header("Authorization", format!("Bearer {}", token)),
            None => frame,
        }
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// JSON message for a destination
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }

    /// Server heart-beat offer from a CONNECTED frame, (0, 0) when absent
    pub fn heart_beat(&self) -> (u64, u64) {
        let Some(raw) = self.get("heart-beat") else {
            return (0, 0);
        };
        let mut parts = raw.split(',').map(|p| p.trim().parse::<u64>().unwrap_or(0));
        (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
    }

    /// Encode to wire text, NUL-terminated
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(CoreError::Protocol(format!(
                    "Invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Item produced by the streaming parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    Frame(Frame),
}

/// Streaming frame parser
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: BytesMut,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered but not yet forming a full frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk and return every complete item it finished
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Inbound>> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > MAX_FRAME_SIZE {
            return Err(CoreError::Protocol(format!(
                "Frame exceeds {} bytes",
                MAX_FRAME_SIZE
            )));
        }

        let mut out = Vec::new();
        loop {
            // Bare EOLs between frames are heart-beats
            loop {
                match (self.buf.first(), self.buf.get(1)) {
                    (Some(b'\n'), _) => {
                        self.buf.advance(1);
                        out.push(Inbound::Heartbeat);
                    }
                    (Some(b'\r'), Some(b'\n')) => {
                        self.buf.advance(2);
                        out.push(Inbound::Heartbeat);
                    }
                    _ => break,
                }
            }
            if self.buf.is_empty() {
                break;
            }
            match self.next_frame()? {
                Some(frame) => out.push(Inbound::Frame(frame)),
                None => break, // Incomplete frame
            }
        }
        Ok(out)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some((head_end, body_start)) = find_blank_line(&self.buf) else {
            return Ok(None);
        };

        let head = std::str::from_utf8(&self.buf[..head_end])
            .map_err(|_| CoreError::Protocol("Frame headers are not UTF-8".into()))?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(command_line)
            .ok_or_else(|| CoreError::Protocol(format!("Unknown command: {:?}", command_line)))?;

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| CoreError::Protocol(format!("Malformed header: {:?}", line)))?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| CoreError::Protocol(format!("Bad content-length: {}", v)))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                if self.buf.len() < body_start + len + 1 {
                    return Ok(None);
                }
                if self.buf[body_start + len] != 0 {
                    return Err(CoreError::Protocol(
                        "Frame body not NUL-terminated after content-length".into(),
                    ));
                }
                body_start + len
            }
            None => match self.buf[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            },
        };

        let body = String::from_utf8_lossy(&self.buf[body_start..body_end]).into_owned();
        self.buf.advance(body_end + 1);

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

/// Locate the blank line ending the header block
///
/// Returns (end of headers, start of body).
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match (buf.get(i + 1), buf.get(i + 2)) {
                (Some(b'\n'), _) => return Some((i, i + 2)),
                (Some(b'\r'), Some(b'\n')) => return Some((i, i + 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}
