//! Diagnostic mirroring of raw frames
//!
//! Mirroring runs on the decode path, so implementations must return
//! immediately and swallow their own failures.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::types::RawFrame;

/// Receives a copy of every raw frame
pub trait DiagnosticSink: Send + Sync {
    /// Must not block and must not fail
    fn mirror(&self, frame: &RawFrame);
}

/// Bounded-channel sink; frames are dropped when the consumer lags
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<RawFrame>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create sink with specified buffer capacity
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RawFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Frames discarded because the buffer was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for ChannelSink {
    fn mirror(&self, frame: &RawFrame) {
        // RawFrame clones are cheap (Bytes is refcounted)
        if self.tx.try_send(frame.clone()).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                tracing::debug!(dropped, "Diagnostic sink lagging, frames dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mirror_delivers() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.mirror(&RawFrame::new("abc", 1));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.text(), "abc");
    }

    #[test]
    fn test_full_sink_drops_without_blocking() {
        let (sink, _rx) = ChannelSink::new(1);
        sink.mirror(&RawFrame::new("1", 1));
        sink.mirror(&RawFrame::new("2", 2));
        sink.mirror(&RawFrame::new("3", 3));
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_closed_sink_counts_drop() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.mirror(&RawFrame::new("x", 1));
        assert_eq!(sink.dropped(), 1);
    }
}
