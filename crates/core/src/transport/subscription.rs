//! Subscription table and per-subscription dispatch
//!
//! The table outlives every connection: entries survive reconnects and are
//! replayed on the wire after each handshake. Each entry owns a dispatch
//! task, and handlers run on the blocking pool, so a slow handler only
//! delays its own destination whatever the runtime flavor.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::protocol::Frame;

/// Message delivered to a subscription handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub destination: String,
    pub subscription: String,
    pub message_id: Option<String>,
    pub body: String,
}

impl InboundMessage {
    /// Build from a MESSAGE frame
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            destination: frame.get("destination").unwrap_or_default().to_string(),
            subscription: frame.get("subscription").unwrap_or_default().to_string(),
            message_id: frame.get("message-id").map(str::to_string),
            body: frame.body,
        }
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Subscription callback
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

struct Entry {
    id: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
    task: JoinHandle<()>,
}

/// Destination → handler registry
#[derive(Default)]
pub struct SubscriptionTable {
    entries: HashMap<String, Entry>,
    next_id: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns the SUBSCRIBE frame for the wire
    ///
    /// Re-registering a destination keeps its id and swaps the handler.
    /// Messages already queued for the old handler are still delivered to it.
    pub fn insert(&mut self, destination: &str, handler: MessageHandler) -> Frame {
        let id = match self.entries.remove(destination) {
            Some(old) => old.id,
            None => {
                self.next_id += 1;
                format!("sub-{}", self.next_id)
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch_loop(destination.to_string(), rx, handler));
        let frame = Frame::subscribe(&id, destination);
        self.entries
            .insert(destination.to_string(), Entry { id, tx, task });
        frame
    }

    /// Drop a subscription; returns the UNSUBSCRIBE frame if it existed
    ///
    /// Messages already queued are still delivered before the loop ends.
    pub fn remove(&mut self, destination: &str) -> Option<Frame> {
        let entry = self.entries.remove(destination)?;
        Some(Frame::unsubscribe(&entry.id))
    }

    /// Route one message to its subscription
    ///
    /// Looks up by subscription id, then by destination. Returns false when
    /// nothing is subscribed.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        let entry = self
            .entries
            .values()
            .find(|e| e.id == message.subscription)
            .or_else(|| self.entries.get(&message.destination));

        match entry {
            Some(entry) => entry.tx.send(message).is_ok(),
            None => false,
        }
    }

    /// SUBSCRIBE frames for every entry, for replay after a handshake
    pub fn subscribe_frames(&self) -> Vec<Frame> {
        let mut frames: Vec<(&String, Frame)> = self
            .entries
            .iter()
            .map(|(destination, entry)| (destination, Frame::subscribe(&entry.id, destination)))
            .collect();
        frames.sort_by(|a, b| a.0.cmp(b.0));
        frames.into_iter().map(|(_, frame)| frame).collect()
    }

    pub fn id_of(&self, destination: &str) -> Option<&str> {
        self.entries.get(destination).map(|e| e.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop every dispatch loop and forget all entries
    pub fn shutdown(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.task.abort();
        }
    }
}

impl Drop for SubscriptionTable {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn dispatch_loop(
    destination: String,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    handler: MessageHandler,
) {
    while let Some(message) = rx.recv().await {
        let handler = handler.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || handler(message)).await {
            tracing::warn!(%destination, "Subscription handler failed: {}", e);
        }
    }
    tracing::debug!(%destination, "Dispatch loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    fn message(subscription: &str, destination: &str, body: &str) -> InboundMessage {
        InboundMessage {
            destination: destination.into(),
            subscription: subscription.into(),
            message_id: None,
            body: body.into(),
        }
    }

    fn channel_handler() -> (MessageHandler, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |m| {
            let _ = tx.send(m);
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_insert_and_dispatch() {
        let mut table = SubscriptionTable::new();
        let (handler, mut rx) = channel_handler();
        let frame = table.insert("/topic/a", handler);

        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.get("id"), Some("sub-1"));
        assert!(table.dispatch(message("sub-1", "/topic/a", "1")));
        assert_eq!(rx.recv().await.unwrap().body, "1");
    }

    #[tokio::test]
    async fn test_dispatch_falls_back_to_destination() {
        let mut table = SubscriptionTable::new();
        let (handler, mut rx) = channel_handler();
        table.insert("/topic/a", handler);

        assert!(table.dispatch(message("", "/topic/a", "x")));
        assert_eq!(rx.recv().await.unwrap().body, "x");
        assert!(!table.dispatch(message("sub-9", "/topic/b", "y")));
    }

    #[tokio::test]
    async fn test_reinsert_keeps_id() {
        let mut table = SubscriptionTable::new();
        let (first, _rx1) = channel_handler();
        let (second, mut rx2) = channel_handler();
        table.insert("/topic/a", first);
        let frame = table.insert("/topic/a", second);

        assert_eq!(frame.get("id"), Some("sub-1"));
        assert_eq!(table.len(), 1);
        table.dispatch(message("sub-1", "/topic/a", "z"));
        assert_eq!(rx2.recv().await.unwrap().body, "z");
    }

    #[tokio::test]
    async fn test_reinsert_delivers_queued_messages() {
        let mut table = SubscriptionTable::new();
        let (first, mut rx1) = channel_handler();
        let (second, mut rx2) = channel_handler();
        table.insert("/topic/a", first);

        // Queued before the first dispatch loop gets to run
        assert!(table.dispatch(message("sub-1", "/topic/a", "queued")));
        table.insert("/topic/a", second);
        table.dispatch(message("sub-1", "/topic/a", "fresh"));

        assert_eq!(rx1.recv().await.unwrap().body, "queued");
        assert!(rx1.recv().await.is_none());
        assert_eq!(rx2.recv().await.unwrap().body, "fresh");
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block_others() {
        let mut table = SubscriptionTable::new();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = std::sync::Mutex::new(gate_rx);
        table.insert(
            "/topic/slow",
            Arc::new(move |_| {
                // Parks until the test releases it
                let _ = gate_rx.lock().map(|rx| rx.recv());
            }),
        );
        let (fast, mut rx) = channel_handler();
        table.insert("/topic/fast", fast);

        table.dispatch(message("sub-1", "/topic/slow", "s"));
        table.dispatch(message("sub-2", "/topic/fast", "f"));
        assert_eq!(rx.recv().await.unwrap().body, "f");
        gate_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_remove_and_replay() {
        let mut table = SubscriptionTable::new();
        let (a, _ra) = channel_handler();
        let (b, _rb) = channel_handler();
        table.insert("/topic/b", a);
        table.insert("/topic/a", b);

        let frames = table.subscribe_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get("destination"), Some("/topic/a"));

        let unsub = table.remove("/topic/b").unwrap();
        assert_eq!(unsub.command, Command::Unsubscribe);
        assert_eq!(unsub.get("id"), Some("sub-1"));
        assert!(table.remove("/topic/b").is_none());
        assert_eq!(table.subscribe_frames().len(), 1);
    }
}
