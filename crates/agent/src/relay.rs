//! Relay between capture, backend and the local scoreboard
//!
//! Three loops share one [`Relay`]:
//! - capture: decode raw frames, apply local gifts, publish canonical events
//! - room updates: subscription handlers feeding the engine
//! - timer: periodic re-evaluation and the round-advance trigger

use scorebridge_core::reconcile::{AdvanceRequest, RoomUpdate, Tick};
use scorebridge_core::types::{now_millis, DeviceEvent};
use scorebridge_core::{
    BridgeContext, CanonicalEvent, CoreError, FrameDecoder, RawFrame, ReconciliationEngine,
    RoomTopics, TransportClient, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state of the running bridge
#[derive(Debug)]
pub struct Relay {
    context: BridgeContext,
    topics: RoomTopics,
    decoder: Arc<FrameDecoder>,
    engine: Arc<ReconciliationEngine>,
    client: TransportClient,
}

impl Relay {
    pub fn new(
        context: BridgeContext,
        topics: RoomTopics,
        decoder: Arc<FrameDecoder>,
        engine: Arc<ReconciliationEngine>,
        client: TransportClient,
    ) -> Self {
        Self {
            context,
            topics,
            decoder,
            engine,
            client,
        }
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Register handlers for every room destination
    ///
    /// Safe before `connect()`: subscriptions are replayed on every connection.
    pub async fn subscribe_room(&self) -> scorebridge_core::Result<()> {
        for destination in self.topics.subscriptions() {
            let topics = self.topics.clone();
            let engine = self.engine.clone();
            let device_id = self.context.device_id().to_string();

            self.client
                .subscribe(&destination, move |message| {
                    match RoomUpdate::parse(&topics, &device_id, &message) {
                        Ok(update) => {
                            if let Some(state) = update.apply(&engine) {
                                debug!(scores = ?state.scores(), "Scoreboard updated from backend");
                            }
                        }
                        Err(e) => warn!(destination = %message.destination, "Bad room update: {}", e),
                    }
                })
                .await?;
        }
        info!(room = %self.topics.room_id(), "Subscribed to room destinations");
        Ok(())
    }

    /// Decode one captured frame and act on it
    ///
    /// Local gifts are applied optimistically before publishing, so the
    /// scoreboard moves even while the backend is unreachable.
    pub async fn handle_frame(&self, frame: &RawFrame) -> Option<CanonicalEvent> {
        let event = self.decoder.decode(frame).into_event()?;

        if let CanonicalEvent::Gift(gift) = &event {
            // Anomalies are logged and counted by the engine
            let _ = self.engine.on_gift(gift);
        }

        let destination = self.topics.publish_destination(&event);
        let payload = DeviceEvent::new(self.context.device_id().as_str(), event.clone());
        match self.client.publish(&destination, &payload).await {
            Ok(()) => debug!(%destination, "Event published"),
            Err(CoreError::Transport(TransportError::NotConnected)) => {
                debug!(%destination, "Backend unreachable, event kept local")
            }
            Err(e) => warn!(%destination, "Publish failed: {}", e),
        }
        Some(event)
    }

    /// Consume captured frames until the channel closes or `cancel` fires
    pub async fn run_capture(&self, mut rx: mpsc::Receiver<RawFrame>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        self.handle_frame(&frame).await;
                    }
                    None => break,
                },
            }
        }
        let stats = self.decoder.stats();
        info!(
            frames = stats.frames,
            gifts = stats.gifts,
            chats = stats.chats,
            failures = stats.failures(),
            "Capture loop stopped"
        );
    }

    /// Evaluate the round timer once and fire the advance request if due
    ///
    /// A failed request releases the guard so the next tick retries.
    pub async fn tick(&self, now_ms: i64) -> Tick {
        let tick = self.engine.tick(now_ms);
        if tick.advance {
            let request = AdvanceRequest {
                device_id: self.context.device_id().to_string(),
                session_id: self.engine.snapshot().session_window.session_id,
                requested_at: now_ms,
            };
            if let Err(e) = self.client.publish(&self.topics.advance(), &request).await {
                warn!(session = %request.session_id, "Round advance not sent: {}", e);
                self.engine.release_advance();
            }
        }
        tick
    }

    /// Re-evaluate the timer every `period` until `cancel` fires
    pub async fn run_timer(&self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_display = String::new();
        let mut was_healthy = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let timer_display = self.tick(now_millis()).await.display.to_string();
            if timer_display != last_display {
                debug!(timer = %timer_display, connected = self.client.is_connected(), "Timer");
                last_display = timer_display;
            }

            let healthy = self.decoder.is_healthy();
            if healthy != was_healthy {
                if healthy {
                    info!("Capture stream active again");
                } else {
                    warn!("No captured frames within the health window");
                }
                was_healthy = healthy;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorebridge_core::protocol::Command;
    use scorebridge_core::transport::{ChannelKind, MemoryConnector, MemoryPeer};
    use scorebridge_core::types::{RoomConfig, SessionStatus, SessionWindow, Team};
    use scorebridge_core::{DecoderConfig, DeviceId, TransportConfig};

    const SHAPE_A: &str = r#"{"type":"GIFT","roomId":"7001","sender":{"id":"u1"},"receiver":{"id":"s1"},"gift":{"id":"g1","name":"Rose","count":2,"value":5}}"#;

    struct Fixture {
        relay: Relay,
        accept: mpsc::UnboundedReceiver<MemoryPeer>,
    }

    fn config(window: SessionWindow) -> RoomConfig {
        let team = |id: &str, room: &str| Team {
            id: id.into(),
            streamers: vec![scorebridge_core::types::StreamerIdentity {
                id: format!("{}-streamer", id),
                room_id: room.into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        RoomConfig {
            room_id: "arena".into(),
            teams: vec![team("red", "7001"), team("blue", "7002")],
            session_window: window,
        }
    }

    fn fixture() -> Fixture {
        let (connector, accept) = MemoryConnector::new(ChannelKind::Web);
        let transport = TransportConfig {
            url: "ws://backend.test/ws".into(),
            heartbeat_outgoing_ms: 0,
            heartbeat_incoming_ms: 0,
            ..Default::default()
        };
        let client = TransportClient::with_connector(transport, Arc::new(connector));
        let engine = Arc::new(ReconciliationEngine::default());
        engine.on_config(config(SessionWindow::default()));

        let relay = Relay::new(
            BridgeContext::new(DeviceId::from("DEVICE01")),
            RoomTopics::new("arena"),
            Arc::new(FrameDecoder::new(&DecoderConfig::default())),
            engine,
            client,
        );
        Fixture { relay, accept }
    }

    async fn connect(fixture: &mut Fixture) -> MemoryPeer {
        let client = fixture.relay.client.clone();
        let connecting = tokio::spawn(async move { client.connect().await });
        let mut peer = fixture.accept.recv().await.unwrap();
        peer.accept("0,0").await.unwrap();
        connecting.await.unwrap().unwrap();
        peer
    }

    #[tokio::test]
    async fn test_gift_applied_and_published() {
        let mut fixture = fixture();
        let mut peer = connect(&mut fixture).await;

        let event = fixture.relay.handle_frame(&RawFrame::new(SHAPE_A, 1)).await;
        assert!(matches!(event, Some(CanonicalEvent::Gift(_))));
        assert_eq!(fixture.relay.engine().snapshot().scores(), (10, 0));

        let send = peer.expect(Command::Send).await.unwrap();
        assert_eq!(send.get("destination"), Some("/app/room/arena/gift"));
        let body: serde_json::Value = serde_json::from_str(&send.body).unwrap();
        assert_eq!(body["deviceId"], "DEVICE01");
        assert_eq!(body["type"], "GIFT");
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_gift_kept_local_while_disconnected() {
        let fixture = fixture();
        fixture.relay.handle_frame(&RawFrame::new(SHAPE_A, 1)).await;
        assert_eq!(fixture.relay.engine().snapshot().scores(), (10, 0));
    }

    #[tokio::test]
    async fn test_unrecognized_frame_is_dropped() {
        let fixture = fixture();
        assert!(fixture.relay.handle_frame(&RawFrame::new("ping", 1)).await.is_none());
        assert_eq!(fixture.relay.engine().snapshot().scores(), (0, 0));
    }

    #[tokio::test]
    async fn test_expired_round_requests_advance_once() {
        let mut fixture = fixture();
        let mut peer = connect(&mut fixture).await;
        fixture.relay.engine().on_config(config(SessionWindow {
            session_id: "round-1".into(),
            start_time: 0,
            duration_minutes: 1,
            status: SessionStatus::Active,
            paused_at: None,
        }));

        assert!(fixture.relay.tick(60_000).await.advance);
        assert!(!fixture.relay.tick(61_000).await.advance);

        let send = peer.expect(Command::Send).await.unwrap();
        assert_eq!(send.get("destination"), Some("/app/room/arena/advance"));
        let body: serde_json::Value = serde_json::from_str(&send.body).unwrap();
        assert_eq!(body["sessionId"], "round-1");
        assert_eq!(body["deviceId"], "DEVICE01");
    }

    #[tokio::test]
    async fn test_failed_advance_retries_next_tick() {
        let fixture = fixture();
        fixture.relay.engine().on_config(config(SessionWindow {
            session_id: "round-1".into(),
            start_time: 0,
            duration_minutes: 1,
            status: SessionStatus::Active,
            paused_at: None,
        }));

        // Not connected: publish fails and the guard is released
        assert!(fixture.relay.tick(60_000).await.advance);
        assert!(fixture.relay.tick(61_000).await.advance);
    }

    #[tokio::test]
    async fn test_room_updates_reach_engine() {
        let mut fixture = fixture();
        fixture.relay.subscribe_room().await.unwrap();
        let mut peer = connect(&mut fixture).await;

        let mut scene_id = None;
        for _ in 0..4 {
            let sub = peer.expect(Command::Subscribe).await.unwrap();
            if sub.get("destination") == Some("/topic/room/arena/scene") {
                scene_id = sub.get("id").map(str::to_string);
            }
        }
        let scene_id = scene_id.unwrap();

        let body = r#"{"seq": 4, "teams": [{"id": "red", "total": 30}, {"id": "blue", "total": 12}]}"#;
        peer.message(&scene_id, "/topic/room/arena/scene", body);

        for _ in 0..100 {
            if fixture.relay.engine().last_applied_seq() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fixture.relay.engine().snapshot().scores(), (30, 12));
    }

    #[tokio::test]
    async fn test_capture_loop_drains_channel() {
        let fixture = fixture();
        let (tx, rx) = mpsc::channel(4);
        tx.send(RawFrame::new(SHAPE_A, 1)).await.unwrap();
        tx.send(RawFrame::new("noise", 2)).await.unwrap();
        drop(tx);

        fixture.relay.run_capture(rx, CancellationToken::new()).await;
        let stats = fixture.relay.decoder.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.gifts, 1);
    }
}
