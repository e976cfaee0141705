//! End-to-end flow: captured frames and backend pushes into one scoreboard

use std::sync::Arc;
use std::time::Duration;

use scorebridge_core::protocol::Command;
use scorebridge_core::reconcile::RoomUpdate;
use scorebridge_core::transport::{ChannelKind, MemoryConnector};
use scorebridge_core::types::DeviceEvent;
use scorebridge_core::{
    CanonicalEvent, DecoderConfig, FrameDecoder, RawFrame, ReconciliationEngine, RoomTopics,
    TransportClient, TransportConfig,
};

const CONFIG: &str = r#"{
    "roomId": "arena",
    "teams": [
        {"id": "red", "name": "Red", "streamers": [{"id": "s1", "roomId": "7001"}]},
        {"id": "blue", "name": "Blue", "streamers": [{"id": "s2", "roomId": "7002"}]}
    ],
    "session": {"sessionId": "round-1", "startTime": 0, "durationMinutes": 3, "status": "ACTIVE"}
}"#;

fn transport_config() -> TransportConfig {
    TransportConfig {
        url: "wss://backend.test/ws".into(),
        heartbeat_outgoing_ms: 0,
        heartbeat_incoming_ms: 0,
        ..Default::default()
    }
}

#[test]
fn test_captured_gift_moves_score() {
    let engine = ReconciliationEngine::default();
    let config: scorebridge_core::types::RoomConfig = serde_json::from_str(CONFIG).unwrap();
    engine.on_config(config);

    let decoder = FrameDecoder::new(&DecoderConfig {
        room_id: "7002".into(),
        ..Default::default()
    });
    let frames = [
        r#"2584   {"type":"GIFT","sender":{"id":"u1","name":"A"},"receiver":{"id":"s2"},"gift":{"id":"g1","name":"Rose","count":3}}"#,
        r#"noise without json"#,
        r#"x{"payload":"{\"vgift_typeid\":77,\"vgift_name\":\"Heart\",\"sender_nick\":\"B\"}"}"#,
    ];

    for raw in frames {
        if let Some(CanonicalEvent::Gift(gift)) = decoder.decode(&RawFrame::new(raw, 1)).into_event() {
            engine.on_gift(&gift).unwrap();
        }
    }

    // 3 roses plus one heart, both credited to the team streaming from 7002
    assert_eq!(engine.snapshot().scores(), (0, 4));
    let stats = decoder.stats();
    assert_eq!(stats.gifts, 2);
    assert_eq!(stats.no_json, 1);
}

#[tokio::test]
async fn test_backend_pushes_reach_engine() {
    let (connector, mut accept) = MemoryConnector::new(ChannelKind::Web);
    let client = TransportClient::with_connector(transport_config(), Arc::new(connector));
    let engine = Arc::new(ReconciliationEngine::default());
    let topics = RoomTopics::new("arena");

    let (applied_tx, mut applied_rx) = tokio::sync::mpsc::unbounded_channel();
    for destination in topics.subscriptions() {
        let engine = engine.clone();
        let topics = topics.clone();
        let applied_tx = applied_tx.clone();
        client
            .subscribe(&destination, move |message| {
                let update = RoomUpdate::parse(&topics, "this-device", &message).unwrap();
                let _ = applied_tx.send(update.apply(&engine));
            })
            .await
            .unwrap();
    }

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut peer = accept.recv().await.unwrap();
    peer.accept("0,0").await.unwrap();
    connecting.await.unwrap().unwrap();

    let mut ids = std::collections::HashMap::new();
    while ids.len() < 4 {
        let sub = peer.expect(Command::Subscribe).await.unwrap();
        ids.insert(
            sub.get("destination").unwrap().to_string(),
            sub.get("id").unwrap().to_string(),
        );
    }

    peer.message(&ids[&topics.config()], &topics.config(), CONFIG);
    let state = applied_rx.recv().await.unwrap().unwrap();
    assert_eq!(state.teams[0].id, "red");

    let scene = r#"{"seq": 2, "teams": [{"id": "red", "total": 15}, {"id": "blue", "total": 5}]}"#;
    peer.message(&ids[&topics.scene()], &topics.scene(), scene);
    let state = applied_rx.recv().await.unwrap().unwrap();
    assert_eq!(state.scores(), (15, 5));
    assert_eq!(state.last_applied_seq, 2);

    // Older sequence arrives late: no change
    let stale = r#"{"seq": 1, "teams": [{"id": "red", "total": 0}, {"id": "blue", "total": 0}]}"#;
    peer.message(&ids[&topics.scene()], &topics.scene(), stale);
    assert!(applied_rx.recv().await.unwrap().is_none());
    assert_eq!(engine.snapshot().scores(), (15, 5));

    // A gift captured by another device
    let gift_frame = r#"{"type":"GIFT","roomId":"7001","sender":{"id":"u"},"receiver":{"id":"s1"},"gift":{"id":"g","count":2,"value":5}}"#;
    let decoded = scorebridge_core::decode(&RawFrame::new(gift_frame, 1), "")
        .into_event()
        .unwrap();
    let body = serde_json::to_string(&DeviceEvent::new("other-device", decoded)).unwrap();
    peer.message(&ids[&topics.gift()], &topics.gift(), &body);
    let state = applied_rx.recv().await.unwrap().unwrap();
    assert_eq!(state.scores(), (25, 5));

    client.disconnect().await;
    assert!(tokio::time::timeout(Duration::from_secs(1), peer.expect(Command::Disconnect))
        .await
        .unwrap()
        .is_some());
}
