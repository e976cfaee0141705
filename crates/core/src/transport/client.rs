//! Auto-healing pub/sub client
//!
//! One [`TransportClient`] owns at most one live connection at a time plus a
//! subscription table that outlives every connection. A background monitor
//! samples connection health and drives reconnects; at most one dial is in
//! flight at any moment.
//!
//! Locks are always taken in the order subscriptions → connection slot →
//! connection writer.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelPair, Connector, Endpoint, FrameSink, FrameSource};
use super::heartbeat::{HeartbeatPlan, Keepalive};
use super::reconnect::ReconnectSchedule;
use super::subscription::{InboundMessage, SubscriptionTable};
use super::tcp::TcpConnector;
use super::ws::WsConnector;
use crate::config::TransportConfig;
use crate::error::{CoreError, Result, TransportError};
use crate::protocol::{Command, Frame, FrameParser, Inbound};

/// Client lifecycle
///
/// `Closed` is terminal: reached on explicit disconnect or when reconnect
/// attempts run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One live channel after a successful handshake
struct Connection {
    id: u64,
    writer: Mutex<Box<dyn FrameSink>>,
    write_timeout: Duration,
    keepalive: Keepalive,
    alive: AtomicBool,
    cancel: CancellationToken,
    /// Subscription ids already sent on this connection
    subscribed: std::sync::Mutex<HashSet<String>>,
}

impl Connection {
    async fn send(&self, data: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_timeout, writer.send(data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.mark_dead();
                Err(e)
            }
            Err(_) => {
                self.mark_dead();
                let millis = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
                Err(CoreError::Timeout(millis))
            }
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send(&frame.encode()).await
    }

    /// Send a SUBSCRIBE unless this connection already carries it
    async fn subscribe(&self, frame: &Frame) -> Result<()> {
        let Some(id) = frame.get("id") else {
            return Ok(());
        };
        let fresh = self
            .subscribed
            .lock()
            .map(|mut ids| ids.insert(id.to_string()))
            .unwrap_or(true);
        if !fresh {
            return Ok(());
        }
        self.send_frame(frame).await
    }

    fn forget_subscription(&self, id: &str) {
        if let Ok(mut ids) = self.subscribed.lock() {
            ids.remove(id);
        }
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    fn is_healthy(&self) -> bool {
        self.is_alive() && self.keepalive.is_alive()
    }

    /// Stop background tasks and release the channel
    async fn close(&self) {
        self.cancel.cancel();
        self.mark_dead();
        let mut writer = self.writer.lock().await;
        let _ = tokio::time::timeout(self.write_timeout, writer.close()).await;
    }
}

struct Shared {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    host: String,
    connection: Mutex<Option<Arc<Connection>>>,
    subscriptions: Mutex<SubscriptionTable>,
    state: watch::Sender<ConnectionState>,
    /// Set while a dial/handshake is in flight
    dialing: AtomicBool,
    shutdown: CancellationToken,
    wakeup: Arc<Notify>,
    monitor: std::sync::Mutex<Option<JoinHandle<()>>>,
    next_connection_id: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(conn) = self.connection.get_mut() {
            conn.cancel.cancel();
        }
    }
}

/// Releases the dial guard on drop
struct DialGuard<'a>(&'a AtomicBool);

impl Drop for DialGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reconnect loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectStep {
    Backoff,
    Wait(Duration),
    Dial,
    Exhausted,
    Cancelled,
}

/// Pub/sub client handle; clones share one client
#[derive(Clone)]
pub struct TransportClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("host", &self.shared.host)
            .field("state", &self.state())
            .finish()
    }
}

impl TransportClient {
    /// Client for the configured endpoint
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = Endpoint::parse(&config.url, config.token.as_deref())?;
        let connector: Arc<dyn Connector> = match endpoint {
            Endpoint::Stream { addr } => Arc::new(TcpConnector::new(addr, config.dial_timeout())),
            Endpoint::Web { url } => Arc::new(WsConnector::new(
                url,
                config.token.clone(),
                config.dial_timeout(),
            )),
        };
        Ok(Self::with_connector(config, connector))
    }

    /// Client over a caller-supplied connector
    pub fn with_connector(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let host = config.host.clone().unwrap_or_else(|| {
            Endpoint::parse(&config.url, None)
                .map(|e| e.host())
                .unwrap_or_else(|_| "localhost".to_string())
        });
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                host,
                connection: Mutex::new(None),
                subscriptions: Mutex::new(SubscriptionTable::new()),
                state,
                dialing: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                wakeup: Arc::new(Notify::new()),
                monitor: std::sync::Mutex::new(None),
                next_connection_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the channel and run the handshake
    ///
    /// Failures surface here; only connections lost later are retried in
    /// the background.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        if self.is_connected() {
            return Ok(());
        }
        if self
            .shared
            .dialing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(
                TransportError::DialFailed("another connection attempt is in flight".into()).into(),
            );
        }
        let _guard = DialGuard(&self.shared.dialing);

        self.set_state(ConnectionState::Connecting);
        match self.establish().await {
            Ok(conn) => {
                self.install(conn).await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Publish a JSON payload once; no retry
    pub async fn publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        self.send(destination, body).await
    }

    /// Publish a pre-serialized JSON body once; no retry
    pub async fn send(&self, destination: &str, body: String) -> Result<()> {
        let conn = self.live_connection().await?;
        conn.send_frame(&Frame::send(destination, body))
            .await
            .map_err(|e| {
                tracing::debug!(connection = conn.id, "Publish failed: {}", e);
                self.shared.wakeup.notify_one();
                CoreError::from(TransportError::NotConnected)
            })
    }

    /// Register a handler for a destination
    ///
    /// Goes on the wire immediately when connected, otherwise on the next
    /// successful handshake. Re-subscribing replaces the handler.
    pub async fn subscribe<F>(&self, destination: &str, handler: F) -> Result<()>
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        let mut table = self.shared.subscriptions.lock().await;
        if self.shared.shutdown.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        let frame = table.insert(destination, Arc::new(handler));

        let conn = self.shared.connection.lock().await.clone();
        match conn.filter(|c| c.is_alive()) {
            Some(conn) => {
                if let Err(e) = conn.subscribe(&frame).await {
                    tracing::debug!(destination, "Subscribe deferred to replay: {}", e);
                    self.shared.wakeup.notify_one();
                }
            }
            None => tracing::debug!(destination, "Subscribe queued until connected"),
        }
        Ok(())
    }

    /// Remove a subscription and stop its dispatch loop
    ///
    /// Returns false if the destination was not subscribed.
    pub async fn unsubscribe(&self, destination: &str) -> Result<bool> {
        let mut table = self.shared.subscriptions.lock().await;
        let Some(frame) = table.remove(destination) else {
            return Ok(false);
        };

        let conn = self.shared.connection.lock().await.clone();
        if let Some(conn) = conn.filter(|c| c.is_alive()) {
            if let Some(id) = frame.get("id") {
                conn.forget_subscription(id);
            }
            if let Err(e) = conn.send_frame(&frame).await {
                tracing::debug!(destination, "Unsubscribe not sent: {}", e);
            }
        }
        Ok(true)
    }

    /// Force a reconnect cycle
    ///
    /// Returns `Ok(false)` without doing anything when another dial is
    /// already in flight, and `Err(Closed)` when attempts run out.
    pub async fn reconnect(&self) -> Result<bool> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        if self
            .shared
            .dialing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Reconnect already in flight");
            return Ok(false);
        }
        let _guard = DialGuard(&self.shared.dialing);

        self.set_state(ConnectionState::Reconnecting);
        let old = self.shared.connection.lock().await.take();
        if let Some(old) = old {
            old.close().await;
        }

        let config = &self.shared.config;
        let mut schedule =
            ReconnectSchedule::new(config.reconnect_unit(), config.max_reconnect_attempts);
        let mut step = ReconnectStep::Backoff;

        loop {
            step = match step {
                ReconnectStep::Backoff => match schedule.next_delay() {
                    Some(delay) => ReconnectStep::Wait(delay),
                    None => ReconnectStep::Exhausted,
                },
                ReconnectStep::Wait(delay) => {
                    tracing::info!(
                        attempt = schedule.attempt(),
                        max = schedule.max_attempts(),
                        "Reconnecting in {:?}",
                        delay
                    );
                    tokio::select! {
                        _ = self.shared.shutdown.cancelled() => ReconnectStep::Cancelled,
                        _ = tokio::time::sleep(delay) => ReconnectStep::Dial,
                    }
                }
                ReconnectStep::Dial => {
                    let result = tokio::select! {
                        _ = self.shared.shutdown.cancelled() => None,
                        result = self.establish() => Some(result),
                    };
                    match result {
                        Some(Ok(conn)) => {
                            self.install(conn).await?;
                            tracing::info!("Reconnected after {} attempts", schedule.attempt());
                            return Ok(true);
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Reconnect attempt {} failed: {}", schedule.attempt(), e);
                            ReconnectStep::Backoff
                        }
                        None => ReconnectStep::Cancelled,
                    }
                }
                ReconnectStep::Exhausted => {
                    tracing::error!(
                        "Max reconnection attempts ({}) reached, closing transport",
                        schedule.max_attempts()
                    );
                    self.close_terminal().await;
                    return Err(TransportError::Closed.into());
                }
                ReconnectStep::Cancelled => return Err(TransportError::Closed.into()),
            };
        }
    }

    /// Tear the client down for good; safe to call repeatedly
    pub async fn disconnect(&self) {
        let first = !self.shared.shutdown.is_cancelled();
        self.shared.shutdown.cancel();

        let monitor = self.shared.monitor.lock().ok().and_then(|mut m| m.take());
        if let Some(monitor) = monitor {
            monitor.abort();
        }

        let conn = self.shared.connection.lock().await.take();
        if let Some(conn) = conn {
            if conn.is_alive() {
                let receipt = format!("disconnect-{}", conn.id);
                if let Err(e) = conn.send_frame(&Frame::disconnect(&receipt)).await {
                    tracing::debug!(connection = conn.id, "DISCONNECT not sent: {}", e);
                }
            }
            conn.close().await;
        }

        self.shared.subscriptions.lock().await.shutdown();
        self.set_state(ConnectionState::Closed);
        if first {
            tracing::info!(host = %self.shared.host, "Transport client disconnected");
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut from = None;
        self.shared.state.send_if_modified(|current| {
            if *current == next || current.is_terminal() {
                return false;
            }
            from = Some(*current);
            *current = next;
            true
        });
        if let Some(from) = from {
            tracing::debug!(%from, to = %next, "Transport state changed");
        }
    }

    async fn live_connection(&self) -> Result<Arc<Connection>> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        let slot = self.shared.connection.lock().await;
        match slot.as_ref() {
            Some(conn) if conn.is_alive() => Ok(conn.clone()),
            _ => Err(TransportError::NotConnected.into()),
        }
    }

    /// Dial and handshake; spawns the reader and heart-beat tasks on success
    async fn establish(&self) -> Result<Arc<Connection>> {
        let shared = &self.shared;
        let config = &shared.config;

        let ChannelPair {
            mut sink,
            mut source,
        } = match tokio::time::timeout(config.dial_timeout(), shared.connector.connect()).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(CoreError::Transport(e))) => return Err(e.into()),
            Ok(Err(e)) => return Err(TransportError::DialFailed(e.to_string()).into()),
            Err(_) => return Err(TransportError::DialFailed("timed out".into()).into()),
        };

        let offer = (config.heartbeat_outgoing_ms, config.heartbeat_incoming_ms);
        let login = Frame::connect(&shared.host, offer, config.token.as_deref());
        let handshake = tokio::time::timeout(
            config.handshake_timeout(),
            handshake(sink.as_mut(), source.as_mut(), &login),
        )
        .await;

        let (connected, parser, leftover) = match handshake {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                let _ = sink.close().await;
                return Err(match e {
                    CoreError::Transport(e) => e.into(),
                    other => TransportError::HandshakeFailed(other.to_string()).into(),
                });
            }
            Err(_) => {
                let _ = sink.close().await;
                return Err(TransportError::HandshakeFailed("timed out".into()).into());
            }
        };

        let plan = HeartbeatPlan::negotiate(offer, connected.heart_beat());
        let id = shared.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Arc::new(Connection {
            id,
            writer: Mutex::new(sink),
            write_timeout: config.handshake_timeout(),
            keepalive: Keepalive::for_plan(&plan, config.keepalive_tolerance),
            alive: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            subscribed: std::sync::Mutex::new(HashSet::new()),
        });
        conn.keepalive.record_activity();

        tokio::spawn(read_loop(
            Arc::downgrade(shared),
            conn.clone(),
            source,
            parser,
            leftover,
        ));
        if let Some(every) = plan.outgoing {
            tokio::spawn(heartbeat_loop(conn.clone(), every));
        }

        tracing::info!(
            connection = id,
            host = %shared.host,
            server = connected.get("server").unwrap_or("unknown"),
            outgoing = ?plan.outgoing,
            incoming = ?plan.incoming,
            "Pub/sub session established"
        );
        Ok(conn)
    }

    /// Publish a new connection, start the monitor, replay subscriptions
    async fn install(&self, conn: Arc<Connection>) -> Result<()> {
        // Cancelled while waiting for the slot: stop the new connection's tasks
        let pending = conn.cancel.clone().drop_guard();
        {
            let mut slot = self.shared.connection.lock().await;
            if self.shared.shutdown.is_cancelled() {
                drop(slot);
                conn.close().await;
                return Err(TransportError::Closed.into());
            }
            if let Some(old) = slot.replace(conn.clone()) {
                old.cancel.cancel();
            }
            self.set_state(ConnectionState::Connected);
        }
        pending.disarm();
        self.ensure_monitor();

        let client = self.clone();
        tokio::spawn(async move { client.replay(conn).await });
        Ok(())
    }

    async fn replay(&self, conn: Arc<Connection>) {
        // Snapshot only; the table stays free for subscribe() while frames go out
        let frames = self.shared.subscriptions.lock().await.subscribe_frames();
        let mut total = 0;
        for frame in frames {
            let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) else {
                continue;
            };
            if self.shared.subscriptions.lock().await.id_of(destination) != Some(id) {
                continue; // Unsubscribed since the snapshot
            }
            if let Err(e) = conn.subscribe(&frame).await {
                tracing::warn!(connection = conn.id, "Subscription replay interrupted: {}", e);
                return;
            }
            total += 1;
        }
        if total > 0 {
            tracing::debug!(connection = conn.id, total, "Subscriptions replayed");
        }
    }

    fn ensure_monitor(&self) {
        let Ok(mut slot) = self.shared.monitor.lock() else {
            return;
        };
        if slot.is_some() || self.shared.shutdown.is_cancelled() {
            return;
        }
        *slot = Some(tokio::spawn(monitor_loop(
            Arc::downgrade(&self.shared),
            self.shared.config.health_check_interval(),
            self.shared.shutdown.clone(),
            self.shared.wakeup.clone(),
        )));
    }

    async fn needs_reconnect(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        match self.shared.connection.lock().await.as_ref() {
            Some(conn) => !conn.is_healthy(),
            None => true,
        }
    }

    /// Exhausted reconnects: stop everything except the handle itself
    async fn close_terminal(&self) {
        self.shared.shutdown.cancel();
        self.shared.subscriptions.lock().await.shutdown();
        self.set_state(ConnectionState::Closed);
    }
}

async fn handshake(
    sink: &mut dyn FrameSink,
    source: &mut dyn FrameSource,
    login: &Frame,
) -> Result<(Frame, FrameParser, Vec<Inbound>)> {
    sink.send(&login.encode()).await?;

    let mut parser = FrameParser::new();
    loop {
        let chunk = source.recv().await?.ok_or_else(|| {
            TransportError::HandshakeFailed("channel closed during handshake".into())
        })?;

        let mut items = parser.push(&chunk)?.into_iter();
        while let Some(item) = items.next() {
            let Inbound::Frame(frame) = item else {
                continue;
            };
            match frame.command {
                Command::Connected => return Ok((frame, parser, items.collect())),
                Command::Error => {
                    let reason = frame.get("message").unwrap_or("login refused").to_string();
                    return Err(TransportError::HandshakeFailed(reason).into());
                }
                other => tracing::debug!(command = %other, "Ignoring frame before CONNECTED"),
            }
        }
    }
}

async fn read_loop(
    shared: Weak<Shared>,
    conn: Arc<Connection>,
    mut source: Box<dyn FrameSource>,
    mut parser: FrameParser,
    leftover: Vec<Inbound>,
) {
    if route(&shared, &conn, leftover).await {
        loop {
            let chunk = tokio::select! {
                _ = conn.cancel.cancelled() => break,
                chunk = source.recv() => chunk,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    conn.keepalive.record_activity();
                    let items = match parser.push(&bytes) {
                        Ok(items) => items,
                        Err(e) => {
                            tracing::warn!(connection = conn.id, "Protocol error: {}", e);
                            break;
                        }
                    };
                    if !route(&shared, &conn, items).await {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(connection = conn.id, "Channel closed by server");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection = conn.id, "Channel read failed: {}", e);
                    break;
                }
            }
        }
    }

    conn.mark_dead();
    if !conn.cancel.is_cancelled() {
        if let Some(shared) = shared.upgrade() {
            shared.wakeup.notify_one();
        }
    }
}

/// Handle parsed items; false means the connection must be dropped
async fn route(shared: &Weak<Shared>, conn: &Connection, items: Vec<Inbound>) -> bool {
    for item in items {
        let frame = match item {
            Inbound::Heartbeat => continue,
            Inbound::Frame(frame) => frame,
        };
        match frame.command {
            Command::Message => {
                let Some(shared) = shared.upgrade() else {
                    return false;
                };
                let message = InboundMessage::from_frame(frame);
                let subscription = message.subscription.clone();
                if !shared.subscriptions.lock().await.dispatch(message) {
                    tracing::debug!(connection = conn.id, %subscription, "Message for unknown subscription");
                }
            }
            Command::Error => {
                tracing::warn!(
                    connection = conn.id,
                    message = frame.get("message").unwrap_or_default(),
                    body = %frame.body,
                    "Server sent ERROR, dropping connection"
                );
                return false;
            }
            Command::Receipt => {
                tracing::debug!(connection = conn.id, receipt = ?frame.get("receipt-id"), "Receipt");
            }
            other => tracing::debug!(connection = conn.id, command = %other, "Ignoring frame"),
        }
    }
    true
}

async fn heartbeat_loop(conn: Arc<Connection>, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = conn.send("\n").await {
            tracing::debug!(connection = conn.id, "Heart-beat send failed: {}", e);
            break;
        }
    }
}

async fn monitor_loop(
    shared: Weak<Shared>,
    interval: Duration,
    shutdown: CancellationToken,
    wakeup: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wakeup.notified() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let client = TransportClient { shared };
        if client.needs_reconnect().await {
            tracing::warn!("Connection unhealthy, reconnecting");
            if let Err(e) = client.reconnect().await {
                if e.is_terminal() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Health monitor stopped");
}
