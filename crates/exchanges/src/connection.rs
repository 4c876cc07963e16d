//! Multiplexed WebSocket connection management
//!
//! One physical socket per endpoint URL carries every subscription made
//! against that endpoint. Each socket is driven by its own loop on a
//! dedicated runtime thread, so subscribing and disposing work from any
//! thread, blocking or async.
//!
//! The loop:
//! - connects with a timeout, then runs every subscription's `on_connect`
//!   and sends the frames it produced
//! - hands the socket's read half to a task of its own and waits on
//!   commands, inbound messages and the heartbeat timer together
//! - routes each inbound frame through the exchange's [`StreamProtocol`],
//!   by stream key or by a learned server id, to the matching callbacks
//! - logs and counts frames it cannot parse without dropping the socket
//! - on close or error, backs off exponentially with jitter and
//!   reconnects, replaying `on_connect` for every live subscription
//! - exits once the last subscription is disposed
//!
//! Callbacks run on the loop thread, outside the subscription table lock.
//! Long work belongs on another thread; [`ConnectionManager::subscribe_channel`]
//! hands payloads off through a flume channel.

use crate::config::ReconnectConfig;
use crate::errors::{ExchangeError, Result};
use crate::protocol::{Channel, Envelope, StreamProtocol};
use crate::websocket::{WsConnector, WsMessage, WsReader, WsSession, WsWriter};
use omniex_core::{nanos, unix_millis, ClientRuntime, PerfTimer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Wakeup period of an idle session when heartbeats are off
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

pub type MessageCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type ConnectCallback = Arc<dyn Fn(&StreamSender) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Per-endpoint socket metrics
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    /// Unix millis of the current session's start
    pub connected_at: Option<u64>,
    pub last_message_at: Option<u64>,
    pub last_ping_at: Option<u64>,
    /// Successful reconnects after the first session
    pub reconnect_count: u32,
    pub message_count: u64,
    pub parse_error_count: u64,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connected_at: None,
            last_message_at: None,
            last_ping_at: None,
            reconnect_count: 0,
            message_count: 0,
            parse_error_count: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Connected and heard from within `tolerance`
    pub fn is_healthy(&self, tolerance: Duration) -> bool {
        let last_seen = self.last_message_at.or(self.connected_at).unwrap_or(0);
        self.is_connected() && unix_millis().saturating_sub(last_seen) < tolerance.as_millis() as u64
    }

    pub fn uptime_millis(&self) -> u64 {
        match (self.state, self.connected_at) {
            (ConnectionState::Connected, Some(at)) => unix_millis().saturating_sub(at),
            _ => 0,
        }
    }
}

/// Collects the frames an `on_connect` hook wants sent, in order
#[derive(Debug, Default)]
pub struct StreamSender {
    frames: Mutex<Vec<String>>,
}

impl StreamSender {
    pub fn send_text(&self, frame: impl Into<String>) {
        lock(&self.frames).push(frame.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.frames))
    }
}

/// One logical stream registration
pub struct Subscription {
    pub stream_key: String,
    pub on_message: MessageCallback,
    pub on_connect: Option<ConnectCallback>,
    pub unsubscribe_frames: Vec<String>,
}

impl Subscription {
    pub fn new<F>(stream_key: impl Into<String>, on_message: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self {
            stream_key: stream_key.into(),
            on_message: Arc::new(on_message),
            on_connect: None,
            unsubscribe_frames: Vec::new(),
        }
    }

    pub fn on_connect<F>(mut self, on_connect: F) -> Self
    where
        F: Fn(&StreamSender) -> Result<()> + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(on_connect));
        self
    }

    /// Send these frames on every connect
    pub fn subscribe_frames(self, frames: Vec<String>) -> Self {
        self.on_connect(move |sender| {
            for frame in &frames {
                sender.send_text(frame.clone());
            }
            Ok(())
        })
    }

    pub fn unsubscribe_frames(mut self, frames: Vec<String>) -> Self {
        self.unsubscribe_frames = frames;
        self
    }
}

enum Command {
    Send(String),
    /// A subscription joined a running socket
    Introduce(u64),
    Shutdown,
}

struct SubscriptionEntry {
    stream_key: String,
    on_message: MessageCallback,
    on_connect: Option<ConnectCallback>,
    unsubscribe_frames: Vec<String>,
}

struct EndpointState {
    generation: u64,
    running: bool,
    subscriptions: BTreeMap<u64, SubscriptionEntry>,
    /// Server-assigned id -> stream key, valid for the current session
    server_ids: HashMap<String, String>,
    commands: flume::Sender<Command>,
    health: Arc<Mutex<ConnectionHealth>>,
}

#[derive(Default)]
struct Shared {
    endpoints: Mutex<HashMap<String, EndpointState>>,
    next_id: AtomicU64,
}

impl Shared {
    fn lock_endpoints(&self) -> MutexGuard<'_, HashMap<String, EndpointState>> {
        lock(&self.endpoints)
    }

    /// Remove one subscription; the last one out stops the socket
    fn remove(&self, endpoint: &str, id: u64) {
        let mut endpoints = self.lock_endpoints();
        let Some(state) = endpoints.get_mut(endpoint) else {
            return;
        };
        let Some(entry) = state.subscriptions.remove(&id) else {
            return;
        };

        if state.subscriptions.is_empty() {
            if let Some(state) = endpoints.remove(endpoint) {
                let _ = state.commands.send(Command::Shutdown);
                info!("🔌 Last subscription on {} disposed, closing socket", endpoint);
            }
            return;
        }

        let shared_stream = state.subscriptions.values().any(|s| s.stream_key == entry.stream_key);
        if !shared_stream {
            for frame in entry.unsubscribe_frames {
                let _ = state.commands.send(Command::Send(frame));
            }
        }
        debug!("➖ Disposed subscription {} ({}) on {}", id, entry.stream_key, endpoint);
    }
}

/// Owns every streaming socket of one exchange connection
pub struct ConnectionManager {
    connector: Arc<dyn WsConnector>,
    protocol: Arc<dyn StreamProtocol>,
    reconnect: ReconnectConfig,
    runtime: ClientRuntime,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn WsConnector>, protocol: Arc<dyn StreamProtocol>, reconnect: ReconnectConfig) -> Self {
        Self {
            connector,
            protocol,
            reconnect,
            runtime: ClientRuntime::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn with_runtime(mut self, runtime: ClientRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Register `subscription` on `endpoint`, opening the socket if this is
    /// its first subscription
    pub fn subscribe(&self, endpoint: &str, subscription: Subscription) -> Result<SubscriptionHandle> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = SubscriptionEntry {
            stream_key: subscription.stream_key,
            on_message: subscription.on_message,
            on_connect: subscription.on_connect,
            unsubscribe_frames: subscription.unsubscribe_frames,
        };
        let stream_key = entry.stream_key.clone();

        let mut endpoints = self.shared.lock_endpoints();
        match endpoints.get_mut(endpoint) {
            Some(state) if state.running => {
                state.subscriptions.insert(id, entry);
                let _ = state.commands.send(Command::Introduce(id));
            }
            Some(state) => {
                // The previous loop gave up; start a fresh one for everyone
                state.subscriptions.insert(id, entry);
                self.start_loop(endpoint, state)?;
            }
            None => {
                let (commands, _) = flume::unbounded();
                let mut state = EndpointState {
                    generation: 0,
                    running: false,
                    subscriptions: BTreeMap::new(),
                    server_ids: HashMap::new(),
                    commands,
                    health: Arc::new(Mutex::new(ConnectionHealth::new())),
                };
                state.subscriptions.insert(id, entry);
                self.start_loop(endpoint, &mut state)?;
                endpoints.insert(endpoint.to_string(), state);
            }
        }
        drop(endpoints);

        debug!("➕ Subscription {} ({}) on {}", id, stream_key, endpoint);
        Ok(SubscriptionHandle {
            shared: Arc::clone(&self.shared),
            endpoint: endpoint.to_string(),
            stream_key,
            id,
            disposed: AtomicBool::new(false),
            companions: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe and receive payloads on a channel instead of a callback
    pub fn subscribe_channel(
        &self,
        endpoint: &str,
        stream_key: &str,
        subscribe_frames: Vec<String>,
        unsubscribe_frames: Vec<String>,
    ) -> Result<(SubscriptionHandle, flume::Receiver<Value>)> {
        let (tx, rx) = flume::unbounded();
        let subscription = Subscription::new(stream_key, move |payload: &Value| {
            let _ = tx.send(payload.clone());
        })
        .subscribe_frames(subscribe_frames)
        .unsubscribe_frames(unsubscribe_frames);
        Ok((self.subscribe(endpoint, subscription)?, rx))
    }

    /// Queue a raw frame on an open endpoint
    pub fn send(&self, endpoint: &str, frame: impl Into<String>) -> Result<()> {
        let endpoints = self.shared.lock_endpoints();
        let state = endpoints
            .get(endpoint)
            .ok_or_else(|| ExchangeError::Network(format!("no open stream for {endpoint}")))?;
        state
            .commands
            .send(Command::Send(frame.into()))
            .map_err(|_| ExchangeError::Network(format!("stream loop for {endpoint} has stopped")))
    }

    pub fn health(&self, endpoint: &str) -> Option<ConnectionHealth> {
        let endpoints = self.shared.lock_endpoints();
        endpoints.get(endpoint).map(|state| lock(&state.health).clone())
    }

    pub fn endpoint_count(&self) -> usize {
        self.shared.lock_endpoints().len()
    }

    pub fn subscription_count(&self, endpoint: &str) -> usize {
        self.shared
            .lock_endpoints()
            .get(endpoint)
            .map_or(0, |state| state.subscriptions.len())
    }

    /// Close every socket; outstanding handles become inert
    pub fn shutdown(&self) {
        let mut endpoints = self.shared.lock_endpoints();
        for (endpoint, state) in endpoints.drain() {
            let _ = state.commands.send(Command::Shutdown);
            info!("🔌 Shutting down stream {}", endpoint);
        }
    }

    fn start_loop(&self, endpoint: &str, state: &mut EndpointState) -> Result<()> {
        static GENERATION: AtomicU64 = AtomicU64::new(0);
        let generation = GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
        let (commands_tx, commands_rx) = flume::unbounded();

        let stream_loop = StreamLoop {
            endpoint: endpoint.to_string(),
            generation,
            connector: Arc::clone(&self.connector),
            protocol: Arc::clone(&self.protocol),
            reconnect: self.reconnect.clone(),
            shared: Arc::clone(&self.shared),
            commands: commands_rx,
            health: Arc::clone(&state.health),
        };
        self.runtime
            .spawn_thread(format!("omniex-ws-{generation}"), move || stream_loop.run())
            .map_err(|e| ExchangeError::Network(format!("could not start stream thread for {endpoint}: {e}")))?;

        state.generation = generation;
        state.running = true;
        state.commands = commands_tx;
        state.server_ids.clear();
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoints", &self.endpoint_count())
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Keeps one subscription alive; disposing it (or dropping it) removes only
/// that subscription
pub struct SubscriptionHandle {
    shared: Arc<Shared>,
    endpoint: String,
    stream_key: String,
    id: u64,
    disposed: AtomicBool,
    /// Dropped on dispose, which stops the tasks listening on them
    companions: Mutex<Vec<flume::Sender<()>>>,
}

impl SubscriptionHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }

    /// Idempotent; safe from any thread, including inside a callback
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.remove(&self.endpoint, self.id);
        lock(&self.companions).clear();
    }

    /// Tie a background task's lifetime to this subscription: `stop` is
    /// dropped when the subscription is disposed
    pub fn attach(&self, stop: flume::Sender<()>) {
        let mut companions = lock(&self.companions);
        if self.is_active() {
            companions.push(stop);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("endpoint", &self.endpoint)
            .field("stream_key", &self.stream_key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

enum SessionEnd {
    Shutdown,
    Dropped,
}

type Inbound = Result<Option<WsMessage>>;

/// What woke a session up
enum Event {
    /// `None` once every sender is gone
    Command(Option<Command>),
    /// `None` once the reader task has exited
    Inbound(Option<Inbound>),
    Wake,
}

/// Owns the read half for the whole session, so a pending read is never
/// dropped halfway through
async fn read_messages(mut reader: Box<dyn WsReader>, inbound: flume::Sender<Inbound>) {
    loop {
        let message = reader.next_message().await;
        let last = !matches!(message, Ok(Some(_)));
        if inbound.send(message).is_err() || last {
            return;
        }
    }
}

/// The receive loop behind one endpoint
struct StreamLoop {
    endpoint: String,
    generation: u64,
    connector: Arc<dyn WsConnector>,
    protocol: Arc<dyn StreamProtocol>,
    reconnect: ReconnectConfig,
    shared: Arc<Shared>,
    commands: flume::Receiver<Command>,
    health: Arc<Mutex<ConnectionHealth>>,
}

impl StreamLoop {
    async fn run(self) {
        info!("🔗 Stream loop for {} started", self.endpoint);
        let mut attempt = 0u32;
        let mut sessions = 0u32;

        loop {
            self.set_state(if sessions == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            match self.connect().await {
                Ok(session) => {
                    attempt = 0;
                    sessions += 1;
                    self.mark_connected(sessions > 1);
                    match self.session(session).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped => {}
                    }
                }
                Err(e) => warn!("⚠️ Connecting to {} failed: {}", self.endpoint, e),
            }

            attempt += 1;
            if !self.reconnect.allows_attempt(attempt) {
                error!("❌ Giving up on {} after {} attempts", self.endpoint, attempt - 1);
                self.set_state(ConnectionState::Failed);
                self.mark_stopped();
                return;
            }
            let delay = self.reconnect.backoff_delay(attempt, nanos());
            warn!("🔄 Reconnecting to {} in {:?} (attempt {})", self.endpoint, delay, attempt);
            self.set_state(ConnectionState::Reconnecting);
            if self.wait_or_shutdown(delay).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("⏹️ Stream loop for {} stopped", self.endpoint);
    }

    async fn connect(&self) -> Result<WsSession> {
        let _timer = PerfTimer::start(format!("ws connect {}", self.endpoint));
        let timeout = Duration::from_millis(self.reconnect.connect_timeout_ms);
        monoio::time::timeout(timeout, self.connector.connect(&self.endpoint))
            .await
            .map_err(|_| ExchangeError::Timeout(format!("connecting to {} took over {:?}", self.endpoint, timeout)))?
    }

    async fn session(&self, session: WsSession) -> SessionEnd {
        let WsSession { reader, mut writer } = session;
        let (inbound_tx, inbound) = flume::unbounded();
        let _reader = monoio::spawn(read_messages(reader, inbound_tx));

        let end = self.drive(writer.as_mut(), &inbound).await;
        let _ = writer.close().await;
        end
    }

    async fn drive(&self, writer: &mut dyn WsWriter, inbound: &flume::Receiver<Inbound>) -> SessionEnd {
        let mut introduced = HashSet::new();
        if let Some(ids) = self.with_state(|state| {
            state.server_ids.clear();
            state.subscriptions.keys().copied().collect::<Vec<_>>()
        }) {
            for id in ids {
                if self.introduce(writer, id).await.is_err() {
                    return SessionEnd::Dropped;
                }
                introduced.insert(id);
            }
        }

        let heartbeat = Duration::from_millis(self.reconnect.heartbeat_interval_ms);
        let mut last_ping = Instant::now();

        loop {
            let wake_in = if heartbeat.is_zero() {
                IDLE_WAKEUP
            } else {
                heartbeat.saturating_sub(last_ping.elapsed())
            };
            let event = monoio::select! {
                command = self.commands.recv_async() => Event::Command(command.ok()),
                message = inbound.recv_async() => Event::Inbound(message.ok()),
                _ = monoio::time::sleep(wake_in) => Event::Wake,
            };

            match event {
                Event::Command(None | Some(Command::Shutdown)) => return SessionEnd::Shutdown,
                Event::Command(Some(Command::Send(frame))) => {
                    if let Err(e) = writer.send_text(frame).await {
                        warn!("⚠️ Send on {} failed: {}", self.endpoint, e);
                        return SessionEnd::Dropped;
                    }
                }
                Event::Command(Some(Command::Introduce(id))) => {
                    if introduced.insert(id) && self.introduce(writer, id).await.is_err() {
                        return SessionEnd::Dropped;
                    }
                }
                Event::Inbound(Some(Ok(Some(WsMessage::Text(text))))) => self.dispatch(&text),
                Event::Inbound(Some(Ok(Some(WsMessage::Ping(payload))))) => {
                    if let Err(e) = writer.pong(payload).await {
                        warn!("⚠️ Pong on {} failed: {}", self.endpoint, e);
                        return SessionEnd::Dropped;
                    }
                }
                Event::Inbound(None | Some(Ok(None))) => {
                    info!("🔌 {} closed by the server", self.endpoint);
                    return SessionEnd::Dropped;
                }
                Event::Inbound(Some(Err(e))) => {
                    warn!("⚠️ Receive on {} failed: {}", self.endpoint, e);
                    return SessionEnd::Dropped;
                }
                Event::Wake => {
                    if !heartbeat.is_zero() && last_ping.elapsed() >= heartbeat {
                        if let Err(e) = writer.ping().await {
                            warn!("⚠️ Heartbeat on {} failed: {}", self.endpoint, e);
                            return SessionEnd::Dropped;
                        }
                        last_ping = Instant::now();
                        lock(&self.health).last_ping_at = Some(unix_millis());
                    }
                }
            }
        }
    }

    /// Run one subscription's `on_connect` and send what it produced
    async fn introduce(&self, writer: &mut dyn WsWriter, id: u64) -> Result<()> {
        let on_connect = self
            .with_state(|state| state.subscriptions.get(&id).and_then(|entry| entry.on_connect.clone()))
            .flatten();
        let Some(on_connect) = on_connect else {
            return Ok(());
        };

        let sender = StreamSender::default();
        if let Err(e) = on_connect(&sender) {
            warn!("⚠️ on_connect for subscription {} on {} failed: {}", id, self.endpoint, e);
            return Ok(());
        }
        for frame in sender.take() {
            writer.send_text(frame).await.inspect_err(|e| {
                warn!("⚠️ Subscribe frame on {} failed: {}", self.endpoint, e);
            })?;
        }
        Ok(())
    }

    fn dispatch(&self, text: &str) {
        {
            let mut health = lock(&self.health);
            health.message_count += 1;
            health.last_message_at = Some(unix_millis());
        }

        let envelope = match self.protocol.parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                lock(&self.health).parse_error_count += 1;
                warn!("⚠️ Dropping unparseable frame on {}: {}", self.endpoint, e);
                return;
            }
        };

        match envelope {
            Envelope::Data { channel, payload } => {
                let targets = self
                    .with_state(|state| {
                        let stream_key = match &channel {
                            Channel::Stream(key) => Some(key.as_str()),
                            Channel::ServerId(id) => state.server_ids.get(id).map(String::as_str),
                            Channel::Broadcast => None,
                        };
                        state
                            .subscriptions
                            .values()
                            .filter(|entry| match (&channel, stream_key) {
                                (Channel::Broadcast, _) => true,
                                (_, Some(key)) => entry.stream_key == key,
                                (_, None) => false,
                            })
                            .map(|entry| Arc::clone(&entry.on_message))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();

                if targets.is_empty() {
                    debug!("📭 No subscription for {:?} on {}", channel, self.endpoint);
                }
                for on_message in targets {
                    on_message(&payload);
                }
            }
            Envelope::Subscribed { stream_key, server_id } => {
                debug!("📌 {} is server id {} on {}", stream_key, server_id, self.endpoint);
                self.with_state(|state| state.server_ids.insert(server_id, stream_key));
            }
            Envelope::Unsubscribed { server_id } => {
                self.with_state(|state| state.server_ids.remove(&server_id));
            }
            Envelope::Control => {}
            Envelope::Error { message } => warn!("⚠️ {} reported a stream error: {}", self.endpoint, message),
        }
    }

    /// Sleep for `delay` unless told to stop first; returns true on stop
    async fn wait_or_shutdown(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match monoio::time::timeout(remaining, self.commands.recv_async()).await {
                Err(_) => return false,
                Ok(Err(_)) | Ok(Ok(Command::Shutdown)) => return true,
                // Frames for a closed socket are dropped; on_connect replays subscriptions
                Ok(Ok(Command::Send(_) | Command::Introduce(_))) => {}
            }
        }
    }

    /// Run `f` on this loop's endpoint state, if it is still ours
    fn with_state<R>(&self, f: impl FnOnce(&mut EndpointState) -> R) -> Option<R> {
        let mut endpoints = self.shared.lock_endpoints();
        endpoints
            .get_mut(&self.endpoint)
            .filter(|state| state.generation == self.generation)
            .map(f)
    }

    fn set_state(&self, state: ConnectionState) {
        lock(&self.health).state = state;
    }

    fn mark_connected(&self, reconnected: bool) {
        let mut health = lock(&self.health);
        health.state = ConnectionState::Connected;
        health.connected_at = Some(unix_millis());
        if reconnected {
            health.reconnect_count += 1;
        }
        info!("✅ Connected to {}", self.endpoint);
    }

    fn mark_stopped(&self) {
        self.with_state(|state| state.running = false);
    }
}

// Guarded data stays consistent across a panicking callback
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
