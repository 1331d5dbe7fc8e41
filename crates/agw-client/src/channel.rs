//! Push channel client.
//!
//! Exactly one socket connection per dashboard session, owned by a spawned
//! task. Consumers observe connection state through a watch, receive events
//! through per-category queues, and send through a fire-and-forget handle.
//! Transport failures never surface as errors, only as the Disconnected
//! state; the REST client remains the fallback source of truth.

use agw_core::wire::{
    AgroUpdate, ClientEvent, ConnectionStatus, EventCategory, ServerEvent, WeatherUpdate,
};
use agw_core::UpdateBuffer;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::subscription::SubscriptionSet;

const OUTBOUND_QUEUE_DEPTH: usize = 256;
const EVENT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub server_url: Url,
    pub ping_interval: Duration,
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
    pub buffer_capacity: usize,
}

impl ChannelConfig {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            ping_interval: Duration::from_secs(30),
            reconnect_floor: Duration::from_secs(1),
            reconnect_ceiling: Duration::from_secs(10),
            buffer_capacity: agw_core::buffer::DEFAULT_CAPACITY,
        }
    }
}

struct Shared {
    weather_updates: Mutex<UpdateBuffer<WeatherUpdate>>,
    agro_updates: Mutex<UpdateBuffer<AgroUpdate>>,
    last_event: Mutex<Option<ServerEvent>>,
    listeners: Mutex<HashMap<EventCategory, Vec<mpsc::Sender<ServerEvent>>>>,
}

impl Shared {
    fn new(buffer_capacity: usize) -> Self {
        Self {
            weather_updates: Mutex::new(UpdateBuffer::new(buffer_capacity)),
            agro_updates: Mutex::new(UpdateBuffer::new(buffer_capacity)),
            last_event: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, event: ServerEvent) {
        match &event {
            ServerEvent::WeatherUpdate(update) => {
                self.weather_updates
                    .lock()
                    .expect("buffer lock poisoned")
                    .push(update.clone());
            }
            ServerEvent::AgroUpdate(update) => {
                self.agro_updates
                    .lock()
                    .expect("buffer lock poisoned")
                    .push(update.clone());
            }
            _ => {}
        }
        *self.last_event.lock().expect("event lock poisoned") = Some(event.clone());
        self.dispatch(event);
    }

    fn dispatch(&self, event: ServerEvent) {
        let category = event.category();
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        if let Some(senders) = listeners.get_mut(&category) {
            senders.retain(|sender| match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(event = "listener_queue_full", category = category.as_str());
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        }
    }

    fn register(&self, category: EventCategory) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .entry(category)
            .or_default()
            .push(tx);
        rx
    }
}

/// Handle to the owned connection. Dropping it (or calling [`close`]) tears
/// the transport down exactly once; no events are delivered afterwards.
///
/// [`close`]: PushChannel::close
pub struct PushChannel {
    shared: Arc<Shared>,
    subscriptions: Arc<SubscriptionSet>,
    state_rx: watch::Receiver<ConnectionState>,
    out_tx: mpsc::Sender<ClientEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    /// Open the channel. Connecting starts immediately; the returned handle
    /// observes progress through [`state`](Self::state).
    pub fn connect(config: ChannelConfig) -> Self {
        let shared = Arc::new(Shared::new(config.buffer_capacity));
        let subscriptions = Arc::new(SubscriptionSet::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection(
            config,
            shared.clone(),
            subscriptions.clone(),
            state_tx,
            out_rx,
            shutdown_rx,
        ));

        Self {
            shared,
            subscriptions,
            state_rx,
            out_tx,
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Register for all future events of one category, in arrival order.
    /// Every registered receiver gets every event; a dropped receiver is
    /// pruned on the next dispatch.
    pub fn events(&self, category: EventCategory) -> mpsc::Receiver<ServerEvent> {
        self.shared.register(category)
    }

    /// Fire-and-forget send. When the channel is not connected the message
    /// is dropped with a warning: at-most-once, never queued for later.
    pub fn send(&self, event: ClientEvent) {
        if !self.connected() {
            warn!(event = "send_skipped", reason = "not connected");
            return;
        }
        if let Err(err) = self.out_tx.try_send(event) {
            warn!(event = "send_dropped", error = %err);
        }
    }

    /// Record interest in a terrain and subscribe on the live connection.
    /// The desired set survives reconnects; the connection task replays it
    /// after every successful connect.
    pub fn subscribe_terrain(&self, terrain_id: &str) {
        self.subscriptions.insert(terrain_id);
        self.send(ClientEvent::SubscribeTerrain {
            terrain_id: terrain_id.to_string(),
        });
    }

    pub fn unsubscribe_terrain(&self, terrain_id: &str) {
        self.subscriptions.remove(terrain_id);
        self.send(ClientEvent::UnsubscribeTerrain {
            terrain_id: terrain_id.to_string(),
        });
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.snapshot()
    }

    pub fn last_event(&self) -> Option<ServerEvent> {
        self.shared
            .last_event
            .lock()
            .expect("event lock poisoned")
            .clone()
    }

    /// Recent weather pushes, newest first, at most the buffer capacity.
    pub fn weather_updates(&self) -> Vec<WeatherUpdate> {
        self.shared
            .weather_updates
            .lock()
            .expect("buffer lock poisoned")
            .snapshot()
    }

    /// Recent advisory pushes, newest first, at most the buffer capacity.
    pub fn agro_updates(&self) -> Vec<AgroUpdate> {
        self.shared
            .agro_updates
            .lock()
            .expect("buffer lock poisoned")
            .snapshot()
    }

    /// Tear down the connection and wait for the task to finish.
    pub async fn close(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_connection(
    config: ChannelConfig,
    shared: Arc<Shared>,
    subscriptions: Arc<SubscriptionSet>,
    state_tx: watch::Sender<ConnectionState>,
    mut out_rx: mpsc::Receiver<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = config.reconnect_floor;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let _ = state_tx.send(ConnectionState::Connecting);
        let connect = tokio::select! {
            result = connect_async(config.server_url.clone()) => result,
            _ = shutdown_rx.changed() => break,
        };
        let mut ws = match connect {
            Ok((ws, _)) => ws,
            Err(err) => {
                warn!(event = "connect_error", server = %config.server_url, error = %err);
                let _ = state_tx.send(ConnectionState::Disconnected);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown_rx.changed() => break,
                }
                backoff = next_backoff(backoff, config.reconnect_ceiling);
                continue;
            }
        };
        backoff = config.reconnect_floor;
        let _ = state_tx.send(ConnectionState::Connected);
        info!(event = "channel_connected", server = %config.server_url);
        shared.record(ServerEvent::ConnectionStatus(ConnectionStatus {
            status: "connected".to_string(),
            message: Some("push channel established".to_string()),
            timestamp: Utc::now(),
        }));

        let replay_ok = replay_subscriptions(&mut ws, &subscriptions).await.is_ok();
        if !replay_ok {
            warn!(event = "subscription_replay_failed");
        }

        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + config.ping_interval,
            config.ping_interval,
        );

        while replay_ok {
            tokio::select! {
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => handle_frame(&shared, &text),
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        info!(event = "server_closed");
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(err)) => {
                        warn!(event = "read_error", error = %err);
                        break;
                    }
                },
                outbound = out_rx.recv() => match outbound {
                    Some(event) => {
                        if write_event(&mut ws, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    let event = ClientEvent::Ping { timestamp: Utc::now() };
                    if write_event(&mut ws, &event).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.changed() => {
                    let _ = ws.close(None).await;
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    return;
                }
            }
        }

        let _ = ws.close(None).await;
        let _ = state_tx.send(ConnectionState::Disconnected);
        warn!(event = "channel_disconnected", server = %config.server_url);

        // Anything still queued was accepted while connected; the contract
        // is at-most-once, so it does not survive into the next connection.
        while out_rx.try_recv().is_ok() {}

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => break,
        }
        backoff = next_backoff(backoff, config.reconnect_ceiling);
    }
    let _ = state_tx.send(ConnectionState::Disconnected);
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn replay_subscriptions(ws: &mut WsStream, subscriptions: &SubscriptionSet) -> Result<(), ()> {
    for terrain_id in subscriptions.snapshot() {
        debug!(event = "subscription_replay", terrain_id = %terrain_id);
        let event = ClientEvent::SubscribeTerrain { terrain_id };
        write_event(ws, &event).await?;
    }
    Ok(())
}

async fn write_event(ws: &mut WsStream, event: &ClientEvent) -> Result<(), ()> {
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(event = "encode_error", error = %err);
            return Ok(());
        }
    };
    match ws.send(Message::Text(frame)).await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(event = "write_error", error = %err);
            Err(())
        }
    }
}

fn handle_frame(shared: &Shared, raw: &str) {
    match ServerEvent::from_frame(raw) {
        Ok(event) => {
            debug!(event = "push_received", category = event.category().as_str());
            shared.record(event);
        }
        Err(err) => warn!(event = "frame_invalid", error = %err),
    }
}

fn next_backoff(current: Duration, ceiling: Duration) -> Duration {
    let next = current + current;
    if next > ceiling {
        ceiling
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let ceiling = Duration::from_secs(10);
        let mut backoff = Duration::from_secs(1);
        backoff = next_backoff(backoff, ceiling);
        assert_eq!(backoff, Duration::from_secs(2));
        backoff = next_backoff(backoff, ceiling);
        backoff = next_backoff(backoff, ceiling);
        backoff = next_backoff(backoff, ceiling);
        assert_eq!(backoff, Duration::from_secs(10));
        assert_eq!(next_backoff(backoff, ceiling), Duration::from_secs(10));
    }

    #[test]
    fn dispatch_prunes_closed_listeners_and_keeps_live_ones() {
        let shared = Shared::new(10);
        let live = shared.register(EventCategory::Status);
        let dropped = shared.register(EventCategory::Status);
        drop(dropped);

        shared.record(ServerEvent::ConnectionStatus(ConnectionStatus {
            status: "connected".to_string(),
            message: None,
            timestamp: Utc::now(),
        }));

        let listeners = shared.listeners.lock().unwrap();
        assert_eq!(listeners.get(&EventCategory::Status).unwrap().len(), 1);
        drop(listeners);
        drop(live);
    }
}
