//! Push channel behavior against a local stub socket server.

use agw_client::channel::{ChannelConfig, ConnectionState, PushChannel};
use agw_core::wire::{ClientEvent, EventCategory, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// Single-connection stub server: records every text frame the client
/// writes and forwards queued frames to the connected client. Serves
/// connections sequentially so aborting the task tears everything down.
struct StubServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    push_tx: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

impl StubServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        Self::serve(listener).await
    }

    async fn restart(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.expect("rebind");
        Self::serve(listener).await
    }

    async fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().expect("local addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let (push_tx, push_rx) = mpsc::channel::<String>(64);
        let push_rx = Arc::new(tokio::sync::Mutex::new(push_rx));
        let sink = received.clone();

        let task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                let mut push_rx = push_rx.lock().await;
                loop {
                    tokio::select! {
                        inbound = ws.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                sink.lock().unwrap().push(text);
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => break,
                        },
                        Some(frame) = push_rx.recv() => {
                            if ws.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            addr,
            received,
            push_tx,
            task,
        }
    }

    fn url(&self) -> Url {
        Url::parse(&format!("ws://{}/ws", self.addr)).expect("ws url")
    }

    async fn push(&self, frame: String) {
        self.push_tx.send(frame).await.expect("push frame");
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Drop the listener and the live connection.
    fn stop(self) -> SocketAddr {
        self.task.abort();
        self.addr
    }
}

fn test_config(url: Url) -> ChannelConfig {
    let mut config = ChannelConfig::new(url);
    // Keep pings out of the recorded frames and reconnect fast.
    config.ping_interval = Duration::from_secs(3600);
    config.reconnect_floor = Duration::from_millis(50);
    config.reconnect_ceiling = Duration::from_millis(200);
    config
}

fn weather_frame(n: usize) -> String {
    format!(
        r#"{{"event":"weather_update","data":{{"type":"current_conditions","location":"loc-{n}","timestamp":"2026-06-15T09:{:02}:00Z"}}}}"#,
        n % 60
    )
}

async fn wait_for_state(channel: &PushChannel, expected: ConnectionState) {
    let mut state = channel.state();
    timeout(WAIT, state.wait_for(|current| *current == expected))
        .await
        .expect("state reached")
        .expect("channel alive");
}

async fn wait_until(mut check: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn connects_subscribes_and_caps_buffers_newest_first() {
    let server = StubServer::start().await;
    let channel = PushChannel::connect(test_config(server.url()));
    wait_for_state(&channel, ConnectionState::Connected).await;

    // The synthetic connection notification is observable.
    wait_until(|| channel.last_event().is_some(), "synthetic event").await;

    let mut weather_rx = channel.events(EventCategory::Weather);

    channel.subscribe_terrain("t1");
    wait_until(
        || {
            server
                .received()
                .iter()
                .any(|frame| frame.contains("subscribe_terrain") && frame.contains("t1"))
        },
        "subscribe frame",
    )
    .await;
    assert_eq!(channel.subscriptions(), vec!["t1"]);

    for n in 0..12 {
        server.push(weather_frame(n)).await;
    }
    wait_until(|| channel.weather_updates().len() == 10, "full buffer").await;

    let updates = channel.weather_updates();
    assert_eq!(updates.len(), 10);
    // Newest first: pushes 2..=11 survive, 11 on top.
    assert_eq!(updates[0].location.as_deref(), Some("loc-11"));
    assert_eq!(updates[9].location.as_deref(), Some("loc-2"));

    // Fan-out preserves arrival order and drops nothing.
    for n in 0..12 {
        let event = timeout(WAIT, weather_rx.recv())
            .await
            .expect("event delivered")
            .expect("channel open");
        match event {
            ServerEvent::WeatherUpdate(update) => {
                assert_eq!(update.location.as_deref(), Some(format!("loc-{n}").as_str()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    channel.close().await;
}

#[tokio::test]
async fn disconnected_sends_write_nothing_and_reconnect_replays_subscriptions() {
    let server = StubServer::start().await;
    let channel = PushChannel::connect(test_config(server.url()));
    wait_for_state(&channel, ConnectionState::Connected).await;

    channel.subscribe_terrain("t1");
    wait_until(
        || !server.received().is_empty(),
        "subscribe frame before drop",
    )
    .await;

    let addr = server.stop();
    wait_for_state(&channel, ConnectionState::Disconnected).await;

    // At-most-once: refused outright while disconnected, never queued.
    channel.send(ClientEvent::Ping {
        timestamp: chrono::Utc::now(),
    });
    channel.subscribe_terrain("t2");

    let server = StubServer::restart(addr).await;
    wait_for_state(&channel, ConnectionState::Connected).await;

    // The desired set (t1 and the t2 added while down) is replayed.
    wait_until(
        || {
            let frames = server.received();
            frames
                .iter()
                .any(|frame| frame.contains("subscribe_terrain") && frame.contains("t1"))
                && frames
                    .iter()
                    .any(|frame| frame.contains("subscribe_terrain") && frame.contains("t2"))
        },
        "subscription replay",
    )
    .await;

    // The ping dropped while disconnected did not survive the reconnect.
    assert!(!server
        .received()
        .iter()
        .any(|frame| frame.contains(r#""event":"ping""#)));

    channel.close().await;
}

#[tokio::test]
async fn unsubscribe_removes_from_the_desired_set() {
    let server = StubServer::start().await;
    let channel = PushChannel::connect(test_config(server.url()));
    wait_for_state(&channel, ConnectionState::Connected).await;

    channel.subscribe_terrain("t1");
    channel.subscribe_terrain("t1");
    assert_eq!(channel.subscriptions(), vec!["t1"]);

    channel.unsubscribe_terrain("t1");
    assert!(channel.subscriptions().is_empty());

    wait_until(
        || {
            server
                .received()
                .iter()
                .any(|frame| frame.contains("unsubscribe_terrain"))
        },
        "unsubscribe frame",
    )
    .await;

    // Two subscribes were sent on the wire, dedup is the server's concern.
    let subscribe_count = server
        .received()
        .iter()
        .filter(|frame| frame.contains(r#""event":"subscribe_terrain""#))
        .count();
    assert_eq!(subscribe_count, 2);

    channel.close().await;
}

#[tokio::test]
async fn malformed_frames_are_skipped_not_fatal() {
    let server = StubServer::start().await;
    let channel = PushChannel::connect(test_config(server.url()));
    wait_for_state(&channel, ConnectionState::Connected).await;

    server.push("{not json".to_string()).await;
    server
        .push(r#"{"event":"mystery_event","data":{}}"#.to_string())
        .await;
    server.push(weather_frame(1)).await;

    wait_until(|| channel.weather_updates().len() == 1, "good frame").await;
    assert!(channel.connected());

    channel.close().await;
}
