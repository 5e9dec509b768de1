//! Upstream streaming connection manager.
//!
//! Maintains a single persistent WebSocket connection to the market data
//! vendor, re-used across every subscribed symbol instead of opening one
//! connection per symbol. Subscriptions are pushed via a command channel so
//! callers never need to tear the socket down to add or drop a symbol.

use barstream_core::common::{Minute, Symbol, SubscriptionType};
use barstream_core::market::entity::{BarEvent, TradeEvent};
use barstream_core::upstream::error::UpstreamError;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{error, info, warn};

/// Connection lifecycle as observed by callers polling `UpstreamConnection::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Authenticated,
    Subscribed,
}

/// Event demuxed from an inbound upstream frame.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Trade(TradeEvent),
    Bar(BarEvent),
}

#[derive(Debug)]
enum Command {
    UpdateSubscription {
        subscription_type: SubscriptionType,
        symbols: Vec<Symbol>,
    },
    Shutdown,
}

/// Tunables for the reconnect loop, mirrored from `UpstreamConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub handshake_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempts_before_cooldown: u32,
    pub cooldown: Duration,
}

/// A connection is a "quick disconnect" if it dies before this much wall
/// clock time has passed, having seen fewer than this many frames — almost
/// always a sign the endpoint itself is unhealthy rather than a normal
/// transient blip, so backoff should keep escalating instead of resetting.
const QUICK_DISCONNECT_WINDOW: Duration = Duration::from_secs(5);
const QUICK_DISCONNECT_MESSAGE_CEILING: u64 = 3;

pub struct UpstreamConnection {
    ws_url: String,
    api_key_id: String,
    api_secret_key: String,
    policy: ReconnectPolicy,
    event_tx: mpsc::Sender<UpstreamEvent>,
    command_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<ConnectionState>>,
    /// Authoritative desired symbol set per subscription type, updated by
    /// every `update_subscription` call and replayed in full right after
    /// each reconnect's handshake — survives the socket dying and the
    /// per-connection `current` map in `run_connection` being reset.
    desired: Arc<RwLock<HashMap<SubscriptionType, Vec<Symbol>>>>,
}

impl UpstreamConnection {
    /// Spawns the background reconnect loop and returns a handle to it.
    pub fn spawn(
        ws_url: String,
        api_key_id: String,
        api_secret_key: String,
        policy: ReconnectPolicy,
        event_tx: mpsc::Sender<UpstreamEvent>,
    ) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let handle = Arc::new(Self {
            ws_url,
            api_key_id,
            api_secret_key,
            policy,
            event_tx,
            command_tx,
            state,
            desired: Arc::new(RwLock::new(HashMap::new())),
        });

        handle.clone().spawn_reconnect_loop(command_rx);
        handle
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Replaces the desired symbol set for one subscription type. The
    /// connection task diffs this against what it last sent upstream and
    /// only emits a control frame when something actually changed. The new
    /// set is also recorded as the authoritative desired state so a
    /// reconnect can replay it in full.
    pub async fn update_subscription(
        &self,
        subscription_type: SubscriptionType,
        symbols: Vec<Symbol>,
    ) -> Result<(), UpstreamError> {
        self.desired
            .write()
            .await
            .insert(subscription_type, symbols.clone());
        self.command_tx
            .send(Command::UpdateSubscription {
                subscription_type,
                symbols,
            })
            .await
            .map_err(|_| UpstreamError::Fatal("command channel closed".into()))
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown).await;
    }

    fn spawn_reconnect_loop(self: Arc<Self>, mut command_rx: mpsc::Receiver<Command>) {
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let started = Instant::now();
                let mut message_count: u64 = 0;

                match self.run_connection(&mut command_rx, &mut message_count).await {
                    Ok(()) => {
                        info!("upstream connection closed cleanly, shutting down");
                        return;
                    }
                    Err(err) if !err.is_retriable() => {
                        error!(%err, "fatal upstream error, giving up reconnecting");
                        *self.state.write().await = ConnectionState::Disconnected;
                        return;
                    }
                    Err(err) => {
                        warn!(%err, "upstream connection dropped, will retry");
                        *self.state.write().await = ConnectionState::Disconnected;
                    }
                }

                let quick_disconnect = started.elapsed() < QUICK_DISCONNECT_WINDOW
                    && message_count < QUICK_DISCONNECT_MESSAGE_CEILING;

                if quick_disconnect {
                    attempt += 1;
                } else {
                    attempt = 0;
                }

                if attempt >= self.policy.attempts_before_cooldown {
                    warn!(
                        cooldown_secs = self.policy.cooldown.as_secs(),
                        "exhausted reconnect attempts, entering cooldown"
                    );
                    tokio::time::sleep(self.policy.cooldown).await;
                    attempt = 0;
                    continue;
                }

                let delay = self.backoff_delay(attempt);
                tokio::time::sleep(delay).await;
            }
        });
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let scaled = self.policy.base_delay.saturating_mul(1 << attempt.min(16));
        scaled.min(self.policy.max_delay)
    }

    async fn run_connection(
        &self,
        command_rx: &mut mpsc::Receiver<Command>,
        message_count: &mut u64,
    ) -> Result<(), UpstreamError> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| UpstreamError::TransientNet(e.to_string()))?;

        *self.state.write().await = ConnectionState::Connected;
        info!("upstream connected");

        let (mut write, mut read) = ws_stream.split();

        let auth_frame = serde_json::json!({
            "action": "auth",
            "key": self.api_key_id,
            "secret": self.api_secret_key,
        });
        write
            .send(Message::Text(auth_frame.to_string().into()))
            .await
            .map_err(|e| UpstreamError::TransientNet(e.to_string()))?;

        let authenticated = timeout(self.policy.handshake_timeout, async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        *message_count += 1;
                        if let Ok(frames) = serde_json::from_str::<Vec<UpstreamFrame>>(&text) {
                            for frame in frames {
                                match frame {
                                    UpstreamFrame::Success { msg } if msg == "authenticated" => {
                                        return Ok(());
                                    }
                                    UpstreamFrame::ErrorFrame { code, msg } => {
                                        return Err(UpstreamError::AuthRejected(format!(
                                            "{code}: {msg}"
                                        )));
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = close_parts(frame);
                        return Err(UpstreamError::from_close_code(code, &reason));
                    }
                    Some(Err(e)) => return Err(UpstreamError::TransientNet(e.to_string())),
                    None => return Err(UpstreamError::TransientNet("stream ended".into())),
                    _ => {}
                }
            }
        })
        .await
        .map_err(|_| UpstreamError::TransientProto("handshake timed out".into()))??;

        let _ = authenticated;
        *self.state.write().await = ConnectionState::Authenticated;
        info!("upstream authenticated");

        // Replay whatever was desired before this (re)connect — the vendor
        // socket remembers nothing across a dropped connection, so every
        // previously-subscribed symbol needs to be re-issued here or the
        // stream silently goes dead for it.
        let desired_snapshot = self.desired.read().await.clone();
        for (subscription_type, symbols) in &desired_snapshot {
            if symbols.is_empty() {
                continue;
            }
            send_subscription_frame(&mut write, "subscribe", *subscription_type, symbols)
                .await
                .map_err(|e| UpstreamError::TransientNet(e.to_string()))?;
        }
        if !desired_snapshot.is_empty() {
            *self.state.write().await = ConnectionState::Subscribed;
        }
        let mut current: HashMap<SubscriptionType, Vec<Symbol>> = desired_snapshot;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            *message_count += 1;
                            self.dispatch_text(&text).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = close_parts(frame);
                            return Err(UpstreamError::from_close_code(code, &reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(UpstreamError::TransientNet(e.to_string())),
                        None => return Err(UpstreamError::TransientNet("stream ended".into())),
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::UpdateSubscription { subscription_type, symbols }) => {
                            let previous = current.get(&subscription_type).cloned().unwrap_or_default();
                            if previous != symbols {
                                let previous_set: HashSet<&Symbol> = previous.iter().collect();
                                let desired_set: HashSet<&Symbol> = symbols.iter().collect();

                                let added: Vec<Symbol> = symbols
                                    .iter()
                                    .filter(|s| !previous_set.contains(s))
                                    .cloned()
                                    .collect();
                                let removed: Vec<Symbol> = previous
                                    .iter()
                                    .filter(|s| !desired_set.contains(s))
                                    .cloned()
                                    .collect();

                                if !added.is_empty() {
                                    send_subscription_frame(&mut write, "subscribe", subscription_type, &added)
                                        .await
                                        .map_err(|e| UpstreamError::TransientNet(e.to_string()))?;
                                }
                                if !removed.is_empty() {
                                    send_subscription_frame(&mut write, "unsubscribe", subscription_type, &removed)
                                        .await
                                        .map_err(|e| UpstreamError::TransientNet(e.to_string()))?;
                                }

                                current.insert(subscription_type, symbols);
                                *self.state.write().await = ConnectionState::Subscribed;
                            }
                        }
                        Some(Command::Shutdown) | None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn dispatch_text(&self, text: &str) {
        let Ok(frames) = serde_json::from_str::<Vec<UpstreamFrame>>(text) else {
            warn!(%text, "could not parse upstream frame");
            return;
        };
        for frame in frames {
            let event = match frame {
                UpstreamFrame::Trade(t) => {
                    match barstream_core::common::datetime_from_millis(t.timestamp_ms) {
                        Some(timestamp) => Some(UpstreamEvent::Trade(TradeEvent {
                            symbol: Symbol::new(t.symbol),
                            price: t.price,
                            size: t.size,
                            timestamp,
                            conditions: t.conditions.unwrap_or_default(),
                        })),
                        None => {
                            warn!(symbol = %t.symbol, ts = t.timestamp_ms, "discarding trade with unparseable timestamp");
                            None
                        }
                    }
                }
                UpstreamFrame::Bar(b) => {
                    match barstream_core::common::datetime_from_millis(b.timestamp_ms) {
                        Some(timestamp) => Some(UpstreamEvent::Bar(BarEvent {
                            symbol: Symbol::new(b.symbol),
                            time: Minute::align(timestamp),
                            open: b.open,
                            high: b.high,
                            low: b.low,
                            close: b.close,
                            volume: b.volume,
                        })),
                        None => {
                            warn!(symbol = %b.symbol, ts = b.timestamp_ms, "discarding bar with unparseable timestamp");
                            None
                        }
                    }
                }
                UpstreamFrame::ErrorFrame { code, msg } => {
                    warn!(code, %msg, "upstream reported an error frame");
                    None
                }
                _ => None,
            };
            if let Some(event) = event {
                if self.event_tx.send(event).await.is_err() {
                    warn!("inbound event channel closed, dropping upstream event");
                }
            }
        }
    }
}

async fn send_subscription_frame<S>(
    write: &mut S,
    action: &str,
    subscription_type: SubscriptionType,
    symbols: &[Symbol],
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let key = subscription_type.to_string();
    let symbols: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
    let frame = serde_json::json!({
        "action": action,
        key: symbols,
    });
    write.send(Message::Text(frame.to_string().into())).await
}

fn close_parts(
    frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame>,
) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "no close frame".to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "T")]
enum UpstreamFrame {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    ErrorFrame { code: i32, msg: String },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        trades: Option<Vec<String>>,
        #[serde(default)]
        quotes: Option<Vec<String>>,
        #[serde(default)]
        bars: Option<Vec<String>>,
    },
    #[serde(rename = "t")]
    Trade(RawTrade),
    #[serde(rename = "b")]
    Bar(RawBar),
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "p")]
    price: f64,
    #[serde(rename = "s")]
    size: f64,
    #[serde(rename = "t")]
    timestamp_ms: i64,
    #[serde(rename = "c", default)]
    conditions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "t")]
    timestamp_ms: i64,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = ReconnectPolicy {
            handshake_timeout: Duration::from_secs(10),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            attempts_before_cooldown: 5,
            cooldown: Duration::from_secs(300),
        };
        let conn = UpstreamConnection {
            ws_url: String::new(),
            api_key_id: String::new(),
            api_secret_key: String::new(),
            policy,
            event_tx: mpsc::channel(1).0,
            command_tx: mpsc::channel(1).0,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            desired: Arc::new(RwLock::new(HashMap::new())),
        };

        assert_eq!(conn.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(conn.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(conn.backoff_delay(2), Duration::from_secs(8));
        assert_eq!(conn.backoff_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn parses_trade_and_bar_frames() {
        let text = r#"[{"T":"t","S":"AAPL","p":150.25,"s":10,"t":1700000000000},
                        {"T":"b","S":"AAPL","t":1700000000000,"o":1,"h":2,"l":0.5,"c":1.5,"v":100}]"#;
        let frames: Vec<UpstreamFrame> = serde_json::from_str(text).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], UpstreamFrame::Trade(_)));
        assert!(matches!(frames[1], UpstreamFrame::Bar(_)));
    }

    #[test]
    fn close_code_1008_maps_to_auth_rejected() {
        let err = UpstreamError::from_close_code(1008, "bad key");
        assert!(matches!(err, UpstreamError::AuthRejected(_)));
        assert!(!err.is_retriable());
    }
}
