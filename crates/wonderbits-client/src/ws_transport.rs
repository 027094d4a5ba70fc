//! WebSocket transport.
//!
//! [`WsConnector`] spawns one supervisor task per transport. The supervisor
//! dials the endpoint, pumps frames until the link drops, and redials with an
//! exponential back-off while reconnection is enabled.
//!
//! Every WebSocket text frame carries one JSON object:
//!
//! | Direction | Shape |
//! |---|---|
//! | client → peer | `{"channel": "...", "payload": "...", "ack": 7}` (`ack` omitted by `emit`) |
//! | peer → client (ack) | `{"ack": 7}` or `{"ack": 7, "error": "..."}` |
//! | peer → client (message) | `{"channel": "...", "payload": <string \| json \| null>}` |
//!
//! Non-string payloads are handed on re-serialised as JSON text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use wonderbits_types::WbError;

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AckResult = Result<(), String>;

// ─────────────────────────────────────────────────────────────────────────────
// Wire frames
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OutboundFrame<'a> {
    channel: &'a str,
    payload: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ack: Option<u64>,
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    ack: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// A frame queued for the socket, with the ack id it waits on.
struct Outbound {
    text: String,
    ack: Option<u64>,
}

fn encode(channel: &str, payload: &str, ack: Option<u64>) -> Result<String, WbError> {
    serde_json::to_string(&OutboundFrame {
        channel,
        payload,
        ack,
    })
    .map_err(|e| WbError::Transport(format!("encode failed: {e}")))
}

fn payload_text(payload: Option<serde_json::Value>) -> Option<String> {
    match payload? {
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State shared between the transport handle and its supervisor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    next_ack: AtomicU64,
    acks: Mutex<HashMap<u64, oneshot::Sender<AckResult>>>,
}

impl Shared {
    fn settle_ack(&self, id: u64, outcome: AckResult) {
        match self.acks.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(ack = id, "acknowledgement for unknown or abandoned send"),
        }
    }

    fn fail_acks(&self, reason: &str) {
        let drained: Vec<_> = self.acks.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

/// Removes an ack slot when the awaiting `send` goes away.
struct AckSlot<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for AckSlot<'_> {
    fn drop(&mut self) {
        self.shared.acks.lock().remove(&self.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport handle
// ─────────────────────────────────────────────────────────────────────────────

/// [`Transport`] backed by the WebSocket supervisor task.
pub struct WsTransport {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    fn ensure_connected(&self) -> Result<(), WbError> {
        if self.shared.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(WbError::Transport("not connected".to_string()))
        }
    }

    fn queue(&self, text: String, ack: Option<u64>) -> Result<(), WbError> {
        self.outbound
            .send(Outbound { text, ack })
            .map_err(|_| WbError::Transport("transport closed".to_string()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, channel: &str, payload: &str) -> Result<(), WbError> {
        self.ensure_connected()?;
        let id = self.shared.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.acks.lock().insert(id, tx);
        let _slot = AckSlot {
            shared: &self.shared,
            id,
        };

        self.queue(encode(channel, payload, Some(id))?, Some(id))?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(WbError::Transport(reason)),
            Err(_) => Err(WbError::Transport("acknowledgement lost".to_string())),
        }
    }

    fn emit(&self, channel: &str, payload: &str) -> Result<(), WbError> {
        self.ensure_connected()?;
        self.queue(encode(channel, payload, None)?, None)
    }

    fn close(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.shutdown.send_replace(true);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Opens [`WsTransport`]s. Must be used from inside a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        config: &ClientConfig,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), WbError> {
        let endpoint = config.endpoint.trim().to_string();
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(WbError::Config(format!(
                "endpoint must be a ws:// or wss:// URL, got `{endpoint}`"
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WbError::Transport(format!("no tokio runtime: {e}")))?;

        let shared = Arc::new(Shared::default());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            endpoint,
            policy: config.reconnect_policy(),
            shared: Arc::clone(&shared),
            outbound: outbound_rx,
            events: events_tx,
            shutdown: shutdown_rx,
        };
        runtime.spawn(supervisor.run());

        let transport = WsTransport {
            shared,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        };
        Ok((Arc::new(transport), events_rx))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor task
// ─────────────────────────────────────────────────────────────────────────────

struct Supervisor {
    endpoint: String,
    policy: Option<ReconnectPolicy>,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut ever_connected = false;
        let mut delay = self.policy.map(|p| p.initial);

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let attempt = tokio::select! {
                result = connect_async(self.endpoint.as_str()) => result,
                _ = self.shutdown.changed() => break,
            };

            match attempt {
                Ok((ws, _)) => {
                    self.shared.connected.store(true, Ordering::Release);
                    let event = if ever_connected {
                        TransportEvent::Reconnected
                    } else {
                        TransportEvent::Connected
                    };
                    ever_connected = true;
                    info!(endpoint = %self.endpoint, ?event, "websocket up");
                    if self.events.send(event).is_err() {
                        break;
                    }
                    delay = self.policy.map(|p| p.initial);

                    let reason = self.pump(ws).await;
                    self.shared.connected.store(false, Ordering::Release);
                    self.shared.fail_acks(&reason);
                    self.drain_stale(&reason);
                    info!(endpoint = %self.endpoint, reason = %reason, "websocket down");
                    let _ = self.events.send(TransportEvent::Disconnected { reason });
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "websocket connect failed");
                    if self.policy.is_none() {
                        let reason = format!("connect failed: {e}");
                        let _ = self.events.send(TransportEvent::Disconnected { reason });
                    }
                }
            }

            let (Some(policy), Some(wait)) = (self.policy, delay) else {
                break;
            };
            if *self.shutdown.borrow() {
                break;
            }
            debug!(delay_ms = wait.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.changed() => break,
            }
            delay = Some(policy.next_delay(wait));
        }

        self.shared.connected.store(false, Ordering::Release);
        self.shared.fail_acks("transport closed");
        debug!(endpoint = %self.endpoint, "websocket supervisor stopped");
    }

    /// Move frames until the link ends; returns why it ended.
    async fn pump(&mut self, ws: WsStream) -> String {
        let (mut ws_tx, mut ws_rx) = ws.split();
        loop {
            tokio::select! {
                // Queued outbound frames.
                out = self.outbound.recv() => {
                    let Some(out) = out else {
                        let _ = ws_tx.close().await;
                        return "transport dropped".to_string();
                    };
                    if let Err(e) = ws_tx.send(Message::Text(out.text.into())).await {
                        let reason = format!("write failed: {e}");
                        if let Some(id) = out.ack {
                            self.shared.settle_ack(id, Err(reason.clone()));
                        }
                        return reason;
                    }
                }
                // Inbound WebSocket frames.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => return "closed by peer".to_string(),
                        Some(Err(e)) => return format!("read failed: {e}"),
                        Some(Ok(Message::Text(text))) => self.handle_incoming(text.as_str()),
                        _ => {}
                    }
                }
                _ = self.shutdown.changed() => {
                    let _ = ws_tx.close().await;
                    return "closed".to_string();
                }
            }
        }
    }

    /// Parse one inbound text frame. Anything that is neither an ack nor a
    /// channel message is logged and dropped.
    fn handle_incoming(&self, text: &str) {
        let frame = match serde_json::from_str::<InboundFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable websocket frame");
                return;
            }
        };

        if let Some(id) = frame.ack {
            let outcome = match frame.error {
                Some(reason) => Err(reason),
                None => Ok(()),
            };
            self.shared.settle_ack(id, outcome);
            return;
        }

        match frame.channel {
            Some(channel) => {
                let _ = self.events.send(TransportEvent::Message {
                    channel,
                    payload: payload_text(frame.payload),
                });
            }
            None => warn!("dropping websocket frame without channel"),
        }
    }

    // Frames queued while the link was going down are never delivered.
    fn drain_stale(&mut self, reason: &str) {
        while let Ok(out) = self.outbound.try_recv() {
            if let Some(id) = out.ack {
                self.shared.settle_ack(id, Err(reason.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("ws://{addr}"))
    }

    fn config(endpoint: String, reconnect: bool) -> ClientConfig {
        ClientConfig {
            endpoint,
            reconnect,
            reconnect_delay_ms: 10,
            reconnect_max_delay_ms: 20,
            ..ClientConfig::default()
        }
    }

    async fn next_event(events: &mut TransportEvents) -> Option<TransportEvent> {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("transport event in time")
    }

    #[test]
    fn inbound_payloads_become_text() {
        assert_eq!(payload_text(Some(json!("55"))), Some("55".to_string()));
        assert_eq!(payload_text(Some(json!({"a": 1}))), Some(r#"{"a":1}"#.to_string()));
        assert_eq!(payload_text(None), None);
    }

    #[test]
    fn emit_frames_have_no_ack() {
        let text = encode("mfe-message", "signal1.set_buzzer(440)", None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["channel"], "mfe-message");
        assert!(value.get("ack").is_none());
    }

    #[tokio::test]
    async fn rejects_non_websocket_endpoint() {
        let result = WsConnector.connect(&config("http://localhost:8082".into(), false));
        assert!(matches!(result, Err(WbError::Config(_))));
    }

    #[tokio::test]
    async fn send_is_acknowledged_and_reply_is_delivered() {
        let (listener, endpoint) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("expected a text frame");
            };
            let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(frame["channel"], "mfe-reporter");
            let ack = frame["ack"].as_u64().unwrap();
            let command = frame["payload"].as_str().unwrap().to_string();
            ws.send(Message::Text(json!({ "ack": ack }).to_string().into()))
                .await
                .unwrap();
            ws.send(Message::Text(
                json!({ "channel": command, "payload": "55" }).to_string().into(),
            ))
            .await
            .unwrap();
            let _ = ws.close(None).await;
        });

        let (transport, mut events) = WsConnector.connect(&config(endpoint, false)).unwrap();
        assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));

        transport.send("mfe-reporter", "buggy1.get_s1()").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::Message {
                channel: "buggy1.get_s1()".into(),
                payload: Some("55".into()),
            })
        );
        assert!(matches!(
            next_event(&mut events).await,
            Some(TransportEvent::Disconnected { .. })
        ));
        // Reconnection disabled: the stream ends.
        assert_eq!(next_event(&mut events).await, None);
        assert!(transport.emit("mfe-message", "x").is_err());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_ack_fails_the_send() {
        let (listener, endpoint) = listener().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                let reply = json!({ "ack": frame["ack"], "error": "serial port busy" });
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
            while ws.next().await.is_some() {}
        });

        let (transport, mut events) = WsConnector.connect(&config(endpoint, false)).unwrap();
        assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));
        assert_eq!(
            transport.send("mfe-message", "buggy1.set_motors(10,10)").await,
            Err(WbError::Transport("serial port busy".into()))
        );
        transport.close();
    }

    #[tokio::test]
    async fn unreachable_endpoint_without_reconnect_reports_disconnect() {
        let (listener, endpoint) = listener().await;
        drop(listener);

        let (transport, mut events) = WsConnector.connect(&config(endpoint, false)).unwrap();
        assert!(transport.emit("mfe-message", "x").is_err());
        assert!(transport.send("mfe-message", "x").await.is_err());
        match next_event(&mut events).await {
            Some(TransportEvent::Disconnected { reason }) => {
                assert!(reason.starts_with("connect failed"), "{reason}");
            }
            other => panic!("expected a disconnect, got {other:?}"),
        }
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test]
    async fn reconnects_after_the_peer_drops() {
        let (listener, endpoint) = listener().await;
        tokio::spawn(async move {
            for _ in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                let _ = ws.close(None).await;
            }
        });

        let (transport, mut events) = WsConnector.connect(&config(endpoint, true)).unwrap();
        assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));
        assert!(matches!(
            next_event(&mut events).await,
            Some(TransportEvent::Disconnected { .. })
        ));
        assert_eq!(next_event(&mut events).await, Some(TransportEvent::Reconnected));
        transport.close();
    }
}
