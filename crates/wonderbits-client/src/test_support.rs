//! In-memory [`Connector`] for session tests.
//!
//! Each [`MockConnector::link`] call prepares one transport. The returned
//! [`MockPeer`] plays the companion process: it observes what the session
//! sends and injects transport events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use wonderbits_types::WbError;

use crate::config::ClientConfig;
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};

/// One message the session handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sent {
    pub channel: String,
    pub payload: String,
    /// `true` for `send`, `false` for `emit`.
    pub acked: bool,
}

pub(crate) struct MockTransport {
    sent: mpsc::UnboundedSender<Sent>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    fn record(&self, channel: &str, payload: &str, acked: bool) -> Result<(), WbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WbError::Transport("transport closed".into()));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(WbError::Transport("mock send failure".into()));
        }
        let _ = self.sent.send(Sent {
            channel: channel.to_string(),
            payload: payload.to_string(),
            acked,
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, channel: &str, payload: &str) -> Result<(), WbError> {
        self.record(channel, payload, true)
    }

    fn emit(&self, channel: &str, payload: &str) -> Result<(), WbError> {
        self.record(channel, payload, false)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The test's side of a mock link.
pub(crate) struct MockPeer {
    pub transport: Arc<MockTransport>,
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<Sent>,
}

impl MockPeer {
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Deliver `payload` on `channel`, as the peer would.
    pub fn reply(&self, channel: &str, payload: &str) {
        self.inject(TransportEvent::Message {
            channel: channel.to_string(),
            payload: Some(payload.to_string()),
        });
    }

    pub fn fail_sends(&self, fail: bool) {
        self.transport.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.transport.closed.load(Ordering::SeqCst)
    }

    /// Next message the session sent, waiting up to a second.
    pub async fn next_sent(&mut self) -> Sent {
        tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .expect("session sent nothing")
            .expect("mock transport dropped")
    }

    /// Whatever the session sent so far, without waiting.
    pub fn drain_sent(&mut self) -> Vec<Sent> {
        let mut out = Vec::new();
        while let Ok(sent) = self.sent.try_recv() {
            out.push(sent);
        }
        out
    }
}

#[derive(Default)]
pub(crate) struct MockConnector {
    links: Mutex<VecDeque<(Arc<MockTransport>, TransportEvents)>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Prepare the transport handed out by the next `connect`.
    pub fn link(&self) -> MockPeer {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            sent: sent_tx,
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.links.lock().push_back((Arc::clone(&transport), events_rx));
        MockPeer {
            transport,
            events: events_tx,
            sent: sent_rx,
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _config: &ClientConfig,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), WbError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (transport, events) = self
            .links
            .lock()
            .pop_front()
            .ok_or_else(|| WbError::Transport("no mock link prepared".into()))?;
        Ok((transport as Arc<dyn Transport>, events))
    }
}

/// Configuration with a short call timeout so timeout tests stay fast.
pub(crate) fn fast_config() -> ClientConfig {
    ClientConfig {
        call_timeout_ms: 50,
        ..ClientConfig::default()
    }
}
