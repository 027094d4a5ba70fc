//! A session whose peer answers every acknowledged send at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use wonderbits_client::{ClientConfig, Connector, Session, Transport, TransportEvent};
use wonderbits_client::transport::TransportEvents;
use wonderbits_types::WbError;

#[derive(Default)]
struct Log {
    sent: Vec<String>,
    replies: HashMap<String, String>,
}

/// Records every outbound payload and replies on the command's own channel.
pub(crate) struct EchoPeer {
    log: Mutex<Log>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl EchoPeer {
    /// Reply `payload` to `command` instead of the default `ok`.
    pub fn answer(&self, command: &str, payload: &str) {
        self.log
            .lock()
            .unwrap()
            .replies
            .insert(command.to_string(), payload.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.log.lock().unwrap().sent.clone()
    }

    fn record(&self, payload: &str) -> String {
        let mut log = self.log.lock().unwrap();
        log.sent.push(payload.to_string());
        log.replies
            .get(payload)
            .cloned()
            .unwrap_or_else(|| "ok".to_string())
    }
}

struct EchoTransport(Arc<EchoPeer>);

#[async_trait]
impl Transport for EchoTransport {
    async fn send(&self, _channel: &str, payload: &str) -> Result<(), WbError> {
        let reply = self.0.record(payload);
        let _ = self.0.events.send(TransportEvent::Message {
            channel: payload.to_string(),
            payload: Some(reply),
        });
        Ok(())
    }

    fn emit(&self, _channel: &str, payload: &str) -> Result<(), WbError> {
        self.0.record(payload);
        Ok(())
    }

    fn close(&self) {}
}

struct EchoConnector {
    link: Mutex<Option<(Arc<EchoPeer>, TransportEvents)>>,
}

impl Connector for EchoConnector {
    fn connect(
        &self,
        _config: &ClientConfig,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), WbError> {
        let (peer, events) = self
            .link
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| WbError::Transport("already connected".into()))?;
        Ok((Arc::new(EchoTransport(peer)), events))
    }
}

/// An initialized session wired to an [`EchoPeer`].
pub(crate) fn echo_session() -> (Session, Arc<EchoPeer>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let peer = Arc::new(EchoPeer {
        log: Mutex::new(Log::default()),
        events: events_tx,
    });
    let connector = EchoConnector {
        link: Mutex::new(Some((Arc::clone(&peer), events_rx))),
    };
    let config = ClientConfig {
        call_timeout_ms: 1_000,
        ..ClientConfig::default()
    };
    let session = Session::with_connector(config, Arc::new(connector));
    session.initialize(|| {}).unwrap();
    (session, peer)
}
