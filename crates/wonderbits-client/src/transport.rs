//! The transport seam.
//!
//! A [`Session`](crate::Session) never talks to a socket directly. It asks a
//! [`Connector`] for a [`Transport`] plus a stream of [`TransportEvent`]s and
//! drives everything else from those two.
//!
//! # Contract
//!
//! * `send` – deliver a message and resolve once the peer acknowledged it.
//!   Fails with [`WbError::Transport`] when the link is down or the peer
//!   rejected the message.
//! * `emit` – queue a message without waiting for an acknowledgement. Fails
//!   only when the link is down.
//! * `close` – stop the transport, including any reconnect attempts. The
//!   event stream ends afterwards.
//!
//! Connection changes and inbound messages arrive on the event stream in the
//! order the transport observed them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use wonderbits_types::WbError;

use crate::config::ClientConfig;

/// What a transport reports to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// First successful connection.
    Connected,
    /// The link came back after a drop.
    Reconnected,
    /// The link dropped.
    Disconnected { reason: String },
    /// A message arrived on `channel`. `None` when the peer sent no payload.
    Message {
        channel: String,
        payload: Option<String>,
    },
}

/// An open, message-oriented link to the companion process.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` on `channel` and wait for the peer's acknowledgement.
    async fn send(&self, channel: &str, payload: &str) -> Result<(), WbError>;

    /// Send `payload` on `channel` without waiting for an acknowledgement.
    fn emit(&self, channel: &str, payload: &str) -> Result<(), WbError>;

    /// Shut the transport down.
    fn close(&self);
}

/// Receiver half of a transport's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Factory for transports; one call per session initialisation.
pub trait Connector: Send + Sync {
    /// Start connecting according to `config`.
    ///
    /// Returns immediately; the outcome of the connection attempt is reported
    /// on the returned event stream.
    ///
    /// # Errors
    ///
    /// Returns [`WbError::Config`] when `config` cannot describe a connection
    /// (for example a malformed endpoint).
    fn connect(&self, config: &ClientConfig)
    -> Result<(Arc<dyn Transport>, TransportEvents), WbError>;
}
