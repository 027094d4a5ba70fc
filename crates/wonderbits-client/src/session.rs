//! [`Session`] – one connection to the companion process and everything
//! riding on it.
//!
//! A session owns the transport, the pending-call registry, the event
//! subscription registry and the lifecycle listener sets. It is a cheap,
//! cloneable handle; independent sessions never share state.
//!
//! # Inbound routing
//!
//! A single dispatch task consumes the transport's event stream in arrival
//! order:
//!
//! | Channel | Effect |
//! |---|---|
//! | `event` | decoded, coerced and routed to event subscribers |
//! | `reset` | connect-success listeners, then reset listeners (drained) |
//! | `mfe-success-connect-serial` | connect-success listeners |
//! | `mfe-fail-connect-serial` | disconnect listeners |
//! | `mfe-error-communication` | run-command-error listeners |
//! | `mfe-data` | raw-data callback |
//! | anything else | reply to the pending call whose command equals the channel |

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wonderbits_types::{
    ConnectionState, EventOptions, LifecycleEvent, ModuleEvent, Value, WbError,
};

use crate::coercion::coerce_reply;
use crate::config::ClientConfig;
use crate::lifecycle::LifecycleNotifier;
use crate::pending::{CallKind, PendingCalls};
use crate::subscriptions::{
    Registration, SubscriptionRegistry, decode_frame, module_event, register_command,
    unregister_command,
};
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};
use crate::ws_transport::WsConnector;

/// Command answered with the names of the modules currently attached.
pub const MODULE_INFORMATION_COMMAND: &str = "system.getModuleInformation()";

const MODULE_EVENT_CAPACITY: usize = 256;

/// Handle to a session with the companion process.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    pending: Arc<PendingCalls>,
    subscriptions: SubscriptionRegistry,
    lifecycle: LifecycleNotifier,
    module_events: broadcast::Sender<ModuleEvent>,
    link: Mutex<Option<Link>>,
}

/// The transport of an initialized session and the task draining it.
struct Link {
    transport: Arc<dyn Transport>,
    dispatcher: JoinHandle<()>,
}

impl Session {
    /// Create an uninitialized session that will connect over WebSocket.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create an uninitialized session that obtains its transport from
    /// `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (module_events, _) = broadcast::channel(MODULE_EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                config,
                connector,
                pending: Arc::new(PendingCalls::new()),
                subscriptions: SubscriptionRegistry::new(),
                lifecycle: LifecycleNotifier::default(),
                module_events,
                link: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.link.lock().is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open the connection and start dispatching inbound traffic.
    ///
    /// `on_connected` becomes a connect-success listener. Calling this on an
    /// initialized session does nothing at all; in particular the second
    /// callback is not registered.
    ///
    /// # Errors
    ///
    /// * [`WbError::Config`] when the configured endpoint is unusable.
    /// * [`WbError::Transport`] when called outside a Tokio runtime.
    pub fn initialize(&self, on_connected: impl Fn() + Send + Sync + 'static) -> Result<(), WbError> {
        let mut link = self.inner.link.lock();
        if link.is_some() {
            debug!(session = %self.inner.id, "initialize ignored: already initialized");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WbError::Transport(format!("no tokio runtime: {e}")))?;
        self.inner.lifecycle.connecting();
        let (transport, events) = match self.inner.connector.connect(&self.inner.config) {
            Ok(pair) => pair,
            Err(e) => {
                self.inner.lifecycle.connect_abandoned("connect refused");
                return Err(e);
            }
        };
        self.inner.lifecycle.add_connect_success_listener(on_connected);

        let dispatcher = runtime.spawn(dispatch(Arc::downgrade(&self.inner), events));
        *link = Some(Link {
            transport,
            dispatcher,
        });
        info!(
            session = %self.inner.id,
            endpoint = %self.inner.config.endpoint,
            "session initialized"
        );
        Ok(())
    }

    /// Close the connection and return the session to its uninitialized
    /// state.
    ///
    /// Every outstanding call is rejected with [`WbError::Closed`], every
    /// event subscription is dropped and the target counter restarts at 0.
    /// Listener registrations are kept. Shutting down an uninitialized
    /// session does nothing.
    pub fn shutdown(&self) {
        let Some(link) = self.inner.link.lock().take() else {
            return;
        };
        link.transport.close();
        link.dispatcher.abort();

        let rejected = self.inner.pending.fail_all(&WbError::Closed);
        self.inner.subscriptions.reset();
        if self.inner.lifecycle.state() != ConnectionState::Disconnected {
            self.inner.lifecycle.disconnected("shutdown");
        }
        info!(session = %self.inner.id, rejected, "session shut down");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a read-style command on `mfe-reporter` and return the coerced
    /// reply.
    ///
    /// # Errors
    ///
    /// * [`WbError::InvalidCommand`] for an empty command.
    /// * [`WbError::NotInitialized`] before [`Session::initialize`].
    /// * [`WbError::Transport`] when the command could not be sent.
    /// * [`WbError::Timeout`] when no reply arrived in time.
    /// * [`WbError::ValueReadFailed`] when the peer could not read the value.
    pub async fn query(&self, command: &str) -> Result<Value, WbError> {
        let raw = self.call(command, CallKind::Query).await?;
        Ok(coerce_reply(&raw))
    }

    /// Send a write-style command on `mfe-message` and return the raw reply.
    ///
    /// # Errors
    ///
    /// As [`Session::query`], with [`WbError::CommandFailed`] in place of
    /// [`WbError::ValueReadFailed`].
    pub async fn command(&self, command: &str) -> Result<String, WbError> {
        self.call(command, CallKind::Action).await
    }

    /// Names of the modules currently attached to the companion process.
    pub async fn connected_module_names(&self) -> Result<Vec<String>, WbError> {
        let raw = self.call(MODULE_INFORMATION_COMMAND, CallKind::Query).await?;
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Reject every outstanding call for `command` with
    /// [`WbError::Cancelled`]. Returns how many were cancelled.
    pub fn cancel_pending(&self, command: &str) -> usize {
        self.inner.pending.cancel(command.trim())
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    // The waiter is parked before the send so a fast reply cannot be missed;
    // the reply timer only starts once the send went through.
    async fn call(&self, command: &str, kind: CallKind) -> Result<String, WbError> {
        let command = validate_command(command)?;
        let transport = self.transport()?;
        let timeout = self.inner.config.call_timeout();

        let waiter = self.inner.pending.park(command, kind);
        match tokio::time::timeout(timeout, transport.send(kind.channel(), command)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(session = %self.inner.id, command, error = %e, "send failed");
                return Err(e);
            }
            Err(_) => {
                warn!(session = %self.inner.id, command, "send not acknowledged in time");
                return Err(WbError::Timeout {
                    command: command.to_string(),
                    timeout_ms: self.inner.config.call_timeout_ms,
                });
            }
        }
        waiter.wait(timeout).await
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, WbError> {
        self
            .inner
            .link
            .lock()
            .as_ref()
            .map(|link| Arc::clone(&link.transport))
            .ok_or(WbError::NotInitialized)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe `callback` to `peripheral.signal`.
    ///
    /// The registration command is emitted on `mfe-message` with a freshly
    /// allocated target id; frames echoing that id are routed to `callback`.
    ///
    /// # Errors
    ///
    /// * [`WbError::InvalidArgument`] for an empty or malformed name.
    /// * [`WbError::NotInitialized`] before [`Session::initialize`].
    /// * [`WbError::Transport`] when the registration could not be sent; the
    ///   subscription is not kept in that case.
    pub fn register_event(
        &self,
        peripheral: &str,
        signal: &str,
        options: EventOptions,
        callback: impl Fn(ModuleEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, WbError> {
        validate_name("peripheral", peripheral)?;
        validate_name("signal", signal)?;
        let transport = self.transport()?;

        let registration = self
            .inner
            .subscriptions
            .insert(peripheral, signal, Arc::new(callback));
        let command = register_command(peripheral, signal, registration.target, &options);
        if let Err(e) = transport.emit(CallKind::Action.channel(), &command) {
            self.inner.subscriptions.remove(registration);
            warn!(session = %self.inner.id, command = %command, error = %e, "event registration not sent");
            return Err(e);
        }
        debug!(session = %self.inner.id, command = %command, "event registered");

        Ok(SubscriptionHandle {
            session: Arc::downgrade(&self.inner),
            registration,
            peripheral: peripheral.to_string(),
            signal: signal.to_string(),
        })
    }

    /// Drop every subscription for `peripheral.signal` and tell the peripheral
    /// to stop reporting it. Does nothing when nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns the first transport error hit while emitting the
    /// unregistration commands. The local subscriptions are gone either way.
    pub fn unregister_event(&self, peripheral: &str, signal: &str) -> Result<(), WbError> {
        let targets = self.inner.subscriptions.remove_signal(peripheral, signal);
        if targets.is_empty() {
            debug!(session = %self.inner.id, peripheral, signal, "unregister: nothing registered");
            return Ok(());
        }
        let transport = self.transport()?;
        let mut first_error = None;
        for target in targets {
            let command = unregister_command(peripheral, signal, target);
            if let Err(e) = transport.emit(CallKind::Action.channel(), &command) {
                warn!(session = %self.inner.id, command = %command, error = %e, "unregistration not sent");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Every decoded peripheral event, whether or not a subscriber took it.
    pub fn module_events(&self) -> broadcast::Receiver<ModuleEvent> {
        self.inner.module_events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_connect_success_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner.lifecycle.add_connect_success_listener(listener);
    }

    pub fn add_disconnect_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner.lifecycle.add_disconnect_listener(listener);
    }

    /// Listen for the next peer reset. Reset listeners fire once.
    pub fn add_reset_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner.lifecycle.add_reset_listener(listener);
    }

    pub fn clear_reset_listeners(&self) {
        self.inner.lifecycle.clear_reset_listeners();
    }

    pub fn add_run_command_error_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.inner.lifecycle.add_run_command_error_listener(listener);
    }

    /// Receive the peripherals' raw serial output, one trimmed line at a time.
    pub fn set_raw_data_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.inner.lifecycle.set_raw_data_callback(callback);
    }

    pub fn clear_raw_data_callback(&self) {
        self.inner.lifecycle.clear_raw_data_callback();
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.lifecycle.watch_state()
    }

    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// One event registration, as returned by [`Session::register_event`].
///
/// Handles do not keep their session alive. A handle whose session was shut
/// down (or dropped) since it was issued is inert.
#[derive(Debug)]
pub struct SubscriptionHandle {
    session: Weak<Inner>,
    registration: Registration,
    peripheral: String,
    signal: String,
}

impl SubscriptionHandle {
    pub fn target(&self) -> u32 {
        self.registration.target
    }

    pub fn peripheral(&self) -> &str {
        &self.peripheral
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Remove exactly this registration and tell the peripheral.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the unregistration could not be sent.
    pub fn unsubscribe(self) -> Result<(), WbError> {
        let Some(inner) = self.session.upgrade() else {
            return Ok(());
        };
        if inner.subscriptions.remove(self.registration).is_none() {
            return Ok(());
        }
        let command = unregister_command(&self.peripheral, &self.signal, self.registration.target);
        let transport = inner
            .link
            .lock()
            .as_ref()
            .map(|link| Arc::clone(&link.transport))
            .ok_or(WbError::NotInitialized)?;
        transport.emit(CallKind::Action.channel(), &command)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.transport.close();
            link.dispatcher.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

async fn dispatch(inner: Weak<Inner>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle(event);
    }
}

impl Inner {
    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.lifecycle.connected("transport connect"),
            TransportEvent::Reconnected => self.lifecycle.connected("transport reconnect"),
            TransportEvent::Disconnected { reason } => {
                warn!(session = %self.id, reason = %reason, "transport disconnected");
                self.lifecycle.disconnected("transport disconnect");
            }
            TransportEvent::Message { channel, payload } => {
                self.route(&channel, payload.as_deref().unwrap_or(""));
            }
        }
    }

    fn route(&self, channel: &str, payload: &str) {
        match channel {
            "event" => self.deliver_event(payload),
            "reset" => self.lifecycle.reset(),
            "mfe-success-connect-serial" => self.lifecycle.connected("serial link up"),
            "mfe-fail-connect-serial" => self.lifecycle.disconnected("serial link failed"),
            "mfe-error-communication" => self.lifecycle.run_error(payload),
            "mfe-data" => {
                self.lifecycle.raw_data(payload);
            }
            command => {
                if !self.pending.resolve(command, payload) {
                    debug!(session = %self.id, channel = command, "message with no waiting call dropped");
                }
            }
        }
    }

    fn deliver_event(&self, payload: &str) {
        let frame = match decode_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session = %self.id, error = %e, "dropping event frame");
                return;
            }
        };
        let delivered = self.subscriptions.deliver(&frame);
        if delivered == 0 {
            debug!(
                session = %self.id,
                module = %frame.module,
                source = %frame.source,
                "event with no subscriber"
            );
        }
        if self.module_events.receiver_count() > 0 {
            let _ = self.module_events.send(module_event(&frame));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

fn validate_command(command: &str) -> Result<&str, WbError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(WbError::InvalidCommand("empty command".to_string()));
    }
    Ok(command)
}

fn validate_name<'a>(what: &str, name: &'a str) -> Result<&'a str, WbError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(WbError::InvalidArgument(format!("invalid {what} name `{name}`")));
    }
    Ok(name)
}
