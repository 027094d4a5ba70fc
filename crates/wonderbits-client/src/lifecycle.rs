//! [`LifecycleNotifier`] – fan-out of connection lifecycle signals.
//!
//! Listeners are plain callbacks kept in per-signal lists; they run in
//! registration order. Every signal is also published on a
//! [`tokio::sync::broadcast`] lane so async code can `recv()` lifecycle
//! changes instead of registering callbacks, and the current
//! [`ConnectionState`] is exposed through a [`tokio::sync::watch`] channel.
//!
//! | Signal | Listeners invoked | State after |
//! |---|---|---|
//! | connected (transport connect/reconnect, serial link up) | connect-success | `Connected` |
//! | disconnected (transport drop, serial link failed) | disconnect | `Disconnected` |
//! | reset (peer) | connect-success, then every reset listener once | `Connected` |
//! | run error (peer) | run-command-error | unchanged |

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};
use wonderbits_types::{ConnectionState, LifecycleEvent, LifecycleSignal};

use crate::guarded;

/// Default capacity of the lifecycle broadcast lane.
const DEFAULT_CAPACITY: usize = 64;

/// Marker the companion process puts in its own echo lines on the raw-data
/// channel; such lines are never forwarded.
const RAW_ECHO_MARKER: &str = ">>>";

/// Callback for a signal without payload.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Callback for a signal carrying text.
pub type TextListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-session listener sets plus the lifecycle bus.
pub struct LifecycleNotifier {
    connect_success: Mutex<Vec<Listener>>,
    disconnect: Mutex<Vec<Listener>>,
    reset: Mutex<Vec<Listener>>,
    run_error: Mutex<Vec<TextListener>>,
    raw_data: Mutex<Option<TextListener>>,
    state: watch::Sender<ConnectionState>,
    bus: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleNotifier {
    /// Create a notifier whose lifecycle bus buffers `capacity` events per
    /// slow receiver.
    pub fn new(capacity: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (bus, _) = broadcast::channel(capacity);
        Self {
            connect_success: Mutex::new(Vec::new()),
            disconnect: Mutex::new(Vec::new()),
            reset: Mutex::new(Vec::new()),
            run_error: Mutex::new(Vec::new()),
            raw_data: Mutex::new(None),
            state,
            bus,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_connect_success_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.connect_success.lock().push(Arc::new(listener));
    }

    pub fn add_disconnect_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.disconnect.lock().push(Arc::new(listener));
    }

    /// Register a listener for the next peer reset. Reset listeners fire at
    /// most once; register again to hear about the following reset.
    pub fn add_reset_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.reset.lock().push(Arc::new(listener));
    }

    pub fn clear_reset_listeners(&self) {
        self.reset.lock().clear();
    }

    pub fn add_run_command_error_listener(
        &self,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) {
        self.run_error.lock().push(Arc::new(listener));
    }

    /// Install the single raw-data callback, replacing any previous one.
    pub fn set_raw_data_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.raw_data.lock() = Some(Arc::new(callback));
    }

    pub fn clear_raw_data_callback(&self) {
        *self.raw_data.lock() = None;
    }

    pub fn reset_listener_count(&self) -> usize {
        self.reset.lock().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signals
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark the link as being established.
    pub fn connecting(&self) {
        self.state.send_replace(ConnectionState::Connecting);
    }

    /// The link is usable. `origin` names what reported it, for the log.
    pub fn connected(&self, origin: &str) {
        info!(origin, "connected");
        self.state.send_replace(ConnectionState::Connected);
        let listeners = self.connect_success.lock().clone();
        fan_out("connect-success", &listeners);
        self.publish(LifecycleSignal::Connected);
    }

    /// A connection attempt failed before the link was ever up. Returns to
    /// `Disconnected` without running disconnect listeners.
    pub fn connect_abandoned(&self, origin: &str) {
        info!(origin, "connection attempt abandoned");
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// The link is gone. `origin` names what reported it, for the log.
    pub fn disconnected(&self, origin: &str) {
        info!(origin, "disconnected");
        self.state.send_replace(ConnectionState::Disconnected);
        let listeners = self.disconnect.lock().clone();
        fan_out("disconnect", &listeners);
        self.publish(LifecycleSignal::Disconnected);
    }

    /// The peer reset itself: announce the link as (re)established, then
    /// drain the reset listeners.
    pub fn reset(&self) {
        info!("peer reset");
        self.state.send_replace(ConnectionState::Connected);
        let listeners = self.connect_success.lock().clone();
        fan_out("connect-success", &listeners);
        let drained = std::mem::take(&mut *self.reset.lock());
        fan_out("reset", &drained);
        self.publish(LifecycleSignal::Reset);
    }

    /// The peer failed to execute a command.
    pub fn run_error(&self, detail: &str) {
        info!(detail, "peer reported command execution error");
        let listeners = self.run_error.lock().clone();
        for listener in &listeners {
            guarded("run-command-error", || listener(detail));
        }
        self.publish(LifecycleSignal::RunError(detail.to_string()));
    }

    /// Forward a raw-data line to the raw-data callback.
    ///
    /// Lines containing the echo marker are dropped; others are trimmed.
    /// Returns `true` when the callback ran.
    pub fn raw_data(&self, data: &str) -> bool {
        if data.is_empty() || data.contains(RAW_ECHO_MARKER) {
            return false;
        }
        let Some(callback) = self.raw_data.lock().clone() else {
            debug!("raw data dropped: no callback installed");
            return false;
        };
        let line = data.trim();
        guarded("raw-data", || callback(line));
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to the lifecycle bus.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.bus.subscribe()
    }

    fn publish(&self, signal: LifecycleSignal) {
        // No receivers is the normal case.
        let _ = self.bus.send(LifecycleEvent::now(signal));
    }
}

impl Default for LifecycleNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// Callers must release the listener lock before fanning out: listeners may
// register more listeners.
fn fan_out(kind: &str, listeners: &[Listener]) {
    for listener in listeners {
        guarded(kind, || listener());
    }
}
