//! [`PendingCalls`] – in-flight request/response exchanges.
//!
//! The companion process answers a command on a channel named after the
//! command string itself, so the literal command is the correlation key.
//! Waiters for identical commands are kept in a FIFO queue per key: each
//! matching reply settles the oldest live waiter.
//!
//! A [`Waiter`] settles exactly once. Dropping it before it settles (caller
//! cancellation, timeout, send failure) removes it from the registry, so a
//! late reply can never reach it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use wonderbits_types::{FAILURE_SENTINEL, WbError};


/// The two flavours of call the companion process understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Read-style exchange ("report"); the reply is coerced into a value.
    Query,
    /// Write-style exchange ("command"); the reply is returned raw.
    Action,
}

impl CallKind {
    /// Outbound channel the command is sent on.
    pub fn channel(&self) -> &'static str {
        match self {
            CallKind::Query => "mfe-reporter",
            CallKind::Action => "mfe-message",
        }
    }

    fn failure(&self, command: &str) -> WbError {
        match self {
            CallKind::Query => WbError::ValueReadFailed {
                command: command.to_string(),
            },
            CallKind::Action => WbError::CommandFailed {
                command: command.to_string(),
            },
        }
    }
}

type Reply = Result<String, WbError>;

struct PendingCall {
    id: u64,
    kind: CallKind,
    created_at: DateTime<Utc>,
    reply: oneshot::Sender<Reply>,
}

/// Registry of parked waiters, keyed by command string.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, VecDeque<PendingCall>>>,
    next_id: AtomicU64,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a waiter for `command` at the back of its key's queue.
    pub fn park(self: &Arc<Self>, command: &str, kind: CallKind) -> Waiter {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self
            .calls
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(PendingCall {
                id,
                kind,
                created_at: Utc::now(),
                reply: tx,
            });
        Waiter {
            registry: Arc::clone(self),
            command: command.to_string(),
            id,
            rx,
        }
    }

    /// Settle the oldest live waiter for `command` with `payload`.
    ///
    /// The failure sentinel settles it with the kind-specific failure error.
    /// Returns `false` when nobody was waiting on `command`.
    pub fn resolve(&self, command: &str, payload: &str) -> bool {
        let mut calls = self.calls.lock();
        let Some(queue) = calls.get_mut(command) else {
            return false;
        };

        let mut delivered = false;
        while let Some(call) = queue.pop_front() {
            let outcome = if payload == FAILURE_SENTINEL {
                Err(call.kind.failure(command))
            } else {
                Ok(payload.to_string())
            };
            let waited_ms = (Utc::now() - call.created_at).num_milliseconds();
            if call.reply.send(outcome).is_ok() {
                debug!(command, call_id = call.id, waited_ms, "reply settled pending call");
                delivered = true;
                break;
            }
        }
        if queue.is_empty() {
            calls.remove(command);
        }
        delivered
    }

    /// Reject every waiter for `command` with [`WbError::Cancelled`].
    /// Returns the number of waiters cancelled.
    pub fn cancel(&self, command: &str) -> usize {
        let Some(queue) = self.calls.lock().remove(command) else {
            return 0;
        };
        let count = queue.len();
        for call in queue {
            let _ = call.reply.send(Err(WbError::Cancelled {
                command: command.to_string(),
            }));
        }
        count
    }

    /// Reject every parked waiter with `error`.
    pub fn fail_all(&self, error: &WbError) -> usize {
        let drained: Vec<_> = self.calls.lock().drain().collect();
        let mut count = 0;
        for (_, queue) in drained {
            for call in queue {
                count += 1;
                let _ = call.reply.send(Err(error.clone()));
            }
        }
        count
    }

    /// Number of waiters parked on `command`.
    pub fn waiting_on(&self, command: &str) -> usize {
        self.calls.lock().get(command).map_or(0, VecDeque::len)
    }

    /// Total number of parked waiters.
    pub fn len(&self) -> usize {
        self.calls.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, command: &str, id: u64) -> bool {
        let mut calls = self.calls.lock();
        let Some(queue) = calls.get_mut(command) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|call| call.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            calls.remove(command);
        }
        removed
    }
}

/// The caller's side of a parked call.
pub struct Waiter {
    registry: Arc<PendingCalls>,
    command: String,
    id: u64,
    rx: oneshot::Receiver<Reply>,
}

impl Waiter {
    /// Wait up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// * [`WbError::Timeout`] when no reply arrives in time.
    /// * [`WbError::ValueReadFailed`] / [`WbError::CommandFailed`] when the
    ///   peer answered with the failure sentinel.
    /// * [`WbError::Cancelled`] / [`WbError::Closed`] when the call was
    ///   cancelled or the session shut down.
    pub async fn wait(mut self, timeout: Duration) -> Result<String, WbError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(WbError::Closed),
            Err(_) => {
                // A reply that raced the timer and was already handed over
                // still wins.
                if !self.registry.remove(&self.command, self.id)
                    && let Ok(reply) = self.rx.try_recv()
                {
                    return reply;
                }
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(command = %self.command, timeout_ms, "call timed out");
                Err(WbError::Timeout {
                    command: self.command.clone(),
                    timeout_ms,
                })
            }
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry.remove(&self.command, self.id);
    }
}
