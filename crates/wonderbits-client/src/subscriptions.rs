//! [`SubscriptionRegistry`] – routing of peripheral events to subscribers.
//!
//! Every registration is assigned a fresh integer target id. The id is
//! embedded in the registration command so the peripheral can echo it back
//! in the `target` field of its event frames, which keeps two registrations
//! of the same signal (say, with different thresholds) apart.
//!
//! Frames that carry no numeric target are routed by the compound
//! `module.source` key to every subscription of that pair.
//!
//! The registry is cleared, and its target counter restarted at 0, by
//! [`SubscriptionRegistry::reset`]. Each reset starts a new epoch; handles
//! from an older epoch no longer match anything.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use wonderbits_types::{EventFrame, EventOptions, ModuleEvent, WbError, wire_bool};

use crate::coercion::coerce_frame;
use crate::guarded;

/// Subscriber callback.
pub type EventCallback = Arc<dyn Fn(ModuleEvent) + Send + Sync>;

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    pub target: u32,
    pub epoch: u64,
}

struct Entry {
    peripheral: String,
    signal: String,
    callback: EventCallback,
}

#[derive(Default)]
struct Registry {
    epoch: u64,
    next_target: u32,
    entries: HashMap<u32, Entry>,
    by_signal: HashMap<(String, String), Vec<u32>>,
}

/// Target-id keyed store of event subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Registry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `callback` for `peripheral.signal` under the next target id.
    pub fn insert(&self, peripheral: &str, signal: &str, callback: EventCallback) -> Registration {
        let mut reg = self.inner.lock();
        let target = reg.next_target;
        reg.next_target = reg.next_target.wrapping_add(1);
        reg.entries.insert(
            target,
            Entry {
                peripheral: peripheral.to_string(),
                signal: signal.to_string(),
                callback,
            },
        );
        reg.by_signal
            .entry((peripheral.to_string(), signal.to_string()))
            .or_default()
            .push(target);
        Registration {
            target,
            epoch: reg.epoch,
        }
    }

    /// Remove a single registration. Returns the `(peripheral, signal)` it
    /// was registered for, or `None` if it is gone or from an older epoch.
    pub fn remove(&self, registration: Registration) -> Option<(String, String)> {
        let mut reg = self.inner.lock();
        if reg.epoch != registration.epoch {
            return None;
        }
        let entry = reg.entries.remove(&registration.target)?;
        let key = (entry.peripheral, entry.signal);
        let now_empty = match reg.by_signal.get_mut(&key) {
            Some(targets) => {
                targets.retain(|t| *t != registration.target);
                targets.is_empty()
            }
            None => false,
        };
        if now_empty {
            reg.by_signal.remove(&key);
        }
        Some(key)
    }

    /// Remove every registration of `peripheral.signal`, returning their
    /// target ids (empty when nothing was registered).
    pub fn remove_signal(&self, peripheral: &str, signal: &str) -> Vec<u32> {
        let mut reg = self.inner.lock();
        let targets = reg
            .by_signal
            .remove(&(peripheral.to_string(), signal.to_string()))
            .unwrap_or_default();
        for target in &targets {
            reg.entries.remove(target);
        }
        targets
    }

    /// Drop every registration and restart the target counter.
    pub fn reset(&self) {
        let mut reg = self.inner.lock();
        reg.entries.clear();
        reg.by_signal.clear();
        reg.next_target = 0;
        reg.epoch += 1;
    }

    /// Invoke every callback the frame routes to. Returns how many ran.
    pub fn deliver(&self, frame: &EventFrame) -> usize {
        let callbacks = self.route(frame);
        if callbacks.is_empty() {
            return 0;
        }
        let event = module_event(frame);
        for callback in &callbacks {
            let event = event.clone();
            guarded("event subscriber", || callback(event));
        }
        callbacks.len()
    }

    pub fn is_registered(&self, peripheral: &str, signal: &str) -> bool {
        self
            .inner
            .lock()
            .by_signal
            .contains_key(&(peripheral.to_string(), signal.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    // Callbacks are cloned out so none run under the lock.
    fn route(&self, frame: &EventFrame) -> Vec<EventCallback> {
        let reg = self.inner.lock();
        if let Some(target) = frame.target_id() {
            return reg
                .entries
                .get(&target)
                .map(|e| vec![Arc::clone(&e.callback)])
                .unwrap_or_default();
        }
        reg.by_signal
            .get(&(frame.module.clone(), frame.source.clone()))
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|t| reg.entries.get(t))
                    .map(|e| Arc::clone(&e.callback))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Decode an `event` channel payload.
///
/// # Errors
///
/// Returns [`WbError::MalformedFrame`] when the payload is not a JSON event
/// frame.
pub fn decode_frame(payload: &str) -> Result<EventFrame, WbError> {
    serde_json::from_str(payload).map_err(|e| WbError::MalformedFrame(e.to_string()))
}

/// Build the subscriber-facing event for a frame, with its value coerced.
pub fn module_event(frame: &EventFrame) -> ModuleEvent {
    ModuleEvent {
        module: frame.module.clone(),
        source: frame.source.clone(),
        target: frame.target_id(),
        value: coerce_frame(frame),
    }
}

/// Registration command sent to the peripheral.
pub fn register_command(
    peripheral: &str,
    signal: &str,
    target: u32,
    options: &EventOptions,
) -> String {
    format!(
        "{peripheral}.register.{signal}({target},'{}',{},{})",
        options.trigger,
        options.threshold,
        wire_bool(options.internal)
    )
}

/// Unregistration command sent to the peripheral.
pub fn unregister_command(peripheral: &str, signal: &str, target: u32) -> String {
    format!("{peripheral}.unregister.{signal}({target})")
}
