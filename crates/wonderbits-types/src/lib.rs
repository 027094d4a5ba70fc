//! `wonderbits-types` – shared vocabulary of the wonderbits client stack.
//!
//! Every crate in the workspace speaks in these types: coerced peripheral
//! [`Value`]s, inbound [`EventFrame`]s, the [`ModuleEvent`] handed to
//! subscribers, connection lifecycle signals, and the single [`WbError`]
//! error type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reply payload the companion process sends when it could not satisfy a
/// query or an action.
pub const FAILURE_SENTINEL: &str = "wonderbits_failed";

/// Render a boolean the way the peripheral firmware parses it (`True` /
/// `False`).
pub fn wire_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// A typed peripheral reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl Value {
    /// Return the boolean, if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Return the number, if this is a [`Value::Number`].
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Return the number truncated to an integer when it has no fractional
    /// part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    /// Return the text, if this is a [`Value::Text`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Return the items, if this is a [`Value::List`].
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => f.write_str(&items.join(",")),
        }
    }
}

/// The declared wire type of an event value (`valuetype` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Passed through untouched.
    Text,
    /// Comma separated list of strings.
    List,
    /// Anything else: boolean, numeric, or lowercased text.
    Scalar,
}

impl ValueKind {
    /// Map a `valuetype` field onto a [`ValueKind`]. Unknown names are
    /// [`ValueKind::Scalar`].
    pub fn from_wire(valuetype: &str) -> Self {
        match valuetype {
            "string" => ValueKind::Text,
            "list" => ValueKind::List,
            _ => ValueKind::Scalar,
        }
    }
}

/// Correlation key carried by an event frame.
///
/// Anything that is neither a `u32` nor a string lands in
/// [`TargetKey::Other`] so the rest of the frame still decodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetKey {
    Id(u32),
    Name(String),
    Other(serde_json::Value),
}

/// An inbound frame from the `event` channel.
///
/// Every field is optional on the wire; missing fields decode to their empty
/// value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: Option<TargetKey>,
    /// Frame kind; only `"event"` frames have their value coerced.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub valuetype: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl EventFrame {
    /// `true` for spontaneous peripheral events.
    pub fn is_event(&self) -> bool {
        self.kind == "event"
    }

    /// Numeric target id, when the frame carries one (either as a JSON
    /// number or as a numeric string). Negative, fractional and
    /// out-of-range numbers carry no id.
    pub fn target_id(&self) -> Option<u32> {
        match &self.target {
            Some(TargetKey::Id(id)) => Some(*id),
            Some(TargetKey::Name(name)) => name.trim().parse().ok(),
            Some(TargetKey::Other(value)) => value
                .as_f64()
                .filter(|n| n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(n))
                .map(|n| n as u32),
            None => None,
        }
    }

    /// The value as wire text. JSON strings are returned verbatim, `null` is
    /// empty, and any other JSON value is re-serialised.
    pub fn raw_value(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// What a subscriber receives for every routed event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEvent {
    /// Peripheral instance, e.g. `"buggy1"`.
    pub module: String,
    /// Signal name, e.g. `"battery_value"`.
    pub source: String,
    /// Target id the frame was routed by, if any.
    pub target: Option<u32>,
    pub value: Value,
}

/// Condition under which a peripheral emits an event for a registered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Any change of the reading.
    #[default]
    Change,
    /// Reading rises above the threshold.
    Above,
    /// Reading falls below the threshold.
    Below,
    /// Reading equals the threshold.
    Equal,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Change => "change",
            Trigger::Above => "above",
            Trigger::Below => "below",
            Trigger::Equal => "equal",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters embedded in an event registration command.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EventOptions {
    pub trigger: Trigger,
    pub threshold: f64,
    /// Internal registrations are consumed by the companion process itself
    /// rather than forwarded to an application.
    pub internal: bool,
}

/// State of the link between the client and the companion process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A lifecycle notification, as published on a session's lifecycle bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub signal: LifecycleSignal,
}

impl LifecycleEvent {
    pub fn now(signal: LifecycleSignal) -> Self {
        Self {
            timestamp: Utc::now(),
            signal,
        }
    }
}

/// Kinds of lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum LifecycleSignal {
    Connected,
    Disconnected,
    Reset,
    /// The companion process reported a command execution error.
    RunError(String),
}

/// Error type shared by every wonderbits crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WbError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {timeout_ms} ms waiting for reply to `{command}`")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("value read failed: `{command}`")]
    ValueReadFailed { command: String },

    #[error("command failed: `{command}`")]
    CommandFailed { command: String },

    #[error("malformed event frame: {0}")]
    MalformedFrame(String),

    #[error("session is not initialized")]
    NotInitialized,

    #[error("session closed")]
    Closed,

    #[error("call cancelled: `{command}`")]
    Cancelled { command: String },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_frame_decodes_numeric_target() {
        let frame: EventFrame = serde_json::from_str(
            r#"{"module":"hall1","source":"magnetic","target":3,"type":"event","valuetype":"float","value":"-12.5"}"#,
        )
        .unwrap();
        assert_eq!(frame.target_id(), Some(3));
        assert!(frame.is_event());
        assert_eq!(frame.raw_value(), "-12.5");
    }

    #[test]
    fn event_frame_accepts_string_target_and_missing_fields() {
        let frame: EventFrame =
            serde_json::from_str(r#"{"module":"buggy1","target":"7","value":42}"#).unwrap();
        assert_eq!(frame.target_id(), Some(7));
        assert_eq!(frame.source, "");
        assert!(!frame.is_event());
        assert_eq!(frame.raw_value(), "42");
    }

    #[test]
    fn event_frame_compound_target_has_no_id() {
        let frame: EventFrame =
            serde_json::from_str(r#"{"target":"buggy1.battery_value","value":null}"#).unwrap();
        assert_eq!(frame.target_id(), None);
        assert_eq!(frame.raw_value(), "");
    }

    #[test]
    fn event_frame_with_odd_target_still_decodes() {
        for (target, id) in [("-1", None), ("2.5", None), ("true", None), ("3.0", Some(3))] {
            let json = format!(
                r#"{{"module":"hall1","source":"magnetic","target":{target},"type":"event","value":"1"}}"#
            );
            let frame: EventFrame = serde_json::from_str(&json).unwrap();
            assert_eq!(frame.target_id(), id, "target {target}");
            assert_eq!(frame.module, "hall1");
            assert_eq!(frame.source, "magnetic");
        }
    }

    #[test]
    fn value_kind_from_wire() {
        assert_eq!(ValueKind::from_wire("string"), ValueKind::Text);
        assert_eq!(ValueKind::from_wire("list"), ValueKind::List);
        assert_eq!(ValueKind::from_wire("int"), ValueKind::Scalar);
        assert_eq!(ValueKind::from_wire(""), ValueKind::Scalar);
    }

    #[test]
    fn value_accessors() {
        assert_eq!(Value::Number(42.0).as_i64(), Some(42));
        assert_eq!(Value::Number(3.5).as_i64(), None);
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Text("x".into()).as_str(), Some("x"));
        assert!(Value::Text("x".into()).as_f64().is_none());
        assert_eq!(
            Value::List(vec!["a".into(), "b".into()]).to_string(),
            "a,b"
        );
    }

    #[test]
    fn value_serializes_untagged() {
        let json = serde_json::to_string(&Value::Number(42.0)).unwrap();
        assert_eq!(json, "42.0");
        let json = serde_json::to_string(&Value::Bool(false)).unwrap();
        assert_eq!(json, "false");
    }

    #[test]
    fn wb_error_display() {
        let err = WbError::Timeout {
            command: "buggy1.get_s1()".to_string(),
            timeout_ms: 3000,
        };
        assert!(err.to_string().contains("3000 ms"));
        assert!(err.to_string().contains("buggy1.get_s1()"));

        let err = WbError::ValueReadFailed {
            command: "hall1.get_magnetic()".to_string(),
        };
        assert!(err.to_string().starts_with("value read failed"));
    }

    #[test]
    fn trigger_renders_lowercase() {
        assert_eq!(Trigger::default().to_string(), "change");
        assert_eq!(Trigger::Above.as_str(), "above");
    }
}
