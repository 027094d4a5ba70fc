//! Conversion of wire text into typed [`Value`]s.
//!
//! The companion process sends every reading as text. The declared
//! `valuetype` decides how that text is interpreted:
//!
//! | `valuetype` | Result |
//! |---|---|
//! | `"string"` | [`Value::Text`], untouched |
//! | `"list"` | [`Value::List`], split on `,` |
//! | anything else | [`Value::Bool`] for `true`/`false`, [`Value::Number`] when numeric, otherwise lowercased [`Value::Text`] |

use wonderbits_types::{EventFrame, Value, ValueKind};

/// Coerce `raw` according to `kind`.
pub fn coerce(raw: &str, kind: ValueKind) -> Value {
    match kind {
        ValueKind::Text => Value::Text(raw.to_string()),
        // Elements are left as text.
        ValueKind::List => Value::List(raw.split(',').map(str::to_string).collect()),
        ValueKind::Scalar => coerce_scalar(raw),
    }
}

/// Coerce a query reply. Same rules as an event value, minus the list case.
pub fn coerce_reply(raw: &str) -> Value {
    coerce_scalar(raw)
}

/// Coerce the value of an inbound event frame.
///
/// Only frames of type `"event"` are coerced; any other frame kind hands its
/// value over as raw text.
pub fn coerce_frame(frame: &EventFrame) -> Value {
    let raw = frame.raw_value();
    if frame.is_event() {
        coerce(&raw, ValueKind::from_wire(&frame.valuetype))
    } else {
        Value::Text(raw)
    }
}

fn coerce_scalar(raw: &str) -> Value {
    let lowered = raw.to_lowercase();
    match lowered.as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    match parse_number(&lowered) {
        Some(n) => Value::Number(n),
        None => Value::Text(lowered),
    }
}

// NaN and infinities are not readings; empty text is not zero.
fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_booleans_are_case_insensitive() {
        assert_eq!(coerce_reply("true"), Value::Bool(true));
        assert_eq!(coerce_reply("FALSE"), Value::Bool(false));
        assert_eq!(coerce_reply("True"), Value::Bool(true));
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn reply_numbers_parse() {
        assert_eq!(coerce_reply("3.14"), Value::Number(3.14));
        assert_eq!(coerce_reply("-7"), Value::Number(-7.0));
        assert_eq!(coerce_reply(" 42 "), Value::Number(42.0));
    }

    #[test]
    fn reply_text_is_lowercased() {
        assert_eq!(coerce_reply("hello"), Value::Text("hello".into()));
        assert_eq!(coerce_reply("Hello World"), Value::Text("hello world".into()));
    }

    #[test]
    fn reply_never_produces_a_list() {
        assert_eq!(coerce_reply("a,b"), Value::Text("a,b".into()));
    }

    #[test]
    fn non_finite_and_empty_stay_text() {
        assert_eq!(coerce_reply("NaN"), Value::Text("nan".into()));
        assert_eq!(coerce_reply("inf"), Value::Text("inf".into()));
        assert_eq!(coerce_reply(""), Value::Text(String::new()));
    }

    #[test]
    fn string_kind_passes_through() {
        assert_eq!(
            coerce("TRUE", ValueKind::Text),
            Value::Text("TRUE".into())
        );
    }

    #[test]
    fn list_kind_splits_without_coercing_items() {
        assert_eq!(
            coerce("1,True,x", ValueKind::List),
            Value::List(vec!["1".into(), "True".into(), "x".into()])
        );
    }

    #[test]
    fn frame_coercion_depends_on_type() {
        let frame = EventFrame {
            module: "buggy1".into(),
            source: "battery_value".into(),
            kind: "event".into(),
            valuetype: "int".into(),
            value: serde_json::Value::String("42".into()),
            ..Default::default()
        };
        assert_eq!(coerce_frame(&frame), Value::Number(42.0));

        let status = EventFrame {
            kind: "status".into(),
            ..frame
        };
        assert_eq!(coerce_frame(&status), Value::Text("42".into()));
    }
}
