//! Maps one complete frame to the semantic events it carries.

use serde_json::{Map, Value};
use tracing::debug;

use crate::decoder::Frame;
use crate::errors::{GENERIC_PRODUCER_ERROR, ParseError};
use crate::model::Source;

/// Prefix of every meaningful frame.
pub const DATA_PREFIX: &str = "data: ";
/// Payload that marks the end of the answer stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One semantic update decoded from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Append-only fragment of the answer text.
    AnswerDelta { text: String },
    /// Full replacement of the source list.
    SourcesUpdate { sources: Vec<Source> },
    /// Replacement HTML for the out-of-band query-count element.
    QueryStringUpdate { html: String },
    /// The producer reported a failure; nothing else from the frame applies.
    Error { message: String },
    /// Explicit end of stream.
    Done,
}

/// Interprets a frame.
///
/// Frames without the `data: ` prefix (keep-alives, comments, blank frames)
/// and empty payloads yield no events. Only a payload that is not valid JSON
/// is an error; fields of an unexpected type are skipped. Events of a
/// multi-update frame come out in a fixed order: error (alone), answer,
/// sources, query string.
pub fn interpret(frame: &Frame) -> Result<Vec<Event>, ParseError> {
    let Some(raw) = frame.as_str().strip_prefix(DATA_PREFIX) else {
        if !frame.as_str().is_empty() {
            debug!(len = frame.as_str().len(), "ignoring non-data frame");
        }
        return Ok(Vec::new());
    };
    let payload = raw.trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    if payload == DONE_SENTINEL {
        return Ok(vec![Event::Done]);
    }

    let value: Value = serde_json::from_str(payload)
        .map_err(|e| ParseError::new(format!("invalid JSON: {e}"), payload))?;
    match value {
        Value::Object(fields) => Ok(payload_events(&fields)),
        _ => {
            debug!("ignoring non-object data payload");
            Ok(Vec::new())
        }
    }
}

fn payload_events(fields: &Map<String, Value>) -> Vec<Event> {
    if fields.get("error").is_some_and(is_truthy) {
        let message = fields
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(GENERIC_PRODUCER_ERROR)
            .to_string();
        return vec![Event::Error { message }];
    }

    let mut events = Vec::with_capacity(3);
    if let Some(text) = non_empty_str(fields, "answer") {
        events.push(Event::AnswerDelta {
            text: text.to_string(),
        });
    }
    match fields.get("sources") {
        Some(Value::Array(items)) => events.push(Event::SourcesUpdate {
            sources: items.iter().filter_map(source_from).collect(),
        }),
        Some(Value::Null) | None => {}
        Some(other) => debug!(kind = json_kind(other), "skipping non-array sources"),
    }
    if let Some(html) = non_empty_str(fields, "updated_query_string") {
        events.push(Event::QueryStringUpdate {
            html: html.to_string(),
        });
    }
    events
}

fn non_empty_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    match fields.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.as_str()),
        Value::String(_) | Value::Null => None,
        other => {
            debug!(field = key, kind = json_kind(other), "skipping mistyped field");
            None
        }
    }
}

/// Entries that are not objects are dropped; missing or non-string
/// `title`/`url` become empty strings.
fn source_from(item: &Value) -> Option<Source> {
    let entry = item.as_object()?;
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Some(Source {
        title: text("title"),
        url: text("url"),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
