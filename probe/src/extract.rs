//! Answer extraction from arbitrary agent responses.
//!
//! Extraction never fails: when no convention matches, the whole payload is
//! stringified and tagged [`ExtractionSource::Stringified`] so callers can tell
//! a real answer from a heuristic miss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Field names that commonly carry the answer, in priority order.
pub const ANSWER_FIELDS: &[&str] = &[
    "answer",
    "response",
    "message",
    "text",
    "result",
    "output",
    "content",
    "reply",
    "completion",
    "data",
    "generated_text",
    "output_text",
    "agent_response",
    "bot_response",
];

const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// The payload itself was a string.
    Verbatim,
    /// Found under a conventional field name.
    Field(String),
    /// Found by walking an explicit path.
    Path(String),
    /// `choices[0].message.content` or `choices[0].text`.
    Choices,
    /// Content of the last entry of `messages`.
    Messages,
    /// The only value of a single-key object.
    SingleKey(String),
    /// Nothing matched; the payload was serialized.
    Stringified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub text: String,
    pub source: ExtractionSource,
}

impl Extraction {
    fn new(text: impl Into<String>, source: ExtractionSource) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ExtractionSource::Stringified
    }

    /// Non-empty and not an empty JSON container.
    pub fn is_meaningful(&self) -> bool {
        let text = self.text.trim();
        !text.is_empty() && !matches!(text, "{}" | "[]" | "null" | "\"\"")
    }
}

struct Strategy {
    name: &'static str,
    apply: fn(&Map<String, Value>, usize) -> Option<Extraction>,
}

// Evaluated top to bottom; add a row to support a new convention.
const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "known-field",
        apply: known_field,
    },
    Strategy {
        name: "choices",
        apply: choices,
    },
    Strategy {
        name: "messages",
        apply: messages_tail,
    },
    Strategy {
        name: "single-key",
        apply: single_key,
    },
];

/// Convention-based extraction.
pub fn extract(payload: &Value) -> Extraction {
    extract_at_depth(payload, 0).unwrap_or_else(|| {
        debug!("No extraction strategy matched, stringifying payload");
        Extraction::new(stringify(payload), ExtractionSource::Stringified)
    })
}

/// Walks a dot/bracket `path` such as `data.choices[0].text`, falling back to
/// [`extract`] on the whole payload when a segment is missing.
pub fn extract_path(payload: &Value, path: &str) -> Extraction {
    match walk_path(payload, path) {
        Some(Value::Null) | None => {
            debug!("Path '{}' not found in response, using conventions", path);
            extract(payload)
        }
        Some(value) => Extraction::new(
            stringify(value),
            ExtractionSource::Path(path.to_string()),
        ),
    }
}

/// Decodes a response body as JSON, keeping non-JSON bodies as plain strings.
pub fn decode_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

fn walk_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = payload;

    for segment in normalized.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Array(items) if segment.chars().all(|c| c.is_ascii_digit()) => {
                items.get(segment.parse::<usize>().ok()?)?
            }
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }

    Some(current)
}

fn extract_at_depth(payload: &Value, depth: usize) -> Option<Extraction> {
    match payload {
        Value::String(s) => Some(Extraction::new(s.clone(), ExtractionSource::Verbatim)),
        Value::Object(map) if depth < MAX_DEPTH => STRATEGIES.iter().find_map(|strategy| {
            let found = (strategy.apply)(map, depth);
            if found.is_some() {
                debug!("Extraction strategy '{}' matched", strategy.name);
            }
            found
        }),
        _ => None,
    }
}

/// Scalars are rendered and tagged `source`. Nested objects are searched
/// recursively; arrays are serialized and count as a fallback.
fn value_extraction(value: &Value, depth: usize, source: ExtractionSource) -> Option<Extraction> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Extraction::new(s.clone(), source)),
        Value::Bool(_) | Value::Number(_) => Some(Extraction::new(value.to_string(), source)),
        Value::Object(_) => extract_at_depth(value, depth + 1).map(|inner| {
            if inner.is_fallback() {
                inner
            } else {
                Extraction::new(inner.text, source)
            }
        }),
        Value::Array(_) => Some(Extraction::new(
            stringify(value),
            ExtractionSource::Stringified,
        )),
    }
}

fn known_field(map: &Map<String, Value>, depth: usize) -> Option<Extraction> {
    ANSWER_FIELDS.iter().find_map(|field| {
        let source = ExtractionSource::Field((*field).to_string());
        value_extraction(map.get(*field)?, depth, source)
    })
}

fn choices(map: &Map<String, Value>, _depth: usize) -> Option<Extraction> {
    let first = map.get("choices")?.as_array()?.first()?;
    let text = first
        .pointer("/message/content")
        .and_then(Value::as_str)
        .or_else(|| first.get("text").and_then(Value::as_str))?;
    Some(Extraction::new(text, ExtractionSource::Choices))
}

fn messages_tail(map: &Map<String, Value>, _depth: usize) -> Option<Extraction> {
    let last = map.get("messages")?.as_array()?.last()?;
    let text = match last {
        Value::String(s) => s.as_str(),
        other => other.get("content")?.as_str()?,
    };
    Some(Extraction::new(text, ExtractionSource::Messages))
}

fn single_key(map: &Map<String, Value>, depth: usize) -> Option<Extraction> {
    if map.len() != 1 {
        return None;
    }
    let (key, value) = map.iter().next()?;
    match value {
        Value::Object(_) | Value::Array(_) => None,
        scalar => value_extraction(scalar, depth, ExtractionSource::SingleKey(key.clone())),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}
