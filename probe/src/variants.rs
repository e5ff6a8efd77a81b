//! Candidate request bodies for endpoints with an unknown contract.
//!
//! The catalogue is ordered from specific to generic: a loosely-parsing server
//! is more likely to accept (and misread) a generic shape, so those come last.

use serde::Serialize;
use serde_json::{json, Value};

/// Keys tried one at a time after the richer shapes.
pub const SINGLE_KEYS: &[&str] = &[
    "query",
    "question",
    "prompt",
    "input",
    "text",
    "user_message",
    "data",
    "content",
];

/// Number of variants produced by [`generate`].
pub const VARIANT_COUNT: usize = 4 + SINGLE_KEYS.len() + 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadVariant {
    pub label: String,
    pub body: Value,
}

impl PayloadVariant {
    fn new(label: impl Into<String>, body: Value) -> Self {
        Self {
            label: label.into(),
            body,
        }
    }
}

/// Builds the ordered variant catalogue for `question`. Pure and deterministic.
pub fn generate(question: &str) -> Vec<PayloadVariant> {
    let mut variants = Vec::with_capacity(VARIANT_COUNT);

    variants.push(PayloadVariant::new(
        "chat-messages",
        json!({ "messages": [{ "role": "user", "content": question }] }),
    ));
    variants.push(PayloadVariant::new("message", json!({ "message": question })));
    variants.push(PayloadVariant::new("inputs", json!({ "inputs": question })));
    variants.push(PayloadVariant::new(
        "synonyms",
        json!({
            "query": question,
            "question": question,
            "prompt": question,
            "input": question,
        }),
    ));

    for key in SINGLE_KEYS {
        let mut body = serde_json::Map::new();
        body.insert((*key).to_string(), Value::String(question.to_string()));
        variants.push(PayloadVariant::new(*key, Value::Object(body)));
    }

    variants.push(PayloadVariant::new(
        "raw-string",
        Value::String(question.to_string()),
    ));

    variants
}

/// Renders variant `index` as a body template with `placeholder` in place of the question.
pub fn template_for(index: usize, placeholder: &str) -> Option<String> {
    generate(placeholder)
        .into_iter()
        .nth(index)
        .map(|variant| variant.body.to_string())
}
