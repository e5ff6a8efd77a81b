//! Operator-supplied request contract that bypasses negotiation.

use crate::agent::RequestBody;
use crate::error::{EvalError, EvalResult};
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// `{{question}}`, `{{ question }}`, `${question}`, `{question}` and `$question`,
/// with `query`, `prompt`, `message` and `input` accepted as synonyms.
static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\{\{\s*(?:question|query|prompt|message|input)\s*\}\}|\$\{\s*(?:question|query|prompt|message|input)\s*\}|\{(?:question|query|prompt|message|input)\}|\$(?:question|query|prompt|message|input)\b",
    )
    .unwrap()
});

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEndpointConfig {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body_template: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_field: Option<String>,
}

impl CustomEndpointConfig {
    pub fn new(body_template: impl Into<String>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body_template: body_template.into(),
            method: default_method(),
            response_field: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_response_field(mut self, field: impl Into<String>) -> Self {
        self.response_field = Some(field.into());
        self
    }

    pub fn http_method(&self) -> EvalResult<Method> {
        let upper = self.method.trim().to_ascii_uppercase();
        if upper.is_empty() || !upper.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EvalError::InvalidMethod {
                method: self.method.clone(),
            });
        }
        Method::from_bytes(upper.as_bytes()).map_err(|_| EvalError::InvalidMethod {
            method: self.method.clone(),
        })
    }

    pub fn validate(&self) -> EvalResult<()> {
        self.http_method()?;

        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(EvalError::InvalidHeader {
                    header: format!("{}: {}", name, value),
                });
            }
        }

        if self.body_template.trim().is_empty() {
            return Err(EvalError::InvalidConfig {
                message: "Body template cannot be empty".to_string(),
            });
        }

        if !RE_PLACEHOLDER.is_match(&self.body_template) {
            warn!("Body template has no question placeholder; every prompt sends the same body");
        }

        if matches!(&self.response_field, Some(field) if field.trim().is_empty()) {
            return Err(EvalError::InvalidConfig {
                message: "Response field cannot be blank".to_string(),
            });
        }

        Ok(())
    }

    /// Substitutes `question` into the template.
    ///
    /// Placeholders inside a JSON string get the escaped question; bare
    /// placeholders get a JSON string literal, so the question is always sent
    /// as a string. If the result is not JSON the raw substitution is sent as
    /// text.
    pub fn render_body(&self, question: &str) -> RequestBody {
        let literal = serde_json::to_string(question).unwrap_or_else(|_| format!("\"{}\"", question));
        let escaped = &literal[1..literal.len() - 1];

        let candidate = substitute_json(&self.body_template, escaped, &literal);
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return RequestBody::Json(value);
        }

        debug!("Body template is not JSON after substitution, sending as text");
        RequestBody::Text(substitute(&self.body_template, question))
    }
}

fn substitute_json(template: &str, escaped: &str, literal: &str) -> String {
    let mut out = String::with_capacity(template.len() + literal.len());
    let mut last = 0;

    for found in RE_PLACEHOLDER.find_iter(template) {
        out.push_str(&template[last..found.start()]);
        if inside_json_string(&template[..found.start()]) {
            out.push_str(escaped);
        } else {
            out.push_str(literal);
        }
        last = found.end();
    }

    out.push_str(&template[last..]);
    out
}

/// Whether the end of `prefix` lies inside an open JSON string.
fn inside_json_string(prefix: &str) -> bool {
    let mut in_string = false;
    let mut escaped = false;

    for c in prefix.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ => {}
        }
    }

    in_string
}

fn substitute(template: &str, replacement: &str) -> String {
    RE_PLACEHOLDER
        .replace_all(template, NoExpand(replacement))
        .into_owned()
}

/// Parses `Name: value` pairs or JSON objects into a header map.
pub fn parse_headers<S: AsRef<str>>(inputs: &[S]) -> EvalResult<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();

    for input in inputs {
        let input = input.as_ref().trim();
        if input.starts_with('{') {
            let object: BTreeMap<String, Value> =
                serde_json::from_str(input).map_err(|_| EvalError::InvalidHeader {
                    header: input.to_string(),
                })?;
            for (name, value) in object {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                headers.insert(name, value);
            }
            continue;
        }

        let (name, value) = input.split_once(':').ok_or_else(|| EvalError::InvalidHeader {
            header: input.to_string(),
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EvalError::InvalidHeader {
                header: input.to_string(),
            });
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }

    Ok(headers)
}
