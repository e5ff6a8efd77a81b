//! Turning operator-supplied addresses into absolute URLs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

static RE_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").unwrap());
static RE_PORT: Lazy<Regex> = Lazy::new(|| Regex::new(r":\d+$").unwrap());
static RE_IPV4: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").unwrap());

/// An agent address together with its normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let url = normalize(&address);
        Self { address, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Adds a scheme to addresses that lack one.
///
/// Local-looking hosts (explicit port, `localhost`, dotted IPv4) get `http://`,
/// everything else gets `https://`. Addresses that already carry a scheme are
/// returned as-is, so `normalize(normalize(x)) == normalize(x)`. Never fails:
/// a result that does not parse as a URL is still returned.
pub fn normalize(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.is_empty() || RE_SCHEME.is_match(trimmed) {
        return trimmed.to_string();
    }

    let host = trimmed
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_without_port = RE_PORT.replace(host, "");

    let is_local = RE_PORT.is_match(host)
        || host_without_port.eq_ignore_ascii_case("localhost")
        || RE_IPV4.is_match(&host_without_port);

    let candidate = if is_local {
        format!("http://{}", trimmed)
    } else {
        format!("https://{}", trimmed)
    };

    if let Err(e) = reqwest::Url::parse(&candidate) {
        debug!("Normalized address {} does not parse as a URL: {}", candidate, e);
    }

    candidate
}
