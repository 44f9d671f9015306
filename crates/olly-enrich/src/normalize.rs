//! Attribute normalization
//!
//! Overly specific values (paths with ids in them, odd HTTP methods) are
//! folded into templates before they reach the cardinality guard.

use regex::Regex;
use std::sync::LazyLock;

/// Attributes holding a URL path or full URL
pub const URL_ATTRIBUTES: &[&str] = &["http.route", "http.target", "url.path", "http.url", "url.full"];

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid uuid regex")
});

static NUMERIC_SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").expect("valid numeric regex"));

static HASH_SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{16,}$").expect("valid hash regex"));

static ULID_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-HJKMNP-TV-Z]{26}$").expect("valid ulid regex"));

static URL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<origin>[a-zA-Z][a-zA-Z0-9+.-]*://[^/?#]*)").expect("valid url regex"));

/// Template one path segment
fn template_segment(segment: &str) -> &str {
    if UUID_SEGMENT.is_match(segment) {
        "{uuid}"
    } else if NUMERIC_SEGMENT.is_match(segment) || ULID_SEGMENT.is_match(segment) {
        "{id}"
    } else if HASH_SEGMENT.is_match(segment) {
        "{hash}"
    } else {
        segment
    }
}

/// Strip query string and fragment, then template id-like path segments
///
/// Full URLs keep their scheme and authority.
pub fn normalize_url_path(value: &str) -> String {
    let without_query = value.split(['?', '#']).next().unwrap_or_default();

    let (origin, path) = match URL_PREFIX.captures(without_query).and_then(|c| c.name("origin")) {
        Some(m) => (m.as_str(), &without_query[m.end()..]),
        None => ("", without_query),
    };

    let templated: Vec<&str> = path.split('/').map(template_segment).collect();
    format!("{}{}", origin, templated.join("/"))
}

/// Uppercase known HTTP methods; anything else becomes `_OTHER`
pub fn normalize_method(value: &str) -> String {
    let upper = value.trim().to_ascii_uppercase();
    if KNOWN_METHODS.contains(&upper.as_str()) {
        upper
    } else {
        "_OTHER".to_string()
    }
}
