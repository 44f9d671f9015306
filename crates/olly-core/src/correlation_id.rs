//! Correlation identifiers
//!
//! A correlation id is a business-flow-scoped identifier with the format
//! `{prefix}-{base36 millis}-{8 hex}`. Ids coming from outside the pipeline
//! (baggage, headers, log bodies, API paths) are sanitized; ids the pipeline
//! produced itself are held to the strict format and rejected outright when
//! they are malformed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum accepted id length
pub const MAX_ID_LEN: usize = 100;

/// Prefix for ids this pipeline derives or generates
pub const DEFAULT_ID_PREFIX: &str = "olly";

/// Substrings that mark an id as an injection attempt (matched lowercase)
const INJECTION_MARKERS: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "--",
    ";",
    "'",
    "\"",
    "/*",
    "*/",
    "../",
    "..\\",
    "%00",
    "union select",
    "drop table",
    " or 1=1",
];

/// Why an id failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("correlation id is empty")]
    Empty,

    #[error("correlation id too long: {len} > {MAX_ID_LEN}")]
    TooLong { len: usize },

    #[error("correlation id contains a control character")]
    ControlCharacter,

    #[error("correlation id contains injection marker {marker:?}")]
    Injection { marker: &'static str },

    #[error("correlation id contains illegal character {ch:?}")]
    IllegalCharacter { ch: char },
}

/// Where an id came from, which decides how a bad id is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    /// Baggage, headers, log bodies, API input: sanitize on failure
    External,
    /// Produced by this pipeline: reject on failure
    Internal,
}

/// A validated correlation id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

/// Result of validating an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub id: CorrelationId,

    /// Set when the id only passed after sanitization
    pub sanitized_from: Option<ValidationError>,
}

impl CorrelationId {
    /// Strict parse; any defect is an error
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        check(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Strip everything outside `[a-zA-Z0-9_-]`, collapse dash runs and cap
    /// the length
    ///
    /// The result always passes [`CorrelationId::parse`]; word markers such
    /// as `union select` cannot survive because spaces are stripped.
    pub fn sanitize(raw: &str) -> Result<Self, ValidationError> {
        let mut cleaned = String::with_capacity(raw.len().min(MAX_ID_LEN));
        for c in raw.chars().filter(|c| is_id_char(*c)) {
            if c == '-' && cleaned.ends_with('-') {
                continue;
            }
            if cleaned.len() == MAX_ID_LEN {
                break;
            }
            cleaned.push(c);
        }
        check(&cleaned)?;
        Ok(Self(cleaned))
    }

    /// Build an id from its three segments
    pub fn compose(prefix: &str, millis: u64, suffix_hex: &str) -> Result<Self, ValidationError> {
        Self::parse(&format!("{}-{}-{}", prefix, to_base36(millis), suffix_hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key that identifies the business flow
    ///
    /// Ids this pipeline stamped with `prefix` in the
    /// `{prefix}-{base36}-{8 hex}` format lose their timestamp segment, so
    /// replicas that stamped the same trace at different instants still
    /// agree. Every other id is its own key.
    pub fn identity_key(&self, prefix: &str) -> String {
        identity_key(&self.0, prefix)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Validate an id according to where it came from
pub fn validate(raw: &str, source: IdSource) -> Result<Validated, ValidationError> {
    match check(raw) {
        Ok(()) => Ok(Validated {
            id: CorrelationId(raw.to_string()),
            sanitized_from: None,
        }),
        Err(e) => match source {
            IdSource::Internal => Err(e),
            IdSource::External => Ok(Validated {
                id: CorrelationId::sanitize(raw)?,
                sanitized_from: Some(e),
            }),
        },
    }
}

fn check(raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::Empty);
    }
    if raw.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong { len: raw.len() });
    }
    if raw.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacter);
    }

    let lower = raw.to_lowercase();
    if let Some(marker) = INJECTION_MARKERS.iter().find(|m| lower.contains(*m)) {
        return Err(ValidationError::Injection { marker });
    }

    if let Some(ch) = raw.chars().find(|c| !is_id_char(*c)) {
        return Err(ValidationError::IllegalCharacter { ch });
    }

    Ok(())
}

/// Identity key of a raw id string; see [`CorrelationId::identity_key`]
pub fn identity_key(raw: &str, prefix: &str) -> String {
    let mut parts = raw.rsplitn(3, '-');
    if let (Some(suffix), Some(ts), Some(head)) = (parts.next(), parts.next(), parts.next()) {
        let suffix_ok = suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_hexdigit());
        let ts_ok = !ts.is_empty() && ts.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase());
        if suffix_ok && ts_ok && !prefix.is_empty() && head == prefix {
            return format!("{}-{}", head, suffix);
        }
    }
    raw.to_string()
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Lowercase base36 rendering
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        check(&value)?;
        Ok(Self(value))
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}
