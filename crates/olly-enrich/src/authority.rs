//! Identifier authority
//!
//! Decides which correlation id a record belongs to. Resolution order:
//!
//! 1. an id the record already carries under the configured attribute
//! 2. the configured baggage member
//! 3. a known header name carried as an attribute (resource first)
//! 4. a JSON log body field
//! 5. derivation from the trace id
//! 6. random generation
//!
//! Derivation is a pure function of the trace id, so replicas that never talk
//! to each other agree on the id for every span of a trace.

use crate::clock::{Clock, SystemClock};
use olly_core::config::CorrelationSettings;
use olly_core::correlation_id::{validate, CorrelationId, IdSource, ValidationError};
use olly_core::telemetry::{Attributes, SignalKind, TelemetryRecord};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

/// Log body keys searched for an id, after the configured attribute name
const BODY_KEYS: &[&str] = &["correlation_id", "correlationId", "request_id", "requestId"];

/// Where a resolved id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Already present on the record
    Existing,
    Baggage,
    Header,
    Body,
    Derived,
    Generated,
}

/// A resolved id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: CorrelationId,
    pub provenance: Provenance,
    /// The carried value had to be sanitized
    pub sanitized: bool,
}

/// Outcome of resolving a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(Resolution),
    /// A pipeline-produced id failed validation and was discarded
    Rejected(ValidationError),
    /// Nothing to go on and generation is disabled
    Unresolved,
}

/// Explicit hints carried alongside a record
#[derive(Debug, Default)]
pub struct IdHints<'a> {
    /// W3C baggage header
    pub baggage: Option<&'a str>,
    /// Attribute maps in lookup order
    pub attributes: Vec<&'a Attributes>,
    /// Parsed JSON log body
    pub body: Option<serde_json::Map<String, serde_json::Value>>,
    /// Whether a random id may be generated
    pub allow_generate: bool,
}

/// Generates, derives and validates correlation ids
pub struct IdAuthority {
    settings: CorrelationSettings,
    clock: Arc<dyn Clock>,
}

impl IdAuthority {
    pub fn new(settings: CorrelationSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: CorrelationSettings, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    pub fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    /// Deterministic id for a trace
    pub fn derive(&self, trace_id: &str) -> Result<CorrelationId, ValidationError> {
        let digest = Sha256::digest(trace_id.as_bytes());
        let suffix = hex::encode(&digest[..4]);
        CorrelationId::compose(&self.settings.id_prefix, self.clock.now_millis(), &suffix)
    }

    /// Fresh random id
    pub fn generate(&self) -> Result<CorrelationId, ValidationError> {
        let random = uuid::Uuid::new_v4();
        let suffix = hex::encode(&random.as_bytes()[..4]);
        CorrelationId::compose(&self.settings.id_prefix, self.clock.now_millis(), &suffix)
    }

    /// Resolve the id for one record
    pub fn resolve(&self, record: &TelemetryRecord) -> ResolveOutcome {
        let body = match record {
            TelemetryRecord::Log(log) if self.settings.search_log_body => log.json_body(),
            _ => None,
        };

        // A point with no trace context would only get an id nothing else shares
        let allow_generate = record.kind() != SignalKind::Metric;

        let trace_id = record.trace_id().or_else(|| match record {
            TelemetryRecord::Metric(m) => m.exemplar.as_ref().map(|e| e.trace_id.as_str()),
            _ => None,
        });

        let hints = IdHints {
            baggage: record.baggage(),
            attributes: vec![record.resource(), record.attributes()],
            body,
            allow_generate,
        };

        self.derive_with_hints(trace_id, &hints)
    }

    /// Resolve from a trace id and explicit hints
    pub fn derive_with_hints(&self, trace_id: Option<&str>, hints: &IdHints<'_>) -> ResolveOutcome {
        let name = self.settings.attribute_name.as_str();

        for attrs in &hints.attributes {
            if let Some(raw) = attrs.get(name) {
                if let Some(resolution) = self.accept_external(raw, Provenance::Existing) {
                    return ResolveOutcome::Resolved(resolution);
                }
            }
        }

        if self.settings.extract_from_baggage {
            if let Some(raw) = hints.baggage.and_then(|b| baggage_member(b, &self.settings.baggage_key)) {
                if let Some(resolution) = self.accept_external(raw, Provenance::Baggage) {
                    return ResolveOutcome::Resolved(resolution);
                }
            }
        }

        for attrs in &hints.attributes {
            if let Some(raw) = self.header_value(attrs) {
                if let Some(resolution) = self.accept_external(raw, Provenance::Header) {
                    return ResolveOutcome::Resolved(resolution);
                }
            }
        }

        if let Some(body) = &hints.body {
            let found = std::iter::once(name)
                .chain(BODY_KEYS.iter().copied())
                .find_map(|key| body.get(key).and_then(|v| v.as_str()));
            if let Some(raw) = found {
                if let Some(resolution) = self.accept_external(raw, Provenance::Body) {
                    return ResolveOutcome::Resolved(resolution);
                }
            }
        }

        if self.settings.derive_from_trace_id {
            if let Some(trace_id) = trace_id.filter(|t| !t.is_empty()) {
                return self.accept_internal(self.derive(trace_id), Provenance::Derived);
            }
        }

        if self.settings.generate_if_missing && hints.allow_generate {
            return self.accept_internal(self.generate(), Provenance::Generated);
        }

        ResolveOutcome::Unresolved
    }

    fn header_value<'a>(&self, attrs: &'a Attributes) -> Option<&'a str> {
        self.settings.header_names.iter().find_map(|header| {
            let lower = header.to_lowercase();
            attrs
                .get(header)
                .or_else(|| attrs.get(&lower))
                .or_else(|| attrs.get(&format!("http.request.header.{}", lower)))
                .map(String::as_str)
        })
    }

    fn accept_external(&self, raw: &str, provenance: Provenance) -> Option<Resolution> {
        match validate(raw, IdSource::External) {
            Ok(validated) => {
                let sanitized = validated.sanitized_from.is_some();
                if let Some(reason) = &validated.sanitized_from {
                    warn!(
                        "Sanitized correlation id from {:?}: {} (now {})",
                        provenance, reason, validated.id
                    );
                }
                // A sanitized value is a new id, so it is written back
                let provenance = match (provenance, sanitized) {
                    (Provenance::Existing, true) => Provenance::Header,
                    (p, _) => p,
                };
                Some(Resolution {
                    id: validated.id,
                    provenance,
                    sanitized,
                })
            }
            Err(e) => {
                warn!("Discarding unusable correlation id from {:?}: {}", provenance, e);
                None
            }
        }
    }

    fn accept_internal(&self, result: Result<CorrelationId, ValidationError>, provenance: Provenance) -> ResolveOutcome {
        match result {
            Ok(id) => ResolveOutcome::Resolved(Resolution {
                id,
                provenance,
                sanitized: false,
            }),
            Err(e) => {
                warn!("Rejected malformed {:?} correlation id: {}", provenance, e);
                ResolveOutcome::Rejected(e)
            }
        }
    }
}

/// Extract one member from a W3C baggage header
///
/// Members are comma separated `key=value` pairs; properties after `;` are
/// ignored.
pub fn baggage_member<'a>(baggage: &'a str, key: &str) -> Option<&'a str> {
    baggage.split(',').find_map(|member| {
        let member = member.split(';').next()?.trim();
        let (k, v) = member.split_once('=')?;
        if k.trim() == key {
            Some(v.trim()).filter(|v| !v.is_empty())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use olly_core::telemetry::{LogRecord, MetricPoint, Severity, SpanRecord};

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()))
    }

    fn authority() -> IdAuthority {
        IdAuthority::with_clock(CorrelationSettings::default(), clock())
    }

    fn span() -> TelemetryRecord {
        let mut span = SpanRecord::new("checkout", "POST /cart", Utc::now());
        span.trace_id = Some(TRACE.to_string());
        span.into()
    }

    fn resolved(outcome: ResolveOutcome) -> Resolution {
        match outcome {
            ResolveOutcome::Resolved(r) => r,
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = authority().derive(TRACE).unwrap();
        let b = authority().derive(TRACE).unwrap();
        assert_eq!(a, b);

        let digest = Sha256::digest(TRACE.as_bytes());
        assert!(a.as_str().ends_with(&hex::encode(&digest[..4])));
        assert!(a.as_str().starts_with("olly-mjuohs00-"));

        let other = authority().derive("0af7651916cd43dd8448eb211c80319c").unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_derive_suffix_ignores_clock() {
        let clock = clock();
        let authority = IdAuthority::with_clock(CorrelationSettings::default(), clock.clone());
        let first = authority.derive(TRACE).unwrap();
        clock.advance(Duration::minutes(5));
        let later = authority.derive(TRACE).unwrap();
        assert_ne!(first, later);
        assert_eq!(first.identity_key("olly"), later.identity_key("olly"));
    }

    #[test]
    fn test_generate_format() {
        let id = authority().generate().unwrap();
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "olly");
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_baggage_wins_over_header_and_trace() {
        let mut record = span();
        if let TelemetryRecord::Span(s) = &mut record {
            s.baggage = Some("tenant=acme, correlation_id=order-778;prop=1".to_string());
            s.attributes.insert("X-Request-ID".into(), "req-1".into());
        }
        let r = resolved(authority().resolve(&record));
        assert_eq!(r.id.as_str(), "order-778");
        assert_eq!(r.provenance, Provenance::Baggage);
    }

    #[test]
    fn test_header_variants() {
        let authority = authority();
        for key in ["X-Correlation-ID", "x-correlation-id", "http.request.header.x-request-id"] {
            let mut record = span();
            record.attributes_mut().insert(key.into(), "flow-9".into());
            let r = resolved(authority.resolve(&record));
            assert_eq!(r.id.as_str(), "flow-9", "header key {}", key);
            assert_eq!(r.provenance, Provenance::Header);
        }
    }

    #[test]
    fn test_resource_checked_before_record() {
        let mut record = span();
        record.resource_mut().insert("request-id".into(), "from-resource".into());
        record.attributes_mut().insert("request-id".into(), "from-record".into());
        assert_eq!(resolved(authority().resolve(&record)).id.as_str(), "from-resource");
    }

    #[test]
    fn test_existing_id_kept() {
        let mut record = span();
        record
            .attributes_mut()
            .insert("correlation_id".into(), "olly-abc-12345678".into());
        let r = resolved(authority().resolve(&record));
        assert_eq!(r.provenance, Provenance::Existing);
        assert_eq!(r.id.as_str(), "olly-abc-12345678");
    }

    #[test]
    fn test_existing_id_with_injection_is_sanitized() {
        let mut record = span();
        record
            .attributes_mut()
            .insert("correlation_id".into(), "olly-1'; DROP TABLE logs;--".into());
        let r = resolved(authority().resolve(&record));
        assert!(r.sanitized);
        assert_eq!(r.provenance, Provenance::Header);
        assert_eq!(r.id.as_str(), "olly-1DROPTABLElogs-");
        assert!(CorrelationId::parse(r.id.as_str()).is_ok());
    }

    #[test]
    fn test_log_body_lookup() {
        let log = LogRecord::new(
            "orders",
            Severity::Info,
            r#"{"msg":"reserved","requestId":"req-5521"}"#,
            Utc::now(),
        );
        let r = resolved(authority().resolve(&log.into()));
        assert_eq!(r.id.as_str(), "req-5521");
        assert_eq!(r.provenance, Provenance::Body);
    }

    #[test]
    fn test_generate_for_untraced_log_but_not_metric() {
        let log = LogRecord::new("edge", Severity::Info, "hello", Utc::now());
        let r = resolved(authority().resolve(&log.into()));
        assert_eq!(r.provenance, Provenance::Generated);

        let point = MetricPoint::new("db", "db.pool.wait_ms", 4.0, Utc::now());
        assert_eq!(authority().resolve(&point.into()), ResolveOutcome::Unresolved);
    }

    #[test]
    fn test_bad_prefix_is_rejected_not_raised() {
        let settings = CorrelationSettings {
            id_prefix: "bad prefix".to_string(),
            ..Default::default()
        };
        let authority = IdAuthority::with_clock(settings, clock());
        assert!(matches!(authority.resolve(&span()), ResolveOutcome::Rejected(_)));
    }

    #[test]
    fn test_baggage_member() {
        assert_eq!(baggage_member("a=1,correlation_id=x-1", "correlation_id"), Some("x-1"));
        assert_eq!(baggage_member(" correlation_id = x-2 ;ttl=3", "correlation_id"), Some("x-2"));
        assert_eq!(baggage_member("correlation_id=", "correlation_id"), None);
        assert_eq!(baggage_member("other=1", "correlation_id"), None);
    }
}
