//! Context assembly
//!
//! Turns the three per-signal result sets into a `CorrelatedContext`: merged
//! timeline, service dependency edges, summary counts and root span.

use chrono::{DateTime, Utc};
use olly_core::anomaly::AnomalyConfig;
use olly_core::context::{
    ContextSummary, CorrelatedContext, ServiceDependencyEdge, TimeRange, TimelineEvent,
    TimelineEventKind,
};
use olly_core::telemetry::{LogRecord, MetricPoint, SpanRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Longest log body kept in a timeline description
const MAX_DESCRIPTION_CHARS: usize = 200;

/// Build the full context for one correlation id
pub fn build_context(
    correlation_id: &str,
    spans: Vec<SpanRecord>,
    logs: Vec<LogRecord>,
    metrics: Vec<MetricPoint>,
    anomaly: &AnomalyConfig,
) -> CorrelatedContext {
    let anomalies = anomaly.detect(&metrics);
    let timeline = build_timeline(&spans, &logs, &metrics, &anomalies);
    let dependencies = build_dependencies(&spans);
    let time_range = time_range(&spans, &logs, &metrics);

    let services: BTreeSet<&str> = spans
        .iter()
        .map(|s| s.service.as_str())
        .chain(logs.iter().map(|l| l.service.as_str()))
        .chain(metrics.iter().map(|m| m.service.as_str()))
        .collect();

    let error_count =
        spans.iter().filter(|s| s.is_error()).count() + logs.iter().filter(|l| l.is_error()).count();

    let summary = ContextSummary {
        total_spans: spans.len(),
        total_logs: logs.len(),
        total_metrics: metrics.len(),
        error_count,
        anomaly_count: anomalies.iter().filter(|a| **a).count(),
        service_count: services.len(),
        services: services.iter().map(|s| s.to_string()).collect(),
        duration_ms: event_span_ms(&timeline),
        has_errors: error_count > 0,
    };

    let root = root_span(&spans);
    let root_service = root.map(|s| s.service.clone());
    let root_operation = root.map(|s| s.name.clone());

    CorrelatedContext {
        correlation_id: correlation_id.to_string(),
        time_range,
        summary,
        timeline,
        dependencies,
        root_service,
        root_operation,
        spans,
        logs,
        metrics,
        warnings: Vec::new(),
        partial: false,
    }
}

/// Merge all signals into one list, ascending by timestamp
///
/// The sort is stable, so events sharing a timestamp keep span, log, metric
/// order.
pub fn build_timeline(
    spans: &[SpanRecord],
    logs: &[LogRecord],
    metrics: &[MetricPoint],
    anomalies: &[bool],
) -> Vec<TimelineEvent> {
    let mut events = Vec::with_capacity(spans.len() + logs.len());

    for span in spans {
        events.push(TimelineEvent {
            timestamp: span.timestamp,
            kind: TimelineEventKind::Span,
            service: span.service.clone(),
            description: match &span.status_message {
                Some(msg) if span.is_error() => format!("{} failed: {}", span.name, msg),
                _ => span.name.clone(),
            },
            duration_ms: Some(span.duration_ms),
            is_error: span.is_error(),
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            metric: None,
        });
    }

    for log in logs {
        events.push(TimelineEvent {
            timestamp: log.timestamp,
            kind: TimelineEventKind::Log,
            service: log.service.clone(),
            description: format!("[{}] {}", log.severity.as_str(), truncate(&log.body)),
            duration_ms: None,
            is_error: log.is_error(),
            trace_id: log.trace_id.clone(),
            span_id: log.span_id.clone(),
            metric: None,
        });
    }

    for (point, _) in metrics.iter().zip(anomalies).filter(|(_, a)| **a) {
        let description = match point.baseline {
            Some(baseline) => format!("{} = {} (baseline {})", point.name, point.value, baseline),
            None => format!("{} = {}", point.name, point.value),
        };
        events.push(TimelineEvent {
            timestamp: point.timestamp,
            kind: TimelineEventKind::MetricAnomaly,
            service: point.service.clone(),
            description,
            duration_ms: None,
            is_error: false,
            trace_id: point.trace_id.clone(),
            span_id: point.span_id.clone(),
            metric: Some(point.name.clone()),
        });
    }

    events.sort_by_key(|e| e.timestamp);
    events
}

/// Cross-service edges from parent/child span pairs
pub fn build_dependencies(spans: &[SpanRecord]) -> Vec<ServiceDependencyEdge> {
    let by_id: HashMap<&str, &SpanRecord> = spans
        .iter()
        .filter_map(|s| s.span_id.as_deref().map(|id| (id, s)))
        .collect();

    #[derive(Default)]
    struct EdgeAcc {
        count: u64,
        errors: u64,
        latency_ms: f64,
    }

    let mut edges: BTreeMap<(&str, &str), EdgeAcc> = BTreeMap::new();
    for child in spans {
        let Some(parent) = child.parent_span_id.as_deref().and_then(|p| by_id.get(p)) else {
            continue;
        };
        if parent.service == child.service {
            continue;
        }
        let acc = edges
            .entry((parent.service.as_str(), child.service.as_str()))
            .or_default();
        acc.count += 1;
        acc.latency_ms += child.duration_ms;
        if child.is_error() {
            acc.errors += 1;
        }
    }

    edges
        .into_iter()
        .map(|((source, target), acc)| ServiceDependencyEdge {
            source: source.to_string(),
            target: target.to_string(),
            request_count: acc.count,
            error_rate: acc.errors as f64 / acc.count as f64,
            avg_latency_ms: acc.latency_ms / acc.count as f64,
        })
        .collect()
}

/// Earliest span whose parent is not part of the context
fn root_span(spans: &[SpanRecord]) -> Option<&SpanRecord> {
    let ids: BTreeSet<&str> = spans.iter().filter_map(|s| s.span_id.as_deref()).collect();
    spans
        .iter()
        .filter(|s| s.parent_span_id.as_deref().map_or(true, |p| !ids.contains(p)))
        .min_by_key(|s| s.timestamp)
        .or_else(|| spans.iter().min_by_key(|s| s.timestamp))
}

/// Last timeline event minus first; the timeline is already sorted
fn event_span_ms(timeline: &[TimelineEvent]) -> f64 {
    match (timeline.first(), timeline.last()) {
        (Some(first), Some(last)) => {
            (last.timestamp - first.timestamp).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0
        }
        _ => 0.0,
    }
}

/// First record start to last record end
fn time_range(spans: &[SpanRecord], logs: &[LogRecord], metrics: &[MetricPoint]) -> TimeRange {
    let starts = spans
        .iter()
        .map(|s| s.timestamp)
        .chain(logs.iter().map(|l| l.timestamp))
        .chain(metrics.iter().map(|m| m.timestamp));
    let ends = spans
        .iter()
        .map(SpanRecord::end_time)
        .chain(logs.iter().map(|l| l.timestamp))
        .chain(metrics.iter().map(|m| m.timestamp));

    let start: Option<DateTime<Utc>> = starts.min();
    let end: Option<DateTime<Utc>> = ends.max();
    match (start, end) {
        (Some(start), Some(end)) => TimeRange::new(start, end),
        _ => {
            let now = Utc::now();
            TimeRange::new(now, now)
        }
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_DESCRIPTION_CHARS {
        trimmed.to_string()
    } else {
        let mut out: String = trimmed.chars().take(MAX_DESCRIPTION_CHARS).collect();
        out.push_str("...");
        out
    }
}
