//! Metric anomaly detection
//!
//! Shared by timeline building and root-cause analysis so both agree on which
//! metric points count as anomalies.

use crate::telemetry::MetricPoint;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

/// Thresholds for flagging a metric point as anomalous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Producer anomaly score at or above which a point is anomalous
    pub score_threshold: f64,

    /// Relative deviation from baseline that counts as anomalous
    pub baseline_deviation: f64,

    /// Z-score threshold for series without a baseline
    pub z_threshold: f64,

    /// Minimum series length before z-scores are trusted
    pub min_series_len: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.7,
            baseline_deviation: 0.5,
            z_threshold: 3.0,
            min_series_len: 5,
        }
    }
}

impl AnomalyConfig {
    /// Point-local check using the producer score and baseline only
    pub fn is_point_anomalous(&self, point: &MetricPoint) -> bool {
        if let Some(score) = point.anomaly_score {
            if score >= self.score_threshold {
                return true;
            }
        }
        match point.baseline {
            Some(baseline) => (point.value - baseline).abs() > self.baseline_deviation * baseline.abs(),
            None => false,
        }
    }

    /// Flag every point, grouping points into series by (service, metric name)
    ///
    /// The returned vector is index-aligned with `points`.
    pub fn detect(&self, points: &[MetricPoint]) -> Vec<bool> {
        let mut flags: Vec<bool> = points.iter().map(|p| self.is_point_anomalous(p)).collect();

        let mut series: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
        for (idx, point) in points.iter().enumerate() {
            if point.baseline.is_none() {
                series
                    .entry((point.service.as_str(), point.name.as_str()))
                    .or_default()
                    .push(idx);
            }
        }

        for indices in series.values() {
            if indices.len() < self.min_series_len {
                continue;
            }
            let values: Vec<f64> = indices.iter().map(|&i| points[i].value).collect();
            let mean = values.as_slice().mean();
            let std_dev = values.as_slice().std_dev();
            if !std_dev.is_finite() || std_dev <= f64::EPSILON {
                continue;
            }
            for &i in indices {
                if ((points[i].value - mean) / std_dev).abs() >= self.z_threshold {
                    flags[i] = true;
                }
            }
        }

        flags
    }
}
