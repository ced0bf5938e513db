//! Request, failure and memory figures derived from one scrape

use crate::exposition::{
    MetricSample, REQUEST_COUNT_METRIC, WORKING_SET_METRIC, find_first, find_value,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Figures shown by the metrics detail view; recomputed on every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub requests_per_second: Option<f64>,
    pub failure_rate_percent: Option<f64>,
    #[serde(rename = "memoryMB")]
    pub memory_mb: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl DerivedMetrics {
    /// Compute from a successfully parsed scrape
    pub fn from_samples(samples: &[MetricSample], now: DateTime<Utc>) -> Self {
        let total = find_first(samples, REQUEST_COUNT_METRIC);
        let client_errors = find_value(samples, REQUEST_COUNT_METRIC, |s| {
            s.has_label("code", "404") || s.has_label("code", "400")
        });
        let server_errors =
            find_value(samples, REQUEST_COUNT_METRIC, |s| s.has_label("code", "500"));
        let memory_bytes = find_first(samples, WORKING_SET_METRIC);

        let failure_count = client_errors.unwrap_or(0.0) + server_errors.unwrap_or(0.0);
        let failure_rate = match total {
            Some(total) if total > 0.0 => failure_count / total * 100.0,
            _ => 0.0,
        };

        Self {
            requests_per_second: Some(total.unwrap_or(0.0)),
            failure_rate_percent: Some(failure_rate),
            // A zero working set is reported as unknown
            memory_mb: memory_bytes
                .filter(|bytes| *bytes != 0.0)
                .map(|bytes| bytes / BYTES_PER_MB),
            last_updated: now,
        }
    }

    /// Degraded figures for a scrape that failed
    pub fn unavailable(now: DateTime<Utc>) -> Self {
        Self {
            requests_per_second: None,
            failure_rate_percent: None,
            memory_mb: None,
            last_updated: now,
        }
    }
}
