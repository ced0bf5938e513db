//! Prometheus text exposition parsing
//!
//! Parsing is line oriented and tolerant: comment lines, blank lines and
//! lines that do not scan as `name{labels} value [timestamp]` are skipped
//! without affecting their neighbours.

use crate::errors::{MonitorError, Result};
use std::collections::BTreeMap;

/// Request counter exposed by the monitored services
pub const REQUEST_COUNT_METRIC: &str = "http_request_duration_seconds_count";

/// Working set gauge exposed by the monitored services
pub const WORKING_SET_METRIC: &str = "process_working_set_bytes";

/// One sample line of an exposition blob
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Label text exactly as it appeared between the braces
    pub raw_labels: String,
    pub value: f64,
}

impl MetricSample {
    /// Fragment match against the raw label text.
    ///
    /// Looks for the literal `name="value"` anywhere inside the braces, so
    /// label order and extra labels do not matter.
    pub fn has_label(&self, name: &str, value: &str) -> bool {
        self.raw_labels.contains(&format!("{}=\"{}\"", name, value))
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Parse a whole exposition blob, dropping lines that do not scan
pub fn parse(text: &str) -> Vec<MetricSample> {
    text.lines().filter_map(parse_line).collect()
}

/// Parse a single line, `None` for comments, blanks and malformed input
pub fn parse_line(line: &str) -> Option<MetricSample> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_valid_metric_name(name) {
        return None;
    }

    let rest = &line[name_end..];
    let (raw_labels, rest) = match rest.strip_prefix('{') {
        Some(inner) => {
            let close = closing_brace(inner)?;
            (&inner[..close], &inner[close + 1..])
        }
        None => ("", rest),
    };

    // An optional timestamp may follow the value
    let value = rest.split_whitespace().next()?.parse::<f64>().ok()?;

    Some(MetricSample {
        name: name.to_string(),
        labels: parse_labels(raw_labels),
        raw_labels: raw_labels.to_string(),
        value,
    })
}

/// Value of the first sample named `metric` that satisfies `predicate`
pub fn find_value<F>(samples: &[MetricSample], metric: &str, predicate: F) -> Option<f64>
where
    F: Fn(&MetricSample) -> bool,
{
    samples
        .iter()
        .find(|sample| sample.name == metric && predicate(sample))
        .map(|sample| sample.value)
}

/// Value of the first sample named `metric`, regardless of labels
pub fn find_first(samples: &[MetricSample], metric: &str) -> Option<f64> {
    find_value(samples, metric, |_| true)
}

/// Like [`find_value`] but reports a missing sample as an error
pub fn require_value<F>(samples: &[MetricSample], metric: &str, predicate: F) -> Result<f64>
where
    F: Fn(&MetricSample) -> bool,
{
    find_value(samples, metric, predicate).ok_or_else(|| MonitorError::NoMatchingMetric {
        metric: metric.to_string(),
    })
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Index of the `}` closing the label set, ignoring braces inside quotes
fn closing_brace(inner: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, c) in inner.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes => return Some(idx),
            _ => {}
        }
    }

    None
}

/// Best-effort label map; stops at the first pair that does not scan
fn parse_labels(raw: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    let mut rest = raw;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if rest.is_empty() {
            break;
        }

        let Some((key, after_key)) = rest.split_once('=') else {
            break;
        };
        let Some(quoted) = after_key.trim_start().strip_prefix('"') else {
            break;
        };

        let mut value = String::new();
        let mut escaped = false;
        let mut end = None;
        for (idx, c) in quoted.char_indices() {
            if escaped {
                value.push(match c {
                    'n' => '\n',
                    other => other,
                });
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                end = Some(idx);
                break;
            } else {
                value.push(c);
            }
        }

        let Some(end) = end else {
            break;
        };

        labels.insert(key.trim().to_string(), value);
        rest = &quoted[end + 1..];
    }

    labels
}
