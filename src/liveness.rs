//! Up/down derivation from request counters
//!
//! Two rules are in use. The status views treat any nonzero success count
//! as up ([`LivenessRule::Absolute`]); the background history only counts
//! a service as up when its counter advanced since the previous poll
//! ([`LivenessRule::Delta`]).

use crate::exposition::{MetricSample, REQUEST_COUNT_METRIC, require_value};
use crate::probe::EndpointKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Binary liveness, serialized as `0` or `1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Down,
    Up,
}

impl Status {
    pub fn as_u8(self) -> u8 {
        match self {
            Status::Down => 0,
            Status::Up => 1,
        }
    }

    pub fn is_up(self) -> bool {
        self == Status::Up
    }
}

impl From<bool> for Status {
    fn from(up: bool) -> Self {
        if up { Status::Up } else { Status::Down }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Status::Down),
            1 => Ok(Status::Up),
            other => Err(serde::de::Error::custom(format!(
                "status must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessRule {
    /// Up when the current count is nonzero
    Absolute,
    /// Up when the count strictly increased since the previous observation
    Delta,
}

impl LivenessRule {
    pub fn evaluate(self, previous: Option<f64>, current: Option<f64>) -> Status {
        match self {
            LivenessRule::Absolute => evaluate_absolute(current),
            LivenessRule::Delta => evaluate_delta(previous, current),
        }
    }

    /// Count written to the history point. Absolute views record a missing
    /// count as zero; delta history keeps it unknown.
    pub fn recorded_count(self, current: Option<f64>) -> Option<f64> {
        match self {
            LivenessRule::Absolute => Some(current.unwrap_or(0.0)),
            LivenessRule::Delta => current,
        }
    }
}

/// Up iff both observations exist and the counter moved forward.
///
/// A first observation, an unchanged counter and a reset all read as down.
pub fn evaluate_delta(previous: Option<f64>, current: Option<f64>) -> Status {
    match (previous, current) {
        (Some(previous), Some(current)) => Status::from(current > previous),
        _ => Status::Down,
    }
}

pub fn evaluate_absolute(current: Option<f64>) -> Status {
    Status::from(current.is_some_and(|count| count > 0.0))
}

/// Successful request count for one endpoint, taken from a `/metrics` scrape
pub fn endpoint_success_count(samples: &[MetricSample], kind: EndpointKind) -> Option<f64> {
    require_endpoint_success_count(samples, kind).ok()
}

/// Like [`endpoint_success_count`], failing with `NoMatchingMetric` when absent
pub fn require_endpoint_success_count(
    samples: &[MetricSample],
    kind: EndpointKind,
) -> crate::errors::Result<f64> {
    let endpoint = format!("/{}", kind.path());
    require_value(samples, REQUEST_COUNT_METRIC, |s| {
        s.has_label("endpoint", &endpoint) && s.has_label("code", "200")
    })
}
