//! Error types for the status collector

use std::fmt;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug)]
pub enum MonitorError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed before a response arrived
    Http(reqwest::Error),

    /// JSON deserialization failed
    Json(serde_json::Error),

    /// Configuration or registry error
    Config(String),

    /// Remote endpoint answered with a non-2xx status
    Status { url: String, code: u16 },

    /// Body did not have the expected shape
    Parse(String),

    /// Exposition text was valid but held no sample for the metric
    NoMatchingMetric { metric: String },

    /// Generic error with message
    Other(String),
}

/// Coarse failure classes surfaced next to a degraded probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NetworkFailure,
    ParseFailure,
    NoMatchingMetric,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::NetworkFailure => write!(f, "network failure"),
            FailureKind::ParseFailure => write!(f, "parse failure"),
            FailureKind::NoMatchingMetric => write!(f, "no matching metric"),
        }
    }
}

impl MonitorError {
    /// Classify this error for per-service reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            MonitorError::Http(err) if err.is_decode() => FailureKind::ParseFailure,
            MonitorError::Io(_) | MonitorError::Http(_) | MonitorError::Status { .. } => {
                FailureKind::NetworkFailure
            }
            MonitorError::NoMatchingMetric { .. } => FailureKind::NoMatchingMetric,
            MonitorError::Json(_) | MonitorError::Parse(_) => FailureKind::ParseFailure,
            MonitorError::Config(_) | MonitorError::Other(_) => FailureKind::NetworkFailure,
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Io(err) => write!(f, "IO error: {}", err),
            MonitorError::Http(err) => write!(f, "HTTP error: {}", err),
            MonitorError::Json(err) => write!(f, "JSON error: {}", err),
            MonitorError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MonitorError::Status { url, code } => {
                write!(f, "Unexpected status {} from {}", code, url)
            }
            MonitorError::Parse(msg) => write!(f, "Parse error: {}", msg),
            MonitorError::NoMatchingMetric { metric } => {
                write!(f, "No sample matched metric {}", metric)
            }
            MonitorError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Io(err) => Some(err),
            MonitorError::Http(err) => Some(err),
            MonitorError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err)
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Http(err)
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Json(err)
    }
}
