//! InsightScope status collector
//!
//! Polls a fixed set of services' health, readiness, liveness and metrics
//! endpoints, derives up/down status from their request counters and keeps a
//! rolling fifteen minute history per service and endpoint.

pub mod config;
pub mod derived;
pub mod errors;
pub mod exposition;
pub mod history;
pub mod liveness;
pub mod poller;
pub mod probe;
pub mod registry;

pub use config::Config;
pub use derived::DerivedMetrics;
pub use errors::{FailureKind, MonitorError, Result};
pub use exposition::{MetricSample, find_first, find_value};
pub use history::{HistoryKey, HistoryPoint, RollingHistoryStore};
pub use liveness::{LivenessRule, Status, evaluate_absolute, evaluate_delta};
pub use poller::{HistoryView, Poller};
pub use probe::{EndpointKind, EndpointProbe, HttpProbe, ProbeResult};
pub use registry::{Service, ServiceRegistry};
