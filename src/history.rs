//! Rolling per-service status history

use crate::errors::FailureKind;
use crate::liveness::Status;
use crate::probe::EndpointKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Retention of every history window
pub const WINDOW: Duration = Duration::from_secs(15 * 60);

const WINDOW_MS: i64 = WINDOW.as_millis() as i64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub service: String,
    pub kind: EndpointKind,
}

impl HistoryKey {
    pub fn new(service: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            service: service.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub status: Status,
    /// Raw counter value at sample time, `None` when unavailable
    pub count: Option<f64>,
}

impl HistoryPoint {
    pub fn new(timestamp: i64, status: Status, count: Option<f64>) -> Self {
        Self {
            timestamp,
            status,
            count,
        }
    }
}

/// One service's result within a tick
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub service: String,
    /// Counter read from the scrape; becomes the next tick's previous value
    pub count: Option<f64>,
    /// Count stored on the history point
    pub recorded_count: Option<f64>,
    pub status: Status,
    pub failure: Option<FailureKind>,
}

impl Observation {
    pub fn error(&self) -> bool {
        self.failure.is_some()
    }
}

/// Everything a tick learned, applied in one step
#[derive(Debug, Clone)]
pub struct TickCommit {
    pub kind: EndpointKind,
    pub timestamp: i64,
    pub observations: Vec<Observation>,
}

/// Windows and last counter values keyed by `(service, endpoint kind)`.
///
/// Windows are append-only and pruned to [`WINDOW`] on every append.
/// Points are kept in insertion order; duplicates are allowed.
#[derive(Debug, Default)]
pub struct RollingHistoryStore {
    windows: HashMap<HistoryKey, VecDeque<HistoryPoint>>,
    last_counts: HashMap<HistoryKey, f64>,
}

impl RollingHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point, then prune the window relative to the point's timestamp
    pub fn append(&mut self, key: HistoryKey, point: HistoryPoint) {
        let now = point.timestamp;
        let window = self.windows.entry(key).or_default();
        window.push_back(point);
        prune_window(window, now);
    }

    /// Read-only copy of a window, in insertion order
    pub fn snapshot(&self, service: &str, kind: EndpointKind) -> Vec<HistoryPoint> {
        self.windows
            .get(&HistoryKey::new(service, kind))
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every point older than the window, across all keys
    pub fn prune(&mut self, now: i64) {
        for window in self.windows.values_mut() {
            prune_window(window, now);
        }
    }

    pub fn last_count(&self, service: &str, kind: EndpointKind) -> Option<f64> {
        self.last_counts.get(&HistoryKey::new(service, kind)).copied()
    }

    /// Overwrite the last counter value; `None` forgets it
    pub fn set_last_count(&mut self, key: HistoryKey, count: Option<f64>) {
        match count {
            Some(count) => {
                self.last_counts.insert(key, count);
            }
            None => {
                self.last_counts.remove(&key);
            }
        }
    }

    /// Last counter values for one endpoint kind, taken at tick start
    pub fn previous_counts(&self, kind: EndpointKind) -> HashMap<String, f64> {
        self.last_counts
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(key, count)| (key.service.clone(), *count))
            .collect()
    }

    /// Apply a whole tick: one history point and one counter overwrite per service
    pub fn commit(&mut self, tick: TickCommit) {
        debug!(
            "Committing {} observations for {} at {}",
            tick.observations.len(),
            tick.kind,
            tick.timestamp
        );

        for observation in tick.observations {
            let key = HistoryKey::new(observation.service, tick.kind);
            self.set_last_count(key.clone(), observation.count);
            self.append(
                key,
                HistoryPoint::new(tick.timestamp, observation.status, observation.recorded_count),
            );
        }
    }

    /// Share of points in the window that are up, as a percentage
    pub fn uptime_percent(&self, service: &str, kind: EndpointKind) -> Option<f64> {
        let window = self.windows.get(&HistoryKey::new(service, kind))?;
        if window.is_empty() {
            return None;
        }

        let up = window.iter().filter(|p| p.status.is_up()).count();
        Some(up as f64 / window.len() as f64 * 100.0)
    }

    /// Number of points held across every window
    pub fn total_points(&self) -> usize {
        self.windows.values().map(VecDeque::len).sum()
    }
}

fn prune_window(window: &mut VecDeque<HistoryPoint>, now: i64) {
    let cutoff = now - WINDOW_MS;
    window.retain(|point| point.timestamp >= cutoff);
}
