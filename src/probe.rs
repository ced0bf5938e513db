//! HTTP probes against service health, readiness, liveness and metrics endpoints

use crate::errors::{FailureKind, MonitorError, Result};
use crate::exposition::{self, MetricSample};
use crate::registry::Service;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const HEALTHY: &str = "Healthy";
pub const UNHEALTHY: &str = "Unhealthy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Health,
    Ready,
    Live,
    Metrics,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 4] = [
        EndpointKind::Health,
        EndpointKind::Ready,
        EndpointKind::Live,
        EndpointKind::Metrics,
    ];

    /// Kinds that have their own status view
    pub const STATUS_VIEWS: [EndpointKind; 3] =
        [EndpointKind::Health, EndpointKind::Ready, EndpointKind::Live];

    pub fn path(self) -> &'static str {
        match self {
            EndpointKind::Health => "health",
            EndpointKind::Ready => "ready",
            EndpointKind::Live => "live",
            EndpointKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path())
    }
}

impl FromStr for EndpointKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('/');
        EndpointKind::ALL
            .into_iter()
            .find(|kind| kind.path().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| MonitorError::Parse(format!("unknown endpoint kind: {}", s)))
    }
}

/// Body of a `/health` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(default = "unknown_status")]
    pub status: String,

    #[serde(rename = "totalDuration", default)]
    pub total_duration: String,

    #[serde(default)]
    pub entries: HashMap<String, HealthEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    #[serde(default = "unknown_status")]
    pub status: String,
}

fn unknown_status() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeBody {
    Health(HealthReport),
    Text(String),
    Metrics(Vec<MetricSample>),
    Empty,
}

/// Normalized outcome of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub service: String,
    pub kind: EndpointKind,
    /// Status label; `Unhealthy` whenever the probe failed
    pub status: String,
    pub error: bool,
    pub failure: Option<FailureKind>,
    pub body: ProbeBody,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(
        service: impl Into<String>,
        kind: EndpointKind,
        status: impl Into<String>,
        body: ProbeBody,
    ) -> Self {
        Self {
            service: service.into(),
            kind,
            status: status.into(),
            error: false,
            failure: None,
            body,
            checked_at: Utc::now(),
        }
    }

    /// Degraded result for a probe that did not complete
    pub fn failed(service: impl Into<String>, kind: EndpointKind, failure: FailureKind) -> Self {
        Self {
            service: service.into(),
            kind,
            status: UNHEALTHY.to_string(),
            error: true,
            failure: Some(failure),
            body: ProbeBody::Empty,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.error && self.status.trim() == HEALTHY
    }

    pub fn health(&self) -> Option<&HealthReport> {
        match &self.body {
            ProbeBody::Health(report) => Some(report),
            _ => None,
        }
    }

    pub fn samples(&self) -> Option<&[MetricSample]> {
        match &self.body {
            ProbeBody::Metrics(samples) => Some(samples),
            _ => None,
        }
    }
}

/// Issues one request per call and never fails; failures are folded into the result
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn probe(&self, service: &Service, kind: EndpointKind) -> ProbeResult;
}

/// Probe backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(http_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("insightscope_collector/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self {
            client,
            timeout: http_timeout,
        })
    }

    /// Raw `/logs` dump, passed through untouched
    pub async fn fetch_logs(&self, service: &Service) -> Result<String> {
        self.fetch_text(&service.endpoint_url("logs")).await
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);

        let response = timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| MonitorError::Other(format!("Request to {} timed out", url)))?
            .map_err(MonitorError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Status {
                url: url.to_string(),
                code: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    async fn try_probe(&self, service: &Service, kind: EndpointKind) -> Result<ProbeResult> {
        let text = self.fetch_text(&service.endpoint_url(kind.path())).await?;

        let result = match kind {
            EndpointKind::Health => {
                let report: HealthReport = serde_json::from_str(&text)?;
                let status = report.status.clone();
                ProbeResult::success(&service.name, kind, status, ProbeBody::Health(report))
            }
            EndpointKind::Ready | EndpointKind::Live => {
                ProbeResult::success(&service.name, kind, text.clone(), ProbeBody::Text(text))
            }
            EndpointKind::Metrics => {
                let samples = exposition::parse(&text);
                ProbeResult::success(&service.name, kind, HEALTHY, ProbeBody::Metrics(samples))
            }
        };

        Ok(result)
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn probe(&self, service: &Service, kind: EndpointKind) -> ProbeResult {
        match self.try_probe(service, kind).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Probe of {} {} failed ({}): {}",
                    service.name,
                    kind,
                    e.kind(),
                    e
                );
                ProbeResult::failed(&service.name, kind, e.kind())
            }
        }
    }
}
