//! Static registry of monitored services

use crate::errors::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A remote service whose endpoints are polled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,

    #[serde(rename = "url", alias = "baseUrl", alias = "base_url")]
    pub base_url: String,
}

impl Service {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    /// Full URL for an endpoint path on this service
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// Ordered, immutable list of services, loaded once at startup
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl ServiceRegistry {
    /// Build a registry, rejecting empty lists and duplicate names
    pub fn new(services: Vec<Service>) -> Result<Self> {
        if services.is_empty() {
            return Err(MonitorError::Config(
                "at least one service must be registered".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for service in &services {
            if service.name.trim().is_empty() {
                return Err(MonitorError::Config("service name cannot be empty".to_string()));
            }
            if service.base_url.trim().is_empty() {
                return Err(MonitorError::Config(format!(
                    "service {} has an empty url",
                    service.name
                )));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(MonitorError::Config(format!(
                    "service {} is registered twice",
                    service.name
                )));
            }
        }

        Ok(Self { services })
    }

    /// Load a JSON array of `{"name", "url"}` objects
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let services: Vec<Service> = serde_json::from_str(&raw)?;
        Self::new(services)
    }

    /// Parse an inline `name=url,name=url` list
    pub fn from_inline(list: &str) -> Result<Self> {
        let mut services = Vec::new();

        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, url) = entry.split_once('=').ok_or_else(|| {
                MonitorError::Config(format!("expected name=url, got {}", entry))
            })?;
            services.push(Service::new(name.trim(), url.trim()));
        }

        Self::new(services)
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn first(&self) -> Option<&Service> {
        self.services.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
