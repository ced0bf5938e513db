//! Configuration management for the status collector

use crate::errors::{MonitorError, Result};
use crate::registry::ServiceRegistry;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JSON file listing the monitored services
    pub services_file: Option<PathBuf>,

    /// Inline `name=url,name=url` list, used when no file is given
    pub services: Option<String>,

    /// HTTP timeout for every probe
    pub http_timeout: Duration,

    /// Poll interval of the health/ready/live views
    pub status_poll_interval: Duration,

    /// Poll interval of the metrics detail view
    pub metrics_poll_interval: Duration,

    /// Poll interval of the background aggregate history
    pub history_poll_interval: Duration,

    /// Service shown by the metrics detail view
    pub selected_service: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services_file: None,
            services: None,
            http_timeout: Duration::from_secs(10),
            status_poll_interval: Duration::from_secs(30),
            metrics_poll_interval: Duration::from_secs(5),
            history_poll_interval: Duration::from_secs(60),
            selected_service: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from any variable lookup
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("SERVICES_FILE") {
            config.services_file = Some(PathBuf::from(path));
        }

        if let Some(services) = lookup("SERVICES") {
            config.services = Some(services);
        }

        if let Some(seconds) = lookup("HTTP_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            config.http_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = lookup("STATUS_POLL_SECONDS").and_then(|v| v.parse().ok()) {
            config.status_poll_interval = Duration::from_secs(seconds);
        }

        if let Some(seconds) = lookup("METRICS_POLL_SECONDS").and_then(|v| v.parse().ok()) {
            config.metrics_poll_interval = Duration::from_secs(seconds);
        }

        if let Some(seconds) = lookup("HISTORY_POLL_SECONDS").and_then(|v| v.parse().ok()) {
            config.history_poll_interval = Duration::from_secs(seconds);
        }

        if let Some(name) = lookup("SELECTED_SERVICE") {
            config.selected_service = Some(name);
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.services_file.is_none() && self.services.is_none() {
            return Err("either SERVICES_FILE or SERVICES must be set".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        for (name, interval) in [
            ("status_poll_interval", self.status_poll_interval),
            ("metrics_poll_interval", self.metrics_poll_interval),
            ("history_poll_interval", self.history_poll_interval),
        ] {
            if interval.is_zero() {
                return Err(format!("{} must be greater than 0", name));
            }
        }

        Ok(())
    }

    /// Build the service registry this configuration points at
    pub fn load_registry(&self) -> Result<ServiceRegistry> {
        if let Some(path) = &self.services_file {
            return ServiceRegistry::from_json_file(path);
        }

        match &self.services {
            Some(inline) => ServiceRegistry::from_inline(inline),
            None => Err(MonitorError::Config("no services configured".to_string())),
        }
    }
}
