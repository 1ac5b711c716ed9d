//! Health registry queried by health probes

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Key used by probes that do not name a service
pub const OVERALL: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Serving,
    NotServing,
}

impl HealthStatus {
    pub fn is_serving(self) -> bool {
        self == HealthStatus::Serving
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Serving => "SERVING",
            HealthStatus::NotServing => "NOT_SERVING",
        };
        f.write_str(s)
    }
}

/// Service name -> status. Written at lifecycle transitions, read on every probe.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the status for `service` (empty = overall)
    pub fn set(&self, service: &str, status: HealthStatus) {
        let previous = self.statuses.write().insert(service.to_string(), status);
        if previous != Some(status) {
            tracing::debug!(service = %display_name(service), %status, "health status updated");
        }
    }

    /// Status for `service`, UNKNOWN if never set
    pub fn get(&self, service: &str) -> HealthStatus {
        self.statuses.read().get(service).copied().unwrap_or_default()
    }

    /// Set both the named service and the overall entry
    pub fn set_service_and_overall(&self, service: &str, status: HealthStatus) {
        self.set(service, status);
        self.set(OVERALL, status);
    }
}

fn display_name(service: &str) -> &str {
    if service.is_empty() { "<overall>" } else { service }
}
