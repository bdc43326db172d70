use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A long-running deployment as reported by a container runtime.
///
/// Status and health are recomputed from the backend on every read,
/// never cached in this struct.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Service {
    /// Backend-native identifier (container id, deployment name).
    pub id: String,
    /// Backend-native resource name.
    pub container_name: String,
    /// Human-facing feature name the service was deployed under.
    pub name: String,
    pub image: String,
    /// Free-text runtime status ("running", "exited", "Available", ...).
    pub status: String,
    pub healthy: bool,
    /// The primary port clients connect to. Resolved from the core-service
    /// registry, else the first exposed port, else the platform default.
    pub connection_port: Option<u16>,
    /// Always a superset containing `connection_port`.
    pub exposed_ports: BTreeSet<u16>,
    /// Resolved environment variables.
    pub configuration: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Service {
    /// Human name, falling back to the native name when the feature-name
    /// label is missing.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.container_name
        } else {
            &self.name
        }
    }
}
