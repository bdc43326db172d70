//! Static registry of the platform's own core services.
//!
//! Core services have a known image, a known connection port and, on
//! Kubernetes, a known persistent-volume size. Everything else resolves
//! its connection port from its exposed ports or the platform default.

use std::collections::HashMap;

/// Fallback when neither the registry nor the exposed ports yield one.
pub const DEFAULT_CONNECTION_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct CoreService {
    pub name: &'static str,
    pub image: &'static str,
    pub connection_port: u16,
    /// On-demand PVC size on Kubernetes, in gigabytes.
    pub volume_size_gb: u32,
    /// Path the service persists its state under.
    pub volume_path: &'static str,
}

/// Registry key of the platform's own backend service.
pub const BACKEND: &str = "backend";

lazy_static::lazy_static! {
    static ref CORE_SERVICES: HashMap<&'static str, CoreService> = {
        let mut m = HashMap::new();
        m.insert(BACKEND, CoreService {
            name: BACKEND,
            image: "mlspace/backend:latest",
            connection_port: 8080,
            volume_size_gb: 2,
            volume_path: "/var/lib/mlspace",
        });
        m.insert("minio", CoreService {
            name: "minio",
            image: "minio/minio:latest",
            connection_port: 9000,
            volume_size_gb: 20,
            volume_path: "/data",
        });
        m.insert("postgres", CoreService {
            name: "postgres",
            image: "postgres:15",
            connection_port: 5432,
            volume_size_gb: 5,
            volume_path: "/var/lib/postgresql/data",
        });
        m.insert("dashboard", CoreService {
            name: "dashboard",
            image: "mlspace/dashboard:latest",
            connection_port: 8090,
            volume_size_gb: 1,
            volume_path: "/var/lib/dashboard",
        });
        m
    };
}

pub fn lookup(name: &str) -> Option<&'static CoreService> {
    CORE_SERVICES.get(name)
}

/// Core services in a stable order, for deterministic install/update runs.
pub fn all() -> Vec<&'static CoreService> {
    let mut services: Vec<_> = CORE_SERVICES.values().collect();
    services.sort_by_key(|s| s.name);
    services
}

/// Resolve the primary connection port: core-service registry first, then
/// the first exposed port, then the platform default.
pub fn connection_port(feature_name: &str, exposed: &std::collections::BTreeSet<u16>) -> u16 {
    // registry keys are plain service names; generated names carry a
    // namespace prefix, so match on the suffix as well
    if let Some(core) = CORE_SERVICES
        .iter()
        .find(|(key, _)| feature_name == **key || feature_name.ends_with(&format!("-{}", key)))
        .map(|(_, v)| v)
    {
        return core.connection_port;
    }
    exposed
        .iter()
        .next()
        .copied()
        .unwrap_or(DEFAULT_CONNECTION_PORT)
}

/// PVC size for a core-service claim; non-core claims get a conservative
/// default.
pub fn volume_size_gb(claim: &str) -> u32 {
    CORE_SERVICES
        .iter()
        .find(|(key, _)| claim == **key || claim.contains(*key))
        .map(|(_, v)| v.volume_size_gb)
        .unwrap_or(5)
}
