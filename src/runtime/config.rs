//! Backend-neutral description of a thing to run.
//!
//! A `DeploymentConfig` is built by callers per deploy call and translated
//! into native Docker or Kubernetes resources by the active backend. It is
//! never persisted.

use crate::runtime::error::RuntimeError;
use crate::runtime::FeatureKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

lazy_static::lazy_static! {
    static ref NAME_INVALID: Regex = Regex::new(r"[^a-z0-9-]+").unwrap();
}

/// Kubernetes label values and DNS labels top out at 63 characters.
const MAX_NAME_LEN: usize = 63;

/// A port to publish, parsed from `"port"` or `"hostPort:containerPort"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: Option<u16>,
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| RuntimeError::Validation(format!("invalid port: {}", p)))
        };
        match s.split_once(':') {
            Some((host, container)) => Ok(PortMapping {
                host: Some(parse(host)?),
                container: parse(container)?,
            }),
            None => Ok(PortMapping {
                host: None,
                container: parse(s)?,
            }),
        }
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.host {
            Some(host) => write!(f, "{}:{}", host, self.container),
            None => write!(f, "{}", self.container),
        }
    }
}

/// The mount kinds the platform supports, one encode/decode pair per kind.
///
/// String encodings:
/// - bind:   `/host/path:/container/path[:ro]`
/// - volume: `name:/container/path`
/// - nfs:    `ip@/remote/path:/container/path[:ro]`
/// - secret: `secret-name:/container/path`
/// - pvc:    `claim-name:/container/path`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MountSpec {
    Bind {
        source: String,
        target: String,
        read_only: bool,
    },
    Volume {
        name: String,
        target: String,
    },
    Nfs {
        server: String,
        remote_path: String,
        target: String,
        read_only: bool,
    },
    Secret {
        name: String,
        target: String,
    },
    Pvc {
        claim: String,
        target: String,
    },
}

impl MountSpec {
    /// Container-side path of the mount.
    pub fn target(&self) -> &str {
        match self {
            MountSpec::Bind { target, .. }
            | MountSpec::Volume { target, .. }
            | MountSpec::Nfs { target, .. }
            | MountSpec::Secret { target, .. }
            | MountSpec::Pvc { target, .. } => target,
        }
    }

    pub fn decode_bind(s: &str) -> Result<Self, RuntimeError> {
        let (source, target, read_only) = split_path_mount(s)?;
        Ok(MountSpec::Bind {
            source,
            target,
            read_only,
        })
    }

    pub fn encode_bind(source: &str, target: &str, read_only: bool) -> String {
        if read_only {
            format!("{}:{}:ro", source, target)
        } else {
            format!("{}:{}", source, target)
        }
    }

    pub fn decode_volume(s: &str) -> Result<Self, RuntimeError> {
        let (name, target) = split_name_mount(s)?;
        Ok(MountSpec::Volume { name, target })
    }

    pub fn decode_nfs(s: &str) -> Result<Self, RuntimeError> {
        let (server, rest) = s
            .split_once('@')
            .ok_or_else(|| RuntimeError::Validation(format!("invalid nfs mount: {}", s)))?;
        if server.is_empty() {
            return Err(RuntimeError::Validation(format!("invalid nfs mount: {}", s)));
        }
        let (remote_path, target, read_only) = split_path_mount(rest)?;
        Ok(MountSpec::Nfs {
            server: server.to_string(),
            remote_path,
            target,
            read_only,
        })
    }

    pub fn decode_secret(s: &str) -> Result<Self, RuntimeError> {
        let (name, target) = split_name_mount(s)?;
        Ok(MountSpec::Secret { name, target })
    }

    pub fn decode_pvc(s: &str) -> Result<Self, RuntimeError> {
        let (claim, target) = split_name_mount(s)?;
        Ok(MountSpec::Pvc { claim, target })
    }

    /// Canonical string encoding, the inverse of the matching decode.
    pub fn encode(&self) -> String {
        match self {
            MountSpec::Bind {
                source,
                target,
                read_only,
            } => Self::encode_bind(source, target, *read_only),
            MountSpec::Volume { name, target } => format!("{}:{}", name, target),
            MountSpec::Nfs {
                server,
                remote_path,
                target,
                read_only,
            } => {
                if *read_only {
                    format!("{}@{}:{}:ro", server, remote_path, target)
                } else {
                    format!("{}@{}:{}", server, remote_path, target)
                }
            }
            MountSpec::Secret { name, target } => format!("{}:{}", name, target),
            MountSpec::Pvc { claim, target } => format!("{}:{}", claim, target),
        }
    }
}

// `/source:/target[:ro]` where both sides are absolute paths
fn split_path_mount(s: &str) -> Result<(String, String, bool), RuntimeError> {
    let (raw, read_only) = match s.strip_suffix(":ro") {
        Some(raw) => (raw, true),
        None => (s, false),
    };
    // the second absolute path starts the target
    let target_start = raw[1..]
        .find(":/")
        .map(|i| i + 1)
        .ok_or_else(|| RuntimeError::Validation(format!("invalid mount: {}", s)))?;
    let source = &raw[..target_start];
    let target = &raw[target_start + 1..];
    if !source.starts_with('/') || !target.starts_with('/') {
        return Err(RuntimeError::Validation(format!("invalid mount: {}", s)));
    }
    Ok((source.to_string(), target.to_string(), read_only))
}

// `name:/target`
fn split_name_mount(s: &str) -> Result<(String, String), RuntimeError> {
    let (name, target) = s
        .split_once(":/")
        .ok_or_else(|| RuntimeError::Validation(format!("invalid mount: {}", s)))?;
    if name.is_empty() || name.contains('/') {
        return Err(RuntimeError::Validation(format!("invalid mount: {}", s)));
    }
    Ok((name.to_string(), format!("/{}", target)))
}

/// Backend-neutral deployment description. Pure data, built by callers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeploymentConfig {
    pub image: String,
    /// Derived from feature name + namespace; unique within the runtime's
    /// namespace/project scope.
    pub name: String,
    pub env: HashMap<String, String>,
    /// Always carries namespace, feature-type and feature-name; project
    /// when scoped. Labels are the only discovery key when the generated
    /// name is unknown to the caller.
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub mounts: Vec<MountSpec>,
    /// Single simple-volume convenience: a container path persisted through
    /// a `<name>-data` volume (named volume on Docker, claim on Kubernetes).
    pub volume_path: Option<String>,
    /// Networks to attach on Docker, created on first use. Kubernetes
    /// scopes traffic with a per-project NetworkPolicy instead.
    pub networks: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub node_selector: Option<HashMap<String, String>>,
    /// Per-deployment CPU limit in cores; the platform default applies when
    /// unset.
    pub cpu_limit: Option<f64>,
    /// Per-deployment memory limit in megabytes.
    pub memory_mb: Option<i64>,
    pub feature: FeatureKind,
    /// Backend-specific extras, e.g. `privileged`, `service_account`.
    pub attributes: HashMap<String, serde_json::Value>,
}

impl DeploymentConfig {
    pub fn new(image: impl Into<String>, name: impl Into<String>, feature: FeatureKind) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            env: HashMap::new(),
            labels: HashMap::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            volume_path: None,
            networks: Vec::new(),
            cmd: None,
            node_selector: None,
            cpu_limit: None,
            memory_mb: None,
            feature,
            attributes: HashMap::new(),
        }
    }

    /// Scope the deployment to a project via the project label.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.labels
            .insert(crate::runtime::labels::PROJECT.to_string(), project.into());
        self
    }

    /// Record the human-facing feature name the resource is discoverable by.
    pub fn with_feature_name(mut self, name: impl Into<String>) -> Self {
        self.labels
            .insert(crate::runtime::labels::FEATURE_NAME.to_string(), name.into());
        self
    }

    pub fn project(&self) -> Option<&str> {
        self.labels
            .get(crate::runtime::labels::PROJECT)
            .map(String::as_str)
    }

    /// Human feature name, falling back to the generated resource name.
    pub fn feature_name(&self) -> &str {
        self.labels
            .get(crate::runtime::labels::FEATURE_NAME)
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    /// Derive the resource name from a feature name and the platform
    /// namespace: lowercased, DNS-label safe, at most 63 characters.
    pub fn generate_name(feature_name: &str, namespace: &str) -> String {
        let raw = format!("{}-{}", namespace, feature_name).to_lowercase();
        let sanitized = NAME_INVALID.replace_all(&raw, "-");
        let trimmed = sanitized.trim_matches('-');
        let mut name: String = trimmed.chars().take(MAX_NAME_LEN).collect();
        while name.ends_with('-') {
            name.pop();
        }
        name
    }

    pub fn attribute_bool(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Whether any port asks for an explicit host:container binding.
    pub fn has_explicit_host_ports(&self) -> bool {
        self.ports.iter().any(|p| p.host.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mapping_parses_bare_port() {
        let p: PortMapping = "8080".parse().unwrap();
        assert_eq!(p.host, None);
        assert_eq!(p.container, 8080);
    }

    #[test]
    fn port_mapping_parses_host_container_pair() {
        let p: PortMapping = "80:8080".parse().unwrap();
        assert_eq!(p.host, Some(80));
        assert_eq!(p.container, 8080);
    }

    #[test]
    fn port_mapping_rejects_garbage() {
        assert!("http".parse::<PortMapping>().is_err());
        assert!("80:http".parse::<PortMapping>().is_err());
        assert!("".parse::<PortMapping>().is_err());
    }

    #[test]
    fn bind_mount_round_trip() {
        let m = MountSpec::decode_bind("/data/projects:/workspace:ro").unwrap();
        assert_eq!(
            m,
            MountSpec::Bind {
                source: "/data/projects".into(),
                target: "/workspace".into(),
                read_only: true,
            }
        );
        assert_eq!(m.encode(), "/data/projects:/workspace:ro");
    }

    #[test]
    fn bind_mount_without_ro() {
        let m = MountSpec::decode_bind("/a:/b").unwrap();
        assert_eq!(m.encode(), "/a:/b");
    }

    #[test]
    fn nfs_mount_round_trip() {
        let m = MountSpec::decode_nfs("10.0.0.5@/exports/data:/mnt/data").unwrap();
        assert_eq!(
            m,
            MountSpec::Nfs {
                server: "10.0.0.5".into(),
                remote_path: "/exports/data".into(),
                target: "/mnt/data".into(),
                read_only: false,
            }
        );
        assert_eq!(m.encode(), "10.0.0.5@/exports/data:/mnt/data");
    }

    #[test]
    fn volume_and_secret_and_pvc_mounts() {
        let v = MountSpec::decode_volume("workspace-data:/workspace").unwrap();
        assert_eq!(v.target(), "/workspace");
        let s = MountSpec::decode_secret("api-token:/run/secrets").unwrap();
        assert_eq!(s.encode(), "api-token:/run/secrets");
        let p = MountSpec::decode_pvc("minio-data:/data").unwrap();
        assert_eq!(p.encode(), "minio-data:/data");
    }

    #[test]
    fn invalid_mounts_are_rejected() {
        assert!(MountSpec::decode_bind("relative:/x").is_err());
        assert!(MountSpec::decode_nfs("/no/server:/x").is_err());
        assert!(MountSpec::decode_volume("/abs-name:/x").is_err());
    }

    #[test]
    fn generated_names_are_dns_safe() {
        let name = DeploymentConfig::generate_name("My Experiment #1", "mlspace");
        assert_eq!(name, "mlspace-my-experiment-1");

        let long = "x".repeat(100);
        let name = DeploymentConfig::generate_name(&long, "mlspace");
        assert!(name.len() <= 63);
        assert!(!name.ends_with('-'));
    }
}
