//! `DeploymentConfig` to native Kubernetes object builders.
//!
//! Pure functions: every builder takes the already-resolved label map and
//! returns a complete object for the API server. The inverse direction
//! (reading env maps back out of a pod template) lives here too so the
//! round trip stays in one place.

use crate::runtime::{registry, DeploymentConfig, MountSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HostPathVolumeSource, NFSVolumeSource,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, ResourceRequirements, SecretVolumeSource, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, HashMap};

/// Resolved resource limits a pod runs under.
#[derive(Debug, Clone, Copy)]
pub struct PodLimits {
    pub cpu_cores: f64,
    pub memory_mb: i64,
}

fn metadata(name: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

fn env_vars(config: &DeploymentConfig) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = config
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect();
    env.sort_by(|a, b| a.name.cmp(&b.name));
    env
}

/// Read the env map back out of a container, the inverse of [`env_vars`].
pub fn env_map(container: &Container) -> HashMap<String, String> {
    container
        .env
        .iter()
        .flatten()
        .map(|var| (var.name.clone(), var.value.clone().unwrap_or_default()))
        .collect()
}

fn resources(limits: PodLimits) -> ResourceRequirements {
    let mut map = BTreeMap::new();
    map.insert("cpu".to_string(), Quantity(limits.cpu_cores.to_string()));
    map.insert("memory".to_string(), Quantity(format!("{}Mi", limits.memory_mb)));
    ResourceRequirements {
        limits: Some(map),
        ..Default::default()
    }
}

/// Mount translation: bind becomes hostPath, NFS an nfs volume, secret a
/// secret volume and PVC a claim reference. The simple `volume_path`
/// convenience becomes a `<name>-data` claim created on demand.
fn volumes(config: &DeploymentConfig) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut vols = Vec::new();
    let mut mounts = Vec::new();

    if let Some(path) = &config.volume_path {
        vols.push(Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: format!("{}-data", config.name),
                read_only: None,
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "data".to_string(),
            mount_path: path.clone(),
            ..Default::default()
        });
    }

    for (index, mount) in config.mounts.iter().enumerate() {
        let vol_name = format!("mnt-{}", index);
        let (volume, read_only, target) = match mount {
            MountSpec::Bind {
                source,
                target,
                read_only,
            } => (
                Volume {
                    name: vol_name.clone(),
                    host_path: Some(HostPathVolumeSource {
                        path: source.clone(),
                        type_: None,
                    }),
                    ..Default::default()
                },
                *read_only,
                target,
            ),
            MountSpec::Nfs {
                server,
                remote_path,
                target,
                read_only,
            } => (
                Volume {
                    name: vol_name.clone(),
                    nfs: Some(NFSVolumeSource {
                        server: server.clone(),
                        path: remote_path.clone(),
                        read_only: Some(*read_only),
                    }),
                    ..Default::default()
                },
                *read_only,
                target,
            ),
            MountSpec::Secret { name, target } => (
                Volume {
                    name: vol_name.clone(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(name.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                true,
                target,
            ),
            MountSpec::Pvc { claim, target } => (
                Volume {
                    name: vol_name.clone(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.clone(),
                        read_only: None,
                    }),
                    ..Default::default()
                },
                false,
                target,
            ),
            MountSpec::Volume { name, target } => (
                // a plain named volume has no cluster-level equivalent;
                // a claim of the same name is the closest translation
                Volume {
                    name: vol_name.clone(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: name.clone(),
                        read_only: None,
                    }),
                    ..Default::default()
                },
                false,
                target,
            ),
        };
        vols.push(volume);
        mounts.push(VolumeMount {
            name: vol_name,
            mount_path: target.clone(),
            read_only: read_only.then_some(true),
            ..Default::default()
        });
    }

    (vols, mounts)
}

/// Claims the backend must ensure exist before the pod can schedule.
pub fn claims(config: &DeploymentConfig) -> Vec<String> {
    let mut claims = Vec::new();
    if config.volume_path.is_some() {
        claims.push(format!("{}-data", config.name));
    }
    for mount in &config.mounts {
        match mount {
            MountSpec::Pvc { claim, .. } => claims.push(claim.clone()),
            MountSpec::Volume { name, .. } => claims.push(name.clone()),
            _ => {}
        }
    }
    claims
}

fn container(config: &DeploymentConfig, limits: PodLimits) -> Container {
    let (_, mounts) = volumes(config);
    let ports: Vec<ContainerPort> = config
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.container as i32,
            ..Default::default()
        })
        .collect();

    Container {
        name: config.name.clone(),
        image: Some(config.image.clone()),
        command: config.cmd.clone(),
        env: Some(env_vars(config)),
        ports: (!ports.is_empty()).then_some(ports),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        resources: Some(resources(limits)),
        ..Default::default()
    }
}

fn pod_template(
    config: &DeploymentConfig,
    labels: &BTreeMap<String, String>,
    limits: PodLimits,
    restart_policy: &str,
) -> PodTemplateSpec {
    let (vols, _) = volumes(config);
    let node_selector: Option<BTreeMap<String, String>> = config
        .node_selector
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect());

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container(config, limits)],
            volumes: (!vols.is_empty()).then_some(vols),
            node_selector,
            service_account_name: config.attribute_str("service_account").map(String::from),
            restart_policy: Some(restart_policy.to_string()),
            ..Default::default()
        }),
    }
}

pub fn deployment(
    config: &DeploymentConfig,
    labels: &BTreeMap<String, String>,
    limits: PodLimits,
) -> Deployment {
    Deployment {
        metadata: metadata(&config.name, labels),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: pod_template(config, labels, limits, "Always"),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `backoff_limit=0` and `restartPolicy=Never`: a failed job stays failed,
/// every run is a fresh Job object.
pub fn job(config: &DeploymentConfig, labels: &BTreeMap<String, String>, limits: PodLimits) -> Job {
    Job {
        metadata: metadata(&config.name, labels),
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: pod_template(config, labels, limits, "Never"),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cluster-IP by default; promoted to node-port when an explicit
/// host:container pair was requested and the cluster is not managed.
pub fn service(
    config: &DeploymentConfig,
    labels: &BTreeMap<String, String>,
    node_port: bool,
) -> Service {
    let ports: Vec<ServicePort> = config
        .ports
        .iter()
        .map(|p| ServicePort {
            name: Some(format!("port-{}", p.container)),
            port: p.container as i32,
            target_port: Some(IntOrString::Int(p.container as i32)),
            node_port: match (node_port, p.host) {
                (true, Some(host)) => Some(host as i32),
                _ => None,
            },
            ..Default::default()
        })
        .collect();

    Service {
        metadata: metadata(&config.name, labels),
        spec: Some(ServiceSpec {
            selector: Some(labels.clone()),
            ports: (!ports.is_empty()).then_some(ports),
            type_: Some(if node_port { "NodePort" } else { "ClusterIP" }.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// On-demand claim, sized by the core-service lookup table.
pub fn persistent_volume_claim(
    claim: &str,
    labels: &BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    let size = registry::volume_size_gb(claim);
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(format!("{}Gi", size)));

    PersistentVolumeClaim {
        metadata: metadata(claim, labels),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress restricted to pods of the same project.
pub fn network_policy(
    name: &str,
    labels: &BTreeMap<String, String>,
    project_selector: &BTreeMap<String, String>,
) -> NetworkPolicy {
    let selector = LabelSelector {
        match_labels: Some(project_selector.clone()),
        ..Default::default()
    };
    NetworkPolicy {
        metadata: metadata(name, labels),
        spec: Some(NetworkPolicySpec {
            pod_selector: selector.clone(),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    pod_selector: Some(selector),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            policy_types: Some(vec!["Ingress".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FeatureKind;

    const LIMITS: PodLimits = PodLimits {
        cpu_cores: 2.0,
        memory_mb: 4096,
    };

    fn config() -> DeploymentConfig {
        let mut config =
            DeploymentConfig::new("trainer:v2", "mlspace-trainer", FeatureKind::ProjectService);
        config.env.insert("MODEL".to_string(), "resnet".to_string());
        config.env.insert("EPOCHS".to_string(), "10".to_string());
        config
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("mlspace.namespace".to_string(), "mlspace".to_string())])
    }

    #[test]
    fn env_map_round_trips_exactly() {
        let mut config = config();
        config.mounts = vec![
            MountSpec::decode_bind("/data:/mnt/data").unwrap(),
            MountSpec::decode_nfs("10.0.0.5@/exports:/mnt/nfs").unwrap(),
        ];
        let deployment = deployment(&config, &labels(), LIMITS);
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(env_map(container), config.env);
    }

    #[test]
    fn jobs_never_retry() {
        let job = job(&config(), &labels(), LIMITS);
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(
            spec.template.spec.unwrap().restart_policy.as_deref(),
            Some("Never")
        );
    }

    #[test]
    fn deployments_run_a_single_replica() {
        let deployment = deployment(&config(), &labels(), LIMITS);
        assert_eq!(deployment.spec.unwrap().replicas, Some(1));
    }

    #[test]
    fn explicit_host_port_promotes_to_node_port() {
        let mut config = config();
        config.ports = vec!["30080:8888".parse().unwrap()];

        let promoted = service(&config, &labels(), true);
        let spec = promoted.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ports.unwrap()[0].node_port, Some(30080));

        // managed clusters always stay cluster-IP
        let managed = service(&config, &labels(), false);
        assert_eq!(managed.spec.unwrap().type_.as_deref(), Some("ClusterIP"));
    }

    #[test]
    fn mount_kinds_translate_to_native_volumes() {
        let mut config = config();
        config.mounts = vec![
            MountSpec::decode_bind("/host:/in:ro").unwrap(),
            MountSpec::decode_nfs("10.0.0.5@/exports:/nfs").unwrap(),
            MountSpec::decode_secret("api-token:/run/secret").unwrap(),
            MountSpec::decode_pvc("shared-data:/shared").unwrap(),
        ];
        let (vols, mounts) = volumes(&config);
        assert_eq!(vols.len(), 4);
        assert!(vols[0].host_path.is_some());
        assert!(vols[1].nfs.is_some());
        assert!(vols[2].secret.is_some());
        assert_eq!(
            vols[3]
                .persistent_volume_claim
                .as_ref()
                .map(|c| c.claim_name.as_str()),
            Some("shared-data")
        );
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(mounts[1].read_only, None);
    }

    #[test]
    fn volume_path_requires_a_data_claim() {
        let mut config = config();
        config.volume_path = Some("/var/lib/data".to_string());
        config.mounts = vec![MountSpec::decode_pvc("extra:/extra").unwrap()];
        assert_eq!(claims(&config), vec!["mlspace-trainer-data", "extra"]);
    }

    #[test]
    fn core_service_claims_are_sized_from_the_registry() {
        let claim = persistent_volume_claim("mlspace-minio-data", &labels());
        let requests = claim.spec.unwrap().resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("20Gi".to_string()));
    }
}
