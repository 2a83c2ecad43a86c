//! Conversion of build descriptors into Kubernetes objects.
//!
//! The descriptor decides what the pod contains; this module only maps it
//! onto the Kubernetes schema and wires in the secrets staged for it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource, EnvVar, EnvVarSource,
    LocalObjectReference, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, ResourceRequirements, Secret, SecretEnvSource,
    SecretKeySelector, SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kiln_core::{ContainerDescriptor, ContainerRole, PodDescriptor, SecretMaterial};
use kube::api::ObjectMeta;

/// Label carrying the build pod an object belongs to.
pub const POD_LABEL: &str = "kiln.io/pod";

/// Label marking objects created by kiln.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

const MANAGED_BY: &str = "kiln";

/// Name of the per-pod secret holding staged environment secrets.
#[must_use]
pub fn env_secret_name(pod_name: &str) -> String {
    format!("{pod_name}-secret-env")
}

/// Name of the `index`-th image pull secret of a pod.
#[must_use]
pub fn registry_secret_name(pod_name: &str, index: usize) -> String {
    format!("{pod_name}-registry-{index}")
}

/// An environment variable sourced from the pod's env secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEnvRef {
    /// Variable name inside the container.
    pub env_name: String,
    /// Key in the env secret.
    pub key: String,
}

/// Secrets created for a pod, referenced from its spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSecretRefs {
    /// Image pull secrets.
    pub image_pull_secrets: Vec<String>,
    /// Git credentials secret, exposed to every container via `envFrom`.
    pub git_secret: Option<String>,
    /// The env secret, when any container declares secret variables.
    pub env_secret: Option<String>,
    /// Per-container references into the env secret.
    pub env_refs: BTreeMap<String, Vec<SecretEnvRef>>,
}

/// Labels applied to a pod: descriptor labels plus kiln's own.
#[must_use]
pub fn pod_labels(descriptor: &PodDescriptor) -> BTreeMap<String, String> {
    let mut labels = descriptor.labels.clone();
    labels.insert(POD_LABEL.to_string(), descriptor.name.clone());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

/// Metadata for a secret owned by `pod_name`; shared secrets pass `None`.
#[must_use]
pub fn secret_metadata(name: &str, namespace: &str, pod_name: Option<&str>) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    if let Some(pod_name) = pod_name {
        labels.insert(POD_LABEL.to_string(), pod_name.to_string());
    }

    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Label a secret as belonging to `pod_name`.
pub fn own_secret(secret: &mut Secret, pod_name: &str) {
    secret
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(POD_LABEL.to_string(), pod_name.to_string());
}

/// Build an opaque secret from staged material.
#[must_use]
pub fn build_opaque_secret(
    metadata: ObjectMeta,
    entries: &BTreeMap<String, SecretMaterial>,
) -> Secret {
    let data = entries
        .iter()
        .map(|(key, material)| (key.clone(), ByteString(material.bytes().to_vec())))
        .collect();

    Secret {
        metadata,
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Build the Kubernetes pod for a descriptor.
#[must_use]
pub fn build_pod(descriptor: &PodDescriptor, refs: &PodSecretRefs) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(descriptor.name.clone()),
            namespace: Some(descriptor.namespace.clone()),
            labels: Some(pod_labels(descriptor)),
            ..Default::default()
        },
        spec: Some(build_pod_spec(descriptor, refs)),
        ..Default::default()
    }
}

fn build_pod_spec(descriptor: &PodDescriptor, refs: &PodSecretRefs) -> PodSpec {
    let (init, main): (Vec<_>, Vec<_>) = descriptor
        .containers
        .iter()
        .partition(|c| c.role == ContainerRole::Init);

    let init_containers: Vec<Container> = init.iter().map(|c| build_container(c, refs)).collect();

    let image_pull_secrets = (!refs.image_pull_secrets.is_empty()).then(|| {
        refs.image_pull_secrets
            .iter()
            .map(|name| LocalObjectReference { name: name.clone() })
            .collect()
    });

    let volumes = build_volumes(descriptor);

    PodSpec {
        containers: main.iter().map(|c| build_container(c, refs)).collect(),
        init_containers: (!init_containers.is_empty()).then_some(init_containers),
        image_pull_secrets,
        volumes: (!volumes.is_empty()).then_some(volumes),
        restart_policy: Some("Never".to_string()),
        service_account_name: descriptor.service_account.clone(),
        node_selector: (!descriptor.node_selector.is_empty())
            .then(|| descriptor.node_selector.clone()),
        ..Default::default()
    }
}

fn build_volumes(descriptor: &PodDescriptor) -> Vec<Volume> {
    let claims = descriptor.volume_claims.iter().map(|claim| Volume {
        name: claim.volume_name.clone(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.claim_name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    });

    let scratch = descriptor.empty_dirs.iter().map(|name| Volume {
        name: name.clone(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });

    claims.chain(scratch).collect()
}

fn build_container(container: &ContainerDescriptor, refs: &PodSecretRefs) -> Container {
    let env = build_env_vars(container, refs);

    let env_from = refs.git_secret.as_ref().map(|name| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    let ports: Vec<ContainerPort> = container
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: i32::from(p.port),
            name: p.name.clone(),
            ..Default::default()
        })
        .collect();

    let volume_mounts: Vec<VolumeMount> = container
        .volume_mounts
        .iter()
        .map(|m| VolumeMount {
            name: m.name.clone(),
            mount_path: m.mount_path.clone(),
            ..Default::default()
        })
        .collect();

    Container {
        name: container.name.clone(),
        image: Some(container.image.image.full_name()),
        command: (!container.commands.is_empty()).then(|| container.commands.clone()),
        args: (!container.args.is_empty()).then(|| container.args.clone()),
        env: (!env.is_empty()).then_some(env),
        env_from,
        ports: (!ports.is_empty()).then_some(ports),
        resources: build_resources(container.cpu_millicores, container.memory_mib),
        working_dir: container.working_dir.clone(),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        security_context: container.privileged.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_env_vars(container: &ContainerDescriptor, refs: &PodSecretRefs) -> Vec<EnvVar> {
    let plain = container.env.iter().map(|(name, value)| EnvVar {
        name: name.clone(),
        value: Some(value.clone()),
        ..Default::default()
    });

    let secret_refs = match (&refs.env_secret, refs.env_refs.get(&container.name)) {
        (Some(secret_name), Some(entries)) => entries
            .iter()
            .map(|entry| EnvVar {
                name: entry.env_name.clone(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret_name.clone(),
                        key: entry.key.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        _ => Vec::new(),
    };

    plain.chain(secret_refs).collect()
}

fn build_resources(cpu_millicores: Option<u32>, memory_mib: Option<u32>) -> Option<ResourceRequirements> {
    let mut quantities = BTreeMap::new();
    if let Some(cpu) = cpu_millicores {
        quantities.insert("cpu".to_string(), Quantity(format!("{cpu}m")));
    }
    if let Some(memory) = memory_mib {
        quantities.insert("memory".to_string(), Quantity(format!("{memory}Mi")));
    }
    if quantities.is_empty() {
        return None;
    }

    Some(ResourceRequirements {
        requests: Some(quantities.clone()),
        limits: Some(quantities),
        ..Default::default()
    })
}

/// Build a `ReadWriteOnce` claim.
#[must_use]
pub fn build_pvc(
    namespace: &str,
    claim_name: &str,
    storage_class: Option<&str>,
    size_mib: u32,
) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(format!("{size_mib}Mi")));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage_class.map(str::to_string),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build a ClusterIP service whose target ports equal its ports.
#[must_use]
pub fn build_service(
    namespace: &str,
    service_name: &str,
    selector: &BTreeMap<String, String>,
    ports: &[u16],
) -> Service {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(service_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector.clone()),
            ports: Some(
                ports
                    .iter()
                    .map(|&port| ServicePort {
                        name: Some(format!("port-{port}")),
                        port: i32::from(port),
                        target_port: Some(IntOrString::Int(i32::from(port))),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}
