//! Declarative pod descriptors.
//!
//! These are produced by an external pod-spec builder from the build-step
//! DSL and are consumed read-only by the orchestrator. The orchestrator
//! converts them into cluster objects but never invents their content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::connector::{GitConnector, PublishConnector, RegistryConnector};
use crate::secret::{EncryptedRef, SecretVariable};

/// Role of a container within a build pod.
///
/// Only used when the descriptor is built; orchestration treats all roles
/// alike apart from placing init containers in `initContainers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRole {
    /// Runs to completion before the other containers start.
    Init,
    /// Long-running container that receives step commands over exec.
    #[default]
    StepExecutor,
    /// Anything else (sidecars, helpers).
    Other,
}

/// Reference to a container image plus optional inline credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetails {
    /// Repository, including registry host when present.
    pub name: String,
    /// Tag or digest.
    #[serde(default = "ImageDetails::default_tag")]
    pub tag: String,
    /// Registry URL when it differs from the image host.
    #[serde(default)]
    pub registry_url: Option<String>,
    /// Inline registry username.
    #[serde(default)]
    pub username: Option<String>,
    /// Inline encrypted registry password.
    #[serde(default)]
    pub password: Option<EncryptedRef>,
}

impl ImageDetails {
    fn default_tag() -> String {
        "latest".to_string()
    }

    /// Parse `name[:tag]`, keeping registry ports (`host:5000/app`) in the name.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let last_slash = reference.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match reference[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&reference[..split], &reference[split + 1..])
            }
            None => (reference, "latest"),
        };
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
            registry_url: None,
            username: None,
            password: None,
        }
    }

    /// Full image reference as written into the container spec.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.tag.starts_with("sha256:") {
            format!("{}@{}", self.name, self.tag)
        } else {
            format!("{}:{}", self.name, self.tag)
        }
    }

    /// Registry host: the explicit URL, or the first path segment when it
    /// looks like a host, or Docker Hub.
    #[must_use]
    pub fn registry_host(&self) -> String {
        if let Some(url) = &self.registry_url {
            return url.clone();
        }
        match self.name.split_once('/') {
            Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => {
                host.to_string()
            }
            _ => "https://index.docker.io/v1/".to_string(),
        }
    }

    /// Returns true if inline credentials are present.
    #[must_use]
    pub const fn has_inline_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// An image together with the registry connector used to pull it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetailsWithConnector {
    /// The image.
    #[serde(flatten)]
    pub image: ImageDetails,
    /// Registry credentials, if the registry is private.
    #[serde(default)]
    pub connector: Option<RegistryConnector>,
}

impl From<ImageDetails> for ImageDetailsWithConnector {
    fn from(image: ImageDetails) -> Self {
        Self {
            image,
            connector: None,
        }
    }
}

/// A named container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPortSpec {
    /// Port name.
    pub name: Option<String>,
    /// Port number.
    pub port: u16,
}

/// Where a pod volume is mounted inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMountSpec {
    /// Volume name (a PVC volume name or an `emptyDir` name).
    pub name: String,
    /// Mount path inside the container.
    pub mount_path: String,
}

/// Request for a persistent volume claim created before the pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClaimRequest {
    /// Pod volume name that refers to the claim.
    pub volume_name: String,
    /// Claim name.
    pub claim_name: String,
    /// Storage class; cluster default when absent.
    #[serde(default)]
    pub storage_class: Option<String>,
    /// Requested size in MiB.
    pub size_mib: u32,
}

/// One container in a build pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Container name.
    pub name: String,
    /// Container role.
    #[serde(default)]
    pub role: ContainerRole,
    /// Image to run.
    pub image: ImageDetailsWithConnector,
    /// Entrypoint override.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Plain environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Build-time secret variables.
    #[serde(default)]
    pub secret_variables: Vec<SecretVariable>,
    /// Connectors exposed as environment secrets, keyed by alias.
    #[serde(default)]
    pub connector_secrets: BTreeMap<String, PublishConnector>,
    /// Exposed ports.
    #[serde(default)]
    pub ports: Vec<ContainerPortSpec>,
    /// CPU request and limit in millicores.
    #[serde(default)]
    pub cpu_millicores: Option<u32>,
    /// Memory request and limit in MiB.
    #[serde(default)]
    pub memory_mib: Option<u32>,
    /// Working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Volume mounts.
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMountSpec>,
    /// Run privileged (e.g. docker-in-docker).
    #[serde(default)]
    pub privileged: bool,
}

impl ContainerDescriptor {
    /// A step-executor container with no extra configuration.
    #[must_use]
    pub fn step(name: impl Into<String>, image: ImageDetails) -> Self {
        Self {
            name: name.into(),
            role: ContainerRole::StepExecutor,
            image: image.into(),
            commands: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            secret_variables: Vec::new(),
            connector_secrets: BTreeMap::new(),
            ports: Vec::new(),
            cpu_millicores: None,
            memory_mib: None,
            working_dir: None,
            volume_mounts: Vec::new(),
            privileged: false,
        }
    }

    /// Attach a registry connector to the image.
    #[must_use]
    pub fn with_registry(mut self, connector: RegistryConnector) -> Self {
        self.image.connector = Some(connector);
        self
    }

    /// Add a secret variable.
    #[must_use]
    pub fn with_secret_variable(mut self, variable: SecretVariable) -> Self {
        self.secret_variables.push(variable);
        self
    }
}

/// A pod to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodDescriptor {
    /// Pod name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Extra pod labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Containers in declaration order.
    pub containers: Vec<ContainerDescriptor>,
    /// Git remote the build clones from.
    #[serde(default)]
    pub git_connector: Option<GitConnector>,
    /// Claims to create before the pod.
    #[serde(default)]
    pub volume_claims: Vec<VolumeClaimRequest>,
    /// Scratch `emptyDir` volume names.
    #[serde(default)]
    pub empty_dirs: Vec<String>,
    /// Service account for the pod.
    #[serde(default)]
    pub service_account: Option<String>,
    /// Node selector.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

impl PodDescriptor {
    /// An empty descriptor for the given pod.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            containers: Vec::new(),
            git_connector: None,
            volume_claims: Vec::new(),
            empty_dirs: Vec::new(),
            service_account: None,
            node_selector: BTreeMap::new(),
        }
    }

    /// Append a container.
    #[must_use]
    pub fn with_container(mut self, container: ContainerDescriptor) -> Self {
        self.containers.push(container);
        self
    }

    /// Set the git connector.
    #[must_use]
    pub fn with_git(mut self, connector: GitConnector) -> Self {
        self.git_connector = Some(connector);
        self
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A sidecar pod reachable through a cluster Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePodDescriptor {
    /// The pod.
    pub pod: PodDescriptor,
    /// Service name.
    pub service_name: String,
    /// Ports exposed by the service (target port equals service port).
    pub ports: Vec<u16>,
    /// Selector matching the pod's labels.
    pub selector: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_image_references() {
        let plain = ImageDetails::parse("alpine");
        assert_eq!(plain.name, "alpine");
        assert_eq!(plain.tag, "latest");

        let tagged = ImageDetails::parse("golang:1.22");
        assert_eq!(tagged.full_name(), "golang:1.22");

        let with_port = ImageDetails::parse("registry.local:5000/team/app");
        assert_eq!(with_port.name, "registry.local:5000/team/app");
        assert_eq!(with_port.tag, "latest");

        let both = ImageDetails::parse("registry.local:5000/team/app:v2");
        assert_eq!(both.name, "registry.local:5000/team/app");
        assert_eq!(both.tag, "v2");
    }

    #[test]
    fn registry_host_detection() {
        assert_eq!(
            ImageDetails::parse("gcr.io/project/app:1").registry_host(),
            "gcr.io"
        );
        assert_eq!(
            ImageDetails::parse("library/redis").registry_host(),
            "https://index.docker.io/v1/"
        );

        let mut explicit = ImageDetails::parse("app");
        explicit.registry_url = Some("https://registry.example.com".into());
        assert_eq!(explicit.registry_host(), "https://registry.example.com");
    }

    #[test]
    fn inline_credentials_need_both_parts() {
        let mut image = ImageDetails::parse("app");
        assert!(!image.has_inline_credentials());
        image.username = Some("ci".into());
        assert!(!image.has_inline_credentials());
        image.password = Some(EncryptedRef::new("acct/pass"));
        assert!(image.has_inline_credentials());
    }

    #[test]
    fn pod_descriptor_deserializes_with_defaults() {
        let json = r#"{
            "name": "build-1",
            "namespace": "ci",
            "containers": [{"name": "step", "image": {"name": "alpine"}}]
        }"#;
        let pod: PodDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(pod.containers[0].role, ContainerRole::StepExecutor);
        assert_eq!(pod.containers[0].image.image.tag, "latest");
        assert!(pod.containers[0].image.connector.is_none());
        assert!(pod.git_connector.is_none());
    }
}
