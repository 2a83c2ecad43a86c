//! Connector types: typed references to external systems plus their
//! encrypted credentials.
//!
//! Every connector family is a closed enum so that adding a new kind is a
//! compiler-checked change in each place that dispatches on it.

use serde::{Deserialize, Serialize};

use crate::secret::EncryptedRef;

/// Target cluster plus the credentials used to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConnector {
    /// API server URL. Ignored for [`ClusterAuth::InCluster`] and
    /// [`ClusterAuth::Kubeconfig`].
    #[serde(default)]
    pub master_url: Option<String>,
    /// How to authenticate against the API server.
    pub auth: ClusterAuth,
    /// PEM CA bundle for the API server.
    #[serde(default)]
    pub ca_cert: Option<EncryptedRef>,
    /// Skip TLS verification of the API server.
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl ClusterConnector {
    /// A connector that uses the pod's own service account.
    #[must_use]
    pub const fn in_cluster() -> Self {
        Self {
            master_url: None,
            auth: ClusterAuth::InCluster,
            ca_cert: None,
            skip_tls_verify: false,
        }
    }
}

/// Authentication mode for a cluster connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterAuth {
    /// Use the mounted service account of the running process.
    InCluster,
    /// Bearer token of a service account.
    ServiceAccountToken {
        /// Encrypted token.
        token: EncryptedRef,
    },
    /// Basic authentication.
    UsernamePassword {
        /// Username.
        username: String,
        /// Encrypted password.
        password: EncryptedRef,
    },
    /// Mutual TLS with a client certificate.
    ClientCertificate {
        /// Encrypted PEM certificate.
        cert: EncryptedRef,
        /// Encrypted PEM private key.
        key: EncryptedRef,
    },
    /// A complete kubeconfig document.
    Kubeconfig {
        /// Encrypted kubeconfig YAML.
        content: EncryptedRef,
    },
}

impl ClusterAuth {
    /// Short name of the auth mode for logs.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::InCluster => "in_cluster",
            Self::ServiceAccountToken { .. } => "service_account_token",
            Self::UsernamePassword { .. } => "username_password",
            Self::ClientCertificate { .. } => "client_certificate",
            Self::Kubeconfig { .. } => "kubeconfig",
        }
    }
}

/// Registry credentials attached to an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryConnector {
    /// Any Docker v2 registry with username/password.
    Docker {
        /// Registry URL used as the `.dockercfg` key.
        url: String,
        /// Username.
        username: String,
        /// Encrypted password.
        password: EncryptedRef,
    },
    /// Google Container Registry / Artifact Registry.
    Gcr {
        /// Registry host, e.g. `gcr.io`.
        url: String,
        /// Encrypted service-account JSON key.
        service_account_key: EncryptedRef,
    },
    /// Amazon Elastic Container Registry.
    Ecr {
        /// Where the AWS credentials come from.
        credentials: AwsCredentialSource,
    },
}

impl RegistryConnector {
    /// Short name of the registry kind for logs and error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Docker { .. } => "docker",
            Self::Gcr { .. } => "gcr",
            Self::Ecr { .. } => "ecr",
        }
    }
}

/// Source of AWS credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AwsCredentialSource {
    /// Static access key pair.
    AccessKey {
        /// Access key id.
        access_key_id: String,
        /// Encrypted secret access key.
        secret_key: EncryptedRef,
    },
    /// Whatever credentials the token-exchange backend already holds.
    Inherited,
}

/// Source-control remote used to clone the build's sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConnector {
    /// Remote URL.
    pub url: String,
    /// How to authenticate.
    pub auth: GitAuth,
}

/// Git authentication method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitAuth {
    /// SSH private key.
    Ssh {
        /// Encrypted PEM private key.
        key: EncryptedRef,
    },
    /// HTTP(S) username and password or token.
    Http {
        /// Username.
        username: String,
        /// Encrypted password or token.
        password: EncryptedRef,
    },
}

/// A connector exposed to build steps as environment secrets, e.g.
/// credentials to publish artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishConnector {
    /// Docker registry publish credentials.
    Docker {
        /// Registry URL.
        url: String,
        /// Username.
        username: String,
        /// Encrypted password.
        password: EncryptedRef,
    },
    /// AWS access key pair.
    Aws {
        /// Access key id.
        access_key_id: String,
        /// Encrypted secret access key.
        secret_key: EncryptedRef,
    },
    /// GCP service-account key, delivered as a file.
    Gcp {
        /// Encrypted service-account JSON key.
        service_account_key: EncryptedRef,
    },
}
